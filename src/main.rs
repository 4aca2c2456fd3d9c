fn main() {
    trellis::run();
}
