//! Core types, resources, and utilities shared across the application.

pub mod config;
pub mod forest;
pub mod helpers;
pub mod layout;
pub mod physics;
pub mod resources;
pub mod snap;
pub mod state;
