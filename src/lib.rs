// Library crate; the binary and integration tests both build on it.

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod render;
pub mod settings;
pub mod step;
pub mod terminal;
pub mod view;
