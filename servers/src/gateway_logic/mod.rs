pub mod admin;
pub mod config;
pub mod downstream;
pub mod state;
