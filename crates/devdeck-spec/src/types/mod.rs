pub mod config;
pub mod project;
