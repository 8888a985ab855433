pub mod loader;
pub mod manifest;
pub mod store;
pub mod types;
