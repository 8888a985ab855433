pub mod log_types;
pub mod preflight;
pub mod preflight_checker;
pub mod probe;
pub mod readiness;
pub mod runtime_detect;
pub mod service;
pub mod supervisor;
