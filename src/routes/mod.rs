pub mod deployment;
pub mod health_checks;
pub mod notifications;

pub use health_checks::*;
