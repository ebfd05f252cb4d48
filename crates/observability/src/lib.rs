//! Process-wide tracing setup shared by the services and the operator CLI.

pub mod tracing;

pub use self::tracing::{LogFormat, init, init_with};
