pub mod config;
pub mod workflows;

// Re-export main types
pub use config::{AppConfig, ConfigError};
pub use workflows::{registry, HelloWorldWorkflow, ProcessEchoActivity, HELLO_WORLD, TASK_LIST};
