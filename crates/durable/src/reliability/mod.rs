//! Reliability policies for activity execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Configurable retry with exponential backoff
//! - [`TimeoutError`] and the timeout checks shared by worker and engine

mod retry;
mod timeout;

pub use retry::RetryPolicy;
pub use timeout::{
    check_heartbeat, check_schedule_to_close, check_schedule_to_start, check_start_to_close,
    AttemptClock, AttemptTimeouts, TimeoutError, TimeoutType, MAX_TIMEOUT,
};
