//! Activity abstractions
//!
//! Activities are units of work that are executed by workers. They:
//! - Run under a resolved [`ActivityInvocationPolicy`] (timeouts, retries)
//! - Can send heartbeats to indicate liveness
//! - Observe cooperative cancellation through their [`ActivityContext`]

mod context;
mod definition;
pub(crate) mod heartbeat;
mod policy;

#[cfg(test)]
pub(crate) use context::test_info;
pub use context::{ActivityContext, ActivityInfo, HeartbeatError, HeartbeatPayload};
pub use definition::{error_types, Activity, ActivityError, ActivityFailure};
pub use policy::{ActivityInvocationPolicy, ActivityOptions};
