pub mod id;
pub mod snowflake;

pub use id::{ConnectionId, PrefixedId};
pub use snowflake::{ClockError, SnowflakeGenerator, MAX_WORKER_ID};
