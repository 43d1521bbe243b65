// Shared-state cache layer
//
// The safety fabric needs counters and breaker state that are visible across
// instances: sliding-window admissions, vendor failure windows, breaker
// state + probe accounting. This crate defines the SharedState trait and two
// implementations:
//
// - RedisSharedState: production backend over a multiplexed connection
// - InMemorySharedState: deterministic test double (time is always a
//   parameter, so tests drive the window edges exactly)
//
// Readers may observe eventually-consistent state; mutations are atomic
// (Lua script or single-command) per key.

pub mod memory;
pub mod redis_state;
pub mod state;

pub use memory::InMemorySharedState;
pub use redis_state::RedisSharedState;
pub use state::{BreakerSnapshot, SharedState, StateError, WindowAdmission};
