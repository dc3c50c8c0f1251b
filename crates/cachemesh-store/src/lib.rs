//! Cache tiers for cachemesh.
//!
//! - [`MemoryTier`]: bounded, size-aware, TTL-aware in-process store (L1)
//! - [`DistributedStore`]: the network-backed shared store contract (L2),
//!   with [`RedisStore`] as the production implementation
//! - [`CircuitBreaker`]: the state machine every L2 call goes through
//!
//! The tiers fail independently: the memory tier cannot fail for normal
//! causes, the distributed tier surfaces every error raw, and the
//! breaker decides when L2 is not worth calling at all.

pub mod breaker;
pub mod distributed;
pub mod memory;

pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use distributed::{DEFAULT_OP_TIMEOUT, DistributedStore, DynDistributedStore, RedisStore};
pub use memory::{DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES, MemoryTier};
