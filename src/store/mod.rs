//! Typed facade over the shared Redis store.
//!
//! Every other component goes through [`StoreHandle`]: namespaced keys, the
//! set/sorted-set/stream primitives the runtime relies on, and an atomic
//! multi-command batch for all-or-nothing mutations.

mod connector;
mod facade;

pub use connector::create_redis_pool;
pub use facade::{reduce_fields, CommandBatch, StoreHandle, StreamEntry};
