//! The unit-hosting runtime: the unit contract, constructed instances, and
//! the orchestrator that wires and drives them.
//!
//! Units run as cooperative tokio tasks under one scheduler. Failure is not
//! isolated per unit: the first hook error anywhere stops the world through
//! a single shared finishing sequence.

pub mod fault;
pub mod health;

mod instance;
mod orchestrator;
mod unit;

pub use instance::{Counters, ExitOutcome, PeerMap, ShutdownHandle, UnitContext, UnitInstance};
pub use orchestrator::{Orchestrator, UnitTuple};
pub use unit::{
    EndpointFn, EndpointSpec, ErrorHook, FinishHook, Hook, HookFuture, Hooks, PeerRef, PeerTarget,
    StreamBinding, UnitModule, UnitSpec,
};
