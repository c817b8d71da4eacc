//! Error types shared across the runtime.
//!
//! A single opaque [`Error`] wraps an [`ErrorKind`] plus an optional source and
//! message; per-concern enums carry the detail. The kind label doubles as the
//! bucket key for the registry's closing error histogram.

mod error;

pub use error::{
    BoxError, ConfigError, Error, ErrorKind, HookError, IngestError, RegistryError, Result,
    StoreError, WiringError,
};
