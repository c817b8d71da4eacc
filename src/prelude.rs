// Core runtime surface
pub use crate::runtime::{
    Hooks, Orchestrator, PeerRef, PeerTarget, ShutdownHandle, StreamBinding, UnitContext,
    UnitModule, UnitSpec, UnitTuple,
};

// Configuration
pub use crate::config::{Config, UnitConfig, UnitOverrides};

// Errors
pub use crate::errors::{BoxError, Error, ErrorKind, Result};

// Store and registry
pub use crate::registry::InstanceRegistry;
pub use crate::store::{create_redis_pool, CommandBatch, StoreHandle, StreamEntry};

// Monitoring
pub use crate::monitor::{init_app_logger, LoggerConfig, Monitor, StreamSink};

// Units
pub use crate::aggregate::MonitorAggregator;
pub use crate::units::{HelloWideWorld, HelloWorld};
