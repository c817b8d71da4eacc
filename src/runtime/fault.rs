use crate::errors::{HookError, Result};

/// Environment variable naming a lifecycle point at which a synthetic error
/// is raised, e.g. `start:service:hello-world` or `loop:service:aggregator`.
/// Used to exercise the finishing path under test.
pub const FAULT_ENV: &str = "LATTICE_TEST_ERR";

pub fn marker() -> Option<String> {
    std::env::var(FAULT_ENV).ok()
}

/// Raises when the environment marker names this exact point.
pub fn check(point: &str) -> Result<()> {
    match marker() {
        Some(marker) if marker == point => Err(HookError::FaultInjected(marker).into()),
        _ => Ok(()),
    }
}

pub fn start_point(service_key: &str) -> String {
    format!("start:service:{service_key}")
}

pub fn loop_point(service_key: &str) -> String {
    format!("loop:service:{service_key}")
}
