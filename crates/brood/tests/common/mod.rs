//! Shared helpers for supervisor integration tests.

#![allow(dead_code)]

use brood::{Launcher, Registry, Supervisor, SupervisorConfig};
use std::sync::Arc;
use std::time::Duration;

/// Route library events to the test harness output. Honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn launcher() -> Launcher {
    init_tracing();
    Launcher::new(Arc::new(Registry::new()))
}

pub fn supervisor() -> Supervisor {
    init_tracing();
    Supervisor::new(SupervisorConfig::default()).expect("default config is valid")
}

/// Poll `condition` every 10ms until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
