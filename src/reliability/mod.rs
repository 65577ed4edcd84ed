//! Reliability and observability features.
//!
//! This module provides:
//! - Retry and reconnect backoff with jitter
//! - In-flight request throttling with quiescence waits
//! - Metrics registration and export
//! - Tracing subscriber setup

pub mod backoff;
pub mod metrics;
pub mod throttle;
pub mod tracing;

pub use backoff::{retry_delay, retry_delay_ceiling, Jitter, ReconnectBackoff};
pub use throttle::{InFlightGuard, RequestThrottle};
