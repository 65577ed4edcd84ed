//! Domain constants for the Aquila client.
//!
//! This module contains compile-time constants used throughout the crate.
//! These are separated from runtime configuration to provide clear distinction
//! between values that never change and those that can be configured.

/// Image preprocessing constants.
pub mod vision {
    /// Side length of the square image the model consumes.
    pub const CANONICAL_SIZE: u32 = 299;

    /// Number of color channels in the canonical tensor.
    pub const CHANNELS: usize = 3;

    /// Number of bytes in a canonical tensor.
    pub const CANONICAL_TENSOR_LEN: usize =
        CANONICAL_SIZE as usize * CANONICAL_SIZE as usize * CHANNELS;

    /// Aspect ratio (width / height) images are padded to before resizing.
    pub const TARGET_ASPECT: f64 = 16.0 / 9.0;

    /// Mean RGB pixel of the training set (92.366, 85.133, 81.674), rounded.
    /// Used as the padding fill color.
    pub const MEAN_PIXEL: [u8; 3] = [92, 85, 82];
}

/// Model-related constants.
pub mod model {
    /// Version tag reported when the service omits one.
    pub const FALLBACK_MODEL_VERSION: &str = "aqv1.1.250";

    /// Fully qualified gRPC service name.
    pub const SERVICE_NAME: &str = "aquila.AquilaService";

    /// Regression method path.
    pub const REGRESS_PATH: &str = "/aquila.AquilaService/Regress";
}

/// Retry and reconnect defaults.
pub mod retry {
    use std::time::Duration;

    /// Attempts per logical prediction.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Per-attempt deadline.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Base delay for the exponential retry backoff.
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(400);

    /// Base delay for the linear reconnect backoff.
    pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(200);

    /// Consecutive failures beyond this no longer grow the reconnect delay.
    pub const DEFAULT_RECONNECT_FAILURE_CAP: u32 = 10;

    /// Default maximum number of concurrent requests on one connection.
    pub const DEFAULT_CONCURRENCY: usize = 10;

    /// Default service port.
    pub const DEFAULT_PORT: u16 = 9000;
}
