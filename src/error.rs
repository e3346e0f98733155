//! Error handling for the culling system
//!
//! Every fallible operation returns `CullResult<T>`. Configuration problems are
//! surfaced at initialization so they can never corrupt bucket boundaries at
//! cull time.

use std::fmt;

/// Main error type for the culling system
#[derive(Debug, thiserror::Error)]
pub enum CullError {
    // Lifecycle Errors
    #[error("Frustum culler already initialized")]
    AlreadyInitialized,
    #[error("Frustum culler is {state}, expected initialized")]
    NotInitialized { state: &'static str },

    // Configuration Errors
    #[error("Invalid config: {field} = {value} ({reason})")]
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },
    #[error("Length mismatch for {what}: expected {expected}, found {found}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Segment {segment} references prototype {prototype}, only {prototype_count} exist")]
    PrototypeOutOfRange {
        segment: usize,
        prototype: u32,
        prototype_count: usize,
    },
    #[error("Instance counts sum to {found}, expected total {expected}")]
    InstanceCountMismatch { expected: u64, found: u64 },
    #[error("Config parse error in {context}: {error}")]
    ConfigParse { context: String, error: String },

    // Buffer Errors
    #[error("Source buffer too small: {required} bytes required, {available} available")]
    SourceTooSmall { required: u64, available: u64 },
    #[error("Target buffer too small: {required} bytes required, {available} available")]
    TargetTooSmall { required: u64, available: u64 },
    #[error("Buffer '{buffer}' is missing usage {usage}")]
    MissingUsage { buffer: String, usage: String },
    #[error("Buffer mapping failed during {operation}: {reason}")]
    BufferMapping { operation: String, reason: String },

    // Device Errors
    #[error("Device request failed: {0}")]
    DeviceRequest(String),
    #[error("Buffer '{buffer}' needs {size} bytes, device limit {limit} is {max}")]
    DeviceLimit {
        buffer: String,
        size: u64,
        limit: &'static str,
        max: u64,
    },
    #[error("Device validation failed during {operation}: {reason}")]
    DeviceValidation { operation: String, reason: String },

    // System Errors
    #[error("IO error for {path}: {error}")]
    Io { path: String, error: String },
}

/// Type alias for Results in the culling system
pub type CullResult<T> = Result<T, CullError>;

impl From<std::io::Error> for CullError {
    fn from(error: std::io::Error) -> Self {
        CullError::Io {
            path: String::new(),
            error: error.to_string(),
        }
    }
}

impl From<toml::de::Error> for CullError {
    fn from(error: toml::de::Error) -> Self {
        CullError::ConfigParse {
            context: "toml".to_string(),
            error: error.to_string(),
        }
    }
}

impl From<wgpu::RequestDeviceError> for CullError {
    fn from(error: wgpu::RequestDeviceError) -> Self {
        CullError::DeviceRequest(error.to_string())
    }
}

/// Shorthand for building an `InvalidConfig` error
pub fn invalid_config(field: &str, value: impl fmt::Display, reason: &str) -> CullError {
    CullError::InvalidConfig {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Shorthand for a failed buffer map
pub fn buffer_mapping_error(operation: &str, reason: impl fmt::Display) -> CullError {
    CullError::BufferMapping {
        operation: operation.to_string(),
        reason: reason.to_string(),
    }
}

/// Convert Option to Result with context
pub trait OptionExt<T> {
    fn ok_or_cull<F>(self, f: F) -> CullResult<T>
    where
        F: FnOnce() -> CullError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_cull<F>(self, f: F) -> CullResult<T>
    where
        F: FnOnce() -> CullError,
    {
        self.ok_or_else(f)
    }
}

/// Extension trait for attaching a path or operation to foreign errors
pub trait ErrorContext<T> {
    fn io_context(self, path: &str) -> CullResult<T>;
    fn parse_context(self, context: &str) -> CullResult<T>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: fmt::Display,
{
    fn io_context(self, path: &str) -> CullResult<T> {
        self.map_err(|e| CullError::Io {
            path: path.to_string(),
            error: e.to_string(),
        })
    }

    fn parse_context(self, context: &str) -> CullResult<T> {
        self.map_err(|e| CullError::ConfigParse {
            context: context.to_string(),
            error: e.to_string(),
        })
    }
}
