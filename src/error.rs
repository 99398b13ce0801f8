use thiserror::Error;

#[derive(Error, Debug)]
pub enum BagtagError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },
}

impl BagtagError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Camera acquisition failures. All of these abort source startup.
#[derive(Error, Debug, Clone)]
pub enum CameraError {
    #[error("Permission denied for camera device {device}")]
    PermissionDenied { device: String },

    #[error("No camera device available")]
    NoDevice,

    #[error("Failed to open camera device {device}: {details}")]
    DeviceOpen { device: String, details: String },

    #[error("Camera configuration error: {details}")]
    Configuration { details: String },

    #[error("Capture stream error: {details}")]
    CaptureStream { details: String },

    #[error("Camera control error: {details}")]
    Control { details: String },
}

impl CameraError {
    /// Short message suitable for showing to the operator
    pub fn user_message(&self) -> String {
        match self {
            CameraError::PermissionDenied { device } => {
                format!("Camera access failed: permission denied ({})", device)
            }
            CameraError::NoDevice => "Camera access failed: no camera found".to_string(),
            other => format!("Camera access failed: {}", other),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No active session")]
    NoSession,

    #[error("Storage I/O error for key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt data under key '{key}': {details}")]
    Corrupt { key: String, details: String },

    #[error("Invalid session input: {details}")]
    InvalidSession { details: String },
}

/// Per-attempt decoding failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// A single detection attempt failed; the polling loop continues
    #[error("Transient decode failure: {details}")]
    Transient { details: String },

    /// The engine itself is unusable
    #[error("Decoder unavailable: {details}")]
    Fatal { details: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, BagtagError>;
