use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Gadget load failed [{module}]: {reason}")]
    GadgetLoad { module: String, reason: String },

    #[error("Conflicting gadget module loaded: {0}")]
    ConflictingGadget(String),

    #[error("Hotplug monitor error: {0}")]
    Hotplug(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for fallible daemon operations
pub type Result<T> = std::result::Result<T, AppError>;
