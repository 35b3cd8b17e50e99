use thiserror::Error;

/// Result type alias for courier-mq operations
pub type Result<T> = std::result::Result<T, CourierError>;

/// Error types for the messaging and tenant-provisioning layers
#[derive(Error, Debug)]
pub enum CourierError {
    /// AMQP connection/channel/protocol errors
    #[error("AMQP error: {0}")]
    Broker(#[from] lapin::Error),

    /// Message serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reply wait exceeded its deadline
    #[error("Reply timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Configuration errors (missing DSN variable, empty queue list, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Encryption key has the wrong length for AES-256
    #[error("Encryption key must be 32 bytes, got {actual}")]
    KeyLength { actual: usize },

    /// Credential blob is not valid base64
    #[error("Credential blob is not valid base64: {0}")]
    BlobEncoding(#[from] base64::DecodeError),

    /// Credential blob too short to contain an IV
    #[error("Credential blob is {actual} bytes, shorter than one cipher block")]
    BlobTooShort { actual: usize },

    /// Decrypted credentials did not produce valid UTF-8
    #[error("Decrypted credentials are not valid UTF-8")]
    BlobUtf8(#[from] std::string::FromUtf8Error),

    /// Decrypted credentials did not match the expected "username:password" shape
    #[error("Invalid credential format: {reason}")]
    TenantFormat { reason: String },

    /// Database errors surfaced from tenant provisioning
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Handler-supplied failure
    #[error("Handler error: {0}")]
    Handler(String),

    /// Network I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CourierError {
    /// Create a new config error
    pub fn config<T: ToString>(message: T) -> Self {
        Self::Config(message.to_string())
    }

    /// Create a new handler error
    pub fn handler<T: ToString>(message: T) -> Self {
        Self::Handler(message.to_string())
    }

    /// Create a new internal error
    pub fn internal<T: ToString>(message: T) -> Self {
        Self::Internal(message.to_string())
    }

    /// Check if the error is transient and worth another send attempt
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Broker(_) => true,
            Self::Timeout { .. } => true,
            Self::Io(_) => true,
            _ => false,
        }
    }
}
