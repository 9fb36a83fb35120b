use thiserror::Error;

/// Errors that can occur when talking to an iSuper bike controller
#[derive(Error, Debug)]
pub enum BikeError {
    /// TCP connect did not complete in time
    #[error("Connection timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// The controller actively refused the connection
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// The configured address could not be resolved
    #[error("Unable to resolve address: {0}")]
    AddressResolution(String),

    /// Connection failed for another reason
    #[error("Failed to connect to bike: {0}")]
    ConnectionFailed(String),

    /// The link is not connected (never opened, closed, or broken)
    #[error("Bike disconnected")]
    Disconnected,

    /// A frame could not be delimited or was otherwise malformed
    #[error("Malformed frame: {0}")]
    Frame(String),

    /// A numeric field held something that is not a number
    #[error("Cannot decode field {field} from {value:?}")]
    FieldDecode {
        /// Name of the field being decoded
        field: &'static str,
        /// Raw text that failed to decode
        value: String,
    },

    /// Invalid command parameters
    #[error("Invalid command parameters: {0}")]
    InvalidParameters(String),

    /// The controller did not confirm access point configuration
    #[error("Access point configuration failed: {0}")]
    AccessPoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bike operations
pub type Result<T> = std::result::Result<T, BikeError>;

impl BikeError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. }
                | Self::ConnectionRefused(_)
                | Self::AddressResolution(_)
                | Self::ConnectionFailed(_)
                | Self::Disconnected
        )
    }

    /// Check if this error is recoverable without reconnecting
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Frame(_) | Self::FieldDecode { .. } | Self::InvalidParameters(_)
        )
    }

    /// Classify an IO error raised while opening a TCP connection
    pub(crate) fn from_connect(err: std::io::Error, target: &str) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::ConnectionRefused => Self::ConnectionRefused(target.to_string()),
            ErrorKind::TimedOut => Self::ConnectTimeout { timeout_ms: 0 },
            ErrorKind::NotFound | ErrorKind::InvalidInput => {
                Self::AddressResolution(format!("{target}: {err}"))
            }
            _ => {
                // getaddrinfo failures surface as `Uncategorized`/`Other` on most platforms
                let text = err.to_string();
                if text.contains("lookup") || text.contains("resolve") || text.contains("known") {
                    Self::AddressResolution(format!("{target}: {text}"))
                } else {
                    Self::ConnectionFailed(format!("{target}: {text}"))
                }
            }
        }
    }
}
