//! Error types for Hawser

use std::fmt;

/// Unified error type for all Hawser operations
#[derive(Debug)]
pub enum HawserError {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Protocol error (framing, negotiation, unexpected messages)
    Protocol(String),

    /// Security error (MAC mismatch, signature failure, key agreement)
    Security(String),

    /// Malformed key or key-file format error
    Format(String),

    /// Other error
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for HawserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HawserError::Io(e) => write!(f, "IO error: {}", e),
            HawserError::Config(msg) => write!(f, "Configuration error: {}", msg),
            HawserError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            HawserError::Security(msg) => write!(f, "Security error: {}", msg),
            HawserError::Format(msg) => write!(f, "Format error: {}", msg),
            HawserError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for HawserError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HawserError::Io(e) => Some(e),
            HawserError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HawserError {
    fn from(err: std::io::Error) -> Self {
        HawserError::Io(err)
    }
}

/// Result type for Hawser operations
pub type HawserResult<T> = Result<T, HawserError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HawserError::Config("Invalid configuration".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid configuration"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let hawser_err: HawserError = io_err.into();
        assert!(matches!(hawser_err, HawserError::Io(_)));
    }

    #[test]
    fn test_format_error_display() {
        let err = HawserError::Format("bad PEM delimiter".to_string());
        assert_eq!(err.to_string(), "Format error: bad PEM delimiter");
    }

    #[test]
    fn test_result_type() {
        fn example() -> HawserResult<i32> {
            Ok(42)
        }

        assert_eq!(example().unwrap(), 42);
    }
}
