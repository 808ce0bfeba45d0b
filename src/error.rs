use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Parsing, classification, and burst anomalies are recovered inside the
/// dispatch pipeline (logged, never surfaced here); callers only ever see
/// failures of their own request or of the connection as a whole.
#[derive(Debug, Error)]
pub enum AmiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Malformed action: {0}")]
    MalformedAction(String),
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),
    #[error("Operation timed out")]
    Timeout,
    #[error("Not connected to AMI server")]
    NotConnected,
    #[error("Internal channel error: {0}")]
    ChannelError(String),
    #[error("Other error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AmiError::ConnectionClosed("connection closed by peer".to_string());
        assert_eq!(err.to_string(), "Connection closed: connection closed by peer");
        assert_eq!(AmiError::Timeout.to_string(), "Operation timed out");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: AmiError = io.into();
        assert!(matches!(err, AmiError::Io(_)));
    }
}
