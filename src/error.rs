//! Error types for the divecomputer crate.

/// The closed error taxonomy surfaced by every operation.
///
/// Every function returns the most specific kind; callers never need to
/// interpret a platform errno. Protocol errors are not auto-retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The vtable slot is missing or the feature is not available on this
    /// family.
    #[error("not supported by this device family")]
    Unsupported,

    /// Invalid arguments provided
    #[error("invalid argument: {0}")]
    InvalidArgs(&'static str),

    /// Allocation failure
    #[error("out of memory")]
    NoMemory,

    /// The operation was cancelled through the device's cancel flag
    #[error("cancelled")]
    Cancelled,

    /// Short read within the configured deadline
    #[error("timeout while waiting for data")]
    Timeout,

    /// Transport open/write failure
    #[error("transport error: {0}")]
    Io(String),

    /// Echo, ready byte or checksum mismatch on the wire
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// Dive blob inconsistent with the declared layout
    #[error("data format error: {0}")]
    DataFormat(&'static str),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::Io(err.to_string()),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_translation() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline");
        assert!(matches!(Error::from(timeout), Error::Timeout));

        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(Error::from(broken), Error::Io(_)));
    }

    #[test]
    fn test_error_display() {
        let error = Error::Protocol("echo mismatch");
        assert_eq!(error.to_string(), "protocol violation: echo mismatch");
    }
}
