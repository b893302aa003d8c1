use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Keys handed back when a mutation could not reach the server and was
/// saved for replay instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedWrite {
    pub queue_key: i64,
    pub review_key: Option<i64>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Offline - write saved as queue entry {}", .write.queue_key)]
    Queued {
        write: QueuedWrite,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        Error::Status {
            status,
            body: Self::truncate_body(body),
        }
    }

    pub fn parse(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Parse(format!("{}: {}", context, err))
    }

    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Storage(format!("{}: {}", context, err))
    }

    /// True for failures of the transport or the API itself.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Status { .. })
    }

    /// True when the remote side could not produce a usable record, which
    /// is what sends a mutation to the write queue.
    pub fn is_remote_failure(&self) -> bool {
        self.is_network() || matches!(self, Error::Parse(_))
    }

    pub fn queued(&self) -> Option<QueuedWrite> {
        match self {
            Error::Queued { write, .. } => Some(*write),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_truncates_long_bodies() {
        let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        match Error::from_status(500, &body) {
            Error::Status { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("truncated"));
                assert!(body.contains("520 total bytes"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_error_classes() {
        assert!(Error::Network("refused".into()).is_network());
        assert!(Error::from_status(404, "").is_network());
        assert!(!Error::Parse("bad".into()).is_network());
        assert!(Error::Parse("bad".into()).is_remote_failure());
        assert!(!Error::Storage("disk".into()).is_remote_failure());
        assert!(!Error::NotFound("review 3".into()).is_remote_failure());
    }

    #[test]
    fn test_queued_exposes_keys() {
        let err = Error::Queued {
            write: QueuedWrite { queue_key: 4, review_key: Some(9) },
            source: Box::new(Error::Network("offline".into())),
        };
        assert_eq!(err.queued(), Some(QueuedWrite { queue_key: 4, review_key: Some(9) }));
        assert_eq!(err.to_string(), "Offline - write saved as queue entry 4");
    }
}
