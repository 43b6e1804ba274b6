use std::fmt;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    #[error("number of chunks must be at least 1")]
    ZeroChunks,

    #[error("chunk size must be at least 1 byte")]
    ZeroChunkSize,

    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("{total_chunks} chunks of {chunk_size} bytes exceed the addressable range")]
    Overflow { total_chunks: usize, chunk_size: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Could not reach the server (refused, DNS, timeout).
    Connection,
    /// Connected, but the exchange or the body read failed.
    Protocol,
    /// The download-wide cancellation signal fired mid-fetch.
    Cancelled,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::Protocol => f.write_str("protocol"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("{kind} error in requesting chunk {index}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub index: usize,
    #[source]
    pub cause: BoxError,
}

impl FetchError {
    pub fn connection(index: usize, cause: impl Into<BoxError>) -> Self {
        Self { kind: FetchErrorKind::Connection, index, cause: cause.into() }
    }

    pub fn protocol(index: usize, cause: impl Into<BoxError>) -> Self {
        Self { kind: FetchErrorKind::Protocol, index, cause: cause.into() }
    }

    pub fn cancelled(index: usize) -> Self {
        Self { kind: FetchErrorKind::Cancelled, index, cause: "download cancelled".into() }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("error in downloading chunks. {completed} of {total} downloads were successful")]
    PartialFailure {
        completed: usize,
        total: usize,
        #[source]
        cause: FetchError,
    },

    #[error("download cancelled. {completed} of {total} downloads had finished")]
    Cancelled { completed: usize, total: usize },

    /// Coordinator bug; never a user-facing condition.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn partial_failure_reports_counts_and_source() {
        let cause = FetchError::connection(1, std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"));
        let err = DownloadError::PartialFailure { completed: 2, total: 3, cause };
        assert_eq!(err.to_string(), "error in downloading chunks. 2 of 3 downloads were successful");

        let src = err.source().unwrap();
        assert_eq!(src.to_string(), "connection error in requesting chunk 1");
        assert_eq!(src.source().unwrap().to_string(), "refused");
    }
}
