use crate::core::error::PlanError;
use bytes::Bytes;
use url::Url;

/// Default number of segments when the caller does not choose one.
pub const DEFAULT_CHUNKS: usize = 4;
/// Default segment size in bytes (roughly 1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1_049_000;

/// One inclusive byte span of the remote resource, tagged with its position in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub index: usize,
    pub start: u64,
    pub end_inclusive: u64,
}

impl ByteRange {
    /// Value for the HTTP `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end_inclusive)
    }

    pub fn requested_len(&self) -> u64 {
        self.end_inclusive - self.start + 1
    }
}

/// Bytes returned for one range. The length may be shorter than the range asked for.
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: usize,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Planning,
    Fetching,
    Assembling,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    url: Url,
    total_chunks: usize,
    chunk_size: u64,
    parallel: bool,
}

impl DownloadPlan {
    pub fn new(url: Url, total_chunks: usize, chunk_size: u64, parallel: bool) -> Result<Self, PlanError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PlanError::UnsupportedScheme(url.scheme().to_string()));
        }
        if total_chunks == 0 {
            return Err(PlanError::ZeroChunks);
        }
        if chunk_size == 0 {
            return Err(PlanError::ZeroChunkSize);
        }
        (total_chunks as u64)
            .checked_mul(chunk_size)
            .ok_or(PlanError::Overflow { total_chunks, chunk_size })?;

        Ok(Self { url, total_chunks, chunk_size, parallel })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }
}
