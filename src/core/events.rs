use crate::core::model::DownloadState;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged { state: DownloadState },
    RangeStarted { index: usize, start: u64, end: u64 },
    SegmentDone { index: usize, bytes: u64, completed: usize, total: usize },
    Error { scope: String, message: String },
}
