use crate::core::assembler::{write_output, Assembler};
use crate::core::error::{DownloadError, FetchError, FetchErrorKind};
use crate::core::events::EngineEvent;
use crate::core::model::*;
use crate::core::planner::plan_ranges;
use crate::plugins::registry::{DriverContext, TransferDriver};
use anyhow::Context;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives one download from plan to assembled bytes.
///
/// State goes `Planning -> Fetching -> Assembling -> Done`, or to `Failed`
/// when a fetch fails. Nothing partial is ever returned.
#[derive(Clone)]
pub struct Engine {
    driver: Arc<dyn TransferDriver>,
    driver_ctx: DriverContext,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Engine {
    pub fn new(driver: Arc<dyn TransferDriver>, driver_ctx: DriverContext) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self { driver, driver_ctx, event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub async fn run(&self, plan: &DownloadPlan) -> Result<Bytes, DownloadError> {
        self.run_with_cancel(plan, CancellationToken::new()).await
    }

    /// Like [`Engine::run`], aborting with `DownloadError::Cancelled` once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        plan: &DownloadPlan,
        cancel: CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        info!(
            url = %plan.url(),
            chunks = plan.total_chunks(),
            chunk_size = plan.chunk_size(),
            parallel = plan.parallel(),
            "started download"
        );

        self.set_state(DownloadState::Planning);
        let ranges = plan_ranges(plan.total_chunks(), plan.chunk_size());

        self.set_state(DownloadState::Fetching);
        // child token: aborting this download never cancels the caller's token
        let fetch_cancel = cancel.child_token();
        let fetched = if plan.parallel() {
            self.fetch_concurrent(plan, ranges, &fetch_cancel).await
        } else {
            self.fetch_sequential(plan, ranges, &fetch_cancel).await
        };

        let assembler = match fetched {
            Ok(a) => a,
            Err(e) => return Err(self.fail(e)),
        };

        self.set_state(DownloadState::Assembling);
        info!("merging chunks");
        let data = assembler.assemble().map_err(|e| self.fail(e))?;

        self.set_state(DownloadState::Done);
        info!(bytes = data.len(), "finished download");
        Ok(data)
    }

    /// Runs the download and writes the result to `path` only if every chunk arrived.
    pub async fn download_to_file(&self, plan: &DownloadPlan, path: &Path, cancel: CancellationToken) -> anyhow::Result<u64> {
        let data = self.run_with_cancel(plan, cancel).await?;
        info!(path = %path.display(), "saving chunks to file");
        write_output(path, &data)
            .await
            .with_context(|| format!("problem saving download to {}", path.display()))?;
        Ok(data.len() as u64)
    }

    async fn fetch_sequential(
        &self,
        plan: &DownloadPlan,
        ranges: Vec<ByteRange>,
        cancel: &CancellationToken,
    ) -> Result<Assembler, DownloadError> {
        let mut assembler = Assembler::new(ranges.len());

        for range in ranges {
            self.range_started(&range);
            match self.driver.download_range(plan.url(), &self.driver_ctx, range, cancel).await {
                Ok(segment) => self.segment_done(&mut assembler, segment)?,
                Err(e) => return Err(Self::abort(e, &assembler)),
            }
        }

        Ok(assembler)
    }

    async fn fetch_concurrent(
        &self,
        plan: &DownloadPlan,
        ranges: Vec<ByteRange>,
        cancel: &CancellationToken,
    ) -> Result<Assembler, DownloadError> {
        let mut assembler = Assembler::new(ranges.len());
        let mut workers: JoinSet<Result<Segment, FetchError>> = JoinSet::new();

        // one worker per range
        for range in ranges {
            let driver = self.driver.clone();
            let url = plan.url().clone();
            let ctx = self.driver_ctx.clone();
            let cancel = cancel.clone();
            self.range_started(&range);
            workers.spawn(async move { driver.download_range(&url, &ctx, range, &cancel).await });
        }

        let outcome = loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(DownloadError::Cancelled {
                    completed: assembler.filled(),
                    total: assembler.total(),
                }),
                j = workers.join_next() => j,
            };

            match joined {
                None => break Ok(()),
                Some(Ok(Ok(segment))) => {
                    if let Err(e) = self.segment_done(&mut assembler, segment) {
                        break Err(e);
                    }
                }
                Some(Ok(Err(e))) => break Err(Self::abort(e, &assembler)),
                Some(Err(e)) => {
                    break Err(DownloadError::InternalInconsistency(format!("chunk worker died: {e}")))
                }
            }
        };

        if let Err(e) = outcome {
            cancel.cancel();
            workers.abort_all();
            debug!(in_flight = workers.len(), "cancelled remaining chunk requests");
            return Err(e);
        }

        Ok(assembler)
    }

    fn abort(e: FetchError, assembler: &Assembler) -> DownloadError {
        let (completed, total) = (assembler.filled(), assembler.total());
        if e.kind == FetchErrorKind::Cancelled {
            return DownloadError::Cancelled { completed, total };
        }
        warn!(chunk = e.index, kind = %e.kind, error = %e.cause, "chunk request failed");
        DownloadError::PartialFailure { completed, total, cause: e }
    }

    fn range_started(&self, range: &ByteRange) {
        debug!(
            chunk = range.index,
            start = range.start,
            end = range.end_inclusive,
            "downloading chunk"
        );
        let _ = self.event_tx.send(EngineEvent::RangeStarted {
            index: range.index,
            start: range.start,
            end: range.end_inclusive,
        });
    }

    fn segment_done(&self, assembler: &mut Assembler, segment: Segment) -> Result<(), DownloadError> {
        let (index, bytes) = (segment.index, segment.data.len() as u64);
        assembler.insert(segment)?;
        debug!(chunk = index, bytes, "finished downloading chunk");
        let _ = self.event_tx.send(EngineEvent::SegmentDone {
            index,
            bytes,
            completed: assembler.filled(),
            total: assembler.total(),
        });
        Ok(())
    }

    fn fail(&self, e: DownloadError) -> DownloadError {
        self.set_state(DownloadState::Failed);
        let _ = self.event_tx.send(EngineEvent::Error {
            scope: "download".to_string(),
            message: error_chain(&e),
        });
        e
    }

    fn set_state(&self, state: DownloadState) {
        debug!(?state, "download state");
        let _ = self.event_tx.send(EngineEvent::StateChanged { state });
    }
}

fn error_chain(e: &DownloadError) -> String {
    anyhow::Chain::new(e)
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}
