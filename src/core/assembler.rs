use crate::core::error::DownloadError;
use crate::core::model::Segment;
use anyhow::Context;
use bytes::{Bytes, BytesMut};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Fixed-size result buffer: one slot per planned range, filled by index.
#[derive(Debug)]
pub struct Assembler {
    slots: Vec<Option<Bytes>>,
    filled: usize,
}

impl Assembler {
    pub fn new(total_chunks: usize) -> Self {
        Self { slots: vec![None; total_chunks], filled: 0 }
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Places a segment into the slot owned by its index.
    pub fn insert(&mut self, segment: Segment) -> Result<(), DownloadError> {
        let total = self.slots.len();
        let slot = self.slots.get_mut(segment.index).ok_or_else(|| {
            DownloadError::InternalInconsistency(format!(
                "segment index {} out of bounds for {} slots",
                segment.index, total
            ))
        })?;
        if slot.is_some() {
            return Err(DownloadError::InternalInconsistency(format!(
                "segment {} delivered twice",
                segment.index
            )));
        }
        *slot = Some(segment.data);
        self.filled += 1;
        Ok(())
    }

    /// Concatenates every slot in index order.
    pub fn assemble(self) -> Result<Bytes, DownloadError> {
        let missing: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            return Err(DownloadError::InternalInconsistency(format!(
                "assembly started with missing segments {:?}",
                missing
            )));
        }

        let len = self.slots.iter().flatten().map(|b| b.len()).sum();
        let mut out = BytesMut::with_capacity(len);
        for data in self.slots.into_iter().flatten() {
            out.extend_from_slice(&data);
        }
        Ok(out.freeze())
    }
}

/// Creates or truncates `path` and writes `data` to it in full.
pub async fn write_output(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create dir {}", parent.display()))?;
    }

    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("open {:?}", path))?;
    file.write_all(data).await.with_context(|| format!("write {:?}", path))?;
    file.flush().await?;
    Ok(())
}
