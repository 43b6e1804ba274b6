use crate::core::model::ByteRange;

/// Splits `total_chunks * chunk_size` bytes into contiguous inclusive ranges.
///
/// The resource length is never consulted: the last range may reach past
/// end-of-file and the server is expected to truncate its response.
/// Callers validate both arguments as non-zero (see `DownloadPlan::new`).
pub fn plan_ranges(total_chunks: usize, chunk_size: u64) -> Vec<ByteRange> {
    (0..total_chunks)
        .map(|index| {
            let start = index as u64 * chunk_size;
            ByteRange { index, start, end_inclusive: start + chunk_size - 1 }
        })
        .collect()
}
