//! Chunked bulk lookup
//!
//! Large key sets are split into consecutive groups of at most `chunk_size`
//! keys, one membership query per group, so a batch of thousands of plays
//! never produces a statement with thousands of bound parameters. The
//! partitioning is invisible to callers: the concatenated result is exactly
//! what a single unbounded query would have returned.

use crate::error::Result;
use std::future::Future;
use tracing::{trace, warn};

/// Number of keys per lookup query unless a repository is configured
/// otherwise.
pub const DEFAULT_LOOKUP_CHUNK_SIZE: usize = 100;

/// Run `fetch_chunk` once per chunk of `keys` and concatenate the results.
///
/// Empty input returns immediately without calling `fetch_chunk`. A
/// `chunk_size` of zero is treated as one. The first failing chunk aborts the
/// whole lookup and records fetched by earlier chunks are dropped, so callers
/// see either every match or an error.
///
/// ```rust,ignore
/// let artists = lookup_in_chunks(&names, 100, |chunk| self.select_by_names(chunk)).await?;
/// ```
pub async fn lookup_in_chunks<'k, K, R, F, Fut>(
    keys: &'k [K],
    chunk_size: usize,
    mut fetch_chunk: F,
) -> Result<Vec<R>>
where
    F: FnMut(&'k [K]) -> Fut,
    Fut: Future<Output = Result<Vec<R>>>,
{
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let chunk_size = chunk_size.max(1);
    let mut found = Vec::new();

    for (index, chunk) in keys.chunks(chunk_size).enumerate() {
        let records = fetch_chunk(chunk).await.map_err(|e| {
            warn!(chunk = index, keys = chunk.len(), error = %e, "Bulk lookup chunk failed");
            e
        })?;
        trace!(chunk = index, keys = chunk.len(), found = records.len(), "Bulk lookup chunk");
        found.extend(records);
    }

    Ok(found)
}
