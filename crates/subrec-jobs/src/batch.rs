use std::future::Future;

use anyhow::{Context, Result};
use subrec_storage::StoreError;
use tracing::debug;

/// Hand `items` to `write` in consecutive chunks of at most `batch_size`, one
/// call per chunk, stopping at the first failed chunk.
pub async fn write_in_batches<'a, T, F, Fut>(
    label: &str,
    items: &'a [T],
    batch_size: usize,
    mut write: F,
) -> Result<usize>
where
    F: FnMut(&'a [T]) -> Fut,
    Fut: Future<Output = Result<usize, StoreError>>,
{
    let mut written = 0usize;
    for (index, chunk) in items.chunks(batch_size.max(1)).enumerate() {
        let rows = write(chunk)
            .await
            .with_context(|| format!("writing {label} batch {index} ({} rows)", chunk.len()))?;
        debug!(label, batch = index, rows, "batch written");
        written += rows;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn splits_into_fixed_chunks() {
        let items: Vec<u32> = (0..250).collect();
        let mut sizes = Vec::new();
        let written = write_in_batches("numbers", &items, 100, |chunk| {
            sizes.push(chunk.len());
            let n = chunk.len();
            async move { Ok(n) }
        })
        .await
        .unwrap();
        assert_eq!(written, 250);
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let mut calls = 0;
        let written = write_in_batches("numbers", &Vec::<u32>::new(), 100, |_| {
            calls += 1;
            async { Ok(0) }
        })
        .await
        .unwrap();
        assert_eq!(written, 0);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let items: Vec<u32> = (0..30).collect();
        let mut calls = 0;
        let err = write_in_batches("numbers", &items, 10, |_| {
            calls += 1;
            let fail = calls == 2;
            async move {
                if fail {
                    Err(StoreError::MultipleRecords {
                        table: "users",
                        count: 2,
                    })
                } else {
                    Ok(10)
                }
            }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 2);
        assert!(err.to_string().contains("numbers batch 1"));
    }
}
