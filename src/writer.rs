use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::backend::{ColumnRange, SheetBackend};
use crate::error::{LedgerSyncError, Result};
use crate::reconciler::ColumnMap;
use crate::schema::RowBatch;

/// Exponential backoff schedule plus the predicate deciding which errors are retried.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub is_retryable: fn(&LedgerSyncError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            is_retryable: LedgerSyncError::is_quota,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_classifier(mut self, is_retryable: fn(&LedgerSyncError) -> bool) -> Self {
        self.is_retryable = is_retryable;
        self
    }

    /// Sleep before the attempt following failed attempt number `attempt` (1-based):
    /// base, 2x base, 4x base, ... capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the attempt
    /// budget is spent. The last attempt's error is returned as-is.
    pub async fn retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<(T, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if attempt < max_attempts && (self.is_retryable)(&e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} rejected on attempt {}/{} ({}), retrying in {:?}",
                        label, attempt, max_attempts, e, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub rows: usize,
    pub ranges: usize,
    pub attempts: u32,
}

/// Writes a whole [`RowBatch`] with one multi-range request per attempt.
pub struct BatchWriter<'a, B: ?Sized> {
    backend: &'a B,
    policy: RetryPolicy,
}

impl<'a, B> BatchWriter<'a, B>
where
    B: SheetBackend + ?Sized,
{
    pub fn new(backend: &'a B, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// One vertical range per batch column, spanning `start_row..start_row + rows - 1`.
    pub fn build_ranges(
        column_map: &ColumnMap,
        batch: &RowBatch,
        start_row: u32,
    ) -> Result<Vec<ColumnRange>> {
        if start_row == 0 {
            return Err(LedgerSyncError::InvalidRange(
                "start row must be 1-based".to_string(),
            ));
        }

        batch
            .headers
            .iter()
            .enumerate()
            .map(|(idx, header)| {
                let column = column_map.position(header).ok_or_else(|| {
                    LedgerSyncError::InvalidRange(format!("no column for header '{}'", header))
                })?;
                let values = batch
                    .rows
                    .iter()
                    .map(|row| row.get(idx).cloned().unwrap_or_default())
                    .collect();
                Ok(ColumnRange {
                    column,
                    start_row,
                    values,
                })
            })
            .collect()
    }

    pub async fn write(
        &self,
        column_map: &ColumnMap,
        batch: &RowBatch,
        start_row: u32,
    ) -> Result<WriteSummary> {
        if batch.is_empty() {
            debug!("Empty batch, nothing to write");
            return Ok(WriteSummary {
                rows: 0,
                ranges: 0,
                attempts: 0,
            });
        }

        let ranges = Self::build_ranges(column_map, batch, start_row)?;
        let (_, attempts) = self
            .policy
            .retry("Batch write", || self.backend.batch_write(&ranges))
            .await?;

        info!(
            "Wrote {} rows across {} columns starting at row {} ({} attempt(s))",
            batch.len(),
            ranges.len(),
            start_row,
            attempts
        );

        Ok(WriteSummary {
            rows: batch.len(),
            ranges: ranges.len(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySheet;
    use tokio::time::Instant;

    fn batch(rows: &[[&str; 2]]) -> RowBatch {
        let mut batch = RowBatch::new(vec!["Valor".into(), "Data".into()]);
        for r in rows {
            batch.push(r.iter().map(|s| s.to_string()).collect());
        }
        batch
    }

    fn column_map() -> ColumnMap {
        ColumnMap::from_header_row(&["Data".into(), "Obs".into(), "Valor".into()])
    }

    fn quota() -> LedgerSyncError {
        LedgerSyncError::Quota("Write requests per minute per user".into())
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=7).map(|a| policy.delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 32]);
        assert_eq!(policy.delay_for(200), Duration::from_secs(32));
    }

    #[test]
    fn test_ranges_follow_column_map() {
        let ranges =
            BatchWriter::<MemorySheet>::build_ranges(&column_map(), &batch(&[["1", "a"], ["2", "b"]]), 5)
                .unwrap();

        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].column, 3);
        assert_eq!(ranges[0].values, vec!["1", "2"]);
        assert_eq!(ranges[1].column, 1);
        assert_eq!(ranges[1].a1_notation("S"), "'S'!A5:A6");
    }

    #[test]
    fn test_unmapped_header_is_an_error() {
        let map = ColumnMap::from_header_row(&["Valor".into()]);
        let result = BatchWriter::<MemorySheet>::build_ranges(&map, &batch(&[["1", "a"]]), 2);
        assert!(matches!(result, Err(LedgerSyncError::InvalidRange(_))));
    }

    #[tokio::test]
    async fn test_one_call_regardless_of_batch_size() {
        let sheet = MemorySheet::new();
        let writer = BatchWriter::new(&sheet, RetryPolicy::default());
        let rows: Vec<[&str; 2]> = (0..250).map(|_| ["9", "2024-01-01"]).collect();

        let summary = writer.write(&column_map(), &batch(&rows), 2).await.unwrap();

        assert_eq!(summary.rows, 250);
        assert_eq!(summary.attempts, 1);
        assert_eq!(sheet.batch_write_calls(), 1);
        assert_eq!(sheet.cell(251, 3), "9");
    }

    #[tokio::test]
    async fn test_empty_batch_issues_no_call() {
        let sheet = MemorySheet::new();
        let writer = BatchWriter::new(&sheet, RetryPolicy::default());
        writer.write(&column_map(), &batch(&[]), 2).await.unwrap();
        assert_eq!(sheet.batch_write_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_errors_back_off_then_succeed() {
        let sheet = MemorySheet::new();
        sheet.fail_next_writes(vec![quota(), quota()]);
        let writer = BatchWriter::new(&sheet, RetryPolicy::default());

        let started = Instant::now();
        let summary = writer
            .write(&column_map(), &batch(&[["1", "a"]]), 2)
            .await
            .unwrap();

        assert_eq!(summary.attempts, 3);
        assert_eq!(sheet.batch_write_calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let sheet = MemorySheet::new();
        sheet.fail_next_writes((0..6).map(|_| quota()).collect());
        let writer = BatchWriter::new(&sheet, RetryPolicy::default());

        let started = Instant::now();
        let result = writer.write(&column_map(), &batch(&[["1", "a"]]), 2).await;

        assert!(matches!(result, Err(LedgerSyncError::Quota(_))));
        assert_eq!(sheet.batch_write_calls(), 6);
        assert_eq!(started.elapsed(), Duration::from_secs(1 + 2 + 4 + 8 + 16));
        assert_eq!(sheet.cell(2, 3), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_quota_error_fails_immediately() {
        let sheet = MemorySheet::new();
        sheet.fail_next_writes(vec![LedgerSyncError::Backend {
            status: 403,
            message: "The caller does not have permission".into(),
        }]);
        let writer = BatchWriter::new(&sheet, RetryPolicy::default());

        let started = Instant::now();
        let result = writer.write(&column_map(), &batch(&[["1", "a"]]), 2).await;

        assert!(matches!(result, Err(LedgerSyncError::Backend { status: 403, .. })));
        assert_eq!(sheet.batch_write_calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_classifier() {
        let policy = RetryPolicy::default()
            .with_max_attempts(2)
            .with_classifier(|e| matches!(e, LedgerSyncError::Transport(_)));

        let mut calls = 0;
        let result: Result<((), u32)> = policy
            .retry("probe", || {
                calls += 1;
                async { Err(LedgerSyncError::Transport("reset".into())) }
            })
            .await;

        assert!(matches!(result, Err(LedgerSyncError::Transport(_))));
        assert_eq!(calls, 2);
    }
}
