use chrono::FixedOffset;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc::Sender;

use crate::allocator::first_empty_row;
use crate::backend::{MessageSource, SheetBackend};
use crate::config::SyncSettings;
use crate::cursor::CursorStore;
use crate::error::{LedgerSyncError, Result};
use crate::parser::parse;
use crate::reconciler::ensure_headers;
use crate::schema::{Message, RowBatch};
use crate::writer::BatchWriter;

/// Stages of one sync run. `Failed` is terminal and can follow any other stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Init,
    Authenticated,
    CursorLoaded,
    MessagesFetched,
    BatchBuilt,
    Written,
    CursorSaved,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Init => "init",
            RunStage::Authenticated => "authenticated",
            RunStage::CursorLoaded => "cursor_loaded",
            RunStage::MessagesFetched => "messages_fetched",
            RunStage::BatchBuilt => "batch_built",
            RunStage::Written => "written",
            RunStage::CursorSaved => "cursor_saved",
            RunStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncEvent {
    StageReached(RunStage),
    MessageParsed { id: i64 },
    MessageSkipped { id: i64 },
    BatchWritten { start_row: u32, rows: usize, attempts: u32 },
    Failed { stage: RunStage, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub previous_cursor: i64,
    pub new_cursor: i64,
    pub messages_fetched: usize,
    pub rows_written: usize,
    pub messages_skipped: usize,
    pub start_row: Option<u32>,
    pub write_attempts: u32,
    pub stage: RunStage,
}

/// Pulls new messages, appends the parsed ones to the sheet and advances the cursor.
///
/// The cursor is saved once, after the sheet write has succeeded. Any earlier failure
/// leaves it untouched, so the next run re-reads the same messages.
pub struct SyncOrchestrator<'a, S: ?Sized, B: ?Sized, C: ?Sized> {
    settings: &'a SyncSettings,
    source: &'a S,
    backend: &'a B,
    cursor: &'a C,
    progress: Option<Sender<SyncEvent>>,
}

struct BuiltBatch {
    batch: RowBatch,
    max_seen: i64,
    skipped: usize,
}

impl<'a, S, B, C> SyncOrchestrator<'a, S, B, C>
where
    S: MessageSource + ?Sized,
    B: SheetBackend + ?Sized,
    C: CursorStore + ?Sized,
{
    pub fn new(settings: &'a SyncSettings, source: &'a S, backend: &'a B, cursor: &'a C) -> Self {
        Self {
            settings,
            source,
            backend,
            cursor,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Sender<SyncEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn run(&self) -> Result<SyncReport> {
        let mut stage = RunStage::Init;

        match self.run_stages(&mut stage).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("Sync run failed after stage {}: {}", stage, e);
                self.send_event(SyncEvent::Failed {
                    stage,
                    reason: e.to_string(),
                })
                .await;
                Err(LedgerSyncError::RunFailed {
                    stage,
                    source: Box::new(e),
                })
            }
        }
    }

    async fn run_stages(&self, stage: &mut RunStage) -> Result<SyncReport> {
        self.source.authenticate().await?;
        self.backend.authenticate().await?;
        self.advance(stage, RunStage::Authenticated).await;

        let previous_cursor = self.cursor.load().await?;
        info!("Loaded cursor last_id={}", previous_cursor);
        self.advance(stage, RunStage::CursorLoaded).await;

        let mut messages = self.source.messages_after(previous_cursor).await?;
        messages.retain(|m| m.id > previous_cursor);
        messages.sort_by_key(|m| m.id);
        messages.dedup_by_key(|m| m.id);
        info!("Fetched {} new messages", messages.len());
        self.advance(stage, RunStage::MessagesFetched).await;

        let built = self.build_batch(&messages, previous_cursor).await;
        info!(
            "Built batch of {} rows ({} messages skipped)",
            built.batch.len(),
            built.skipped
        );
        self.advance(stage, RunStage::BatchBuilt).await;

        let mut start_row = None;
        let mut write_attempts = 0;
        if built.batch.is_empty() {
            debug!("Nothing to write, advancing cursor only");
        } else {
            let column_map = ensure_headers(self.backend, &built.batch.headers).await?;
            let reference = self.settings.layout.reference_field().header();
            let reference_column = column_map.position(reference).ok_or_else(|| {
                LedgerSyncError::InvalidRange(format!("reference column '{}' not found", reference))
            })?;
            let first_row = first_empty_row(self.backend, reference_column).await?;

            let writer = BatchWriter::new(self.backend, self.settings.retry.clone());
            let summary = writer.write(&column_map, &built.batch, first_row).await?;

            start_row = Some(first_row);
            write_attempts = summary.attempts;
            self.send_event(SyncEvent::BatchWritten {
                start_row: first_row,
                rows: summary.rows,
                attempts: summary.attempts,
            })
            .await;
            self.advance(stage, RunStage::Written).await;
        }

        let new_cursor = previous_cursor.max(built.max_seen);
        self.cursor.save(new_cursor).await?;
        info!("Cursor advanced {} -> {}", previous_cursor, new_cursor);
        self.advance(stage, RunStage::CursorSaved).await;

        Ok(SyncReport {
            previous_cursor,
            new_cursor,
            messages_fetched: messages.len(),
            rows_written: built.batch.len(),
            messages_skipped: built.skipped,
            start_row,
            write_attempts,
            stage: *stage,
        })
    }

    /// Parses messages in id order. Every message counts toward the new cursor,
    /// parsed or not.
    async fn build_batch(&self, messages: &[Message], previous_cursor: i64) -> BuiltBatch {
        let layout = self.settings.layout;
        let offset: &FixedOffset = &self.settings.utc_offset;
        let mut batch = RowBatch::new(layout.header_names());
        let mut max_seen = previous_cursor;
        let mut skipped = 0;

        for message in messages {
            max_seen = max_seen.max(message.id);

            let row = parse(&message.text).and_then(|payload| {
                let row = layout.build_row(&payload, message, offset);
                if row.is_none() {
                    warn!(
                        "Message {} has no column for its amount in the {:?} layout: {:?}",
                        message.id, layout, payload
                    );
                }
                row
            });

            match row {
                Some(row) => {
                    debug!("Message {} parsed into row {:?}", message.id, row);
                    batch.push(row);
                    self.send_event(SyncEvent::MessageParsed { id: message.id })
                        .await;
                }
                None => {
                    debug!("Message {} skipped: not a ledger record", message.id);
                    skipped += 1;
                    self.send_event(SyncEvent::MessageSkipped { id: message.id })
                        .await;
                }
            }
        }

        BuiltBatch {
            batch,
            max_seen,
            skipped,
        }
    }

    async fn advance(&self, stage: &mut RunStage, next: RunStage) {
        debug!("Stage {} -> {}", stage, next);
        *stage = next;
        self.send_event(SyncEvent::StageReached(next)).await;
    }

    async fn send_event(&self, event: SyncEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event).await;
        }
    }
}
