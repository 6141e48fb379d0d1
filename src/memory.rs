//! In-process backends for tests and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::backend::{ColumnRange, MessageSource, SheetBackend};
use crate::cursor::CursorStore;
use crate::error::{LedgerSyncError, Result};
use crate::schema::Message;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Every call made against a [`MemorySheet`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetCall {
    GetRow(u32),
    GetColumn(u32),
    SetHeaderRow(Vec<String>),
    BatchWrite(Vec<ColumnRange>),
}

#[derive(Debug, Default)]
struct SheetState {
    grid: Vec<Vec<String>>,
    calls: Vec<SheetCall>,
    write_failures: VecDeque<LedgerSyncError>,
    auth_failure: Option<String>,
}

/// A grid of strings behaving like a worksheet.
#[derive(Debug, Default)]
pub struct MemorySheet {
    state: Mutex<SheetState>,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Vec<String>>) -> Self {
        let sheet = Self::new();
        lock(&sheet.state).grid = rows;
        sheet
    }

    /// The next `batch_write` calls fail with these errors, one per call, without
    /// touching the grid.
    pub fn fail_next_writes(&self, errors: Vec<LedgerSyncError>) {
        lock(&self.state).write_failures.extend(errors);
    }

    pub fn fail_authentication(&self, reason: impl Into<String>) {
        lock(&self.state).auth_failure = Some(reason.into());
    }

    pub fn calls(&self) -> Vec<SheetCall> {
        lock(&self.state).calls.clone()
    }

    pub fn batch_write_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, SheetCall::BatchWrite(_)))
    }

    pub fn header_writes(&self) -> usize {
        self.count_calls(|c| matches!(c, SheetCall::SetHeaderRow(_)))
    }

    fn count_calls(&self, pred: impl Fn(&SheetCall) -> bool) -> usize {
        lock(&self.state).calls.iter().filter(|c| pred(c)).count()
    }

    /// Row `index` (1-based) without trailing empty cells.
    pub fn row(&self, index: u32) -> Vec<String> {
        let state = lock(&self.state);
        let mut row = index
            .checked_sub(1)
            .and_then(|i| state.grid.get(i as usize))
            .cloned()
            .unwrap_or_default();
        while row.last().is_some_and(|c| c.is_empty()) {
            row.pop();
        }
        row
    }

    /// Rows 2.. trimmed of trailing empty cells.
    pub fn data_rows(&self) -> Vec<Vec<String>> {
        let len = lock(&self.state).grid.len() as u32;
        (2..=len).map(|i| self.row(i)).collect()
    }

    pub fn cell(&self, row: u32, column: u32) -> String {
        let state = lock(&self.state);
        row.checked_sub(1)
            .zip(column.checked_sub(1))
            .and_then(|(r, c)| state.grid.get(r as usize)?.get(c as usize).cloned())
            .unwrap_or_default()
    }

    fn set_cell(grid: &mut Vec<Vec<String>>, row: u32, column: u32, value: String) {
        let (r, c) = (row as usize - 1, column as usize - 1);
        if grid.len() <= r {
            grid.resize(r + 1, Vec::new());
        }
        if grid[r].len() <= c {
            grid[r].resize(c + 1, String::new());
        }
        grid[r][c] = value;
    }
}

#[async_trait]
impl SheetBackend for MemorySheet {
    async fn authenticate(&self) -> Result<()> {
        match &lock(&self.state).auth_failure {
            Some(reason) => Err(LedgerSyncError::Authentication(reason.clone())),
            None => Ok(()),
        }
    }

    async fn get_row(&self, index: u32) -> Result<Vec<String>> {
        lock(&self.state).calls.push(SheetCall::GetRow(index));
        Ok(self.row(index))
    }

    async fn get_column(&self, index: u32) -> Result<Vec<String>> {
        let mut state = lock(&self.state);
        state.calls.push(SheetCall::GetColumn(index));

        let Some(c) = index.checked_sub(1) else {
            return Err(LedgerSyncError::InvalidRange(format!("column {}", index)));
        };
        let mut column: Vec<String> = state
            .grid
            .iter()
            .map(|row| row.get(c as usize).cloned().unwrap_or_default())
            .collect();
        while column.last().is_some_and(|v| v.is_empty()) {
            column.pop();
        }
        Ok(column)
    }

    async fn set_header_row(&self, values: &[String]) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(SheetCall::SetHeaderRow(values.to_vec()));
        if state.grid.is_empty() {
            state.grid.push(Vec::new());
        }
        state.grid[0] = values.to_vec();
        Ok(())
    }

    async fn batch_write(&self, ranges: &[ColumnRange]) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(SheetCall::BatchWrite(ranges.to_vec()));

        if let Some(err) = state.write_failures.pop_front() {
            return Err(err);
        }
        if let Some(bad) = ranges.iter().find(|r| r.column == 0 || r.start_row == 0) {
            return Err(LedgerSyncError::InvalidRange(format!(
                "column {} row {}",
                bad.column, bad.start_row
            )));
        }

        for range in ranges {
            for (offset, value) in range.values.iter().enumerate() {
                Self::set_cell(
                    &mut state.grid,
                    range.start_row + offset as u32,
                    range.column,
                    value.clone(),
                );
            }
        }
        Ok(())
    }
}

/// A scripted channel. Messages are returned in insertion order, not id order.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    messages: Mutex<Vec<Message>>,
    fetch_failure: Mutex<Option<String>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: i64, date: DateTime<Utc>, text: impl Into<String>) {
        lock(&self.messages).push(Message::new(id, date, text));
    }

    pub fn fail_next_fetch(&self, reason: impl Into<String>) {
        *lock(&self.fetch_failure) = Some(reason.into());
    }
}

#[async_trait]
impl MessageSource for MemoryChannel {
    async fn messages_after(&self, after_id: i64) -> Result<Vec<Message>> {
        if let Some(reason) = lock(&self.fetch_failure).take() {
            return Err(LedgerSyncError::Transport(reason));
        }
        Ok(lock(&self.messages)
            .iter()
            .filter(|m| m.id > after_id)
            .cloned()
            .collect())
    }
}

/// Cursor kept in memory, with a record of every save.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    value: Mutex<Option<i64>>,
    saves: Mutex<Vec<i64>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(last_id: i64) -> Self {
        let store = Self::new();
        *lock(&store.value) = Some(last_id);
        store
    }

    pub fn saves(&self) -> Vec<i64> {
        lock(&self.saves).clone()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<i64> {
        Ok(lock(&self.value).unwrap_or(0))
    }

    async fn save(&self, last_id: i64) -> Result<()> {
        *lock(&self.value) = Some(last_id);
        lock(&self.saves).push(last_id);
        Ok(())
    }
}
