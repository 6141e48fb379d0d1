use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::Message;
use crate::utils::{column_letter, quote_sheet_name};

/// One vertical block of cells in a single column, starting at `start_row` (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRange {
    pub column: u32,
    pub start_row: u32,
    pub values: Vec<String>,
}

impl ColumnRange {
    pub fn end_row(&self) -> u32 {
        self.start_row + (self.values.len() as u32).saturating_sub(1)
    }

    /// A1 notation for this block, e.g. `'Página1'!F2:F9`.
    pub fn a1_notation(&self, sheet_name: &str) -> String {
        let letter = column_letter(self.column);
        format!(
            "{}!{}{}:{}{}",
            quote_sheet_name(sheet_name),
            letter,
            self.start_row,
            letter,
            self.end_row()
        )
    }
}

/// The tabular store rows are appended to. Rows and columns are 1-based.
#[async_trait]
pub trait SheetBackend: Send + Sync {
    /// Verifies credentials and that the target sheet exists.
    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    /// Cell values of one row, without trailing empty cells.
    async fn get_row(&self, index: u32) -> Result<Vec<String>>;

    /// Cell values of one column top to bottom, up to its last non-empty cell.
    async fn get_column(&self, index: u32) -> Result<Vec<String>>;

    async fn get_header_row(&self) -> Result<Vec<String>> {
        self.get_row(1).await
    }

    /// Replaces row 1 starting at column A.
    async fn set_header_row(&self, values: &[String]) -> Result<()>;

    /// Writes every range in a single request.
    async fn batch_write(&self, ranges: &[ColumnRange]) -> Result<()>;
}

/// Ordered source of chat messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    /// All messages with an id strictly greater than `after_id`, in any order.
    async fn messages_after(&self, after_id: i64) -> Result<Vec<Message>>;
}
