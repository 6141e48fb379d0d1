use log::debug;

use crate::backend::SheetBackend;
use crate::error::{LedgerSyncError, Result};

/// First unused row (1-based), one past the last non-empty cell of the reference column.
/// Blank cells above it stay untouched. Other columns are not inspected.
pub async fn first_empty_row<B>(backend: &B, reference_column: u32) -> Result<u32>
where
    B: SheetBackend + ?Sized,
{
    if reference_column == 0 {
        return Err(LedgerSyncError::InvalidRange(
            "reference column index must be 1-based".to_string(),
        ));
    }

    let values = backend.get_column(reference_column).await?;
    let next_row = values
        .iter()
        .rposition(|v| !v.trim().is_empty())
        .map_or(1, |last| last as u32 + 2);

    debug!(
        "Reference column {} is free from row {}",
        reference_column, next_row
    );
    Ok(next_row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySheet;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_header_only_sheet_starts_at_row_two() {
        let sheet = MemorySheet::with_rows(vec![row(&["Tipo", "Data"])]);
        assert_eq!(first_empty_row(&sheet, 2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reads_only_the_reference_column() {
        let sheet = MemorySheet::with_rows(vec![
            row(&["Tipo", "Data"]),
            row(&["Entrada", "2024-01-01"]),
            row(&["Saída", "2024-01-02"]),
            row(&["partial", ""]),
        ]);

        assert_eq!(first_empty_row(&sheet, 2).await.unwrap(), 4);
        assert_eq!(first_empty_row(&sheet, 1).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_gap_in_reference_column_is_skipped_over() {
        let sheet = MemorySheet::with_rows(vec![
            row(&["Tipo", "Valor", "Data"]),
            row(&["Saída", "50", ""]),
            row(&["Entrada", "999", "2024-02-02"]),
            row(&["", "", "   "]),
        ]);

        assert_eq!(first_empty_row(&sheet, 3).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_empty_sheet_and_invalid_column() {
        let sheet = MemorySheet::new();
        assert_eq!(first_empty_row(&sheet, 3).await.unwrap(), 1);
        assert!(first_empty_row(&sheet, 0).await.is_err());
    }
}
