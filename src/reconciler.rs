use log::{debug, info};
use std::collections::BTreeMap;

use crate::backend::SheetBackend;
use crate::error::Result;

/// Header name to 1-based column position, as found in the live sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    positions: BTreeMap<String, u32>,
}

impl ColumnMap {
    /// Builds the map from a header row. The first occurrence of a duplicated name wins.
    pub fn from_header_row(headers: &[String]) -> Self {
        let mut positions = BTreeMap::new();
        for (idx, name) in headers.iter().enumerate() {
            let name = name.trim();
            if !name.is_empty() {
                positions
                    .entry(name.to_string())
                    .or_insert(idx as u32 + 1);
            }
        }
        Self { positions }
    }

    pub fn position(&self, name: &str) -> Option<u32> {
        self.positions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.positions.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Makes sure every `required` header exists in row 1, appending missing ones after the
/// last existing header. Existing headers are never moved or overwritten, and the row is
/// written back only when something was appended.
pub async fn ensure_headers<B>(backend: &B, required: &[String]) -> Result<ColumnMap>
where
    B: SheetBackend + ?Sized,
{
    let mut headers = backend.get_header_row().await?;
    while headers.last().is_some_and(|h| h.trim().is_empty()) {
        headers.pop();
    }

    let mut present = ColumnMap::from_header_row(&headers);
    let mut appended = Vec::new();

    for name in required {
        if present.contains(name) {
            continue;
        }
        headers.push(name.clone());
        present = ColumnMap::from_header_row(&headers);
        appended.push(name.as_str());
    }

    if appended.is_empty() {
        debug!("Header row already has all {} required columns", required.len());
    } else {
        info!("Appending headers to sheet: {}", appended.join(", "));
        backend.set_header_row(&headers).await?;
    }

    Ok(present)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySheet;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_empty_sheet_gets_all_headers() {
        let sheet = MemorySheet::new();
        let required = names(&["Tipo", "Valor", "Data"]);

        let map = ensure_headers(&sheet, &required).await.unwrap();

        assert_eq!(sheet.row(1), required);
        assert_eq!(map.position("Tipo"), Some(1));
        assert_eq!(map.position("Data"), Some(3));
        assert_eq!(sheet.header_writes(), 1);
    }

    #[tokio::test]
    async fn test_existing_columns_are_preserved() {
        let sheet = MemorySheet::with_rows(vec![names(&["Obs", "Valor", "", "Extra", ""])]);
        let required = names(&["Tipo", "Valor", "Data"]);

        let map = ensure_headers(&sheet, &required).await.unwrap();

        assert_eq!(sheet.row(1), names(&["Obs", "Valor", "", "Extra", "Tipo", "Data"]));
        assert_eq!(map.position("Obs"), Some(1));
        assert_eq!(map.position("Valor"), Some(2));
        assert_eq!(map.position("Extra"), Some(4));
        assert_eq!(map.position("Tipo"), Some(5));
        assert_eq!(map.position("Data"), Some(6));
        assert_eq!(map.len(), 5);
    }

    #[tokio::test]
    async fn test_second_call_is_a_no_op() {
        let sheet = MemorySheet::with_rows(vec![names(&["Data"])]);
        let required = names(&["Tipo", "Valor", "Data"]);

        let first = ensure_headers(&sheet, &required).await.unwrap();
        let second = ensure_headers(&sheet, &required).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(sheet.header_writes(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_required_names_append_once() {
        let sheet = MemorySheet::new();
        let required = names(&["Data", "Data"]);

        ensure_headers(&sheet, &required).await.unwrap();
        assert_eq!(sheet.row(1), names(&["Data"]));
    }
}
