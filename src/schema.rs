use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerSyncError;
use crate::utils::fold_key;

/// One chat message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique, strictly increasing per channel
    pub id: i64,
    pub date: DateTime<Utc>,
    pub text: String,
}

impl Message {
    pub fn new(id: i64, date: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            id,
            date,
            text: text.into(),
        }
    }
}

/// The known ledger fields a message can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    Tipo,
    Valor,
    Descricao,
    Cliente,
    FormaPagamento,
    Data,
    /// Legacy single-field format
    Entrada,
    /// Legacy single-field format
    Saida,
}

impl Field {
    pub const TRANSACTION: [Field; 6] = [
        Field::Tipo,
        Field::Valor,
        Field::Descricao,
        Field::Cliente,
        Field::FormaPagamento,
        Field::Data,
    ];

    pub const LEGACY: [Field; 3] = [Field::Entrada, Field::Saida, Field::Data];

    /// Column header as it appears in the sheet.
    pub fn header(&self) -> &'static str {
        match self {
            Field::Tipo => "Tipo",
            Field::Valor => "Valor",
            Field::Descricao => "Descrição",
            Field::Cliente => "Cliente",
            Field::FormaPagamento => "Forma de Pagamento",
            Field::Data => "Data",
            Field::Entrada => "Entrada",
            Field::Saida => "Saída",
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Field::Entrada | Field::Saida)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// Structured fields parsed out of one message. Only non-empty values are stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    fields: BTreeMap<Field, String>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    /// Stores `value` for `field`; empty values clear the field. Later values win.
    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, value);
        }
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (Field, &str)> {
        self.fields.iter().map(|(f, v)| (*f, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// A payload counts as a ledger record only when it carries a category or an amount.
    pub fn is_record(&self) -> bool {
        [Field::Tipo, Field::Valor, Field::Entrada, Field::Saida]
            .iter()
            .any(|f| self.get(*f).is_some())
    }

    pub fn is_legacy(&self) -> bool {
        self.fields.keys().any(Field::is_legacy)
    }

    /// Renders the payload as `Key: value` lines in canonical header order.
    pub fn to_message_text(&self) -> String {
        let order = if self.is_legacy() {
            &Field::LEGACY[..2]
        } else {
            &Field::TRANSACTION[..]
        };

        order
            .iter()
            .filter_map(|f| self.get(*f).map(|v| format!("{}: {}", f.header(), v)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Which set of columns the pipeline maintains in the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetLayout {
    /// Tipo, Valor, Descrição, Cliente, Forma de Pagamento, Data
    #[default]
    Transactions,
    /// Entrada, Saída, Data
    Legacy,
}

impl SheetLayout {
    pub fn fields(&self) -> &'static [Field] {
        match self {
            SheetLayout::Transactions => &Field::TRANSACTION,
            SheetLayout::Legacy => &Field::LEGACY,
        }
    }

    pub fn header_names(&self) -> Vec<String> {
        self.fields().iter().map(|f| f.header().to_string()).collect()
    }

    /// Column used to find the first free row. Always populated for real records.
    pub fn reference_field(&self) -> Field {
        Field::Data
    }

    /// Builds one row aligned with [`SheetLayout::header_names`]. Unknown fields become
    /// empty strings so columns stay aligned.
    ///
    /// Returns `None` when the layout has no column for the payload's amount, e.g. a
    /// `Tipo` other than Entrada/Saída in the legacy layout.
    pub fn build_row(
        &self,
        payload: &Payload,
        message: &Message,
        offset: &FixedOffset,
    ) -> Option<Vec<String>> {
        let sent_at = message.date.with_timezone(offset);

        match self {
            SheetLayout::Transactions => {
                let (tipo, valor) = match (payload.get(Field::Entrada), payload.get(Field::Saida)) {
                    _ if payload.get(Field::Tipo).is_some() || payload.get(Field::Valor).is_some() => (
                        payload.get(Field::Tipo).unwrap_or_default().to_string(),
                        payload.get(Field::Valor).unwrap_or_default().to_string(),
                    ),
                    (Some(content), _) => (Field::Entrada.header().to_string(), content.to_string()),
                    (None, Some(content)) => (Field::Saida.header().to_string(), content.to_string()),
                    (None, None) => (String::new(), String::new()),
                };

                let data = payload
                    .get(Field::Data)
                    .map(str::to_string)
                    .unwrap_or_else(|| sent_at.format("%Y-%m-%d").to_string());

                Some(vec![
                    tipo,
                    valor,
                    payload.get(Field::Descricao).unwrap_or_default().to_string(),
                    payload.get(Field::Cliente).unwrap_or_default().to_string(),
                    payload.get(Field::FormaPagamento).unwrap_or_default().to_string(),
                    data,
                ])
            }
            SheetLayout::Legacy => {
                let kind = payload.get(Field::Tipo).map(fold_key);
                let valor = payload.get(Field::Valor).unwrap_or_default();

                let entrada = match (payload.get(Field::Entrada), kind.as_deref()) {
                    (Some(content), _) => content.to_string(),
                    (None, Some("entrada")) => valor.to_string(),
                    _ => String::new(),
                };
                let saida = match (payload.get(Field::Saida), kind.as_deref()) {
                    (Some(content), _) => content.to_string(),
                    (None, Some("saida")) => valor.to_string(),
                    _ => String::new(),
                };

                if entrada.is_empty() && saida.is_empty() {
                    return None;
                }

                Some(vec![
                    entrada,
                    saida,
                    sent_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                ])
            }
        }
    }
}

impl FromStr for SheetLayout {
    type Err = LedgerSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match fold_key(s).as_str() {
            "transactions" | "transacoes" => Ok(SheetLayout::Transactions),
            "legacy" | "legado" => Ok(SheetLayout::Legacy),
            other => Err(LedgerSyncError::InvalidConfig {
                key: "SHEET_LAYOUT".to_string(),
                details: format!("unknown layout '{}', expected 'transactions' or 'legacy'", other),
            }),
        }
    }
}

/// Rows built in one run, aligned with `headers`, to be written as one contiguous block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowBatch {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RowBatch {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message_at(hour: u32) -> Message {
        Message::new(
            7,
            Utc.with_ymd_and_hms(2024, 3, 1, hour, 15, 0).unwrap(),
            "irrelevant",
        )
    }

    fn sao_paulo() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    #[test]
    fn test_transaction_row_is_aligned() {
        let payload = Payload::new()
            .with(Field::Tipo, "Entrada")
            .with(Field::Valor, "100")
            .with(Field::Data, "2024-03-01");

        let row = SheetLayout::Transactions.build_row(&payload, &message_at(12), &sao_paulo())
            .unwrap();
        assert_eq!(row, vec!["Entrada", "100", "", "", "", "2024-03-01"]);
    }

    #[test]
    fn test_missing_date_uses_local_send_date() {
        let payload = Payload::new().with(Field::Valor, "20");

        // 01:15 UTC is still Feb 29 in São Paulo
        let row = SheetLayout::Transactions
            .build_row(&payload, &message_at(1), &sao_paulo())
            .unwrap();
        assert_eq!(row[5], "2024-02-29");
    }

    #[test]
    fn test_legacy_payload_in_transaction_layout() {
        let payload = Payload::new().with(Field::Saida, "35,90");
        let row = SheetLayout::Transactions
            .build_row(&payload, &message_at(12), &sao_paulo())
            .unwrap();
        assert_eq!(row[0], "Saída");
        assert_eq!(row[1], "35,90");
    }

    #[test]
    fn test_legacy_layout_columns() {
        let legacy = Payload::new().with(Field::Entrada, "250");
        let row = SheetLayout::Legacy
            .build_row(&legacy, &message_at(12), &sao_paulo())
            .unwrap();
        assert_eq!(row, vec!["250", "", "2024-03-01 09:15:00"]);

        let typed = Payload::new()
            .with(Field::Tipo, "SAÍDA")
            .with(Field::Valor, "12");
        let row = SheetLayout::Legacy
            .build_row(&typed, &message_at(12), &sao_paulo())
            .unwrap();
        assert_eq!(row[0], "");
        assert_eq!(row[1], "12");
    }

    #[test]
    fn test_legacy_layout_rejects_unplaceable_amount() {
        let venda = Payload::new()
            .with(Field::Tipo, "Venda")
            .with(Field::Valor, "10");
        assert!(SheetLayout::Legacy
            .build_row(&venda, &message_at(12), &sao_paulo())
            .is_none());

        let untyped = Payload::new().with(Field::Valor, "10");
        assert!(SheetLayout::Legacy
            .build_row(&untyped, &message_at(12), &sao_paulo())
            .is_none());

        // The transactions layout keeps any Tipo as written
        let row = SheetLayout::Transactions
            .build_row(&venda, &message_at(12), &sao_paulo())
            .unwrap();
        assert_eq!(row[0], "Venda");
        assert_eq!(row[1], "10");
    }

    #[test]
    fn test_record_validity() {
        assert!(!Payload::new().with(Field::Cliente, "Ana").is_record());
        assert!(Payload::new().with(Field::Valor, "1").is_record());
        assert!(Payload::new().with(Field::Entrada, "1").is_record());
    }

    #[test]
    fn test_layout_from_str() {
        assert_eq!("Legacy".parse::<SheetLayout>().unwrap(), SheetLayout::Legacy);
        assert_eq!(
            "transactions".parse::<SheetLayout>().unwrap(),
            SheetLayout::Transactions
        );
        assert!("wide".parse::<SheetLayout>().is_err());
    }
}
