use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response, StatusCode, Url};

use crate::backend::{ColumnRange, SheetBackend};
use crate::error::{looks_like_quota_message, LedgerSyncError, Result};
use crate::remote::types::*;
use crate::utils::{column_letter, quote_sheet_name};

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Worksheet backend over the Google Sheets v4 REST API, authorized with an OAuth
/// bearer token.
#[derive(Clone)]
pub struct GoogleSheetsClient {
    client: Client,
    access_token: String,
    spreadsheet_id: String,
    worksheet: String,
    base_url: String,
    value_input_option: String,
}

impl GoogleSheetsClient {
    pub fn new(
        access_token: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        worksheet: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            access_token: access_token.into(),
            spreadsheet_id: spreadsheet_id.into(),
            worksheet: worksheet.into(),
            base_url: SHEETS_BASE_URL.to_string(),
            value_input_option: "USER_ENTERED".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `RAW` stores text as typed; `USER_ENTERED` (default) lets the sheet parse
    /// numbers and dates.
    pub fn with_value_input_option(mut self, option: impl Into<String>) -> Self {
        self.value_input_option = option.into();
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| LedgerSyncError::InvalidConfig {
            key: "base_url".to_string(),
            details: e.to_string(),
        })?;
        url.path_segments_mut()
            .map_err(|_| LedgerSyncError::InvalidConfig {
                key: "base_url".to_string(),
                details: format!("{} cannot be a base", self.base_url),
            })?
            .pop_if_empty()
            .push(&self.spreadsheet_id)
            .extend(segments);
        Ok(url)
    }

    async fn get_values(&self, range: &str, major_dimension: &str) -> Result<Vec<Vec<String>>> {
        let url = self.url(&["values", range])?;
        let res = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("majorDimension", major_dimension)])
            .send()
            .await?;

        let body: ValueRange = check_status(res).await?.json().await?;
        Ok(body
            .values
            .into_iter()
            .map(|line| line.into_iter().map(cell_to_string).collect())
            .collect())
    }
}

#[async_trait]
impl SheetBackend for GoogleSheetsClient {
    async fn authenticate(&self) -> Result<()> {
        let url = self.url(&[])?;
        let res = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("fields", "sheets.properties.title")])
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let text = res.text().await?;
            return Err(LedgerSyncError::Authentication(format!(
                "Sheets API rejected credentials (status {}): {}",
                status,
                error_message(&text)
            )));
        }

        let metadata: SpreadsheetMetadata = check_status(res).await?.json().await?;
        if !metadata
            .sheets
            .iter()
            .any(|s| s.properties.title == self.worksheet)
        {
            return Err(LedgerSyncError::InvalidConfig {
                key: "WORKSHEET_NAME".to_string(),
                details: format!(
                    "worksheet '{}' not found in spreadsheet {}",
                    self.worksheet, self.spreadsheet_id
                ),
            });
        }

        debug!("Connected to worksheet '{}'", self.worksheet);
        Ok(())
    }

    async fn get_row(&self, index: u32) -> Result<Vec<String>> {
        let range = format!("{}!{}:{}", quote_sheet_name(&self.worksheet), index, index);
        let rows = self.get_values(&range, "ROWS").await?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    async fn get_column(&self, index: u32) -> Result<Vec<String>> {
        let letter = column_letter(index);
        if letter.is_empty() {
            return Err(LedgerSyncError::InvalidRange(format!("column {}", index)));
        }
        let range = format!("{}!{}:{}", quote_sheet_name(&self.worksheet), letter, letter);
        let columns = self.get_values(&range, "COLUMNS").await?;
        Ok(columns.into_iter().next().unwrap_or_default())
    }

    async fn set_header_row(&self, values: &[String]) -> Result<()> {
        let range = format!(
            "{}!A1:{}1",
            quote_sheet_name(&self.worksheet),
            column_letter(values.len().max(1) as u32)
        );
        let body = ValueRange {
            range: range.clone(),
            major_dimension: Some("ROWS".to_string()),
            values: vec![values.iter().cloned().map(serde_json::Value::String).collect()],
        };

        let url = self.url(&["values", &range])?;
        let res = self
            .client
            .put(url)
            .bearer_auth(&self.access_token)
            .query(&[("valueInputOption", "RAW")])
            .json(&body)
            .send()
            .await?;
        check_status(res).await?;
        Ok(())
    }

    async fn batch_write(&self, ranges: &[ColumnRange]) -> Result<()> {
        let request = BatchUpdateValuesRequest {
            value_input_option: self.value_input_option.clone(),
            data: ranges
                .iter()
                .map(|r| ValueRange {
                    range: r.a1_notation(&self.worksheet),
                    major_dimension: Some("COLUMNS".to_string()),
                    values: vec![r
                        .values
                        .iter()
                        .cloned()
                        .map(serde_json::Value::String)
                        .collect()],
                })
                .collect(),
        };

        let url = self.url(&["values:batchUpdate"])?;
        let res = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;
        check_status(res).await?;
        Ok(())
    }
}

fn cell_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<GoogleErrorBody>(body)
        .map(|b| {
            if b.error.status.is_empty() {
                b.error.message
            } else {
                format!("{}: {}", b.error.status, b.error.message)
            }
        })
        .unwrap_or_else(|_| body.trim().to_string())
}

/// Maps non-success responses to quota or backend errors.
async fn check_status(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }

    let message = error_message(&res.text().await?);
    if status == StatusCode::TOO_MANY_REQUESTS || looks_like_quota_message(&message) {
        return Err(LedgerSyncError::Quota(message));
    }
    Err(LedgerSyncError::Backend {
        status: status.as_u16(),
        message,
    })
}
