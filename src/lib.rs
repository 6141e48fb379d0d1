//! # Ledger Sync
//!
//! Turns free-text cash entries posted to a chat channel into rows of a shared
//! spreadsheet.
//!
//! ## Core Concepts
//!
//! - **Payload**: the fields parsed from one message (`Tipo`, `Valor`, `Descrição`,
//!   `Cliente`, `Forma de Pagamento`, `Data`, or the legacy `Entrada`/`Saída`)
//! - **Cursor**: the highest message id already processed, saved once per successful run
//! - **Column Map**: header name to column position, resolved against the live sheet
//! - **Batch write**: every new row of a run written in a single multi-range request,
//!   retried with exponential backoff when the sheet's quota rejects it
//!
//! ## Example
//!
//! ```rust,ignore
//! use ledger_sync::*;
//!
//! let settings = SyncSettings::default();
//! let channel = MemoryChannel::new();
//! channel.push(1, chrono::Utc::now(), "Tipo: Entrada\nValor: 100\nData: 2024-03-01");
//!
//! let sheet = MemorySheet::new();
//! let cursor = MemoryCursorStore::new();
//!
//! let report = SyncOrchestrator::new(&settings, &channel, &sheet, &cursor)
//!     .run()
//!     .await?;
//! assert_eq!(report.new_cursor, 1);
//! ```

pub mod allocator;
pub mod backend;
pub mod config;
pub mod cursor;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod parser;
pub mod reconciler;
pub mod schema;
pub mod utils;
pub mod writer;

#[cfg(feature = "remote")]
pub mod remote;

pub use allocator::first_empty_row;
pub use backend::{ColumnRange, MessageSource, SheetBackend};
pub use config::{SyncConfig, SyncSettings};
pub use cursor::{CursorStore, JsonFileCursorStore};
pub use error::{LedgerSyncError, Result};
pub use memory::{MemoryChannel, MemoryCursorStore, MemorySheet, SheetCall};
pub use orchestrator::{RunStage, SyncEvent, SyncOrchestrator, SyncReport};
pub use parser::parse;
pub use reconciler::{ensure_headers, ColumnMap};
pub use schema::*;
pub use utils::{column_letter, normalize_date_str};
pub use writer::{BatchWriter, RetryPolicy, WriteSummary};
