pub mod sheets;
pub mod telegram;
pub mod types;

pub use sheets::*;
pub use telegram::*;

use crate::config::SyncConfig;
use crate::cursor::JsonFileCursorStore;
use crate::error::Result;
use crate::orchestrator::{SyncOrchestrator, SyncReport};

/// Runs one sync against the live Telegram chat and Google worksheet named in `config`.
pub async fn run_sync(config: &SyncConfig) -> Result<SyncReport> {
    let source = TelegramChannel::new(config.bot_token.clone(), config.channel_id);
    let sheet = GoogleSheetsClient::new(
        config.google_access_token.clone(),
        config.sheet_id.clone(),
        config.worksheet_name.clone(),
    );
    let cursor = JsonFileCursorStore::new(config.state_file.clone());

    SyncOrchestrator::new(&config.settings, &source, &sheet, &cursor)
        .run()
        .await
}
