use log::{error, info};
use std::env;
use std::process::ExitCode;

use ledger_sync::remote::{run_sync, TelegramChannel};
use ledger_sync::{LedgerSyncError, Result, SyncConfig};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let command = env::args().nth(1).unwrap_or_else(|| "sync".to_string());
    let result = match command.as_str() {
        "sync" => sync().await,
        "channels" => channels().await,
        other => {
            error!("Unknown command '{}'. Usage: ledger-sync [sync|channels]", other);
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !logged_by_orchestrator(&e) {
                error!("{}", e);
            }
            ExitCode::FAILURE
        }
    }
}

async fn sync() -> Result<()> {
    let config = SyncConfig::from_env()?;
    info!(
        "Syncing chat {} into worksheet '{}' (state file {})",
        config.channel_id,
        config.worksheet_name,
        config.state_file.display()
    );

    let report = run_sync(&config).await?;
    info!(
        "Done: {} messages, {} rows written, {} skipped, last_id {} -> {}",
        report.messages_fetched,
        report.rows_written,
        report.messages_skipped,
        report.previous_cursor,
        report.new_cursor
    );
    Ok(())
}

/// Prints the chats visible in pending bot updates.
async fn channels() -> Result<()> {
    let token = env::var("TELEGRAM_BOT_TOKEN")
        .map_err(|_| LedgerSyncError::MissingEnv("TELEGRAM_BOT_TOKEN".to_string()))?;
    let channel = TelegramChannel::new(token, 0);

    for chat in channel.list_chats().await? {
        println!(
            "{} | {} | @{} | id={}",
            chat.kind,
            chat.title.as_deref().unwrap_or(""),
            chat.username.as_deref().unwrap_or(""),
            chat.id
        );
    }
    Ok(())
}

/// Failed runs are logged at `error` where they abort.
fn logged_by_orchestrator(e: &LedgerSyncError) -> bool {
    matches!(e, LedgerSyncError::RunFailed { .. })
}
