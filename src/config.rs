use chrono::{FixedOffset, Local, Offset};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LedgerSyncError, Result};
use crate::schema::SheetLayout;
use crate::writer::RetryPolicy;

pub const DEFAULT_WORKSHEET_NAME: &str = "Página1";
pub const DEFAULT_STATE_FILE: &str = "data/state.json";

/// Pipeline behavior that does not depend on credentials.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub layout: SheetLayout,
    pub retry: RetryPolicy,
    /// Offset used to turn message timestamps into local dates.
    pub utc_offset: FixedOffset,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            layout: SheetLayout::default(),
            retry: RetryPolicy::default(),
            utc_offset: Local::now().offset().fix(),
        }
    }
}

/// Everything a run needs, read once at process start.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub bot_token: String,
    /// Chat id in the `-100<id>` form for channels
    pub channel_id: i64,
    pub sheet_id: String,
    pub google_access_token: String,
    pub worksheet_name: String,
    pub state_file: PathBuf,
    pub settings: SyncSettings,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).ok_or_else(|| LedgerSyncError::MissingEnv(key.to_string()));

        let bot_token = required("TELEGRAM_BOT_TOKEN")?;
        let channel_id = normalize_channel_id(parse_number("CHANNEL", &required("CHANNEL")?)?);
        let sheet_id = required("SHEET_ID")?;
        let google_access_token = required("GOOGLE_ACCESS_TOKEN")?;

        let mut settings = SyncSettings::default();
        if let Some(layout) = get("SHEET_LAYOUT") {
            settings.layout = layout.parse()?;
        }
        if let Some(offset) = get("UTC_OFFSET") {
            settings.utc_offset = parse_utc_offset(&offset).ok_or_else(|| {
                LedgerSyncError::InvalidConfig {
                    key: "UTC_OFFSET".to_string(),
                    details: format!("'{}' is not an offset like -03:00", offset),
                }
            })?;
        }
        if let Some(attempts) = get("RETRY_MAX_ATTEMPTS") {
            settings.retry.max_attempts = parse_number("RETRY_MAX_ATTEMPTS", &attempts)?;
        }
        if let Some(secs) = get("RETRY_BASE_DELAY_SECS") {
            settings.retry.base_delay = Duration::from_secs(parse_number("RETRY_BASE_DELAY_SECS", &secs)?);
        }
        if let Some(secs) = get("RETRY_MAX_DELAY_SECS") {
            settings.retry.max_delay = Duration::from_secs(parse_number("RETRY_MAX_DELAY_SECS", &secs)?);
        }

        Ok(Self {
            bot_token,
            channel_id,
            sheet_id,
            google_access_token,
            worksheet_name: get("WORKSHEET_NAME").unwrap_or_else(|| DEFAULT_WORKSHEET_NAME.to_string()),
            state_file: get("STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            settings,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| LedgerSyncError::InvalidConfig {
        key: key.to_string(),
        details: format!("'{}' is not a valid number", raw),
    })
}

/// Bare positive channel ids are rewritten to the `-100<id>` chat id form.
pub fn normalize_channel_id(id: i64) -> i64 {
    if id > 0 {
        format!("-100{}", id).parse().unwrap_or(id)
    } else {
        id
    }
}

/// Parses `-03:00`, `+0530`, `-3` or `Z`.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match raw.chars().next()? {
        '+' => (1, &raw[1..]),
        '-' => (-1, &raw[1..]),
        _ => (1, raw),
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes): (i32, i32) = match digits.len() {
        1 | 2 => (digits.parse().ok()?, 0),
        3 | 4 => {
            let split = digits.len() - 2;
            (digits[..split].parse().ok()?, digits[split..].parse().ok()?)
        }
        _ => return None,
    };
    if minutes >= 60 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ("CHANNEL", "1987654321"),
        ("SHEET_ID", "sheet-1"),
        ("GOOGLE_ACCESS_TOKEN", "ya29.token"),
    ];

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.channel_id, -1001987654321);
        assert_eq!(config.worksheet_name, "Página1");
        assert_eq!(config.state_file, PathBuf::from("data/state.json"));
        assert_eq!(config.settings.layout, SheetLayout::Transactions);
        assert_eq!(config.settings.retry.max_attempts, 6);
        assert_eq!(config.settings.retry.max_delay, Duration::from_secs(32));
    }

    #[test]
    fn test_missing_required_key() {
        for (missing, _) in REQUIRED {
            let pairs: Vec<(&str, &str)> = REQUIRED
                .iter()
                .copied()
                .filter(|(k, _)| *k != missing)
                .collect();
            let err = SyncConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(matches!(err, LedgerSyncError::MissingEnv(ref k) if k == missing));
        }

        let mut pairs = REQUIRED.to_vec();
        pairs[2] = ("SHEET_ID", "   ");
        assert!(SyncConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("CHANNEL", "-1001234"),
            ("SHEET_LAYOUT", "legacy"),
            ("UTC_OFFSET", "-03:00"),
            ("RETRY_MAX_ATTEMPTS", "3"),
            ("WORKSHEET_NAME", "Caixa"),
            ("STATE_FILE", "/var/lib/ledger/state.json"),
        ]);
        // later entries win in the lookup map
        let config = SyncConfig::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.channel_id, -1001234);
        assert_eq!(config.settings.layout, SheetLayout::Legacy);
        assert_eq!(config.settings.utc_offset.local_minus_utc(), -3 * 3600);
        assert_eq!(config.settings.retry.max_attempts, 3);
        assert_eq!(config.worksheet_name, "Caixa");
    }

    #[test]
    fn test_invalid_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs[1] = ("CHANNEL", "caixa");
        assert!(matches!(
            SyncConfig::from_lookup(lookup(&pairs)),
            Err(LedgerSyncError::InvalidConfig { .. })
        ));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("UTC_OFFSET", "Brasília"));
        assert!(SyncConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("-03:00").unwrap().local_minus_utc(), -10800);
        assert_eq!(parse_utc_offset("+0530").unwrap().local_minus_utc(), 19800);
        assert_eq!(parse_utc_offset("-3").unwrap().local_minus_utc(), -10800);
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("+05:75").is_none());
        assert!(parse_utc_offset("").is_none());
    }
}
