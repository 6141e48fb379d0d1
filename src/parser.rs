//! Turns a free-text chat message into a [`Payload`].
//!
//! Accepted shapes, one `key: value` (or `key = value`) pair per line:
//!
//! ```text
//! Tipo: Saída
//! Valor: 35,90
//! Descrição: "Gás"
//! Forma de pagamento: pix
//! Data: 05/03/2024
//! ```
//!
//! A single line may also separate pairs with `;`. Messages without any known
//! key fall back to the legacy `Entrada: text` / `Saída: text` format.

use log::debug;

use crate::schema::{Field, Payload};
use crate::utils::{fold_key, normalize_date_str};

/// Parses one raw message body. Returns `None` when the text is not a ledger record.
pub fn parse(raw_text: &str) -> Option<Payload> {
    let text = raw_text.trim();
    if text.is_empty() {
        return None;
    }

    let mut payload = Payload::new();
    let mut matched_known_key = false;

    for line in logical_lines(text) {
        let Some((key, value)) = split_key_value(line) else {
            continue;
        };
        let Some(field) = field_for_key(key) else {
            debug!("Ignoring unknown key '{}'", key.trim());
            continue;
        };
        if field.is_legacy() {
            continue;
        }

        matched_known_key = true;
        let value = clean_value(value);
        let value = if field == Field::Data {
            normalize_date_str(&value)
        } else {
            value
        };
        payload.set(field, value);
    }

    if !matched_known_key {
        return parse_legacy(text);
    }

    payload.is_record().then_some(payload)
}

/// Recognizes a message consisting of a single `Entrada: text` / `Saída: text` line.
pub fn parse_legacy(raw_text: &str) -> Option<Payload> {
    let text = raw_text.trim();
    if text.contains('\n') {
        return None;
    }
    let (key, value) = text.split_once(':')?;

    let field = match fold_key(key).as_str() {
        "entrada" => Field::Entrada,
        "saida" => Field::Saida,
        _ => return None,
    };

    let content = clean_value(value);
    if content.is_empty() {
        return None;
    }

    Some(Payload::new().with(field, content))
}

/// Maps a raw key to its canonical field, accepting accent-free and abbreviated aliases.
pub fn field_for_key(key: &str) -> Option<Field> {
    match fold_key(key).as_str() {
        "tipo" | "categoria" => Some(Field::Tipo),
        "valor" | "quantia" | "montante" => Some(Field::Valor),
        "descricao" | "desc" => Some(Field::Descricao),
        "cliente" => Some(Field::Cliente),
        "forma de pagamento" | "forma pagamento" | "forma" | "pagamento" => {
            Some(Field::FormaPagamento)
        }
        "data" => Some(Field::Data),
        "entrada" => Some(Field::Entrada),
        "saida" => Some(Field::Saida),
        _ => None,
    }
}

fn logical_lines(text: &str) -> Vec<&str> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if lines.len() == 1 && lines[0].contains(';') {
        return lines[0]
            .split(';')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
    }

    lines
}

/// Splits at the first `:` or `=`, whichever comes first.
fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let idx = line.find([':', '='])?;
    let key = line[..idx].trim();
    if key.is_empty() {
        return None;
    }
    Some((key, &line[idx + 1..]))
}

/// Trims and strips one pair of matching surrounding quotes.
fn clean_value(raw: &str) -> String {
    let value = raw.trim();
    let mut chars = value.chars();
    let (Some(first), Some(last)) = (chars.next(), chars.next_back()) else {
        return value.to_string();
    };

    let quoted = matches!(
        (first, last),
        ('"', '"') | ('\'', '\'') | ('“', '”') | ('‘', '’')
    );
    if quoted {
        value[first.len_utf8()..value.len() - last.len_utf8()]
            .trim()
            .to_string()
    } else {
        value.to_string()
    }
}
