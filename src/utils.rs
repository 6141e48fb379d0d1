use chrono::NaiveDate;

/// Replaces accented Latin letters with their unaccented base letter.
pub fn fold_diacritics(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'ç' => 'c',
            'Ç' => 'C',
            'ñ' => 'n',
            'Ñ' => 'N',
            other => other,
        })
        .collect()
}

/// Lowercases, folds diacritics, treats `_`/`-` as spaces and collapses whitespace.
pub fn fold_key(s: &str) -> String {
    let folded = fold_diacritics(&s.to_lowercase()).replace(['_', '-'], " ");
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses `YYYY-MM-DD`, `YYYY/MM/DD`, `DD/MM/YYYY`, `DD-MM-YYYY` and their 2-digit-year
/// variants. A 4-digit first group means year-first, anything else is day-first.
/// Two-digit years are taken as 20YY. A trailing time part is ignored.
pub fn parse_loose_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw
        .trim()
        .split(|c: char| c.is_whitespace() || c == 'T')
        .next()?;

    let groups: Vec<&str> = date_part.split(['-', '/', '.']).collect();
    if groups.len() != 3
        || groups
            .iter()
            .any(|g| g.is_empty() || !g.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }

    let (year, month, day) = if groups[0].len() == 4 {
        (groups[0], groups[1], groups[2])
    } else {
        (groups[2], groups[1], groups[0])
    };

    let year: i32 = match year.len() {
        2 => format!("20{}", year).parse().ok()?,
        4 => year.parse().ok()?,
        _ => return None,
    };
    if month.len() > 2 || day.len() > 2 {
        return None;
    }

    NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
}

/// Normalizes a loosely formatted date to `YYYY-MM-DD`. Values that are not a
/// recognizable calendar date are returned trimmed but otherwise unchanged.
pub fn normalize_date_str(raw: &str) -> String {
    match parse_loose_date(raw) {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => raw.trim().to_string(),
    }
}

/// Converts a 1-based column index to its spreadsheet letter (1 = A, 27 = AA).
/// Index 0 has no letter and yields an empty string.
pub fn column_letter(index: u32) -> String {
    let mut letters = Vec::new();
    let mut n = index;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Quotes a worksheet title for use in A1 notation.
pub fn quote_sheet_name(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}
