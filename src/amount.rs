/// Parses a currency string whose group/decimal separators are ambiguous.
///
/// Bank templates mix EU-style (`1.234,56`), US-style (`1,234.56`) and
/// IDR-style (`50.000`, thousands only) renderings. When both `.` and `,`
/// occur, the one occurring later is the decimal separator. When only one
/// occurs, it is a thousands separator if it appears more than once or is
/// followed by exactly three digits, otherwise it is the decimal separator.
/// Empty or unparsable input degrades to `0.0`, never an error.
pub fn normalize_amount(raw: &str) -> f64 {
    let clean: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    let decimal_at = match (clean.rfind(','), clean.rfind('.')) {
        (Some(comma), Some(dot)) => Some(comma.max(dot)),
        (Some(at), None) => lone_separator_decimal(&clean, ',', at),
        (None, Some(at)) => lone_separator_decimal(&clean, '.', at),
        (None, None) => None,
    };

    let mut normalized = String::with_capacity(clean.len());
    for (at, c) in clean.char_indices() {
        if c.is_ascii_digit() {
            normalized.push(c);
        } else if Some(at) == decimal_at {
            normalized.push('.');
        }
    }
    normalized.parse().unwrap_or(0.0)
}

fn lone_separator_decimal(clean: &str, separator: char, last_at: usize) -> Option<usize> {
    let occurrences = clean.matches(separator).count();
    let trailing_digits = clean.len() - last_at - 1;
    if occurrences > 1 || trailing_digits == 3 {
        // grouped thousands, drop the separator entirely
        None
    } else {
        Some(last_at)
    }
}
