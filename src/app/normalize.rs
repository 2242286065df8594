fn normalize_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace cleanup for scraped fragments. Non-breaking spaces count as whitespace.
fn clean_text(input: &str) -> String {
    normalize_text(&input.replace('\u{a0}', " "))
}

/// Pulls a number out of a fragment such as `15.6"` or `1 999 zł`.
///
/// Everything except ASCII digits, `,` and `.` is dropped and commas become decimal
/// points, so grouped values like `12,345.67` do not parse and yield `None`.
fn clean_number(input: &str) -> Option<Number> {
    let numeric = clean_text(input)
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect::<String>();
    if numeric.is_empty() {
        return None;
    }
    let value = numeric.parse::<f64>().ok()?;
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(Number::Int(value as i64))
    } else {
        Some(Number::Float(value))
    }
}

fn normalize(text: Option<&str>, extract_number: bool) -> Option<CleanValue> {
    let text = text.filter(|t| !t.is_empty())?;
    if extract_number {
        clean_number(text).map(CleanValue::Number)
    } else {
        Some(CleanValue::Text(clean_text(text)))
    }
}
