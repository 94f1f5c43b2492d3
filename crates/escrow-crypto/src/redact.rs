//! PII/secret redaction applied before anything reaches logs or persisted
//! webhook records.

const REDACTED_HEADERS: &[&str] = &["authorization", "cookie", "x-api-key", "set-cookie"];

/// Redact sensitive header values in place, returning a new map.
pub fn redact_headers(headers: &serde_json::Value) -> serde_json::Value {
    let Some(obj) = headers.as_object() else {
        return headers.clone();
    };
    let mut out = serde_json::Map::new();
    for (k, v) in obj {
        if REDACTED_HEADERS.contains(&k.to_lowercase().as_str()) {
            out.insert(k.clone(), serde_json::Value::String("[REDACTED]".into()));
        } else {
            out.insert(k.clone(), v.clone());
        }
    }
    serde_json::Value::Object(out)
}

/// Redact obvious PII substrings (emails, long digit runs resembling card/
/// account numbers) from a free-text error message before it is logged.
pub fn redact_pii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut digit_run = String::new();

    for word in text.split_inclusive(char::is_whitespace) {
        let trimmed = word.trim();
        if trimmed.contains('@') && trimmed.contains('.') {
            out.push_str("[REDACTED_EMAIL]");
            out.push_str(&word[trimmed.len()..]);
            continue;
        }
        digit_run.clear();
        digit_run.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
        if digit_run.len() >= 10 && digit_run.len() == trimmed.len() {
            out.push_str("[REDACTED_NUMBER]");
            out.push_str(&word[trimmed.len()..]);
            continue;
        }
        out.push_str(word);
    }
    out
}
