use std::collections::BTreeSet;

/// Converts a US phone number to E.164 (`+1XXXXXXXXXX`).
///
/// Every non-digit is stripped first. Numbers written with a leading `+` must
/// carry country code 1. Ten digits get `+1`, eleven digits must start with
/// `1`, and longer numbers starting with `1` are cut to eleven digits
/// (trailing extensions). Anything else is rejected.
pub fn normalize(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let explicit_country_code = raw.trim_start().starts_with('+');

    if explicit_country_code && !digits.starts_with('1') {
        return None;
    }

    match digits.len() {
        10 => Some(format!("+1{}", digits)),
        11 if digits.starts_with('1') => Some(format!("+{}", digits)),
        n if n > 11 && digits.starts_with('1') => Some(format!("+{}", &digits[..11])),
        _ => None,
    }
}

/// Whether `raw` normalizes to a US number.
pub fn validate(raw: &str) -> bool {
    normalize(raw).is_some()
}

/// Normalizes and deduplicates a batch in one pass.
///
/// Returns the distinct normalized numbers and the raw inputs that were
/// rejected, in input order.
pub fn batch_normalize<S: AsRef<str>>(raws: &[S]) -> (BTreeSet<String>, Vec<String>) {
    let mut valid = BTreeSet::new();
    let mut rejected = Vec::new();

    for raw in raws {
        let raw = raw.as_ref();
        match normalize(raw) {
            Some(number) => {
                valid.insert(number);
            }
            None => rejected.push(raw.to_string()),
        }
    }

    (valid, rejected)
}
