//! Splitting formatted values into number and unit

/// Split a formatted reading like `"23.4°C"` or `"0 %"` into its numeric
/// value and unit.
///
/// The decoder emits values as `<number><unit>` with no separator, but
/// older captures and hand-edited data sometimes carry a space. Anything
/// without a leading number is kept verbatim as the unit.
#[must_use]
pub fn split_value_unit(raw: &str) -> (Option<f64>, Option<String>) {
    let s = raw.trim();
    let bytes = s.as_bytes();

    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i = 1;
    }

    let mut seen_digit = false;
    let mut seen_dot = false;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => {
                seen_digit = true;
                i += 1;
            }
            b'.' if !seen_dot => {
                seen_dot = true;
                i += 1;
            }
            _ => break,
        }
    }
    // A trailing dot belongs to the unit side, not the number
    if i > 0 && bytes[i - 1] == b'.' {
        i -= 1;
    }

    if !seen_digit {
        return (
            None,
            if s.is_empty() { None } else { Some(s.to_string()) },
        );
    }

    let value = s[..i].parse::<f64>().ok();
    let unit = s[i..].trim();
    (
        value,
        if unit.is_empty() {
            None
        } else {
            Some(unit.to_string())
        },
    )
}
