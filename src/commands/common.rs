//! Shared CLI helpers.

/// Parse a RAM size string (e.g. "512M", "4G", or plain bytes).
///
/// A trailing `M` multiplies by 1,048,576 and a trailing `G` by
/// 1,073,741,824; a bare number is taken as bytes.
pub fn parse_ram(s: &str) -> Result<u64, String> {
    let s = s.trim().to_uppercase();
    if s.is_empty() {
        return Err("Empty RAM specification".to_string());
    }

    let (num_str, multiplier) = if let Some(stripped) = s.strip_suffix('G') {
        (stripped, 1024u64 * 1024 * 1024)
    } else if let Some(stripped) = s.strip_suffix('M') {
        (stripped, 1024 * 1024)
    } else {
        (s.as_str(), 1)
    };

    let num: f64 = num_str.parse().map_err(|_| format!("Invalid number: {num_str}"))?;
    if num < 0.0 {
        return Err("RAM size must be positive".to_string());
    }

    Ok((num * multiplier as f64) as u64)
}
