//! Memory unit conversions for sacct output.

/// Convert a unit-suffixed memory string (e.g. "100.0M", "16G") to kilobytes.
///
/// sacct reports MaxRSS and ReqMem with a single-letter binary suffix.
/// Unknown suffixes and unparseable numerals yield 0 so that a single odd
/// value cannot abort notification processing.
pub fn kbytes_from_str(value: &str) -> u64 {
    if value.is_empty() || value == "0" {
        return 0;
    }
    let (num_part, unit) = value.split_at(value.len() - 1);
    let amount: f64 = match num_part.parse() {
        Ok(v) => v,
        Err(_) => {
            tracing::error!("kbytes_from_str: failed to convert '{}'", value);
            return 0;
        }
    };
    let multiplier: u64 = match unit.to_uppercase().as_str() {
        "K" => 1,
        "M" => 1024,
        "G" => 1048576,
        "T" => 1073741824,
        _ => {
            tracing::error!(
                "kbytes_from_str: unknown unit '{}' for value '{}'",
                unit,
                value
            );
            return 0;
        }
    };
    (amount * multiplier as f64) as u64
}

/// Render a kilobyte count on the binary-prefix ladder, e.g. 1048576 -> "1.00GiB".
pub fn str_from_kbytes(kbytes: u64) -> String {
    let mut value = kbytes as f64;
    for unit in ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"] {
        if value < 1024.0 {
            return format!("{:.2}{}B", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.2}YiB", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kbytes_from_str() {
        assert_eq!(kbytes_from_str("100.0M"), 102400);
        assert_eq!(kbytes_from_str("10.0T"), 10737418240);
        assert_eq!(kbytes_from_str("2048K"), 2048);
        assert_eq!(kbytes_from_str("1.5G"), 1572864);
        assert_eq!(kbytes_from_str(""), 0);
        assert_eq!(kbytes_from_str("0"), 0);
    }

    #[test]
    fn test_kbytes_from_str_bad_input() {
        // unknown suffix
        assert_eq!(kbytes_from_str("100X"), 0);
        // unparseable numeral
        assert_eq!(kbytes_from_str("abcM"), 0);
    }

    #[test]
    fn test_str_from_kbytes() {
        assert_eq!(str_from_kbytes(1048576), "1.00GiB");
        assert_eq!(str_from_kbytes(100), "100.00KiB");
        assert_eq!(str_from_kbytes(102400), "100.00MiB");
    }

    #[test]
    fn test_round_trip() {
        assert_eq!(str_from_kbytes(kbytes_from_str("100.0M")), "100.00MiB");
    }
}
