//! Size parsing and formatting
//!
//! `SIZE` values accept the suffixes `k`, `M`, `G`, `T` (decimal) and
//! `Ki`, `Mi`, `Gi`, `Ti` (binary); a bare number defaults to `G`.
//! `0` means unlimited.

/// Parses a SIZE argument into bytes.
///
/// Used both by `--max-size` and by the `PREWARM_*` size variables.
pub fn parse_size(input: &str) -> Result<u64, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty size".to_string());
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    if digits.is_empty() {
        return Err(format!("invalid size '{input}': missing number"));
    }
    let value: u64 = digits
        .parse()
        .map_err(|e| format!("invalid size '{input}': {e}"))?;

    let multiplier: u64 = match suffix {
        "" | "G" => 1_000_000_000,
        "k" => 1_000,
        "M" => 1_000_000,
        "T" => 1_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        _ => return Err(format!("invalid size suffix '{suffix}' in '{input}'")),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{input}' is out of range"))
}

/// Formats a byte count with binary suffixes for human output.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [
        ("TiB", 1 << 40),
        ("GiB", 1 << 30),
        ("MiB", 1 << 20),
        ("KiB", 1 << 10),
    ];
    for (unit, scale) in UNITS {
        if bytes >= scale {
            return format!("{:.1} {unit}", bytes as f64 / scale as f64);
        }
    }
    format!("{bytes} B")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_number_defaults_to_decimal_gigabytes() {
        assert_eq!(parse_size("5").unwrap(), 5_000_000_000);
    }

    #[test]
    fn zero_is_unlimited() {
        assert_eq!(parse_size("0").unwrap(), 0);
    }

    #[test]
    fn decimal_suffixes() {
        assert_eq!(parse_size("3k").unwrap(), 3_000);
        assert_eq!(parse_size("2M").unwrap(), 2_000_000);
        assert_eq!(parse_size("7G").unwrap(), 7_000_000_000);
        assert_eq!(parse_size("1T").unwrap(), 1_000_000_000_000);
    }

    #[test]
    fn binary_suffixes() {
        assert_eq!(parse_size("3Ki").unwrap(), 3 * 1024);
        assert_eq!(parse_size("2Mi").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("1Gi").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("1Ti").unwrap(), 1u64 << 40);
    }

    #[test]
    fn whitespace_is_tolerated() {
        assert_eq!(parse_size(" 10M ").unwrap(), 10_000_000);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_size("").is_err());
        assert!(parse_size("G").is_err());
        assert!(parse_size("five").is_err());
        assert!(parse_size("10Q").is_err());
        assert!(parse_size("10 M").is_err());
        assert!(parse_size("-3").is_err());
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(parse_size("999999999999T").is_err());
    }

    #[test]
    fn format_size_picks_sane_units() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }
}
