// SPDX-License-Identifier: GPL-3.0-only

//! Size helpers shared across crates

use anyhow::Result;
use num_format::{Locale, ToFormattedString};

const UNITS: [&str; 9] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];

/// Convert bytes to human-readable format (e.g., "1.50 GiB")
pub fn bytes_to_pretty(bytes: u64, add_bytes: bool) -> String {
    let mut steps = 0;
    let mut val: f64 = bytes as f64;

    while val >= 1024. && steps < UNITS.len() - 1 {
        val /= 1024.;
        steps += 1;
    }

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} bytes)", val, UNITS[steps], bytes_str)
    } else {
        format!("{:.2} {}", val, UNITS[steps])
    }
}

/// Parse a volume size such as `10GiB`, `512M`, `1.5 T` or `4096` into bytes.
///
/// Decimal and binary suffixes are both treated as powers of 1024, matching
/// how block devices are sized.
pub fn parse_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(anyhow::anyhow!("Invalid size: empty input"));
    }

    let split_at = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);

    let val: f64 = number
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid size: {}", input))?;

    let steps = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 1,
        "M" | "MB" | "MIB" => 2,
        "G" | "GB" | "GIB" => 3,
        "T" | "TB" | "TIB" => 4,
        "P" | "PB" | "PIB" => 5,
        other => return Err(anyhow::anyhow!("Invalid unit: {}", other)),
    };

    Ok((val * 1024_f64.powi(steps)) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_accepts_binary_and_short_suffixes() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("10GiB").unwrap(), 10 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("512M").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_size("1.5 KiB").unwrap(), 1536);
    }

    #[test]
    fn parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("ten").is_err());
        assert!(parse_size("10XB").is_err());
    }

    #[test]
    fn pretty_print_picks_largest_unit() {
        assert_eq!(bytes_to_pretty(10 * 1024 * 1024 * 1024, false), "10.00 GiB");
        assert_eq!(bytes_to_pretty(1024, true), "1.00 KiB (1,024 bytes)");
        assert_eq!(bytes_to_pretty(12, false), "12.00 B");
    }
}
