//! Display formatting for prices, timestamps and hashes

use chrono::{TimeZone, Utc};

use crate::delta::{normalize, PRICE_DECIMALS};

/// Fixed-point price as USD with two decimals
pub fn format_price(raw: i128) -> String {
    format!("{:.2}", normalize(raw, PRICE_DECIMALS))
}

/// `YYYY-MM-DD HH:MM:SS` in UTC, or `Never` for the zero sentinel
pub fn format_timestamp(unix_secs: u64) -> String {
    if unix_secs == 0 {
        return "Never".to_string();
    }
    match i64::try_from(unix_secs).ok().and_then(|s| Utc.timestamp_opt(s, 0).single()) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "Invalid".to_string(),
    }
}

/// `0x1234...abcd` style shortening, keeping `keep` chars on each side
pub fn shorten_hex(value: &str, keep: usize) -> String {
    if value.len() <= keep * 2 + 2 || !value.is_ascii() {
        return value.to_string();
    }
    format!("{}...{}", &value[..keep + 2], &value[value.len() - keep..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(200_000_000_000), "2000.00");
        assert_eq!(format_price(123_456_789_000), "1234.57");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "Never");
        assert_eq!(format_timestamp(1_701_234_567), "2023-11-29 05:09:27");
    }

    #[test]
    fn test_shorten_hex() {
        let addr = "0x1234567890123456789012345678901234567890";
        assert_eq!(shorten_hex(addr, 6), "0x123456...567890");
        assert_eq!(shorten_hex(addr, 4), "0x1234...7890");
        assert_eq!(shorten_hex("0x12", 4), "0x12");
    }
}
