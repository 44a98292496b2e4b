//! Size string parsing and formatting
//!
//! Object sizes use bytefmt conventions: every suffix is a power of two, so
//! `1M`, `1MB` and `1MiB` all mean 1,048,576 bytes. Suffixes are
//! case-insensitive and may carry a fraction (`1.5G`).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer};

const KIB: u64 = 1 << 10;
const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;
const TIB: u64 = 1 << 40;
const PIB: u64 = 1 << 50;
const EIB: u64 = 1 << 60;

/// Parse a size string into bytes
///
/// Examples:
/// - "1048576" → 1048576 bytes
/// - "1M" / "1MB" / "1MiB" → 1,048,576 bytes
/// - "1.5k" → 1,536 bytes
/// - "512B" → 512 bytes
pub fn parse_size(input: &str) -> Result<u64> {
    let input = input.trim();

    if let Ok(num) = input.parse::<u64>() {
        return Ok(num);
    }

    let (number_part, suffix) = split_number_suffix(input)?;

    let value: f64 = number_part
        .parse()
        .map_err(|_| anyhow!("Invalid number: {}", number_part))?;

    let multiplier = parse_suffix(suffix)?;
    let bytes = (value * multiplier as f64).round() as u64;

    Ok(bytes)
}

/// Split input into number and suffix parts
fn split_number_suffix(input: &str) -> Result<(&str, &str)> {
    let suffix_start = input
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| anyhow!("No suffix found in: {}", input))?;

    let number_part = &input[..suffix_start];
    let suffix = input[suffix_start..].trim();

    if number_part.is_empty() {
        return Err(anyhow!("Size must start with a positive number: {}", input));
    }

    Ok((number_part, suffix))
}

/// Parse suffix to byte multiplier
fn parse_suffix(suffix: &str) -> Result<u64> {
    match suffix.to_uppercase().as_str() {
        "B" => Ok(1),
        "K" | "KB" | "KI" | "KIB" => Ok(KIB),
        "M" | "MB" | "MI" | "MIB" => Ok(MIB),
        "G" | "GB" | "GI" | "GIB" => Ok(GIB),
        "T" | "TB" | "TI" | "TIB" => Ok(TIB),
        "P" | "PB" | "PI" | "PIB" => Ok(PIB),
        "E" | "EB" | "EI" | "EIB" => Ok(EIB),
        _ => Err(anyhow!(
            "Unknown size suffix: {}. Supported: B, K, M, G, T, P, E (optionally followed by B or iB)",
            suffix
        )),
    }
}

/// Render a byte count with the largest fitting binary unit, one decimal.
///
/// `format_bytes(1_572_864)` → `"1.5M"`, `format_bytes(1024)` → `"1K"`.
pub fn format_bytes(bytes: u64) -> String {
    let (unit, label) = match bytes {
        b if b >= EIB => (EIB, "E"),
        b if b >= PIB => (PIB, "P"),
        b if b >= TIB => (TIB, "T"),
        b if b >= GIB => (GIB, "G"),
        b if b >= MIB => (MIB, "M"),
        b if b >= KIB => (KIB, "K"),
        0 => return "0".to_string(),
        _ => (1, "B"),
    };
    let value = format!("{:.1}", bytes as f64 / unit as f64);
    let value = value.strip_suffix(".0").unwrap_or(&value);
    format!("{}{}", value, label)
}

/// Deserialize a size value that can be either a number or a string with suffix
pub fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(u64),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}
