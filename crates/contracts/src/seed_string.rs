//! Serde adapter for 64-bit seeds.
//!
//! Seeds are written as decimal strings so JSON consumers with 53-bit numbers
//! keep them intact. Reading accepts decimal strings, `0x` hex strings, and
//! plain numbers.

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SeedInput {
        Text(String),
        Number(u64),
    }

    match SeedInput::deserialize(deserializer)? {
        SeedInput::Number(value) => Ok(value),
        SeedInput::Text(raw) => parse_seed(&raw).map_err(D::Error::custom),
    }
}

pub fn parse_seed(raw: &str) -> Result<u64, String> {
    let trimmed = raw.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse::<u64>(),
    };
    parsed.map_err(|_| format!("invalid seed `{raw}`"))
}
