use serde::{Deserialize, Deserializer, Serialize};

/// A fetched block: the ordered transfers it carries, or the failure the
/// remote side embedded in its response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct Block {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default)]
    pub transactions: Vec<BlockTransaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Block {
    pub fn new(transactions: Vec<BlockTransaction>) -> Self {
        Self {
            number: None,
            transactions,
            error: None,
        }
    }

    /// A block carrying only the remote side's error message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// The embedded failure, if the remote side reported one.
    pub fn failure(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// A single transfer. Moves `value` from `from` to `to`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct BlockTransaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(deserialize_with = "nullable_address")]
    pub from: String,
    /// Empty for contract creations.
    #[serde(default, deserialize_with = "nullable_address")]
    pub to: String,
    #[serde(default)]
    pub value: String,
}

impl BlockTransaction {
    pub fn new(from: impl Into<String>, to: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            hash: None,
            from: from.into(),
            to: to.into(),
            value: value.into(),
        }
    }
}

fn nullable_address<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parses a transfer value the way a numeric string is coerced: whitespace is
/// ignored, an empty string is zero, a `0x` prefix means hexadecimal and
/// anything else that is not a decimal number is NaN.
pub fn parse_value(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    if let Some(digits) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return parse_hex_f64(digits);
    }

    // Rust accepts "inf"/"nan" spellings; numeric strings only know "Infinity".
    let unsigned = trimmed.trim_start_matches(['+', '-']);
    if unsigned.starts_with(|c: char| c.is_ascii_alphabetic()) && unsigned != "Infinity" {
        return f64::NAN;
    }

    trimmed.parse::<f64>().unwrap_or_else(|_| {
        match trimmed {
            "Infinity" | "+Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            _ => f64::NAN,
        }
    })
}

fn parse_hex_f64(digits: &str) -> f64 {
    if digits.is_empty() {
        return f64::NAN;
    }
    let mut value = 0.0_f64;
    for c in digits.chars() {
        match c.to_digit(16) {
            Some(d) => value = value * 16.0 + f64::from(d),
            None => return f64::NAN,
        }
    }
    value
}

/// Parses a block number given in hexadecimal, with or without `0x`.
pub fn parse_block_number(hex: &str) -> Option<u64> {
    let digits = hex
        .trim()
        .strip_prefix("0x")
        .or_else(|| hex.trim().strip_prefix("0X"))
        .unwrap_or(hex.trim());
    u64::from_str_radix(digits, 16).ok()
}

/// Block number of task `n`: `n` blocks before `last_block`, as `0x…`.
/// `None` if that would precede the genesis block.
pub fn block_number_hex(last_block: u64, task_number: u32) -> Option<String> {
    last_block
        .checked_sub(u64::from(task_number))
        .map(|number| format!("0x{:x}", number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_decimal_and_hex() {
        assert_eq!(parse_value("10"), 10.0);
        assert_eq!(parse_value(" 2.5 "), 2.5);
        assert_eq!(parse_value("0x1bc16d674ec80000"), 2e18);
        assert_eq!(parse_value("0x0"), 0.0);
        assert_eq!(parse_value(""), 0.0);
        assert_eq!(parse_value("-Infinity"), f64::NEG_INFINITY);
    }

    #[test]
    fn test_parse_value_garbage_is_nan() {
        assert!(parse_value("abc").is_nan());
        assert!(parse_value("0x").is_nan());
        assert!(parse_value("0xzz").is_nan());
        assert!(parse_value("inf").is_nan());
        assert!(parse_value("12abc").is_nan());
    }

    #[test]
    fn test_block_number_hex_descends() {
        assert_eq!(block_number_hex(0x100, 1).as_deref(), Some("0xff"));
        assert_eq!(block_number_hex(0x100, 5).as_deref(), Some("0xfb"));
        assert_eq!(block_number_hex(2, 2).as_deref(), Some("0x0"));
        assert_eq!(block_number_hex(2, 3), None);
    }

    #[test]
    fn test_parse_block_number() {
        assert_eq!(parse_block_number("0x10d4f"), Some(0x10d4f));
        assert_eq!(parse_block_number("ff"), Some(255));
        assert_eq!(parse_block_number("0xnope"), None);
        assert_eq!(parse_block_number(""), None);
    }

    #[test]
    fn test_block_deserialization_handles_contract_creation() {
        let json = r#"{
            "number": "0x1",
            "transactions": [
                {"hash": "0xaa", "from": "0xA", "to": null, "value": "0x10"},
                {"from": "0xB", "to": "0xC", "value": "5"}
            ]
        }"#;
        let block: Block = serde_json::from_str(json).unwrap();

        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].to, "");
        assert_eq!(block.transactions[1].to, "0xC");
        assert!(block.failure().is_none());
    }
}
