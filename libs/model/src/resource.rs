//! Resource vectors and orchestrator quantity parsing.
//!
//! A [`Resource`] is a sparse vector of named dimensions with a single unit
//! per dimension: `memory` is bytes, `vcore` is milli-CPU, extended
//! resources (for example `nvidia.com/gpu`) pass through as plain counts.
//!
//! Quantity parsing is exact: decimal SI suffixes (`k`, `M`, `G`, ...),
//! binary suffixes (`Ki`, `Mi`, `Gi`, ...), and the milli suffix `m` are
//! evaluated with integer arithmetic, never floating point.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Memory dimension, in bytes.
pub const MEMORY: &str = "memory";

/// CPU dimension, in milli-CPU.
pub const VCORE: &str = "vcore";

/// Errors from quantity parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid quantity '{0}'")]
    Invalid(String),

    #[error("unknown suffix in quantity '{0}'")]
    UnknownSuffix(String),

    #[error("quantity '{0}' is not representable without loss")]
    Precision(String),

    #[error("quantity '{0}' overflows")]
    Overflow(String),
}

/// A sparse resource vector with named dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource {
    resources: BTreeMap<String, i64>,
}

impl Resource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style dimension setter.
    pub fn with(mut self, dimension: &str, value: i64) -> Self {
        self.resources.insert(dimension.to_string(), value);
        self
    }

    /// Value of a dimension, zero when absent.
    pub fn get(&self, dimension: &str) -> i64 {
        self.resources.get(dimension).copied().unwrap_or(0)
    }

    pub fn set(&mut self, dimension: &str, value: i64) {
        self.resources.insert(dimension.to_string(), value);
    }

    pub fn is_zero(&self) -> bool {
        self.resources.values().all(|v| *v == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.resources.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Add every dimension of `other` into `self`.
    pub fn add(&mut self, other: &Resource) {
        for (dimension, value) in &other.resources {
            *self.resources.entry(dimension.clone()).or_insert(0) += value;
        }
    }

    /// Subtract every dimension of `other` from `self`.
    pub fn sub(&mut self, other: &Resource) {
        for (dimension, value) in &other.resources {
            *self.resources.entry(dimension.clone()).or_insert(0) -= value;
        }
    }

    /// Parse an orchestrator resource list (dimension name to quantity
    /// string) into scheduler dimensions: `cpu` becomes `vcore` in milli,
    /// `memory` becomes bytes, everything else is a plain count.
    pub fn from_resource_list(
        list: &BTreeMap<String, String>,
    ) -> Result<Self, QuantityError> {
        let mut out = Resource::new();
        for (name, quantity) in list {
            match name.as_str() {
                "cpu" => out.set(VCORE, parse_milli_quantity(quantity)?),
                "memory" => out.set(MEMORY, parse_quantity(quantity)?),
                other => out.set(other, parse_quantity(quantity)?),
            }
        }
        Ok(out)
    }

    /// Convenience constructor from cpu and memory quantity strings.
    pub fn from_quantities(cpu: &str, memory: &str) -> Result<Self, QuantityError> {
        Ok(Resource::new()
            .with(VCORE, parse_milli_quantity(cpu)?)
            .with(MEMORY, parse_quantity(memory)?))
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (dimension, value) in &self.resources {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}={}", dimension, value)?;
            first = false;
        }
        Ok(())
    }
}

/// Parse a quantity into its base unit (bytes for memory, counts for
/// extended resources).
pub fn parse_quantity(quantity: &str) -> Result<i64, QuantityError> {
    parse_scaled(quantity, 1)
}

/// Parse a quantity into milli-units: `"1"` is 1000, `"500m"` is 500.
pub fn parse_milli_quantity(quantity: &str) -> Result<i64, QuantityError> {
    parse_scaled(quantity, 1000)
}

/// Shared parse core. The result is
/// `mantissa * suffix_numerator * scale / (suffix_denominator * 10^frac)`,
/// computed in i128 and required to divide evenly.
fn parse_scaled(quantity: &str, scale: i128) -> Result<i64, QuantityError> {
    let trimmed = quantity.trim();
    if trimmed.is_empty() {
        return Err(QuantityError::Empty);
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (mantissa, suffix) = trimmed.split_at(split);
    if mantissa.is_empty() {
        return Err(QuantityError::Invalid(quantity.to_string()));
    }

    let (numerator, denominator): (i128, i128) = match suffix {
        "" => (1, 1),
        "m" => (1, 1000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        _ => return Err(QuantityError::UnknownSuffix(quantity.to_string())),
    };

    let (integral, fraction) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    if integral.is_empty() && fraction.is_empty() {
        return Err(QuantityError::Invalid(quantity.to_string()));
    }
    if fraction.contains('.') {
        return Err(QuantityError::Invalid(quantity.to_string()));
    }

    let digits = format!("{}{}", integral, fraction);
    let value: i128 = digits
        .parse()
        .map_err(|_| QuantityError::Invalid(quantity.to_string()))?;
    let frac_divisor = 10_i128
        .checked_pow(fraction.len() as u32)
        .ok_or_else(|| QuantityError::Overflow(quantity.to_string()))?;

    let numerator = value
        .checked_mul(numerator)
        .and_then(|v| v.checked_mul(scale))
        .ok_or_else(|| QuantityError::Overflow(quantity.to_string()))?;
    let divisor = denominator * frac_divisor;
    if numerator % divisor != 0 {
        return Err(QuantityError::Precision(quantity.to_string()));
    }

    i64::try_from(numerator / divisor).map_err(|_| QuantityError::Overflow(quantity.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal_suffixes() {
        assert_eq!(parse_quantity("1G").unwrap(), 1_000_000_000);
        assert_eq!(parse_quantity("10G").unwrap(), 10_000_000_000);
        assert_eq!(parse_quantity("256M").unwrap(), 256_000_000);
        assert_eq!(parse_quantity("2k").unwrap(), 2_000);
        assert_eq!(parse_quantity("1024").unwrap(), 1_024);
    }

    #[test]
    fn test_parse_binary_suffixes() {
        assert_eq!(parse_quantity("1Ki").unwrap(), 1_024);
        assert_eq!(parse_quantity("2Mi").unwrap(), 2 * 1_048_576);
        assert_eq!(parse_quantity("1Gi").unwrap(), 1_073_741_824);
    }

    #[test]
    fn test_parse_fractional_mantissa() {
        assert_eq!(parse_quantity("1.5G").unwrap(), 1_500_000_000);
        assert_eq!(parse_quantity("0.5Ki").unwrap(), 512);
    }

    #[test]
    fn test_parse_milli_cpu() {
        assert_eq!(parse_milli_quantity("1").unwrap(), 1_000);
        assert_eq!(parse_milli_quantity("2").unwrap(), 2_000);
        assert_eq!(parse_milli_quantity("500m").unwrap(), 500);
        assert_eq!(parse_milli_quantity("1500m").unwrap(), 1_500);
        assert_eq!(parse_milli_quantity("0.1").unwrap(), 100);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_quantity(""), Err(QuantityError::Empty));
        assert!(matches!(
            parse_quantity("12Q"),
            Err(QuantityError::UnknownSuffix(_))
        ));
        assert!(matches!(
            parse_quantity("G"),
            Err(QuantityError::Invalid(_))
        ));
        assert!(matches!(
            parse_quantity("1.2.3"),
            Err(QuantityError::Invalid(_))
        ));
    }

    #[test]
    fn test_parse_rejects_lossy() {
        // 1 milli-byte is not representable.
        assert!(matches!(
            parse_quantity("1m"),
            Err(QuantityError::Precision(_))
        ));
    }

    #[test]
    fn test_from_resource_list() {
        let mut list = BTreeMap::new();
        list.insert("cpu".to_string(), "2".to_string());
        list.insert("memory".to_string(), "1G".to_string());
        list.insert("nvidia.com/gpu".to_string(), "1".to_string());

        let parsed = Resource::from_resource_list(&list).unwrap();
        assert_eq!(parsed.get(VCORE), 2_000);
        assert_eq!(parsed.get(MEMORY), 1_000_000_000);
        assert_eq!(parsed.get("nvidia.com/gpu"), 1);
    }

    #[test]
    fn test_add_sub_roundtrip() {
        let delta = Resource::from_quantities("500m", "1G").unwrap();
        let mut occupied = Resource::new();
        occupied.add(&delta);
        occupied.add(&delta);
        occupied.sub(&delta);
        assert_eq!(occupied.get(VCORE), 500);
        assert_eq!(occupied.get(MEMORY), 1_000_000_000);
        occupied.sub(&delta);
        assert!(occupied.is_zero());
    }
}
