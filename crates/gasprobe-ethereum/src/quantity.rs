//! Numeric quantities as they travel through reports and node responses.
//!
//! Nodes answer with `0x`-prefixed hex, configuration files carry plain numbers and
//! reports must not lose precision on 256-bit values. [`Quantity`] writes decimal strings,
//! [`HexQuantity`] writes node-facing hex; both accept every shape on the way in.

use std::fmt;

use alloy_primitives::U256;
use serde::de::{Error as DeError, Visitor};
use serde::{Deserializer, Serializer};
use serde_json::Value;
use serde_with::{DeserializeAs, SerializeAs};

pub struct Quantity;

impl SerializeAs<U256> for Quantity {
    fn serialize_as<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }
}

impl<'de> DeserializeAs<'de, U256> for Quantity {
    fn deserialize_as<D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

impl SerializeAs<u64> for Quantity {
    fn serialize_as<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }
}

impl<'de> DeserializeAs<'de, u64> for Quantity {
    fn deserialize_as<D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        narrow::<D>(deserializer.deserialize_any(QuantityVisitor)?)
    }
}

fn narrow<'de, D: Deserializer<'de>>(value: U256) -> Result<u64, D::Error> {
    u64::try_from(value).map_err(|_| D::Error::custom(format!("quantity {} does not fit in 64 bits", value)))
}

/// Same input rules as [`Quantity`], written as `0x`-prefixed hex.
pub struct HexQuantity;

impl SerializeAs<U256> for HexQuantity {
    fn serialize_as<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:#x}", value))
    }
}

impl<'de> DeserializeAs<'de, U256> for HexQuantity {
    fn deserialize_as<D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

impl SerializeAs<u64> for HexQuantity {
    fn serialize_as<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:#x}", value))
    }
}

impl<'de> DeserializeAs<'de, u64> for HexQuantity {
    fn deserialize_as<D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        narrow::<D>(deserializer.deserialize_any(QuantityVisitor)?)
    }
}

struct QuantityVisitor;

impl Visitor<'_> for QuantityVisitor {
    type Value = U256;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a non-negative integer, a decimal string or a 0x-prefixed hex string")
    }

    fn visit_u64<E: DeError>(self, v: u64) -> Result<Self::Value, E> {
        Ok(U256::from(v))
    }

    fn visit_i64<E: DeError>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v).map(U256::from).map_err(|_| E::custom(format!("negative quantity {}", v)))
    }

    fn visit_str<E: DeError>(self, v: &str) -> Result<Self::Value, E> {
        parse_quantity(v).ok_or_else(|| E::custom(format!("invalid quantity {}", v)))
    }
}

/// Parses `0x`-prefixed hex or plain decimal.
pub fn parse_quantity(value: &str) -> Option<U256> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some("") => Some(U256::ZERO),
        Some(hex) => U256::from_str_radix(hex, 16).ok(),
        None if !value.is_empty() => U256::from_str_radix(value, 10).ok(),
        None => None,
    }
}

/// Reads a quantity out of an arbitrary JSON value, `None` if it does not hold one.
pub fn quantity_from_value(value: &Value) -> Option<U256> {
    match value {
        Value::Number(n) => n.as_u64().map(U256::from),
        Value::String(s) => parse_quantity(s),
        _ => None,
    }
}
