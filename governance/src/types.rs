//! Shared value types: addresses, token amounts, categories, actions

use crate::error::{GovernanceError, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Token-weighted quantity (balances, voting power, tallies)
pub type Power = BigUint;

/// 32-byte SHA-256 digest rendered as lowercase hex
pub type HashHex = String;

/// Account identifier: `0x` followed by 40 hex digits, stored lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| GovernanceError::InvalidAddress(s.to_string()))?;
        if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(GovernanceError::InvalidAddress(s.to_string()));
        }
        Ok(Address(format!("0x{}", body.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for Address {
    type Error = GovernanceError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(a: Address) -> String {
        a.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of proposal categories. A deployment may narrow it further
/// through `GovernanceConfig::allowed_categories`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalCategory {
    Treasury,
    ParameterChange,
    ProtocolUpgrade,
    Community,
    Emergency,
}

impl ProposalCategory {
    pub const ALL: [ProposalCategory; 5] = [
        ProposalCategory::Treasury,
        ProposalCategory::ParameterChange,
        ProposalCategory::ProtocolUpgrade,
        ProposalCategory::Community,
        ProposalCategory::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalCategory::Treasury => "treasury",
            ProposalCategory::ParameterChange => "parameter_change",
            ProposalCategory::ProtocolUpgrade => "protocol_upgrade",
            ProposalCategory::Community => "community",
            ProposalCategory::Emergency => "emergency",
        }
    }
}

impl FromStr for ProposalCategory {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self> {
        ProposalCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| GovernanceError::InvalidCategory(s.to_string()))
    }
}

impl fmt::Display for ProposalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call a proposal will make when executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub target: Address,
    #[serde(with = "decimal")]
    pub value: Power,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
}

/// Serialize a [`BigUint`] as a base-10 string
pub mod decimal {
    use num_bigint::BigUint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        let raw = String::deserialize(d)?;
        BigUint::parse_bytes(raw.trim().as_bytes(), 10)
            .ok_or_else(|| D::Error::custom(format!("invalid unsigned integer: {}", raw)))
    }
}

/// Serialize bytes as `0x`-prefixed hex
pub mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        let body = raw.strip_prefix("0x").unwrap_or(&raw);
        hex::decode(body).map_err(D::Error::custom)
    }
}

/// Parse a decimal token amount from user input
pub fn parse_power(raw: &str) -> Result<Power> {
    BigUint::parse_bytes(raw.trim().as_bytes(), 10)
        .ok_or_else(|| GovernanceError::InvalidInput(format!("invalid amount: {}", raw)))
}
