//! Network interface types and DNS query types used by rule items.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Network interface type matched by `network_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Wifi,
    Cellular,
    Ethernet,
    Other,
}

impl InterfaceType {
    /// Convert to a u8 value for binary serialization.
    pub fn as_u8(&self) -> u8 {
        match self {
            InterfaceType::Wifi => 0,
            InterfaceType::Cellular => 1,
            InterfaceType::Ethernet => 2,
            InterfaceType::Other => 3,
        }
    }

    /// Convert from a u8 value.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(InterfaceType::Wifi),
            1 => Some(InterfaceType::Cellular),
            2 => Some(InterfaceType::Ethernet),
            3 => Some(InterfaceType::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Wifi => "wifi",
            InterfaceType::Cellular => "cellular",
            InterfaceType::Ethernet => "ethernet",
            InterfaceType::Other => "other",
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const QUERY_TYPE_NAMES: &[(&str, u16)] = &[
    ("A", 1),
    ("NS", 2),
    ("CNAME", 5),
    ("SOA", 6),
    ("PTR", 12),
    ("MX", 15),
    ("TXT", 16),
    ("AAAA", 28),
    ("SRV", 33),
    ("SVCB", 64),
    ("HTTPS", 65),
    ("ANY", 255),
];

/// A DNS query type, written by name when it has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryType(pub u16);

impl QueryType {
    /// Look up a query type by its mnemonic (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        QUERY_TYPE_NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, code)| QueryType(*code))
    }

    pub fn name(&self) -> Option<&'static str> {
        QUERY_TYPE_NAMES
            .iter()
            .find(|(_, code)| *code == self.0)
            .map(|(n, _)| *n)
    }
}

impl Serialize for QueryType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.name() {
            Some(name) => serializer.serialize_str(name),
            None => serializer.serialize_u16(self.0),
        }
    }
}

impl<'de> Deserialize<'de> for QueryType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(u16),
            Name(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Code(code) => Ok(QueryType(code)),
            Raw::Name(name) => QueryType::from_name(&name)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown query type: {}", name))),
        }
    }
}
