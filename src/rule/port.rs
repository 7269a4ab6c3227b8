//! Port ranges and the range merge used by the text encoders.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// An inclusive range of ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// Create a new range. `start` must not exceed `end`.
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// A range covering exactly one port.
    pub fn single(port: u16) -> Self {
        Self::new(port, port)
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// Parse the sing-box `start:end` form. Either side may be empty,
    /// meaning 0 and 65535 respectively.
    pub fn parse_colon(s: &str) -> Result<Self> {
        let (start, end) = s
            .split_once(':')
            .ok_or_else(|| Error::Parse(format!("bad port range: {}", s)))?;
        let start = if start.is_empty() {
            0
        } else {
            parse_port(start, s)?
        };
        let end = if end.is_empty() {
            u16::MAX
        } else {
            parse_port(end, s)?
        };
        if start > end {
            return Err(Error::Parse(format!("bad port range: {}", s)));
        }
        Ok(Self::new(start, end))
    }

    /// Format as the sing-box `start:end` form.
    pub fn to_colon_string(&self) -> String {
        format!("{}:{}", self.start, self.end)
    }

    /// Parse one Surge port expression: `n`, `a-b`, `<=n`, `<n`, `>=n` or `>n`.
    pub fn parse_surge(s: &str) -> Result<Self> {
        if let Ok(port) = s.parse::<u16>() {
            return Ok(Self::single(port));
        }
        if s.contains('-') {
            return s.parse();
        }
        let invalid = || Error::Parse(format!("invalid port range: {}", s));
        if let Some(rest) = s.strip_prefix("<=") {
            Ok(Self::new(0, parse_port(rest, s)?))
        } else if let Some(rest) = s.strip_prefix('<') {
            let port = parse_port(rest, s)?;
            Ok(Self::new(0, port.checked_sub(1).ok_or_else(invalid)?))
        } else if let Some(rest) = s.strip_prefix(">=") {
            Ok(Self::new(parse_port(rest, s)?, u16::MAX))
        } else if let Some(rest) = s.strip_prefix('>') {
            let port = parse_port(rest, s)?;
            Ok(Self::new(port.checked_add(1).ok_or_else(invalid)?, u16::MAX))
        } else {
            Err(invalid())
        }
    }
}

fn parse_port(value: &str, whole: &str) -> Result<u16> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| Error::Parse(format!("invalid port range: {}", whole)))
}

/// Parses `n` or `a-b`.
impl FromStr for PortRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('-') {
            Some((start, end)) => {
                let start = parse_port(start, s)?;
                let end = parse_port(end, s)?;
                if start > end {
                    return Err(Error::Parse(format!("invalid port range: {}", s)));
                }
                Ok(Self::new(start, end))
            }
            None => Ok(Self::single(parse_port(s, s)?)),
        }
    }
}

/// Formats as `n` for a single port and `a-b` otherwise.
impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl Serialize for PortRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_colon_string())
    }
}

impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PortRange::parse_colon(&raw).map_err(serde::de::Error::custom)
    }
}

/// Merge ranges into a sorted, non-overlapping, minimal list.
///
/// Adjacent ranges are joined, so `80-80` and `81-90` become `80-90`.
pub fn merge(ranges: impl IntoIterator<Item = PortRange>) -> Vec<PortRange> {
    let mut sorted: Vec<PortRange> = ranges.into_iter().collect();
    sorted.sort();
    let mut merged: Vec<PortRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if u32::from(range.start) <= u32::from(last.end) + 1 => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Merge a port list and a `start:end` range list into one range list.
pub fn merge_ports(ports: &[u16], ranges: &[String]) -> Result<Vec<PortRange>> {
    let mut all: Vec<PortRange> = ports.iter().copied().map(PortRange::single).collect();
    for range in ranges {
        all.push(PortRange::parse_colon(range)?);
    }
    Ok(merge(all))
}

/// Parse a Clash port payload: `/`-separated list of `n` or `a-b`.
pub fn parse_port_list(payload: &str) -> Result<Vec<PortRange>> {
    payload.split('/').map(str::parse).collect()
}

/// Split ranges into single ports and sing-box `start:end` strings.
pub fn split_ranges(ranges: &[PortRange]) -> (Vec<u16>, Vec<String>) {
    let mut ports = Vec::new();
    let mut port_ranges = Vec::new();
    for range in ranges {
        if range.is_single() {
            ports.push(range.start);
        } else {
            port_ranges.push(range.to_colon_string());
        }
    }
    (ports, port_ranges)
}
