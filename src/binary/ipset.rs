//! Merged IP range set built from CIDR strings.

use ipnet::{IpNet, Ipv4Subnets, Ipv6Subnets};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::codec::{put_uvarint_bytes, ByteReader};
use crate::{Error, Result};

const SET_VERSION: u8 = 1;

/// Sorted, non-overlapping, non-adjacent inclusive ranges per address family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpRangeSet {
    v4: Vec<(u32, u32)>,
    v6: Vec<(u128, u128)>,
}

fn merge<T: Copy + Ord>(ranges: &mut Vec<(T, T)>, next: impl Fn(T) -> Option<T>) {
    ranges.sort_unstable();
    let mut merged: Vec<(T, T)> = Vec::with_capacity(ranges.len());
    for &(from, to) in ranges.iter() {
        match merged.last_mut() {
            Some(last) if next(last.1).map_or(true, |n| from <= n) => {
                if to > last.1 {
                    last.1 = to;
                }
            }
            _ => merged.push((from, to)),
        }
    }
    *ranges = merged;
}

/// Parse a CIDR prefix or a bare address.
pub fn parse_prefix(value: &str) -> Result<IpNet> {
    if let Ok(net) = value.parse::<IpNet>() {
        return Ok(net.trunc());
    }
    value
        .parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| Error::Parse(format!("invalid IP-CIDR: {}", value)))
}

impl IpRangeSet {
    /// Build a set from CIDR or address strings.
    pub fn from_cidrs<S: AsRef<str>>(values: &[S]) -> Result<Self> {
        let mut set = Self::default();
        for value in values {
            set.add(parse_prefix(value.as_ref())?);
        }
        set.normalize();
        Ok(set)
    }

    fn add(&mut self, net: IpNet) {
        match net {
            IpNet::V4(net) => self
                .v4
                .push((u32::from(net.network()), u32::from(net.broadcast()))),
            IpNet::V6(net) => self
                .v6
                .push((u128::from(net.network()), u128::from(net.broadcast()))),
        }
    }

    fn add_range(&mut self, from: IpAddr, to: IpAddr) -> Result<()> {
        match (from, to) {
            (IpAddr::V4(from), IpAddr::V4(to)) if from <= to => {
                self.v4.push((u32::from(from), u32::from(to)))
            }
            (IpAddr::V6(from), IpAddr::V6(to)) if from <= to => {
                self.v6.push((u128::from(from), u128::from(to)))
            }
            _ => return Err(Error::Parse(format!("invalid IP range: {} - {}", from, to))),
        }
        Ok(())
    }

    fn normalize(&mut self) {
        merge(&mut self.v4, |v: u32| v.checked_add(1));
        merge(&mut self.v6, |v: u128| v.checked_add(1));
    }

    /// Number of merged ranges.
    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All ranges, IPv4 first.
    pub fn ranges(&self) -> impl Iterator<Item = (IpAddr, IpAddr)> + '_ {
        let v4 = self
            .v4
            .iter()
            .map(|&(f, t)| (IpAddr::V4(Ipv4Addr::from(f)), IpAddr::V4(Ipv4Addr::from(t))));
        let v6 = self
            .v6
            .iter()
            .map(|&(f, t)| (IpAddr::V6(Ipv6Addr::from(f)), IpAddr::V6(Ipv6Addr::from(t))));
        v4.chain(v6)
    }

    /// The minimal list of prefixes covering the set, as strings.
    pub fn to_prefixes(&self) -> Vec<String> {
        let mut prefixes = Vec::new();
        for &(from, to) in &self.v4 {
            prefixes.extend(
                Ipv4Subnets::new(Ipv4Addr::from(from), Ipv4Addr::from(to), 0).map(|n| n.to_string()),
            );
        }
        for &(from, to) in &self.v6 {
            prefixes.extend(
                Ipv6Subnets::new(Ipv6Addr::from(from), Ipv6Addr::from(to), 0).map(|n| n.to_string()),
            );
        }
        prefixes
    }

    /// Write the sing-box layout: `[1][u64 BE n][n × (from, to)]` with
    /// uvarint-length address bytes (4 or 16).
    pub fn write_srs(&self, buf: &mut Vec<u8>) {
        buf.push(SET_VERSION);
        buf.extend_from_slice(&(self.len() as u64).to_be_bytes());
        for (from, to) in self.ranges() {
            put_uvarint_bytes(buf, &addr_bytes(from));
            put_uvarint_bytes(buf, &addr_bytes(to));
        }
    }

    pub fn read_srs(reader: &mut ByteReader<'_>) -> Result<Self> {
        check_version(reader.read_u8()?)?;
        let count = reader.read_u64_be()?;
        let mut set = Self::default();
        for _ in 0..count {
            let from = addr_from_slice(reader.read_uvarint_bytes()?)?;
            let to = addr_from_slice(reader.read_uvarint_bytes()?)?;
            set.add_range(from, to)?;
        }
        set.normalize();
        Ok(set)
    }

    /// Write the mihomo layout: `[1][i64 BE n][n × (from16, to16)]` with
    /// IPv4 stored IPv4-mapped.
    pub fn write_mrs(&self, buf: &mut Vec<u8>) {
        buf.push(SET_VERSION);
        buf.extend_from_slice(&(self.len() as i64).to_be_bytes());
        for (from, to) in self.ranges() {
            buf.extend_from_slice(&to_v6(from).octets());
            buf.extend_from_slice(&to_v6(to).octets());
        }
    }

    pub fn read_mrs(reader: &mut ByteReader<'_>) -> Result<Self> {
        check_version(reader.read_u8()?)?;
        let count = reader.read_i64_len(0)?;
        let mut set = Self::default();
        for _ in 0..count {
            let from = unmap(Ipv6Addr::from(reader.read_array::<16>()?));
            let to = unmap(Ipv6Addr::from(reader.read_array::<16>()?));
            set.add_range(from, to)?;
        }
        set.normalize();
        Ok(set)
    }
}

fn check_version(version: u8) -> Result<()> {
    if version != SET_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    Ok(())
}

fn addr_bytes(addr: IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(a) => a.octets().to_vec(),
        IpAddr::V6(a) => a.octets().to_vec(),
    }
}

fn addr_from_slice(bytes: &[u8]) -> Result<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        return Ok(IpAddr::from(octets));
    }
    if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
        return Ok(IpAddr::from(octets));
    }
    Err(Error::Parse(format!("invalid address length: {}", bytes.len())))
}

fn to_v6(addr: IpAddr) -> Ipv6Addr {
    match addr {
        IpAddr::V4(a) => a.to_ipv6_mapped(),
        IpAddr::V6(a) => a,
    }
}

fn unmap(addr: Ipv6Addr) -> IpAddr {
    match addr.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(addr),
    }
}
