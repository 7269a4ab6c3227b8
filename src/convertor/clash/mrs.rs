//! mihomo MRS binary rule provider.
//!
//! The whole stream is zstd-compressed:
//!
//! ```text
//! "MRS" 0x01 | behavior u8 | count i64 BE | reserved len i64 BE + bytes | body
//! ```
//!
//! A domain body is a succinct set of reversed keys where `+.` marks a
//! wildcard; an ipcidr body is a list of merged 16-byte ranges.

use std::collections::BTreeSet;

use crate::binary::{ByteReader, IpRangeSet, SuccinctSet};
use crate::rule::domain::reverse;
use crate::rule::{DefaultRule, Rule};
use crate::{Error, Result};

const MAGIC: &[u8; 4] = b"MRS\x01";
const BEHAVIOR_DOMAIN: u8 = 0;
const BEHAVIOR_IPCIDR: u8 = 1;
const WILDCARD: &str = "+.";

/// Decode an MRS document into a single default rule.
pub fn decode(content: &[u8]) -> Result<Vec<Rule>> {
    let data = zstd::decode_all(content)?;
    let mut reader = ByteReader::new(&data);
    if reader.read_array::<4>()? != *MAGIC {
        return Err(Error::InvalidMagic("MRS"));
    }
    let behavior = reader.read_u8()?;
    let _count = reader.read_i64_be()?;
    let reserved = reader.read_i64_len(0)?;
    reader.read_bytes(reserved)?;

    let rule = match behavior {
        BEHAVIOR_DOMAIN => decode_domains(&mut reader)?,
        BEHAVIOR_IPCIDR => DefaultRule {
            ip_cidr: IpRangeSet::read_mrs(&mut reader)?.to_prefixes(),
            ..Default::default()
        },
        other => return Err(Error::Parse(format!("invalid MRS behavior: {}", other))),
    };
    Ok(vec![Rule::Default(rule)])
}

fn decode_domains(reader: &mut ByteReader<'_>) -> Result<DefaultRule> {
    let set = SuccinctSet::read_i64(reader)?;
    let mut keys = BTreeSet::new();
    for key in set.keys()? {
        let key = String::from_utf8(key)
            .map_err(|e| Error::Parse(format!("invalid MRS domain key: {}", e)))?;
        keys.insert(reverse(&key));
    }

    let mut rule = DefaultRule::default();
    for key in &keys {
        if let Some(suffix) = key.strip_prefix(WILDCARD) {
            if suffix.contains(['+', '*']) {
                continue;
            }
            rule.domain_suffix.push(suffix.to_string());
        } else if keys.contains(&format!("{}{}", WILDCARD, key)) || key.contains(['+', '*']) {
            continue;
        } else {
            rule.domain.push(key.clone());
        }
    }
    Ok(rule)
}

/// Encode rules as MRS.
///
/// Only default destination-address rules are representable. When any
/// IP-CIDR entry is present the ipcidr behavior is chosen and domain entries
/// are dropped.
pub fn encode(rules: &[Rule]) -> Result<Vec<u8>> {
    let mut domains: Vec<&str> = Vec::new();
    let mut suffixes: Vec<&str> = Vec::new();
    let mut cidrs: Vec<&str> = Vec::new();
    let mut skipped = 0usize;
    for rule in rules {
        match rule {
            Rule::Default(rule) if rule.is_headless_eligible() && rule.is_destination_address_rule() => {
                domains.extend(rule.domain.iter().map(String::as_str));
                suffixes.extend(rule.domain_suffix.iter().map(String::as_str));
                cidrs.extend(rule.ip_cidr.iter().map(String::as_str));
                if !rule.domain_keyword.is_empty() || !rule.domain_regex.is_empty() {
                    log::warn!(
                        "MRS cannot hold domain keywords or regexes, dropped {}",
                        rule.domain_keyword.len() + rule.domain_regex.len()
                    );
                }
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!("dropped {} rules that MRS cannot represent", skipped);
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    if !cidrs.is_empty() {
        let dropped = domains.len() + suffixes.len();
        if dropped > 0 {
            log::warn!(
                "MRS holds either domains or IP-CIDRs, dropped {} domain entries",
                dropped
            );
        }
        buf.push(BEHAVIOR_IPCIDR);
        buf.extend_from_slice(&(cidrs.len() as i64).to_be_bytes());
        buf.extend_from_slice(&0i64.to_be_bytes());
        IpRangeSet::from_cidrs(&cidrs)?.write_mrs(&mut buf);
    } else if !domains.is_empty() || !suffixes.is_empty() {
        buf.push(BEHAVIOR_DOMAIN);
        buf.extend_from_slice(&((domains.len() + suffixes.len()) as i64).to_be_bytes());
        buf.extend_from_slice(&0i64.to_be_bytes());
        domain_set(&domains, &suffixes).write_i64(&mut buf);
    } else {
        return Err(Error::UnsupportedTarget(
            "MRS rule-set would be empty".to_string(),
        ));
    }

    let level = *zstd::compression_level_range().end();
    Ok(zstd::encode_all(buf.as_slice(), level)?)
}

fn domain_set(domains: &[&str], suffixes: &[&str]) -> SuccinctSet {
    let mut keys: Vec<String> = Vec::with_capacity(domains.len() + suffixes.len() * 2);
    keys.extend(domains.iter().map(|d| reverse(d)));
    for suffix in suffixes {
        match suffix.strip_prefix('.') {
            Some(sub) => keys.push(reverse(&format!("{}{}", WILDCARD, sub))),
            None => {
                keys.push(reverse(suffix));
                keys.push(reverse(&format!("{}{}", WILDCARD, suffix)));
            }
        }
    }
    SuccinctSet::new(&keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain_rule(domains: &[&str], suffixes: &[&str]) -> Rule {
        Rule::Default(DefaultRule {
            domain: domains.iter().map(|s| s.to_string()).collect(),
            domain_suffix: suffixes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    #[test]
    fn test_domain_roundtrip() {
        let encoded = encode(&[domain_rule(&["a.com", "x.org"], &["b.com", ".c.net"])]).unwrap();
        let decoded = decode(&encoded).unwrap();
        let rule = decoded[0].as_default().unwrap();
        assert_eq!(rule.domain, vec!["a.com", "x.org"]);
        assert_eq!(rule.domain_suffix, vec!["b.com", "c.net"]);

        // Encoding the decoded set again is stable.
        let again = decode(&encode(&decoded).unwrap()).unwrap();
        assert_eq!(again, decoded);
    }

    #[test]
    fn test_decode_wildcard_without_root() {
        let mut raw = Vec::new();
        raw.extend_from_slice(MAGIC);
        raw.push(BEHAVIOR_DOMAIN);
        raw.extend_from_slice(&2i64.to_be_bytes());
        raw.extend_from_slice(&0i64.to_be_bytes());
        SuccinctSet::new(&["moc.a", "moc.b.+"]).write_i64(&mut raw);
        let content = zstd::encode_all(raw.as_slice(), 3).unwrap();

        let decoded = decode(&content).unwrap();
        let rule = decoded[0].as_default().unwrap();
        assert_eq!(rule.domain, vec!["a.com"]);
        assert_eq!(rule.domain_suffix, vec!["b.com"]);
    }

    #[test]
    fn test_header_layout() {
        let encoded = encode(&[domain_rule(&["a.com"], &["b.com"])]).unwrap();
        let raw = zstd::decode_all(encoded.as_slice()).unwrap();
        assert_eq!(&raw[..4], MAGIC);
        assert_eq!(raw[4], BEHAVIOR_DOMAIN);
        assert_eq!(i64::from_be_bytes(raw[5..13].try_into().unwrap()), 2);
        assert_eq!(i64::from_be_bytes(raw[13..21].try_into().unwrap()), 0);
    }

    #[test]
    fn test_ipcidr_wins_over_domains() {
        let rule = Rule::Default(DefaultRule {
            domain: vec!["a.com".to_string()],
            ip_cidr: vec!["10.0.0.0/9".to_string(), "10.128.0.0/9".to_string()],
            ..Default::default()
        });
        let decoded = decode(&encode(&[rule]).unwrap()).unwrap();
        let rule = decoded[0].as_default().unwrap();
        assert!(rule.domain.is_empty());
        assert_eq!(rule.ip_cidr, vec!["10.0.0.0/8"]);
    }

    #[test]
    fn test_rejects_empty_and_bad_magic() {
        assert!(matches!(encode(&[]), Err(Error::UnsupportedTarget(_))));
        let bogus = zstd::encode_all(&b"SRS\x01\x00"[..], 3).unwrap();
        assert!(matches!(decode(&bogus), Err(Error::InvalidMagic(_))));
    }

    #[test]
    fn test_skips_non_address_rules() {
        let rules = vec![
            domain_rule(&["a.com"], &[]),
            Rule::Default(DefaultRule {
                domain: vec!["b.com".to_string()],
                port: vec![443],
                ..Default::default()
            }),
        ];
        let decoded = decode(&encode(&rules).unwrap()).unwrap();
        assert_eq!(decoded[0].as_default().unwrap().domain, vec!["a.com"]);
    }
}
