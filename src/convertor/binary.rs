//! sing-box SRS binary rule-sets.
//!
//! ```text
//! "SRS" | version u8 | zlib( uvarint count | rule... )
//! ```
//!
//! A default rule is a list of `(item id, payload)` pairs closed by `0xFF`
//! and an invert byte. A logical rule is `mode | uvarint n | rule... |
//! invert`.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::binary::codec::{put_string_list, put_u16_list, put_uvarint};
use crate::binary::{ByteReader, IpRangeSet, SuccinctSet};
use crate::convertor::source::{downgrade, RULE_SET_VERSION_2, RULE_SET_VERSION_3, RULE_SET_VERSION_CURRENT};
use crate::convertor::{ConvertOptions, ConvertorType, Convertor};
use crate::rule::domain::reverse;
use crate::rule::network::QueryType;
use crate::rule::{retain_headless, DefaultRule, InterfaceType, LogicalMode, LogicalRule, Rule};
use crate::{Error, Result};

const MAGIC: &[u8; 3] = b"SRS";

const RULE_TYPE_DEFAULT: u8 = 0;
const RULE_TYPE_LOGICAL: u8 = 1;

const ITEM_QUERY_TYPE: u8 = 0;
const ITEM_NETWORK: u8 = 1;
const ITEM_DOMAIN: u8 = 2;
const ITEM_DOMAIN_KEYWORD: u8 = 3;
const ITEM_DOMAIN_REGEX: u8 = 4;
const ITEM_SOURCE_IP_CIDR: u8 = 5;
const ITEM_IP_CIDR: u8 = 6;
const ITEM_SOURCE_PORT: u8 = 7;
const ITEM_SOURCE_PORT_RANGE: u8 = 8;
const ITEM_PORT: u8 = 9;
const ITEM_PORT_RANGE: u8 = 10;
const ITEM_PROCESS_NAME: u8 = 11;
const ITEM_PROCESS_PATH: u8 = 12;
const ITEM_PACKAGE_NAME: u8 = 13;
const ITEM_WIFI_SSID: u8 = 14;
const ITEM_WIFI_BSSID: u8 = 15;
const ITEM_ADGUARD_DOMAIN: u8 = 16;
const ITEM_PROCESS_PATH_REGEX: u8 = 17;
const ITEM_NETWORK_TYPE: u8 = 18;
const ITEM_NETWORK_IS_EXPENSIVE: u8 = 19;
const ITEM_NETWORK_IS_CONSTRAINED: u8 = 20;
const ITEM_FINAL: u8 = 0xFF;

/// Suffix key marker for a suffix that also matches the bare domain.
const ROOT_LABEL: char = '\n';
/// Suffix key marker for a dotted suffix that only matches subdomains.
const SUFFIX_LABEL: char = '\r';

/// sing-box SRS convertor.
pub struct BinaryConvertor;

impl Convertor for BinaryConvertor {
    fn kind(&self) -> ConvertorType {
        ConvertorType::Binary
    }

    fn content_type(&self, _options: &ConvertOptions) -> &'static str {
        "application/octet-stream"
    }

    fn decode(&self, content: &[u8], _options: &ConvertOptions) -> Result<Vec<Rule>> {
        read_rule_set(content)
    }

    fn encode(&self, rules: &[Rule], options: &ConvertOptions) -> Result<Vec<u8>> {
        let (version, rules) = downgrade(retain_headless(rules, "binary"), &options.metadata);
        write_rule_set(&rules, version)
    }
}

/// Serialize rules as an SRS document of the given version.
pub fn write_rule_set(rules: &[Rule], version: u8) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    put_uvarint(&mut body, rules.len() as u64);
    for rule in rules {
        write_rule(&mut body, rule, version)?;
    }

    let mut out = Vec::with_capacity(body.len() / 2 + 4);
    out.extend_from_slice(MAGIC);
    out.push(version);
    let mut encoder = ZlibEncoder::new(out, Compression::best());
    encoder.write_all(&body)?;
    Ok(encoder.finish()?)
}

/// Parse an SRS document.
pub fn read_rule_set(content: &[u8]) -> Result<Vec<Rule>> {
    if content.len() < 4 || &content[..3] != MAGIC {
        return Err(Error::InvalidMagic("SRS"));
    }
    let version = content[3];
    if version > RULE_SET_VERSION_CURRENT {
        return Err(Error::UnsupportedVersion(version));
    }
    let mut body = Vec::new();
    ZlibDecoder::new(&content[4..]).read_to_end(&mut body)?;

    let mut reader = ByteReader::new(&body);
    let count = reader.read_len()?;
    let mut rules = Vec::with_capacity(count);
    for _ in 0..count {
        rules.push(read_rule(&mut reader)?);
    }
    Ok(rules)
}

fn write_rule(buf: &mut Vec<u8>, rule: &Rule, version: u8) -> Result<()> {
    match rule {
        Rule::Default(rule) => {
            buf.push(RULE_TYPE_DEFAULT);
            write_default(buf, rule, version)
        }
        Rule::Logical(rule) => {
            buf.push(RULE_TYPE_LOGICAL);
            buf.push(rule.mode.as_u8());
            put_uvarint(buf, rule.rules.len() as u64);
            for child in &rule.rules {
                write_rule(buf, child, version)?;
            }
            buf.push(u8::from(rule.invert));
            Ok(())
        }
    }
}

fn require_version(version: u8, needed: u8, field: &str) -> Result<()> {
    if version < needed {
        return Err(Error::UnsupportedTarget(format!(
            "{} requires rule-set version {}, got {}",
            field, needed, version
        )));
    }
    Ok(())
}

fn put_strings(buf: &mut Vec<u8>, item: u8, values: &[String]) {
    if !values.is_empty() {
        buf.push(item);
        put_string_list(buf, values);
    }
}

fn put_ports(buf: &mut Vec<u8>, item: u8, values: &[u16]) {
    if !values.is_empty() {
        buf.push(item);
        put_u16_list(buf, values);
    }
}

fn domain_keys(domains: &[String], suffixes: &[String]) -> Vec<String> {
    let mut keys: Vec<String> = domains.iter().map(|d| reverse(d)).collect();
    for suffix in suffixes {
        let marked = if suffix.starts_with('.') {
            format!("{}{}", SUFFIX_LABEL, suffix)
        } else {
            format!("{}{}", ROOT_LABEL, suffix)
        };
        keys.push(reverse(&marked));
    }
    keys
}

fn write_default(buf: &mut Vec<u8>, rule: &DefaultRule, version: u8) -> Result<()> {
    if !rule.query_type.is_empty() {
        buf.push(ITEM_QUERY_TYPE);
        let codes: Vec<u16> = rule.query_type.iter().map(|q| q.0).collect();
        put_u16_list(buf, &codes);
    }
    put_strings(buf, ITEM_NETWORK, &rule.network);
    if !rule.domain.is_empty() || !rule.domain_suffix.is_empty() {
        buf.push(ITEM_DOMAIN);
        SuccinctSet::new(&domain_keys(&rule.domain, &rule.domain_suffix)).write_uvarint(buf);
    }
    put_strings(buf, ITEM_DOMAIN_KEYWORD, &rule.domain_keyword);
    put_strings(buf, ITEM_DOMAIN_REGEX, &rule.domain_regex);
    if !rule.source_ip_cidr.is_empty() {
        buf.push(ITEM_SOURCE_IP_CIDR);
        IpRangeSet::from_cidrs(&rule.source_ip_cidr)?.write_srs(buf);
    }
    if !rule.ip_cidr.is_empty() {
        buf.push(ITEM_IP_CIDR);
        IpRangeSet::from_cidrs(&rule.ip_cidr)?.write_srs(buf);
    }
    put_ports(buf, ITEM_SOURCE_PORT, &rule.source_port);
    put_strings(buf, ITEM_SOURCE_PORT_RANGE, &rule.source_port_range);
    put_ports(buf, ITEM_PORT, &rule.port);
    put_strings(buf, ITEM_PORT_RANGE, &rule.port_range);
    put_strings(buf, ITEM_PROCESS_NAME, &rule.process_name);
    put_strings(buf, ITEM_PROCESS_PATH, &rule.process_path);
    put_strings(buf, ITEM_PACKAGE_NAME, &rule.package_name);
    put_strings(buf, ITEM_WIFI_SSID, &rule.wifi_ssid);
    put_strings(buf, ITEM_WIFI_BSSID, &rule.wifi_bssid);
    if !rule.adguard_domain.is_empty() {
        require_version(version, RULE_SET_VERSION_2, "adguard_domain")?;
        put_strings(buf, ITEM_ADGUARD_DOMAIN, &rule.adguard_domain);
    }
    if !rule.process_path_regex.is_empty() {
        require_version(version, RULE_SET_VERSION_2, "process_path_regex")?;
        put_strings(buf, ITEM_PROCESS_PATH_REGEX, &rule.process_path_regex);
    }
    if !rule.network_type.is_empty() {
        require_version(version, RULE_SET_VERSION_3, "network_type")?;
        buf.push(ITEM_NETWORK_TYPE);
        put_uvarint(buf, rule.network_type.len() as u64);
        buf.extend(rule.network_type.iter().map(InterfaceType::as_u8));
    }
    if rule.network_is_expensive {
        require_version(version, RULE_SET_VERSION_3, "network_is_expensive")?;
        buf.push(ITEM_NETWORK_IS_EXPENSIVE);
    }
    if rule.network_is_constrained {
        require_version(version, RULE_SET_VERSION_3, "network_is_constrained")?;
        buf.push(ITEM_NETWORK_IS_CONSTRAINED);
    }
    buf.push(ITEM_FINAL);
    buf.push(u8::from(rule.invert));
    Ok(())
}

fn read_rule(reader: &mut ByteReader<'_>) -> Result<Rule> {
    match reader.read_u8()? {
        RULE_TYPE_DEFAULT => Ok(Rule::Default(read_default(reader)?)),
        RULE_TYPE_LOGICAL => {
            let mode = reader.read_u8()?;
            let mode = LogicalMode::from_u8(mode)
                .ok_or_else(|| Error::Parse(format!("unknown logical mode: {}", mode)))?;
            let count = reader.read_len()?;
            if count == 0 {
                return Err(Error::Parse("logical rule without sub-rules".to_string()));
            }
            let mut rules = Vec::with_capacity(count);
            for _ in 0..count {
                rules.push(read_rule(reader)?);
            }
            Ok(Rule::Logical(LogicalRule {
                mode,
                rules,
                invert: reader.read_bool()?,
            }))
        }
        other => Err(Error::Parse(format!("unknown rule type: {}", other))),
    }
}

fn read_domains(reader: &mut ByteReader<'_>, rule: &mut DefaultRule) -> Result<()> {
    for key in SuccinctSet::read_uvarint(reader)?.keys()? {
        let key = String::from_utf8(key)
            .map_err(|e| Error::Parse(format!("invalid domain key: {}", e)))?;
        let key = reverse(&key);
        if let Some(suffix) = key.strip_prefix(ROOT_LABEL) {
            rule.domain_suffix.push(suffix.to_string());
        } else if let Some(suffix) = key.strip_prefix(SUFFIX_LABEL) {
            rule.domain_suffix.push(suffix.to_string());
        } else {
            rule.domain.push(key);
        }
    }
    Ok(())
}

fn read_default(reader: &mut ByteReader<'_>) -> Result<DefaultRule> {
    let mut rule = DefaultRule::default();
    loop {
        match reader.read_u8()? {
            ITEM_QUERY_TYPE => {
                rule.query_type = reader.read_u16_list()?.into_iter().map(QueryType).collect()
            }
            ITEM_NETWORK => rule.network = reader.read_string_list()?,
            ITEM_DOMAIN => read_domains(reader, &mut rule)?,
            ITEM_DOMAIN_KEYWORD => rule.domain_keyword = reader.read_string_list()?,
            ITEM_DOMAIN_REGEX => rule.domain_regex = reader.read_string_list()?,
            ITEM_SOURCE_IP_CIDR => {
                rule.source_ip_cidr = IpRangeSet::read_srs(reader)?.to_prefixes()
            }
            ITEM_IP_CIDR => rule.ip_cidr = IpRangeSet::read_srs(reader)?.to_prefixes(),
            ITEM_SOURCE_PORT => rule.source_port = reader.read_u16_list()?,
            ITEM_SOURCE_PORT_RANGE => rule.source_port_range = reader.read_string_list()?,
            ITEM_PORT => rule.port = reader.read_u16_list()?,
            ITEM_PORT_RANGE => rule.port_range = reader.read_string_list()?,
            ITEM_PROCESS_NAME => rule.process_name = reader.read_string_list()?,
            ITEM_PROCESS_PATH => rule.process_path = reader.read_string_list()?,
            ITEM_PACKAGE_NAME => rule.package_name = reader.read_string_list()?,
            ITEM_WIFI_SSID => rule.wifi_ssid = reader.read_string_list()?,
            ITEM_WIFI_BSSID => rule.wifi_bssid = reader.read_string_list()?,
            ITEM_ADGUARD_DOMAIN => rule.adguard_domain = reader.read_string_list()?,
            ITEM_PROCESS_PATH_REGEX => rule.process_path_regex = reader.read_string_list()?,
            ITEM_NETWORK_TYPE => {
                let count = reader.read_len()?;
                let raw = reader.read_bytes(count)?;
                rule.network_type = raw
                    .iter()
                    .map(|&b| {
                        InterfaceType::from_u8(b)
                            .ok_or_else(|| Error::Parse(format!("unknown network type: {}", b)))
                    })
                    .collect::<Result<_>>()?;
            }
            ITEM_NETWORK_IS_EXPENSIVE => rule.network_is_expensive = true,
            ITEM_NETWORK_IS_CONSTRAINED => rule.network_is_constrained = true,
            ITEM_FINAL => {
                rule.invert = reader.read_bool()?;
                return Ok(rule);
            }
            other => return Err(Error::Parse(format!("unknown rule item type: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convertor::source::RULE_SET_VERSION_1;

    fn sample() -> Vec<Rule> {
        vec![
            Rule::Default(DefaultRule {
                query_type: vec![QueryType(1), QueryType(28)],
                domain: vec!["a.com".to_string()],
                domain_suffix: vec!["b.com".to_string(), ".c.net".to_string()],
                domain_keyword: vec!["ads".to_string()],
                ip_cidr: vec!["10.0.0.0/8".to_string(), "2001:db8::/32".to_string()],
                port: vec![443],
                port_range: vec!["1000:2000".to_string()],
                ..Default::default()
            }),
            Rule::Logical(LogicalRule {
                mode: LogicalMode::Or,
                rules: vec![
                    Rule::Default(DefaultRule {
                        network_type: vec![InterfaceType::Cellular],
                        network_is_expensive: true,
                        ..Default::default()
                    }),
                    Rule::Default(DefaultRule {
                        process_name: vec!["curl".to_string()],
                        invert: true,
                        ..Default::default()
                    }),
                ],
                invert: true,
            }),
        ]
    }

    #[test]
    fn test_srs_roundtrip() {
        let rules = sample();
        let encoded = write_rule_set(&rules, RULE_SET_VERSION_CURRENT).unwrap();
        assert_eq!(&encoded[..3], MAGIC);
        assert_eq!(encoded[3], RULE_SET_VERSION_CURRENT);

        let decoded = read_rule_set(&encoded).unwrap();
        let first = decoded[0].as_default().unwrap();
        assert_eq!(first.domain, vec!["a.com"]);
        let mut suffixes = first.domain_suffix.clone();
        suffixes.sort();
        assert_eq!(suffixes, vec![".c.net", "b.com"]);
        assert_eq!(decoded[1], rules[1]);

        let mut expected = rules[0].as_default().unwrap().clone();
        expected.domain_suffix = first.domain_suffix.clone();
        assert_eq!(*first, expected);
    }

    #[test]
    fn test_version_gates() {
        let adguard = vec![Rule::Default(DefaultRule {
            adguard_domain: vec!["||a.com^".to_string()],
            ..Default::default()
        })];
        assert!(matches!(
            write_rule_set(&adguard, RULE_SET_VERSION_1),
            Err(Error::UnsupportedTarget(_))
        ));
        assert!(write_rule_set(&adguard, RULE_SET_VERSION_2).is_ok());
        assert!(matches!(
            write_rule_set(&sample(), RULE_SET_VERSION_2),
            Err(Error::UnsupportedTarget(_))
        ));
    }

    #[test]
    fn test_downgraded_encode() {
        let options = ConvertOptions::between(ConvertorType::Source, ConvertorType::Binary)
            .with_metadata(crate::metadata::detect("sing-box 1.10.0"));
        let encoded = BinaryConvertor.encode(&sample(), &options).unwrap();
        assert_eq!(encoded[3], RULE_SET_VERSION_2);
        assert_eq!(read_rule_set(&encoded).unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_bad_header() {
        assert!(matches!(read_rule_set(b"MRS\x01"), Err(Error::InvalidMagic(_))));
        assert!(matches!(read_rule_set(b"SRS\x09"), Err(Error::UnsupportedVersion(9))));
    }
}
