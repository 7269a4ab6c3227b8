//! Surge rule-sets and domain-sets.

use std::net::IpAddr;

use crate::convertor::classical::{self, LineGroups};
use crate::convertor::{Behavior, ConvertOptions, ConvertorType, Convertor};
use crate::rule::port::{self, PortRange};
use crate::rule::{DefaultRule, InterfaceType, Rule};
use crate::{Error, Result};

const UNSUPPORTED: &str = "The rule contains options that Surge does not support";

/// Surge convertor. The `rule-set` behavior is the default.
pub struct SurgeConvertor;

impl Convertor for SurgeConvertor {
    fn kind(&self) -> ConvertorType {
        ConvertorType::Surge
    }

    fn content_type(&self, _options: &ConvertOptions) -> &'static str {
        "text/plain"
    }

    fn decode(&self, content: &[u8], options: &ConvertOptions) -> Result<Vec<Rule>> {
        let text = std::str::from_utf8(content)
            .map_err(|e| Error::Parse(format!("surge rule-set is not UTF-8: {}", e)))?;
        match options.source.source_behavior.unwrap_or(Behavior::RuleSet) {
            Behavior::RuleSet => Ok(classical::decode_lines(text.lines(), from_line)),
            Behavior::DomainSet => Ok(vec![Rule::Default(decode_domain_set(text))]),
            other => Err(Error::Config(format!(
                "surge does not support behavior {}",
                other
            ))),
        }
    }

    fn encode(&self, rules: &[Rule], options: &ConvertOptions) -> Result<Vec<u8>> {
        let lines = match options.target.target_behavior.unwrap_or(Behavior::RuleSet) {
            Behavior::RuleSet => classical::encode_rules(rules, &to_groups)?,
            Behavior::DomainSet => encode_domain_set(rules),
            other => {
                return Err(Error::Config(format!(
                    "surge does not support behavior {}",
                    other
                )))
            }
        };
        let mut out = String::new();
        for line in lines {
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out.into_bytes())
    }
}

/// Decode one Surge rule line.
pub fn from_line(line: &str) -> Result<Rule> {
    let parsed = classical::parse_rule(line);
    let payload = parsed.payload.clone();
    let mut rule = DefaultRule::default();
    match parsed.kind.as_str() {
        "DOMAIN" => rule.domain.push(payload),
        "DOMAIN-SUFFIX" => rule.domain_suffix.push(payload),
        "DOMAIN-KEYWORD" => rule.domain_keyword.push(payload),
        "DOMAIN-REGEX" => rule.domain_regex.push(payload),
        "IP-CIDR" | "IP-CIDR6" => rule.ip_cidr.push(payload),
        "SRC-IP" => rule.source_ip_cidr.push(payload),
        "DEST-PORT" => push_port(
            PortRange::parse_surge(&payload)?,
            &mut rule.port,
            &mut rule.port_range,
        ),
        "SRC-PORT" => push_port(
            PortRange::parse_surge(&payload)?,
            &mut rule.source_port,
            &mut rule.source_port_range,
        ),
        "IN-PORT" => rule.inbound_port = vec![PortRange::parse_surge(&payload)?],
        "PROCESS-NAME" => rule.process_name.push(payload),
        "SUBNET" => {
            let (kind, value) = payload.split_once(':').unwrap_or((payload.as_str(), ""));
            match kind {
                "SSID" => rule.wifi_ssid.push(value.to_string()),
                "BSSID" => rule.wifi_bssid.push(value.to_string()),
                "TYPE" => rule.network_type.push(match value {
                    "WIFI" => InterfaceType::Wifi,
                    "WIRED" => InterfaceType::Ethernet,
                    "CELLULAR" => InterfaceType::Cellular,
                    _ => {
                        return Err(Error::UnsupportedRule(format!(
                            "unsupported subnet type: {}",
                            value
                        )))
                    }
                }),
                _ => {
                    return Err(Error::UnsupportedRule(format!(
                        "unsupported subnet rule: {}",
                        line
                    )))
                }
            }
        }
        "GEOIP" => rule.geoip.push(payload),
        "IP-ASN" => rule.ip_asn.push(payload),
        "AND" | "OR" | "NOT" => {
            return classical::parse_logic_line(&parsed.kind, &payload, &from_line)
        }
        other => {
            return Err(Error::UnsupportedRule(format!(
                "unsupported rule type: {}",
                other
            )))
        }
    }
    Ok(Rule::Default(rule))
}

fn push_port(range: PortRange, ports: &mut Vec<u16>, ranges: &mut Vec<String>) {
    if range.is_single() {
        ports.push(range.start);
    } else {
        ranges.push(range.to_colon_string());
    }
}

fn lines<'a>(prefix: &str, values: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| format!("{},{}", prefix, v))
        .collect()
}

fn port_lines(prefix: &str, ranges: &[PortRange]) -> Vec<String> {
    ranges.iter().map(|r| format!("{},{}", prefix, r)).collect()
}

/// Bare addresses become host prefixes.
fn host_prefix(value: &str) -> String {
    match value.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => format!("{}/32", addr),
        Ok(IpAddr::V6(addr)) => format!("{}/128", addr),
        Err(_) => value.to_string(),
    }
}

/// Encode the items of a default rule, one group per match dimension.
pub fn to_groups(rule: &DefaultRule) -> Result<LineGroups> {
    if !rule.query_type.is_empty()
        || !rule.network.is_empty()
        || !rule.process_path.is_empty()
        || !rule.process_path_regex.is_empty()
        || !rule.package_name.is_empty()
        || rule.network_is_expensive
        || rule.network_is_constrained
        || !rule.source_geoip.is_empty()
        || !rule.source_ip_asn.is_empty()
        || !rule.inbound.is_empty()
        || !rule.inbound_type.is_empty()
        || !rule.inbound_user.is_empty()
        || !rule.geosite.is_empty()
        || !rule.adguard_domain.is_empty()
        || rule.network_type.contains(&InterfaceType::Other)
    {
        return Err(Error::UnsupportedTarget(UNSUPPORTED.to_string()));
    }

    let mut destination = lines("DOMAIN", &rule.domain);
    destination.extend(lines("DOMAIN-SUFFIX", &rule.domain_suffix));
    destination.extend(lines("DOMAIN-KEYWORD", &rule.domain_keyword));
    destination.extend(lines("DOMAIN-REGEX", &rule.domain_regex));
    for cidr in &rule.ip_cidr {
        let prefix = host_prefix(cidr);
        if prefix.contains(':') {
            destination.push(format!("IP-CIDR6,{}", prefix));
        } else {
            destination.push(format!("IP-CIDR,{}", prefix));
        }
    }
    destination.extend(lines("GEOIP", &rule.geoip));
    destination.extend(lines("IP-ASN", &rule.ip_asn));

    let source = rule
        .source_ip_cidr
        .iter()
        .map(|cidr| format!("SRC-IP,{}", host_prefix(cidr)))
        .collect();

    let network_type = rule
        .network_type
        .iter()
        .map(|t| match t {
            InterfaceType::Wifi => "SUBNET,TYPE:WIFI".to_string(),
            InterfaceType::Ethernet => "SUBNET,TYPE:WIRED".to_string(),
            _ => "SUBNET,TYPE:CELLULAR".to_string(),
        })
        .collect();

    Ok(vec![
        destination,
        source,
        port_lines("DEST-PORT", &port::merge_ports(&rule.port, &rule.port_range)?),
        port_lines(
            "SRC-PORT",
            &port::merge_ports(&rule.source_port, &rule.source_port_range)?,
        ),
        port_lines("IN-PORT", &port::merge(rule.inbound_port.iter().copied())),
        lines("PROCESS-NAME", &rule.process_name),
        rule.wifi_ssid.iter().map(|s| format!("SUBNET,SSID:{}", s)).collect(),
        rule.wifi_bssid.iter().map(|s| format!("SUBNET,BSSID:{}", s)).collect(),
        network_type,
    ])
}

fn decode_domain_set(text: &str) -> DefaultRule {
    let mut rule = DefaultRule::default();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.strip_prefix('.') {
            Some(suffix) => rule.domain_suffix.push(suffix.to_string()),
            None => rule.domain.push(line.to_string()),
        }
    }
    rule
}

fn encode_domain_set(rules: &[Rule]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut skipped = 0usize;
    for rule in rules {
        match rule {
            Rule::Default(rule) if !rule.invert => {
                lines.extend(rule.domain.iter().cloned());
                lines.extend(rule.domain_suffix.iter().map(|s| {
                    if s.starts_with('.') {
                        s.clone()
                    } else {
                        format!(".{}", s)
                    }
                }));
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!("dropped {} rules that a surge domain-set cannot represent", skipped);
    }
    lines
}
