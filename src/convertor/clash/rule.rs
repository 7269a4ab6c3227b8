//! Clash classical rule lines.

use crate::convertor::classical::{self, LineGroups};
use crate::rule::port::{self, parse_port_list, split_ranges, PortRange};
use crate::rule::{DefaultRule, Rule};
use crate::{Error, Result};

/// Decode one classical rule line.
pub fn from_line(line: &str) -> Result<Rule> {
    let parsed = classical::parse_rule(line);
    let payload = parsed.payload.clone();
    let mut rule = DefaultRule::default();
    match parsed.kind.as_str() {
        "MATCH" | "RULE-SET" | "SUB-RULE" => {
            return Err(Error::UnsupportedRule(format!(
                "{} is not allowed in a rule provider",
                parsed.kind
            )))
        }
        "IP-SUFFIX" | "SRC-IP-SUFFIX" | "DSCP" | "PROCESS-NAME-REGEX" | "UID" => {
            return Err(Error::UnsupportedRule(format!(
                "{} has no rule-set equivalent",
                parsed.kind
            )))
        }
        "DOMAIN" => rule.domain.push(payload),
        "DOMAIN-SUFFIX" => rule.domain_suffix.push(payload),
        "DOMAIN-KEYWORD" => rule.domain_keyword.push(payload),
        "DOMAIN-REGEX" => rule.domain_regex.push(payload),
        "IP-CIDR" | "IP-CIDR6" => {
            if parsed.has_param("src") {
                rule.source_ip_cidr.push(payload);
            } else {
                rule.ip_cidr.push(payload);
            }
        }
        "SRC-IP-CIDR" => rule.source_ip_cidr.push(payload),
        "DST-PORT" => {
            let (ports, ranges) = split_ranges(&parse_port_list(&payload)?);
            rule.port = ports;
            rule.port_range = ranges;
        }
        "SRC-PORT" => {
            let (ports, ranges) = split_ranges(&parse_port_list(&payload)?);
            rule.source_port = ports;
            rule.source_port_range = ranges;
        }
        "PROCESS-NAME" => rule.process_name.push(payload),
        "PROCESS-PATH" => rule.process_path.push(payload),
        "PROCESS-PATH-REGEX" => rule.process_path_regex.push(payload),
        "NETWORK" => match payload.to_ascii_lowercase().as_str() {
            network @ ("tcp" | "udp") => rule.network.push(network.to_string()),
            _ => return Err(Error::Parse(format!("unknown network: {}", payload))),
        },
        "GEOIP" => rule.geoip.push(payload.to_ascii_lowercase()),
        "SRC-GEOIP" => rule.source_geoip.push(payload.to_ascii_lowercase()),
        "IP-ASN" => rule.ip_asn.push(payload),
        "SRC-IP-ASN" => rule.source_ip_asn.push(payload),
        "GEOSITE" => rule.geosite.push(payload.to_ascii_lowercase()),
        "IN-PORT" => rule.inbound_port = parse_port_list(&payload)?,
        "IN-TYPE" => rule.inbound_type.push(payload.to_ascii_lowercase()),
        "IN-USER" => rule.inbound_user.extend(payload.split('/').map(str::to_string)),
        "IN-NAME" => rule.inbound.extend(payload.split('/').map(str::to_string)),
        "AND" | "OR" | "NOT" => {
            return classical::parse_logic_line(&parsed.kind, &payload, &from_line)
        }
        "" => return Err(Error::UnsupportedRule(format!("missing rule type: {}", line))),
        other => return Err(Error::UnsupportedRule(format!("unknown rule type: {}", other))),
    }
    Ok(Rule::Default(rule))
}

fn unsupported(field: &str) -> Error {
    Error::UnsupportedTarget(format!("clash does not support {}", field))
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

/// Encode the items of a default rule, one group per match dimension.
pub fn to_groups(rule: &DefaultRule) -> Result<LineGroups> {
    if !rule.query_type.is_empty() {
        return Err(unsupported("query_type"));
    }
    if !rule.package_name.is_empty() {
        return Err(unsupported("package_name"));
    }
    if !rule.network_type.is_empty() {
        return Err(unsupported("network_type"));
    }
    if rule.network_is_expensive {
        return Err(unsupported("network_is_expensive"));
    }
    if rule.network_is_constrained {
        return Err(unsupported("network_is_constrained"));
    }
    if !rule.wifi_ssid.is_empty() {
        return Err(unsupported("wifi_ssid"));
    }
    if !rule.wifi_bssid.is_empty() {
        return Err(unsupported("wifi_bssid"));
    }
    if !rule.adguard_domain.is_empty() {
        return Err(unsupported("adguard_domain"));
    }

    let mut destination = lines("DOMAIN", &rule.domain);
    destination.extend(
        rule.domain_suffix
            .iter()
            .map(|s| format!("DOMAIN-SUFFIX,{}", s.trim_start_matches('.'))),
    );
    destination.extend(lines("DOMAIN-KEYWORD", &rule.domain_keyword));
    destination.extend(lines("DOMAIN-REGEX", &rule.domain_regex));
    destination.extend(rule.ip_cidr.iter().map(|cidr| {
        if cidr.contains(':') {
            format!("IP-CIDR6,{}", cidr)
        } else {
            format!("IP-CIDR,{}", cidr)
        }
    }));
    destination.extend(lines("GEOIP", &rule.geoip));
    destination.extend(lines("IP-ASN", &rule.ip_asn));
    destination.extend(lines("GEOSITE", &rule.geosite));

    let mut source = lines("SRC-IP-CIDR", &rule.source_ip_cidr);
    source.extend(lines("SRC-GEOIP", &rule.source_geoip));
    source.extend(lines("SRC-IP-ASN", &rule.source_ip_asn));

    let mut network = Vec::new();
    for value in &rule.network {
        match value.to_ascii_lowercase().as_str() {
            "tcp" => network.push("NETWORK,TCP".to_string()),
            "udp" => network.push("NETWORK,UDP".to_string()),
            _ => return Err(Error::UnsupportedTarget(format!("unknown network: {}", value))),
        }
    }

    Ok(vec![
        destination,
        source,
        port_lines("DST-PORT", &port::merge_ports(&rule.port, &rule.port_range)?),
        port_lines(
            "SRC-PORT",
            &port::merge_ports(&rule.source_port, &rule.source_port_range)?,
        ),
        network,
        lines("PROCESS-NAME", &rule.process_name),
        lines("PROCESS-PATH", &rule.process_path),
        lines("PROCESS-PATH-REGEX", &rule.process_path_regex),
        lines("IN-NAME", &rule.inbound),
        lines("IN-TYPE", &rule.inbound_type),
        lines("IN-USER", &rule.inbound_user),
        port_lines("IN-PORT", &port::merge(rule.inbound_port.iter().copied())),
    ])
}

/// Encode rules as classical lines.
pub fn to_lines(rules: &[Rule]) -> Result<Vec<String>> {
    classical::encode_rules(rules, &to_groups)
}
