//! Clash / mihomo rule providers.
//!
//! A provider is a list of entries serialized as plain text, as a YAML
//! `payload:` list or as MRS binary. The behavior decides what an entry is:
//! a domain, an IP-CIDR or a classical rule line.

pub mod mrs;
pub mod rule;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::convertor::{classical, Behavior, ConvertOptions, ConvertorType, Convertor, Format};
use crate::rule::{DefaultRule, Rule};
use crate::{Error, Result};

/// YAML rule provider document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Payload {
    #[serde(default)]
    payload: Vec<String>,
}

/// Clash rule provider convertor.
pub struct ClashConvertor;

impl Convertor for ClashConvertor {
    fn kind(&self) -> ConvertorType {
        ConvertorType::Clash
    }

    fn content_type(&self, options: &ConvertOptions) -> &'static str {
        match options.target.target_format.unwrap_or_default() {
            Format::Yaml => "application/x-yaml",
            Format::Mrs => "application/octet-stream",
            Format::Text => "text/plain",
        }
    }

    fn decode(&self, content: &[u8], options: &ConvertOptions) -> Result<Vec<Rule>> {
        let format = options.source.source_format.unwrap_or_default();
        if format == Format::Mrs {
            return mrs::decode(content);
        }

        let text = std::str::from_utf8(content)
            .map_err(|e| Error::Parse(format!("clash rule provider is not UTF-8: {}", e)))?;
        let entries: Vec<String> = match format {
            Format::Yaml => serde_yaml::from_str::<Payload>(text)?.payload,
            _ => text.lines().map(str::to_string).collect(),
        };
        let behavior = match options.source.source_behavior {
            Some(behavior) => behavior,
            None => detect_behavior(&entries),
        };

        match behavior {
            Behavior::Domain => Ok(vec![Rule::Default(decode_domains(&entries))]),
            Behavior::IpCidr => Ok(vec![Rule::Default(decode_cidrs(&entries))]),
            Behavior::Classical => Ok(classical::decode_lines(
                entries.iter().map(String::as_str),
                rule::from_line,
            )),
            other => Err(Error::Config(format!(
                "clash does not support behavior {}",
                other
            ))),
        }
    }

    fn encode(&self, rules: &[Rule], options: &ConvertOptions) -> Result<Vec<u8>> {
        let format = options.target.target_format.unwrap_or_default();
        if format == Format::Mrs {
            if options.target.target_behavior == Some(Behavior::Classical) {
                return Err(Error::UnsupportedTarget(
                    "MRS does not support classical behavior".to_string(),
                ));
            }
            return mrs::encode(rules);
        }

        let entries = match options.target.target_behavior.unwrap_or(Behavior::Classical) {
            Behavior::Domain => encode_domains(rules),
            Behavior::IpCidr => encode_cidrs(rules),
            Behavior::Classical => rule::to_lines(rules)?,
            other => {
                return Err(Error::Config(format!(
                    "clash does not support behavior {}",
                    other
                )))
            }
        };

        match format {
            Format::Yaml => Ok(serde_yaml::to_string(&Payload { payload: entries })?.into_bytes()),
            _ => {
                let mut out = String::new();
                for entry in entries {
                    out.push_str(&entry);
                    out.push('\n');
                }
                Ok(out.into_bytes())
            }
        }
    }
}

fn entry_lines(entries: &[String]) -> impl Iterator<Item = &str> {
    entries
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty() && !e.starts_with('#'))
}

/// Guess the behavior of an untyped provider from its first entry.
fn detect_behavior(entries: &[String]) -> Behavior {
    match entry_lines(entries).next() {
        Some(first) if first.parse::<IpNet>().is_ok() => Behavior::IpCidr,
        _ => Behavior::Domain,
    }
}

fn decode_domains(entries: &[String]) -> DefaultRule {
    let mut rule = DefaultRule::default();
    for entry in entry_lines(entries) {
        if let Some(suffix) = entry.strip_prefix("+.") {
            if !suffix.contains(['+', '*']) {
                rule.domain_suffix.push(suffix.to_string());
            }
        } else if entry.contains(['+', '*']) {
            log::debug!("ignored wildcard domain entry {}", entry);
        } else if entry.starts_with('.') {
            rule.domain_suffix.push(entry.to_string());
        } else {
            rule.domain.push(entry.to_string());
        }
    }
    rule
}

fn decode_cidrs(entries: &[String]) -> DefaultRule {
    DefaultRule {
        ip_cidr: entry_lines(entries).map(str::to_string).collect(),
        ..Default::default()
    }
}

/// Default destination-address rules, with the rest counted and logged.
fn address_rules<'a>(rules: &'a [Rule], behavior: Behavior) -> Vec<&'a DefaultRule> {
    let mut selected = Vec::new();
    let mut skipped = 0usize;
    for rule in rules {
        match rule {
            Rule::Default(rule) if rule.is_destination_address_rule() => selected.push(rule),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!(
            "dropped {} rules that the clash {} behavior cannot represent",
            skipped,
            behavior
        );
    }
    selected
}

fn encode_domains(rules: &[Rule]) -> Vec<String> {
    let mut entries = Vec::new();
    for rule in address_rules(rules, Behavior::Domain) {
        entries.extend(rule.domain.iter().cloned());
        entries.extend(rule.domain_suffix.iter().map(|s| {
            if s.starts_with('.') {
                s.clone()
            } else {
                format!("+.{}", s)
            }
        }));
    }
    entries
}

fn encode_cidrs(rules: &[Rule]) -> Vec<String> {
    address_rules(rules, Behavior::IpCidr)
        .into_iter()
        .flat_map(|rule| rule.ip_cidr.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convertor::{SourceOptions, TargetOptions};

    fn options(
        source: (Option<Format>, Option<Behavior>),
        target: (Option<Format>, Option<Behavior>),
    ) -> ConvertOptions {
        let mut src = SourceOptions::new(ConvertorType::Clash);
        src.source_format = source.0;
        src.source_behavior = source.1;
        let mut tgt = TargetOptions::new(ConvertorType::Clash);
        tgt.target_format = target.0;
        tgt.target_behavior = target.1;
        ConvertOptions::new(src, tgt)
    }

    #[test]
    fn test_domain_behavior() {
        let opts = options(
            (Some(Format::Yaml), Some(Behavior::Domain)),
            (Some(Format::Text), Some(Behavior::Domain)),
        );
        let content = "payload:\n  - a.com\n  - '+.b.com'\n  - .c.net\n  - '*.d.org'\n";
        let rules = ClashConvertor.decode(content.as_bytes(), &opts).unwrap();
        let rule = rules[0].as_default().unwrap();
        assert_eq!(rule.domain, vec!["a.com"]);
        assert_eq!(rule.domain_suffix, vec!["b.com", ".c.net"]);

        let out = ClashConvertor.encode(&rules, &opts).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a.com\n+.b.com\n.c.net\n");
    }

    #[test]
    fn test_ipcidr_yaml_output() {
        let opts = options(
            (Some(Format::Text), Some(Behavior::IpCidr)),
            (Some(Format::Yaml), Some(Behavior::IpCidr)),
        );
        let rules = ClashConvertor
            .decode(b"# comment\n10.0.0.0/8\n\n2001:db8::/32\n", &opts)
            .unwrap();
        let out = String::from_utf8(ClashConvertor.encode(&rules, &opts).unwrap()).unwrap();
        let parsed: Payload = serde_yaml::from_str(&out).unwrap();
        assert_eq!(parsed.payload, vec!["10.0.0.0/8", "2001:db8::/32"]);
        assert_eq!(ClashConvertor.content_type(&opts), "application/x-yaml");
    }

    #[test]
    fn test_classical_drops_bad_lines() {
        let opts = options((None, Some(Behavior::Classical)), (None, None));
        let content = b"DOMAIN,a.com\nMATCH,DIRECT\nIP-CIDR,10.0.0.0/8,no-resolve\n";
        let rules = ClashConvertor.decode(content, &opts).unwrap();
        assert_eq!(rules.len(), 2);
        let out = ClashConvertor.encode(&rules, &opts).unwrap();
        assert_eq!(out, b"DOMAIN,a.com\nIP-CIDR,10.0.0.0/8\n");
        assert_eq!(ClashConvertor.content_type(&opts), "text/plain");
    }

    #[test]
    fn test_detects_missing_behavior() {
        let opts = options((Some(Format::Text), None), (None, None));
        let rules = ClashConvertor
            .decode(b"# cidrs\n10.0.0.0/8\n192.168.0.0/16\n", &opts)
            .unwrap();
        assert_eq!(
            rules[0].as_default().unwrap().ip_cidr,
            vec!["10.0.0.0/8", "192.168.0.0/16"]
        );

        let rules = ClashConvertor.decode(b"a.com\n+.b.com\n", &opts).unwrap();
        let rule = rules[0].as_default().unwrap();
        assert_eq!(rule.domain, vec!["a.com"]);
        assert_eq!(rule.domain_suffix, vec!["b.com"]);

        let yaml = options((Some(Format::Yaml), None), (None, None));
        let rules = ClashConvertor
            .decode(b"payload:\n  - '2001:db8::/32'\n", &yaml)
            .unwrap();
        assert_eq!(rules[0].as_default().unwrap().ip_cidr, vec!["2001:db8::/32"]);
    }

    #[test]
    fn test_mrs_classical_rejected() {
        let opts = options((None, None), (Some(Format::Mrs), Some(Behavior::Classical)));
        let rules = vec![Rule::Default(DefaultRule {
            domain: vec!["a.com".to_string()],
            ..Default::default()
        })];
        assert!(matches!(
            ClashConvertor.encode(&rules, &opts),
            Err(Error::UnsupportedTarget(_))
        ));
    }
}
