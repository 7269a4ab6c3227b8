//! Rule model shared by every convertor.
//!
//! A rule-set decodes into a sequence of [`Rule`] values. A rule is either a
//! flat [`DefaultRule`] of match dimensions or a [`LogicalRule`] combining
//! sub-rules with AND/OR.

pub mod domain;
pub mod network;
pub mod port;

pub use network::{InterfaceType, QueryType};
pub use port::PortRange;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::{Error, Result};

/// A single rule: a flat match record or a boolean combination of rules.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Default(DefaultRule),
    Logical(LogicalRule),
}

/// Boolean mode of a logical rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalMode {
    And,
    Or,
}

impl LogicalMode {
    /// Parse a mode from a string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "and" => Some(LogicalMode::And),
            "or" => Some(LogicalMode::Or),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalMode::And => "and",
            LogicalMode::Or => "or",
        }
    }

    /// Convert to a u8 value for binary serialization.
    pub fn as_u8(&self) -> u8 {
        match self {
            LogicalMode::And => 0,
            LogicalMode::Or => 1,
        }
    }

    /// Convert from a u8 value.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(LogicalMode::And),
            1 => Some(LogicalMode::Or),
            _ => None,
        }
    }
}

impl fmt::Display for LogicalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A boolean combination of sub-rules. `rules` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogicalRule {
    pub mode: LogicalMode,
    pub rules: Vec<Rule>,
    #[serde(skip_serializing_if = "is_false")]
    pub invert: bool,
}

impl LogicalRule {
    pub fn new(mode: LogicalMode, rules: Vec<Rule>) -> Self {
        Self {
            mode,
            rules,
            invert: false,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }
}

/// A flat record of match dimensions.
///
/// Field names follow the sing-box headless rule schema. The symbolic
/// reference lists and inbound fields cannot be written to binary targets;
/// see [`Rule::is_headless_eligible`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultRule {
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub query_type: Vec<QueryType>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub network: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub domain: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub domain_suffix: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub domain_keyword: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub domain_regex: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub adguard_domain: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub source_ip_cidr: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub ip_cidr: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub source_port: Vec<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub source_port_range: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub port: Vec<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub port_range: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub process_name: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub process_path: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub process_path_regex: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub package_name: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub network_type: Vec<InterfaceType>,
    #[serde(skip_serializing_if = "is_false")]
    pub network_is_expensive: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub network_is_constrained: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub wifi_ssid: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub wifi_bssid: Vec<String>,

    // Inbound metadata
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub inbound: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub inbound_type: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub inbound_port: Vec<PortRange>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub inbound_user: Vec<String>,

    // Symbolic references, resolved by the embedding pass
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub geoip: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub source_geoip: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub ip_asn: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub source_ip_asn: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", with = "listable")]
    pub geosite: Vec<String>,

    #[serde(skip_serializing_if = "is_false")]
    pub invert: bool,
}

impl DefaultRule {
    /// Whether the rule can be embedded in a binary rule-set.
    pub fn is_headless_eligible(&self) -> bool {
        self.inbound.is_empty()
            && self.inbound_type.is_empty()
            && self.inbound_port.is_empty()
            && self.inbound_user.is_empty()
            && self.geoip.is_empty()
            && self.source_geoip.is_empty()
            && self.ip_asn.is_empty()
            && self.source_ip_asn.is_empty()
            && self.geosite.is_empty()
    }

    /// Whether the rule only matches on the destination domain or address.
    ///
    /// Such rules can be flattened into plain domain or IP-CIDR lists.
    pub fn is_destination_address_rule(&self) -> bool {
        let address = DefaultRule {
            domain: self.domain.clone(),
            domain_suffix: self.domain_suffix.clone(),
            domain_keyword: self.domain_keyword.clone(),
            domain_regex: self.domain_regex.clone(),
            ip_cidr: self.ip_cidr.clone(),
            ..Default::default()
        };
        *self == address
    }

    /// Whether every dimension is empty.
    pub fn is_empty(&self) -> bool {
        *self == DefaultRule::default()
    }

    /// Number of destination domain entries (exact and suffix).
    pub fn domain_count(&self) -> usize {
        self.domain.len() + self.domain_suffix.len()
    }
}

impl Rule {
    /// Whether the rule tree can be embedded in a binary rule-set.
    ///
    /// A logical rule is eligible iff all of its children are.
    pub fn is_headless_eligible(&self) -> bool {
        match self {
            Rule::Default(rule) => rule.is_headless_eligible(),
            Rule::Logical(rule) => rule.rules.iter().all(Rule::is_headless_eligible),
        }
    }

    /// Whether any default rule in the tree satisfies `pred`.
    pub fn has_default(&self, pred: &dyn Fn(&DefaultRule) -> bool) -> bool {
        match self {
            Rule::Default(rule) => pred(rule),
            Rule::Logical(rule) => rule.rules.iter().any(|r| r.has_default(pred)),
        }
    }

    /// Check structural invariants: logical rules are never empty.
    pub fn validate(&self) -> Result<()> {
        match self {
            Rule::Default(_) => Ok(()),
            Rule::Logical(rule) => {
                if rule.rules.is_empty() {
                    return Err(Error::Parse("logical rule without sub-rules".to_string()));
                }
                rule.rules.iter().try_for_each(Rule::validate)
            }
        }
    }

    pub fn as_default(&self) -> Option<&DefaultRule> {
        match self {
            Rule::Default(rule) => Some(rule),
            Rule::Logical(_) => None,
        }
    }
}

impl From<DefaultRule> for Rule {
    fn from(rule: DefaultRule) -> Self {
        Rule::Default(rule)
    }
}

impl From<LogicalRule> for Rule {
    fn from(rule: LogicalRule) -> Self {
        Rule::Logical(rule)
    }
}

/// Keep only rules a binary target can represent, logging what was dropped.
pub fn retain_headless(rules: &[Rule], target: &str) -> Vec<Rule> {
    let kept: Vec<Rule> = rules
        .iter()
        .filter(|r| r.is_headless_eligible())
        .cloned()
        .collect();
    let dropped = rules.len() - kept.len();
    if dropped > 0 {
        log::warn!(
            "dropped {} rules with inbound or unresolved resource fields for {} target",
            dropped,
            target
        );
    }
    kept
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// sing-box writes default rules without a type tag and logical rules as
/// `{"type":"logical","mode":..,"rules":..,"invert":..}`.
impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Tagged<'a> {
            #[serde(rename = "type")]
            kind: &'static str,
            #[serde(flatten)]
            rule: &'a LogicalRule,
        }
        match self {
            Rule::Default(rule) => rule.serialize(serializer),
            Rule::Logical(rule) => Tagged {
                kind: "logical",
                rule,
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "type", default)]
            kind: String,
            #[serde(default)]
            mode: Option<LogicalMode>,
            #[serde(default)]
            rules: Vec<Rule>,
            #[serde(flatten)]
            default: DefaultRule,
        }
        let raw = Raw::deserialize(deserializer)?;
        match raw.kind.as_str() {
            "" | "default" => Ok(Rule::Default(raw.default)),
            "logical" => {
                let mode = raw
                    .mode
                    .ok_or_else(|| serde::de::Error::custom("missing logical rule mode"))?;
                if raw.rules.is_empty() {
                    return Err(serde::de::Error::custom("logical rule without sub-rules"));
                }
                Ok(Rule::Logical(LogicalRule {
                    mode,
                    rules: raw.rules,
                    invert: raw.default.invert,
                }))
            }
            other => Err(serde::de::Error::custom(format!("unknown rule type: {}", other))),
        }
    }
}

/// A list field that accepts a scalar or an array and writes a single
/// element as a scalar.
mod listable {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        })
    }

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S, T>(values: &Vec<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match values.as_slice() {
            [single] => single.serialize(serializer),
            _ => values.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain_rule(domain: &str) -> Rule {
        Rule::Default(DefaultRule {
            domain: vec![domain.to_string()],
            ..Default::default()
        })
    }

    fn geoip_rule(code: &str) -> Rule {
        Rule::Default(DefaultRule {
            geoip: vec![code.to_string()],
            ..Default::default()
        })
    }

    #[test]
    fn test_headless_eligibility_law() {
        let samples = [
            domain_rule("a.com"),
            geoip_rule("cn"),
            Rule::Default(DefaultRule {
                inbound_port: vec![PortRange::single(53)],
                ..Default::default()
            }),
            Rule::Default(DefaultRule {
                geosite: vec!["google".to_string()],
                ..Default::default()
            }),
        ];
        for r1 in &samples {
            for r2 in &samples {
                let logical = Rule::Logical(LogicalRule::new(
                    LogicalMode::Or,
                    vec![r1.clone(), r2.clone()],
                ));
                assert_eq!(
                    logical.is_headless_eligible(),
                    r1.is_headless_eligible() && r2.is_headless_eligible()
                );
            }
        }
        assert!(domain_rule("a.com").is_headless_eligible());
        assert!(!geoip_rule("cn").is_headless_eligible());
    }

    #[test]
    fn test_destination_address_rule() {
        let rule = DefaultRule {
            domain: vec!["a.com".to_string()],
            ip_cidr: vec!["10.0.0.0/8".to_string()],
            ..Default::default()
        };
        assert!(rule.is_destination_address_rule());
        let inverted = DefaultRule {
            invert: true,
            ..rule.clone()
        };
        assert!(!inverted.is_destination_address_rule());
        let with_port = DefaultRule {
            port: vec![443],
            ..rule
        };
        assert!(!with_port.is_destination_address_rule());
    }

    #[test]
    fn test_json_listable_fields() {
        let rule: Rule = serde_json::from_str(
            r#"{"domain": "a.com", "domain_suffix": ["b.com", "c.com"], "port": 443}"#,
        )
        .unwrap();
        let Rule::Default(default) = &rule else {
            panic!("expected default rule");
        };
        assert_eq!(default.domain, vec!["a.com"]);
        assert_eq!(default.domain_suffix, vec!["b.com", "c.com"]);
        assert_eq!(default.port, vec![443]);

        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["domain"], "a.com");
        assert_eq!(json["domain_suffix"][1], "c.com");
        assert!(json.get("invert").is_none());
    }

    #[test]
    fn test_json_logical_rule() {
        let rule: Rule = serde_json::from_str(
            r#"{"type": "logical", "mode": "and", "invert": true,
                "rules": [{"domain": "a.com"}, {"network": "tcp"}]}"#,
        )
        .unwrap();
        let Rule::Logical(logical) = &rule else {
            panic!("expected logical rule");
        };
        assert_eq!(logical.mode, LogicalMode::And);
        assert!(logical.invert);
        assert_eq!(logical.rules.len(), 2);

        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["type"], "logical");
        assert_eq!(json["mode"], "and");
        assert_eq!(json["invert"], true);
        let back: Rule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn test_json_rejects_empty_logical() {
        let result: std::result::Result<Rule, _> =
            serde_json::from_str(r#"{"type": "logical", "mode": "or", "rules": []}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_has_default() {
        let tree = Rule::Logical(LogicalRule::new(
            LogicalMode::And,
            vec![
                domain_rule("a.com"),
                Rule::Default(DefaultRule {
                    network_is_expensive: true,
                    ..Default::default()
                }),
            ],
        ));
        assert!(tree.has_default(&|r| r.network_is_expensive));
        assert!(!tree.has_default(&|r| !r.network_type.is_empty()));
    }
}
