//! sing-box JSON rule-set source and version downgrade.

use serde::{Deserialize, Serialize};

use crate::convertor::{ConvertOptions, ConvertorType, Convertor};
use crate::metadata::{Metadata, Version};
use crate::rule::{retain_headless, DefaultRule, Rule};
use crate::{Error, Result};

/// Rule-set version understood by sing-box before 1.10.
pub const RULE_SET_VERSION_1: u8 = 1;
/// Adds AdGuard domains and process path regexes (sing-box 1.10).
pub const RULE_SET_VERSION_2: u8 = 2;
/// Adds network type matching (sing-box 1.11).
pub const RULE_SET_VERSION_3: u8 = 3;
pub const RULE_SET_VERSION_CURRENT: u8 = RULE_SET_VERSION_3;

const NETWORK_TYPE_SINCE: Version = Version::new(1, 11, 0);
const VERSION_2_SINCE: Version = Version::new(1, 10, 0);

/// A JSON rule-set document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSetDocument {
    pub version: u8,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn uses_network_type(rule: &DefaultRule) -> bool {
    !rule.network_type.is_empty() || rule.network_is_expensive || rule.network_is_constrained
}

/// Pick the rule-set version for the client and drop rules it cannot load.
///
/// Only sing-box clients that reported a version are downgraded.
pub fn downgrade(rules: Vec<Rule>, metadata: &Metadata) -> (u8, Vec<Rule>) {
    let Some(version) = metadata.sing_box_version() else {
        return (RULE_SET_VERSION_CURRENT, rules);
    };
    let mut target = RULE_SET_VERSION_CURRENT;
    let mut rules = rules;
    if *version < NETWORK_TYPE_SINCE {
        target = RULE_SET_VERSION_2;
        let before = rules.len();
        rules.retain(|rule| !rule.has_default(&uses_network_type));
        if rules.len() < before {
            log::warn!(
                "dropped {} network type rules for sing-box {}",
                before - rules.len(),
                version
            );
        }
    }
    if *version < VERSION_2_SINCE {
        target = RULE_SET_VERSION_1;
    }
    (target, rules)
}

/// The older rule-set version sing-box targets emit for this client, if any.
pub fn downgrade_version(metadata: &Metadata) -> Option<u8> {
    let version = metadata.sing_box_version()?;
    if *version < VERSION_2_SINCE {
        Some(RULE_SET_VERSION_1)
    } else if *version < NETWORK_TYPE_SINCE {
        Some(RULE_SET_VERSION_2)
    } else {
        None
    }
}

/// sing-box JSON convertor.
pub struct SourceConvertor;

impl Convertor for SourceConvertor {
    fn kind(&self) -> ConvertorType {
        ConvertorType::Source
    }

    fn content_type(&self, _options: &ConvertOptions) -> &'static str {
        "application/json"
    }

    fn decode(&self, content: &[u8], _options: &ConvertOptions) -> Result<Vec<Rule>> {
        if content.first() != Some(&b'{') {
            return Err(Error::Parse("source is not a JSON object".to_string()));
        }
        let document: RuleSetDocument = serde_json::from_slice(content)?;
        if document.version > RULE_SET_VERSION_CURRENT {
            return Err(Error::UnsupportedVersion(document.version));
        }
        for rule in &document.rules {
            rule.validate()?;
        }
        Ok(document.rules)
    }

    fn encode(&self, rules: &[Rule], options: &ConvertOptions) -> Result<Vec<u8>> {
        let (version, rules) = downgrade(retain_headless(rules, "source"), &options.metadata);
        let document = RuleSetDocument { version, rules };
        let mut out = serde_json::to_vec_pretty(&document)?;
        out.push(b'\n');
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{InterfaceType, LogicalMode, LogicalRule};

    fn network_rule() -> Rule {
        Rule::Logical(LogicalRule::new(
            LogicalMode::And,
            vec![
                Rule::Default(DefaultRule {
                    network_type: vec![InterfaceType::Wifi],
                    ..Default::default()
                }),
                Rule::Default(DefaultRule {
                    domain: vec!["a.com".to_string()],
                    ..Default::default()
                }),
            ],
        ))
    }

    fn domain_rule() -> Rule {
        Rule::Default(DefaultRule {
            domain_suffix: vec!["b.com".to_string()],
            ..Default::default()
        })
    }

    #[test]
    fn test_downgrade_1_9_0() {
        let metadata = crate::metadata::detect("sing-box 1.9.0");
        let (version, rules) = downgrade(vec![network_rule(), domain_rule()], &metadata);
        assert_eq!(version, RULE_SET_VERSION_1);
        assert_eq!(rules, vec![domain_rule()]);
        assert_eq!(downgrade_version(&metadata), Some(RULE_SET_VERSION_1));
    }

    #[test]
    fn test_downgrade_thresholds() {
        let (version, rules) =
            downgrade(vec![network_rule()], &crate::metadata::detect("sing-box 1.10.2"));
        assert_eq!(version, RULE_SET_VERSION_2);
        assert!(rules.is_empty());

        let (version, rules) =
            downgrade(vec![network_rule()], &crate::metadata::detect("sing-box 1.11.0"));
        assert_eq!(version, RULE_SET_VERSION_3);
        assert_eq!(rules.len(), 1);

        let (version, _) = downgrade(vec![network_rule()], &crate::metadata::detect("curl/8"));
        assert_eq!(version, RULE_SET_VERSION_CURRENT);
    }

    #[test]
    fn test_encode_format() {
        let options = ConvertOptions::between(ConvertorType::Source, ConvertorType::Source);
        let out = SourceConvertor.encode(&[domain_rule()], &options).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "{\n  \"version\": 3,\n  \"rules\": [\n    {\n      \"domain_suffix\": \"b.com\"\n    }\n  ]\n}\n"
        );
    }

    #[test]
    fn test_decode_checks() {
        let options = ConvertOptions::between(ConvertorType::Source, ConvertorType::Source);
        assert!(matches!(
            SourceConvertor.decode(b"[]", &options),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            SourceConvertor.decode(br#"{"version": 4, "rules": []}"#, &options),
            Err(Error::UnsupportedVersion(4))
        ));
        let rules = SourceConvertor
            .decode(
                br#"{"version": 2, "rules": [{"type": "default", "domain": ["a.com"]}]}"#,
                &options,
            )
            .unwrap();
        assert_eq!(rules[0].as_default().unwrap().domain, vec!["a.com"]);
    }

    #[test]
    fn test_encode_drops_ineligible() {
        let options = ConvertOptions::between(ConvertorType::Source, ConvertorType::Source);
        let geoip = Rule::Default(DefaultRule {
            geoip: vec!["cn".to_string()],
            ..Default::default()
        });
        let out = SourceConvertor.encode(&[geoip, domain_rule()], &options).unwrap();
        let document: RuleSetDocument = serde_json::from_slice(&out).unwrap();
        assert_eq!(document.rules, vec![domain_rule()]);
    }
}
