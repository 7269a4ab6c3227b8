//! Cross-format conversion tests through the public API.

use ruleconv::convertor::{
    self, adguard, binary, Behavior, ConvertOptions, ConvertorType, Format, SourceOptions,
    TargetOptions,
};
use ruleconv::metadata;
use ruleconv::rule::InterfaceType;
use ruleconv::{DefaultRule, LogicalMode, LogicalRule, Rule};

fn clash_source(format: Format, behavior: Behavior) -> SourceOptions {
    SourceOptions {
        source_format: Some(format),
        source_behavior: Some(behavior),
        ..SourceOptions::new(ConvertorType::Clash)
    }
}

fn clash_target(format: Format, behavior: Behavior) -> TargetOptions {
    TargetOptions {
        target_format: Some(format),
        target_behavior: Some(behavior),
        ..TargetOptions::new(ConvertorType::Clash)
    }
}

fn sorted_lines(content: &[u8]) -> Vec<String> {
    let mut lines: Vec<String> = String::from_utf8(content.to_vec())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    lines.sort();
    lines
}

#[test]
fn test_surge_to_sing_box_json() {
    let options = ConvertOptions::between(ConvertorType::Surge, ConvertorType::Source);
    let json = convertor::convert(b"DOMAIN,a.com\nDOMAIN-SUFFIX,b.com\n", &options).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(value["version"], 3);
    assert_eq!(value["rules"][0]["domain"], "a.com");
    assert_eq!(value["rules"][1]["domain_suffix"], "b.com");
}

#[test]
fn test_clash_classical_through_json() {
    let input = b"DOMAIN,a.com\nIP-CIDR,10.0.0.0/8\n";
    let to_json = ConvertOptions::new(
        clash_source(Format::Text, Behavior::Classical),
        TargetOptions::new(ConvertorType::Source),
    );
    let json = convertor::convert(input, &to_json).unwrap();

    let back = ConvertOptions::new(
        SourceOptions::new(ConvertorType::Source),
        clash_target(Format::Text, Behavior::Classical),
    );
    assert_eq!(convertor::convert(&json, &back).unwrap(), input);
}

#[test]
fn test_clash_domain_through_mrs() {
    let input = b"payload:\n  - a.com\n  - '+.b.com'\n  - x.org\n";
    let to_mrs = ConvertOptions::new(
        clash_source(Format::Yaml, Behavior::Domain),
        clash_target(Format::Mrs, Behavior::Domain),
    );
    let mrs = convertor::convert(input, &to_mrs).unwrap();

    let to_text = ConvertOptions::new(
        clash_source(Format::Mrs, Behavior::Domain),
        clash_target(Format::Text, Behavior::Domain),
    );
    let text = convertor::convert(&mrs, &to_text).unwrap();
    assert_eq!(sorted_lines(&text), vec!["+.b.com", "a.com", "x.org"]);

    // Re-encoding the decoded set is stable.
    let again = ConvertOptions::new(
        clash_source(Format::Mrs, Behavior::Domain),
        clash_target(Format::Mrs, Behavior::Domain),
    );
    assert_eq!(convertor::convert(&mrs, &again).unwrap(), mrs);
}

#[test]
fn test_binary_downgrade_for_old_client() {
    let rules = vec![
        Rule::Logical(LogicalRule::new(
            LogicalMode::And,
            vec![
                Rule::Default(DefaultRule {
                    network_type: vec![InterfaceType::Cellular],
                    ..Default::default()
                }),
                Rule::Default(DefaultRule {
                    domain: vec!["video.example".to_string()],
                    ..Default::default()
                }),
            ],
        )),
        Rule::Default(DefaultRule {
            domain_suffix: vec!["example.net".to_string()],
            ..Default::default()
        }),
    ];
    let options = ConvertOptions::between(ConvertorType::Source, ConvertorType::Binary)
        .with_metadata(metadata::detect("sing-box 1.9.0"));
    let encoded = convertor::get(ConvertorType::Binary)
        .unwrap()
        .encode(&rules, &options)
        .unwrap();
    assert_eq!(&encoded[..4], b"SRS\x01");

    let decoded = binary::read_rule_set(&encoded).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].as_default().unwrap().domain_suffix, vec!["example.net"]);

    let current = binary::write_rule_set(&rules, 3).unwrap();
    assert_eq!(binary::read_rule_set(&current).unwrap().len(), 2);
}

#[test]
fn test_adguard_filter_to_json() {
    let list = adguard::parse_filter_list(
        "! comment\n||ads.example^\n||track.example^\nexample.com##.banner\n",
        false,
    )
    .unwrap();
    assert_eq!(list.parsed, 2);
    assert_eq!(list.ignored, 1);

    let options = ConvertOptions::between(ConvertorType::Adguard, ConvertorType::Source);
    let json = convertor::convert(b"||ads.example^\n||track.example^\n", &options).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
    let text = value.to_string();
    assert!(text.contains("ads.example"));
    assert!(text.contains("track.example"));
}

#[test]
fn test_unknown_identifiers() {
    assert!(ConvertorType::parse("meta").is_err());
    assert!(Behavior::parse("ip").is_err());
    assert!(Format::parse("json").is_err());
}
