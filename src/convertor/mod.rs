//! Rule-set format convertors.
//!
//! Every supported format implements [`Convertor`], a decode/encode pair over
//! the shared [`Rule`] model. Convertors are stateless and looked up through
//! a static registry keyed by [`ConvertorType`].

pub mod adguard;
pub mod binary;
pub mod classical;
pub mod clash;
pub mod source;
pub mod surge;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::metadata::Metadata;
use crate::rule::Rule;
use crate::{Error, Result};

/// Supported rule-set formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvertorType {
    /// sing-box JSON rule-set
    Source,
    /// sing-box SRS binary rule-set
    Binary,
    /// AdGuard DNS filter list
    Adguard,
    /// Clash / mihomo rule provider
    Clash,
    /// Surge rule-set or domain-set
    Surge,
}

impl ConvertorType {
    /// Parse a convertor identifier (case-insensitive).
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "source" => Ok(ConvertorType::Source),
            "binary" => Ok(ConvertorType::Binary),
            "adguard" => Ok(ConvertorType::Adguard),
            "clash" => Ok(ConvertorType::Clash),
            "surge" => Ok(ConvertorType::Surge),
            _ => Err(Error::Config(format!("unknown convertor type: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConvertorType::Source => "source",
            ConvertorType::Binary => "binary",
            ConvertorType::Adguard => "adguard",
            ConvertorType::Clash => "clash",
            ConvertorType::Surge => "surge",
        }
    }

    /// All convertor types.
    pub fn all() -> &'static [ConvertorType] {
        &[
            ConvertorType::Source,
            ConvertorType::Binary,
            ConvertorType::Adguard,
            ConvertorType::Clash,
            ConvertorType::Surge,
        ]
    }

    /// Whether the target is a sing-box format subject to version downgrade.
    pub fn is_sing_box(&self) -> bool {
        matches!(self, ConvertorType::Source | ConvertorType::Binary)
    }
}

impl fmt::Display for ConvertorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Clash rule provider serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Text,
    Yaml,
    Mrs,
}

impl Format {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Format::Text),
            "yaml" => Ok(Format::Yaml),
            "mrs" => Ok(Format::Mrs),
            _ => Err(Error::Config(format!("unknown format: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Text => "text",
            Format::Yaml => "yaml",
            Format::Mrs => "mrs",
        }
    }
}

/// Interpretation of the lines of a list-style rule provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Behavior {
    /// Clash domain list
    Domain,
    /// Clash IP-CIDR list
    #[serde(rename = "ipcidr")]
    IpCidr,
    /// Clash classical rule lines
    Classical,
    /// Surge rule lines
    RuleSet,
    /// Surge domain list
    DomainSet,
}

impl Behavior {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "domain" => Ok(Behavior::Domain),
            "ipcidr" => Ok(Behavior::IpCidr),
            "classical" => Ok(Behavior::Classical),
            "rule-set" => Ok(Behavior::RuleSet),
            "domain-set" => Ok(Behavior::DomainSet),
            _ => Err(Error::Config(format!("unknown behavior: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Behavior::Domain => "domain",
            Behavior::IpCidr => "ipcidr",
            Behavior::Classical => "classical",
            Behavior::RuleSet => "rule-set",
            Behavior::DomainSet => "domain-set",
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the source content is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOptions {
    pub source_type: ConvertorType,
    /// AdGuard: keep extended filter syntax as `adguard_domain` entries.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub accept_extended_rules: bool,
    /// Clash: `text`, `yaml` or `mrs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_format: Option<Format>,
    /// Clash: `domain`, `ipcidr` or `classical`. Surge: `rule-set` or `domain-set`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_behavior: Option<Behavior>,
}

impl SourceOptions {
    pub fn new(source_type: ConvertorType) -> Self {
        Self {
            source_type,
            accept_extended_rules: false,
            source_format: None,
            source_behavior: None,
        }
    }
}

/// How the target content is produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOptions {
    pub target_type: ConvertorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_format: Option<Format>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_behavior: Option<Behavior>,
}

impl TargetOptions {
    pub fn new(target_type: ConvertorType) -> Self {
        Self {
            target_type,
            target_format: None,
            target_behavior: None,
        }
    }
}

/// Options passed to every decode and encode call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOptions {
    pub source: SourceOptions,
    pub target: TargetOptions,
    pub metadata: Metadata,
}

impl ConvertOptions {
    pub fn new(source: SourceOptions, target: TargetOptions) -> Self {
        Self {
            source,
            target,
            metadata: Metadata::default(),
        }
    }

    /// Shorthand for a conversion with default sub-options.
    pub fn between(source_type: ConvertorType, target_type: ConvertorType) -> Self {
        Self::new(SourceOptions::new(source_type), TargetOptions::new(target_type))
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A rule-set format codec.
pub trait Convertor: Send + Sync {
    /// The format this convertor handles.
    fn kind(&self) -> ConvertorType;

    /// MIME type of encoded output.
    fn content_type(&self, options: &ConvertOptions) -> &'static str;

    /// Parse content into rules.
    fn decode(&self, content: &[u8], options: &ConvertOptions) -> Result<Vec<Rule>>;

    /// Serialize rules.
    fn encode(&self, rules: &[Rule], options: &ConvertOptions) -> Result<Vec<u8>>;
}

static CONVERTORS: Lazy<HashMap<ConvertorType, &'static dyn Convertor>> = Lazy::new(|| {
    let mut map: HashMap<ConvertorType, &'static dyn Convertor> = HashMap::new();
    map.insert(ConvertorType::Source, &source::SourceConvertor);
    map.insert(ConvertorType::Binary, &binary::BinaryConvertor);
    map.insert(ConvertorType::Adguard, &adguard::AdGuardConvertor);
    map.insert(ConvertorType::Clash, &clash::ClashConvertor);
    map.insert(ConvertorType::Surge, &surge::SurgeConvertor);
    map
});

/// Look up the convertor for a format.
pub fn get(kind: ConvertorType) -> Result<&'static dyn Convertor> {
    CONVERTORS
        .get(&kind)
        .copied()
        .ok_or_else(|| Error::Config(format!("no convertor registered for {}", kind)))
}

/// Decode with the source convertor and encode with the target convertor.
pub fn convert(content: &[u8], options: &ConvertOptions) -> Result<Vec<u8>> {
    let rules = get(options.source.source_type)?.decode(content, options)?;
    get(options.target.target_type)?.encode(&rules, options)
}
