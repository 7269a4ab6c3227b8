//! Resource manager: the production [`Resolver`].
//!
//! Each configured resource is a source whose path template takes one
//! parameter, such as `country` for GEOIP. A resolved resource is cached in
//! sing-box JSON so later lookups skip the original format entirely.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{fetch_cached, Cache};
use crate::convertor::{self, ConvertOptions, ConvertorType, SourceOptions, TargetOptions};
use crate::embed::{ResourceKind, Resolver};
use crate::rule::{DefaultRule, Rule};
use crate::source::Source;
use crate::{Error, Result};

/// One resource: where to fetch it and how to read it.
pub struct Resource {
    source: Box<dyn Source>,
    options: SourceOptions,
}

impl Resource {
    pub fn new(source: Box<dyn Source>, options: SourceOptions) -> Self {
        Self { source, options }
    }
}

/// Resolves GEOIP, IPASN and GEOSite codes through configured resources.
pub struct ResourceManager {
    cache: Arc<dyn Cache>,
    geoip: Option<Resource>,
    ipasn: Option<Resource>,
    geosite: Option<Resource>,
}

impl ResourceManager {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            geoip: None,
            ipasn: None,
            geosite: None,
        }
    }

    pub fn with_geoip(mut self, resource: Resource) -> Self {
        self.geoip = Some(resource);
        self
    }

    pub fn with_ipasn(mut self, resource: Resource) -> Self {
        self.ipasn = Some(resource);
        self
    }

    pub fn with_geosite(mut self, resource: Resource) -> Self {
        self.geosite = Some(resource);
        self
    }

    /// Resource name, template parameter and configured resource for a kind.
    fn resource(&self, kind: ResourceKind) -> (&'static str, &'static str, Option<&Resource>) {
        match kind {
            ResourceKind::GeoIp | ResourceKind::SourceGeoIp => {
                ("geoip", "country", self.geoip.as_ref())
            }
            ResourceKind::IpAsn | ResourceKind::SourceIpAsn => ("ipasn", "asn", self.ipasn.as_ref()),
            ResourceKind::GeoSite => ("geosite", "category", self.geosite.as_ref()),
        }
    }
}

impl Resolver for ResourceManager {
    fn configured(&self, kind: ResourceKind) -> bool {
        self.resource(kind).2.is_some()
    }

    fn resolve(&self, kind: ResourceKind, code: &str) -> Result<DefaultRule> {
        let (name, param, resource) = self.resource(kind);
        let resource = resource
            .ok_or_else(|| Error::Config(format!("{} resource source is not configured", kind)))?;
        let params = HashMap::from([(param.to_string(), code.to_string())]);
        let path = resource.source.path(&params)?;
        let key = format!("res.{}.{}", name, path);

        let saved = fetch_cached(
            self.cache.as_ref(),
            resource.source.as_ref(),
            &key,
            &path,
            |content| {
                let options = ConvertOptions::new(
                    resource.options.clone(),
                    TargetOptions::new(ConvertorType::Source),
                );
                let rules =
                    convertor::get(resource.options.source_type)?.decode(content, &options)?;
                let rule = single_rule(rules)?;
                convertor::get(ConvertorType::Source)?
                    .encode(&[Rule::Default(rule)], &options)
            },
        )?;

        let options = ConvertOptions::between(ConvertorType::Source, ConvertorType::Source);
        let rules = convertor::get(ConvertorType::Source)?.decode(&saved.content, &options)?;
        single_rule(rules)
    }
}

/// A resource must be exactly one plain rule sing-box can load.
fn single_rule(rules: Vec<Rule>) -> Result<DefaultRule> {
    if rules.len() != 1 {
        return Err(Error::Parse(format!(
            "unexpected resource rule count: {}",
            rules.len()
        )));
    }
    match rules.into_iter().next() {
        Some(Rule::Default(rule)) if rule.is_headless_eligible() => Ok(rule),
        Some(Rule::Default(_)) => Err(Error::UnsupportedRule(
            "unexpected complex resource: unsupported by sing-box".to_string(),
        )),
        _ => Err(Error::UnsupportedRule(
            "unexpected complex resource: logical rule".to_string(),
        )),
    }
}
