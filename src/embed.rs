//! Resolution of symbolic GEOIP, IP-ASN and GEOSite references.
//!
//! Clash and Surge rules may name a country, an AS number or a site category
//! instead of listing addresses. sing-box rule-sets cannot carry those
//! references, so [`embed`] replaces each one with the rule fragment a
//! [`Resolver`] returns for it.

use std::fmt;

use crate::rule::{DefaultRule, Rule};
use crate::{Error, Result};

/// Kind of symbolic reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    GeoIp,
    SourceGeoIp,
    IpAsn,
    SourceIpAsn,
    GeoSite,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::GeoIp => "GEOIP",
            ResourceKind::SourceGeoIp => "source GEOIP",
            ResourceKind::IpAsn => "IPASN",
            ResourceKind::SourceIpAsn => "source IPASN",
            ResourceKind::GeoSite => "GEOSite",
        }
    }

    /// Whether the resolved addresses go to `source_ip_cidr`.
    pub fn is_source(&self) -> bool {
        matches!(self, ResourceKind::SourceGeoIp | ResourceKind::SourceIpAsn)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Looks up the rule fragment behind a symbolic reference.
pub trait Resolver {
    /// Whether references of this kind can be resolved at all.
    fn configured(&self, kind: ResourceKind) -> bool;

    /// Resolve one code, such as `cn` or `13335`.
    fn resolve(&self, kind: ResourceKind, code: &str) -> Result<DefaultRule>;
}

/// Resolver that knows no resources. References are left untouched.
pub struct NoResolver;

impl Resolver for NoResolver {
    fn configured(&self, _kind: ResourceKind) -> bool {
        false
    }

    fn resolve(&self, kind: ResourceKind, code: &str) -> Result<DefaultRule> {
        Err(Error::Config(format!("{} resource is not configured for {}", kind, code)))
    }
}

/// Replace symbolic references in place, depth first.
///
/// A reference list is only consumed when its kind is configured. Any
/// resolution failure aborts the walk.
pub fn embed(rules: &mut [Rule], resolver: &dyn Resolver) -> Result<()> {
    for rule in rules {
        match rule {
            Rule::Default(rule) => embed_default(rule, resolver)?,
            Rule::Logical(rule) => embed(&mut rule.rules, resolver)?,
        }
    }
    Ok(())
}

fn embed_default(rule: &mut DefaultRule, resolver: &dyn Resolver) -> Result<()> {
    for kind in [
        ResourceKind::GeoIp,
        ResourceKind::SourceGeoIp,
        ResourceKind::IpAsn,
        ResourceKind::SourceIpAsn,
    ] {
        let codes = match kind {
            ResourceKind::GeoIp => &mut rule.geoip,
            ResourceKind::SourceGeoIp => &mut rule.source_geoip,
            ResourceKind::IpAsn => &mut rule.ip_asn,
            _ => &mut rule.source_ip_asn,
        };
        if codes.is_empty() || !resolver.configured(kind) {
            continue;
        }
        let codes = std::mem::take(codes);
        for code in &codes {
            let fragment = resolve(resolver, kind, code)?;
            let addresses = if fragment.ip_cidr.is_empty() {
                fragment.source_ip_cidr
            } else {
                fragment.ip_cidr
            };
            if kind.is_source() {
                rule.source_ip_cidr.extend(addresses);
            } else {
                rule.ip_cidr.extend(addresses);
            }
        }
    }

    if !rule.geosite.is_empty() && resolver.configured(ResourceKind::GeoSite) {
        for code in std::mem::take(&mut rule.geosite) {
            let fragment = resolve(resolver, ResourceKind::GeoSite, &code)?;
            rule.domain.extend(fragment.domain);
            rule.domain_suffix.extend(fragment.domain_suffix);
            rule.domain_keyword.extend(fragment.domain_keyword);
            rule.domain_regex.extend(fragment.domain_regex);
        }
    }
    Ok(())
}

fn resolve(resolver: &dyn Resolver, kind: ResourceKind, code: &str) -> Result<DefaultRule> {
    log::debug!("resolving {} {}", kind, code);
    resolver.resolve(kind, code).map_err(|e| Error::Resource {
        kind,
        code: code.to_string(),
        source: Box::new(e),
    })
}
