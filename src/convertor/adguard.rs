//! AdGuard DNS filter lists.
//!
//! Only the DNS-level subset of the filter syntax maps onto domain rules:
//! `||suffix^`, `|exact^`, `/regex/`, `@@` exclusions and the `$important`
//! modifier. Everything else is counted and discarded.
//!
//! The decoded tree encodes filter precedence:
//!
//! ```text
//! AND(NOT important-exclude, OR(important, AND(NOT exclude, plain)))
//! ```
//!
//! with wrappers omitted when their bucket is empty.

use bitflags::bitflags;
use std::net::{IpAddr, Ipv4Addr};

use crate::convertor::{ConvertOptions, ConvertorType, Convertor};
use crate::rule::domain::is_domain_name;
use crate::rule::{DefaultRule, LogicalMode, LogicalRule, Rule};
use crate::{Error, Result};

bitflags! {
    /// Anchors and markers collected while parsing one filter line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LineFlags: u8 {
        /// Bare domain or hosts entry.
        const RAW_DOMAIN = 0b0000_0001;
        /// `@@` exception.
        const EXCLUDE = 0b0000_0010;
        /// `||` anchor or `scheme://` prefix.
        const SUFFIX = 0b0000_0100;
        /// `|` start anchor.
        const START = 0b0000_1000;
        /// `^` end anchor.
        const END = 0b0001_0000;
        /// `/regex/`.
        const REGEXP = 0b0010_0000;
        /// `$important` modifier.
        const IMPORTANT = 0b0100_0000;
    }
}

#[derive(Debug, Clone)]
struct FilterLine {
    value: String,
    origin: String,
    flags: LineFlags,
}

impl FilterLine {
    fn raw(value: &str, flags: LineFlags) -> Self {
        Self {
            value: value.to_string(),
            origin: value.to_string(),
            flags: flags | LineFlags::RAW_DOMAIN,
        }
    }

    /// The line with its anchors restored, as stored in `adguard_domain`.
    fn anchored(&self) -> String {
        let mut out = String::with_capacity(self.value.len() + 3);
        if self.flags.contains(LineFlags::SUFFIX) {
            out.push_str("||");
        } else if self.flags.contains(LineFlags::START) {
            out.push('|');
        }
        out.push_str(&self.value);
        if self.flags.contains(LineFlags::END) {
            out.push('^');
        }
        out
    }
}

/// A decoded filter list.
#[derive(Debug, Clone)]
pub struct FilterList {
    pub rules: Vec<Rule>,
    /// Lines that contributed to `rules`.
    pub parsed: usize,
    /// Lines that were discarded.
    pub ignored: usize,
}

enum Parsed {
    Skip,
    Line(FilterLine),
    Ignored,
}

/// Parse a filter list.
///
/// In extended mode anchored lines are kept verbatim as `adguard_domain`
/// entries; otherwise only lines with an end anchor and a start or suffix
/// anchor survive, as plain domain and suffix entries.
pub fn parse_filter_list(content: &str, accept_extended: bool) -> Result<FilterList> {
    let empty = || {
        Error::Parse("AdGuard rule-set is empty or all rules are unsupported".to_string())
    };
    let mut lines = Vec::new();
    let mut ignored = 0usize;
    for line in content.lines() {
        match parse_line(line) {
            Parsed::Skip => {}
            Parsed::Line(line) => lines.push(line),
            Parsed::Ignored => ignored += 1,
        }
    }
    if lines.is_empty() {
        return Err(empty());
    }

    if lines.iter().all(|l| l.flags.contains(LineFlags::RAW_DOMAIN)) {
        let parsed = lines.len();
        let rule = DefaultRule {
            domain: lines.into_iter().map(|l| l.value).collect(),
            ..Default::default()
        };
        return Ok(FilterList {
            rules: vec![Rule::Default(rule)],
            parsed,
            ignored,
        });
    }

    let mut buckets = Buckets::default();
    if accept_extended {
        for line in &lines {
            let bucket = buckets.select(line.flags);
            if line.flags.contains(LineFlags::REGEXP) {
                bucket.regex.push(line.value.clone());
            } else {
                bucket.adguard.push(line.anchored());
            }
        }
    } else {
        lines.retain(|line| {
            if line.flags.contains(LineFlags::REGEXP) {
                return true;
            }
            if !line.flags.contains(LineFlags::END) {
                log::debug!("ignored extended rule without end: {}", line.origin);
                ignored += 1;
                return false;
            }
            if !line.flags.intersects(LineFlags::START | LineFlags::SUFFIX) {
                log::debug!("ignored extended rule without start: {}", line.origin);
                ignored += 1;
                return false;
            }
            true
        });
        if lines.is_empty() {
            return Err(empty());
        }
        for line in &lines {
            let bucket = buckets.select(line.flags);
            if line.flags.contains(LineFlags::REGEXP) {
                bucket.regex.push(line.value.clone());
            } else if line.flags.contains(LineFlags::SUFFIX) {
                bucket.suffix.push(line.value.clone());
            } else {
                bucket.domain.push(line.value.clone());
            }
        }
    }

    if ignored > 0 {
        log::info!("parsed rules: {}/{}", lines.len(), lines.len() + ignored);
    }
    Ok(FilterList {
        rules: vec![buckets.compose()],
        parsed: lines.len(),
        ignored,
    })
}

fn parse_line(line: &str) -> Parsed {
    let origin = line;
    let mut line = line.trim();
    if line.is_empty() || line.starts_with('!') || line.starts_with('#') {
        return Parsed::Skip;
    }
    if is_domain_name(line) {
        return Parsed::Line(FilterLine::raw(line, LineFlags::empty()));
    }
    if let Some(host) = parse_host_line(line) {
        return match host {
            Some(domain) => Parsed::Line(FilterLine::raw(domain, LineFlags::START | LineFlags::END)),
            None => Parsed::Skip,
        };
    }

    let mut flags = LineFlags::empty();
    line = line.strip_suffix('|').unwrap_or(line);
    if !line.starts_with('/') {
        if let Some((rest, params)) = line.split_once('$') {
            for param in params.split(',') {
                let parts: Vec<&str> = param.split('=').collect();
                let accepted = match parts.as_slice() {
                    ["app" | "network" | "dnstype"] | ["app" | "network" | "dnstype", _] => true,
                    ["important"] | ["important", _] => {
                        flags |= LineFlags::IMPORTANT;
                        true
                    }
                    ["dnsrewrite", addr] => is_unspecified(addr),
                    _ => false,
                };
                if !accepted {
                    log::debug!("ignored unsupported rule with modifier: {}: {}", parts[0], origin);
                    return Parsed::Ignored;
                }
            }
            line = rest;
        }
    }
    if let Some(rest) = line.strip_prefix("@@") {
        line = rest;
        flags |= LineFlags::EXCLUDE;
    }
    line = line.strip_suffix('|').unwrap_or(line);
    if let Some(rest) = line.strip_prefix("||") {
        line = rest;
        flags |= LineFlags::SUFFIX;
    } else if let Some(rest) = line.strip_prefix('|') {
        line = rest;
        flags |= LineFlags::START;
    }
    if let Some(rest) = line.strip_suffix('^') {
        line = rest;
        flags |= LineFlags::END;
    }

    if line.len() >= 2 && line.starts_with('/') && line.ends_with('/') {
        let regex = &line[1..line.len() - 1];
        if ignore_ip_cidr_regexp(regex) {
            log::debug!("ignored unsupported rule with IPCIDR regexp: {}", origin);
            return Parsed::Ignored;
        }
        return Parsed::Line(FilterLine {
            value: regex.to_string(),
            origin: origin.to_string(),
            flags: flags | LineFlags::REGEXP,
        });
    }

    if let Some((_, rest)) = line.split_once("://") {
        line = rest;
        flags |= LineFlags::SUFFIX;
    }
    if line.contains('/') {
        log::debug!("ignored unsupported rule with path: {}", origin);
        return Parsed::Ignored;
    }
    if line.contains(['?', '&']) {
        log::debug!("ignored unsupported rule with query: {}", origin);
        return Parsed::Ignored;
    }
    if line.contains(['[', ']', '(', ')', '!', '#']) {
        log::debug!("ignored unsupported cosmetic filter: {}", origin);
        return Parsed::Ignored;
    }
    if line.contains('~') {
        log::debug!("ignored unsupported rule modifier: {}", origin);
        return Parsed::Ignored;
    }
    if line.is_empty() {
        log::debug!("ignored unsupported rule with empty domain: {}", origin);
        return Parsed::Ignored;
    }

    let check = if line.starts_with('.') || line.starts_with('-') {
        format!("r{}", line)
    } else {
        line.to_string()
    };
    let check = check.replace('*', "x");
    if !is_domain_name(&check) {
        if parse_adguard_ipcidr_line(line).is_some() {
            log::debug!("ignored unsupported rule with IPCIDR: {}", origin);
        } else if has_port(&check) {
            log::debug!("ignored unsupported rule with port: {}", origin);
        } else {
            log::debug!("ignored unsupported rule with invalid domain: {}", origin);
        }
        return Parsed::Ignored;
    }

    Parsed::Line(FilterLine {
        value: line.to_string(),
        origin: origin.to_string(),
        flags,
    })
}

fn is_unspecified(addr: &str) -> bool {
    addr.parse::<IpAddr>().map(|a| a.is_unspecified()).unwrap_or(false)
}

fn has_port(value: &str) -> bool {
    value
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse::<u16>().ok())
        .map_or(false, |port| port != 0)
}

/// Parse a hosts-file line.
///
/// `None` means the line is not a hosts line. `Some(None)` is a hosts line
/// for a non-blocking address and is skipped.
fn parse_host_line(line: &str) -> Option<Option<&str>> {
    let (addr, domain) = line.split_once(' ')?;
    let addr: IpAddr = addr.parse().ok()?;
    if !addr.is_unspecified() {
        return Some(None);
    }
    if !is_domain_name(domain) {
        return None;
    }
    Some(Some(domain))
}

/// Whether a regex body looks like an IPv4 address pattern.
fn ignore_ip_cidr_regexp(regex: &str) -> bool {
    let regex = if let Some(rest) = regex.strip_prefix(r"(http?:\/\/)") {
        rest
    } else if let Some(rest) = regex.strip_prefix(r"(https?:\/\/)") {
        rest
    } else {
        regex.strip_prefix('^').unwrap_or(regex)
    };
    let before = |sep: &str| regex.split_once(sep).map_or(regex, |(head, _)| head);
    before(r"\.").parse::<u8>().is_ok() || before(".").parse::<u8>().is_ok()
}

/// Parse a partial IPv4 filter such as `10.0.` or `192.168.1.1`.
fn parse_adguard_ipcidr_line(line: &str) -> Option<(Ipv4Addr, u8)> {
    let (line, is_prefix) = match line.strip_suffix('.') {
        Some(rest) => (rest, true),
        None => (line, false),
    };
    let parts: Vec<&str> = line.split('.').collect();
    if parts.len() > 4 || (parts.len() < 4 && !is_prefix) {
        return None;
    }
    let mut octets = [0u8; 4];
    for (i, part) in parts.iter().enumerate() {
        octets[i] = part.parse().ok()?;
    }
    Some((Ipv4Addr::from(octets), (parts.len() * 8) as u8))
}

/// Domain entries of one precedence class.
#[derive(Debug, Clone, Default)]
struct Bucket {
    adguard: Vec<String>,
    domain: Vec<String>,
    suffix: Vec<String>,
    regex: Vec<String>,
}

impl Bucket {
    fn is_empty(&self) -> bool {
        self.adguard.is_empty() && self.domain.is_empty() && self.suffix.is_empty() && self.regex.is_empty()
    }

    fn into_rule(self, invert: bool) -> Rule {
        Rule::Default(DefaultRule {
            adguard_domain: self.adguard,
            domain: self.domain,
            domain_suffix: self.suffix,
            domain_regex: self.regex,
            invert,
            ..Default::default()
        })
    }

    /// Read a bucket back from a default rule, rejecting any other field.
    fn from_rule(rule: &DefaultRule) -> Result<Self> {
        let bucket = Bucket {
            adguard: rule.adguard_domain.clone(),
            domain: rule.domain.clone(),
            suffix: rule.domain_suffix.clone(),
            regex: rule.domain_regex.clone(),
        };
        let shape = DefaultRule {
            adguard_domain: bucket.adguard.clone(),
            domain: bucket.domain.clone(),
            domain_suffix: bucket.suffix.clone(),
            domain_regex: bucket.regex.clone(),
            invert: rule.invert,
            ..Default::default()
        };
        if shape != *rule {
            return Err(Error::InvalidAdGuardRuleSet);
        }
        Ok(bucket)
    }

    fn extend(&mut self, other: Bucket) {
        self.adguard.extend(other.adguard);
        self.domain.extend(other.domain);
        self.suffix.extend(other.suffix);
        self.regex.extend(other.regex);
    }

    fn write(&self, out: &mut String, exclude: bool, important: bool) {
        let prefix = if exclude { "@@" } else { "" };
        let modifier = if important { "$important" } else { "" };
        for value in &self.adguard {
            out.push_str(&format!("{}{}{}\n", prefix, value, modifier));
        }
        for value in &self.domain {
            out.push_str(&format!("{}|{}^{}\n", prefix, value, modifier));
        }
        for value in &self.suffix {
            out.push_str(&format!("{}||{}^{}\n", prefix, value, modifier));
        }
        for value in &self.regex {
            out.push_str(&format!("{}/{}/{}\n", prefix, value, modifier));
        }
    }
}

#[derive(Debug, Default)]
struct Buckets {
    plain: Bucket,
    exclude: Bucket,
    important: Bucket,
    important_exclude: Bucket,
}

impl Buckets {
    fn select(&mut self, flags: LineFlags) -> &mut Bucket {
        match (
            flags.contains(LineFlags::IMPORTANT),
            flags.contains(LineFlags::EXCLUDE),
        ) {
            (false, false) => &mut self.plain,
            (false, true) => &mut self.exclude,
            (true, false) => &mut self.important,
            (true, true) => &mut self.important_exclude,
        }
    }

    fn compose(self) -> Rule {
        let mut current = self.plain.into_rule(false);
        if !self.exclude.is_empty() {
            current = LogicalRule::new(LogicalMode::And, vec![self.exclude.into_rule(true), current]).into();
        }
        if !self.important.is_empty() {
            current = LogicalRule::new(LogicalMode::Or, vec![self.important.into_rule(false), current]).into();
        }
        if !self.important_exclude.is_empty() {
            current = LogicalRule::new(
                LogicalMode::And,
                vec![self.important_exclude.into_rule(true), current],
            )
            .into();
        }
        current
    }

    /// Walk one wrapper chain and sort its buckets by precedence.
    ///
    /// Exclusions above the `OR` wrapper are important; those below it are
    /// plain. Without an `OR`, a second exclusion level can only be the
    /// plain one.
    fn collect(&mut self, rule: &Rule) -> Result<()> {
        let mut current = rule;
        let mut seen_or = false;
        let mut upper_excludes = Vec::new();
        loop {
            match current {
                Rule::Logical(logical) => {
                    let (first, next) = match logical.rules.as_slice() {
                        [Rule::Default(first), next] if !logical.invert => (first, next),
                        _ => return Err(Error::InvalidAdGuardRuleSet),
                    };
                    let bucket = Bucket::from_rule(first)?;
                    if bucket.is_empty() {
                        return Err(Error::InvalidAdGuardRuleSet);
                    }
                    match logical.mode {
                        LogicalMode::And if first.invert => {
                            if seen_or {
                                self.exclude.extend(bucket);
                            } else {
                                upper_excludes.push(bucket);
                            }
                        }
                        LogicalMode::Or if !first.invert && !seen_or => {
                            seen_or = true;
                            self.important.extend(bucket);
                        }
                        _ => return Err(Error::InvalidAdGuardRuleSet),
                    }
                    current = next;
                }
                Rule::Default(default) => {
                    if default.invert {
                        return Err(Error::InvalidAdGuardRuleSet);
                    }
                    self.plain.extend(Bucket::from_rule(default)?);
                    break;
                }
            }
        }

        let mut upper = upper_excludes.into_iter();
        match (seen_or, upper.len()) {
            (true, _) => upper.for_each(|b| self.important_exclude.extend(b)),
            (false, 0) => {}
            (false, 1) => upper.for_each(|b| self.exclude.extend(b)),
            (false, 2) => {
                if let (Some(important), Some(plain)) = (upper.next(), upper.next()) {
                    self.important_exclude.extend(important);
                    self.exclude.extend(plain);
                }
            }
            _ => return Err(Error::InvalidAdGuardRuleSet),
        }
        Ok(())
    }
}

/// Encode rules as a filter list.
pub fn encode_rules(rules: &[Rule]) -> Result<Vec<u8>> {
    if rules.is_empty() {
        return Err(Error::InvalidAdGuardRuleSet);
    }
    let mut buckets = Buckets::default();
    for rule in rules {
        buckets.collect(rule)?;
    }
    let mut out = String::new();
    buckets.important.write(&mut out, false, true);
    buckets.important_exclude.write(&mut out, true, true);
    buckets.plain.write(&mut out, false, false);
    buckets.exclude.write(&mut out, true, false);
    Ok(out.into_bytes())
}

/// AdGuard filter list convertor.
pub struct AdGuardConvertor;

impl Convertor for AdGuardConvertor {
    fn kind(&self) -> ConvertorType {
        ConvertorType::Adguard
    }

    fn content_type(&self, _options: &ConvertOptions) -> &'static str {
        "text/plain"
    }

    fn decode(&self, content: &[u8], options: &ConvertOptions) -> Result<Vec<Rule>> {
        let extended = options.source.accept_extended_rules;
        if extended
            && !matches!(
                options.target.target_type,
                ConvertorType::Adguard | ConvertorType::Binary
            )
        {
            return Err(Error::UnsupportedTarget(format!(
                "extended AdGuard rules can not be converted to {}",
                options.target.target_type
            )));
        }
        let text = String::from_utf8_lossy(content);
        Ok(parse_filter_list(&text, extended)?.rules)
    }

    fn encode(&self, rules: &[Rule], _options: &ConvertOptions) -> Result<Vec<u8>> {
        encode_rules(rules)
    }
}
