//! Shared parser and printer for comma-separated rule lines.
//!
//! Clash classical rule providers and Surge rule-sets use the same outer
//! grammar: `TYPE,payload[,params...]`, with `AND`, `OR` and `NOT` taking a
//! parenthesized list of sub-rules as payload:
//!
//! ```text
//! AND,((DOMAIN-SUFFIX,example.com),(NOT,((DST-PORT,443))))
//! ```
//!
//! Leaf types differ between the dialects, so both directions take the
//! dialect-specific leaf codec as a function argument.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::rule::{DefaultRule, LogicalMode, LogicalRule, Rule};
use crate::{Error, Result};

static LOGIC_PAYLOAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(.*\)").unwrap());

/// A rule line split into type, payload and trailing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleLine {
    pub kind: String,
    pub payload: String,
    pub params: Vec<String>,
}

impl RuleLine {
    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.eq_ignore_ascii_case(name))
    }
}

/// Types whose payload may itself contain commas.
fn takes_rest(kind: &str) -> bool {
    matches!(
        kind,
        "AND" | "OR" | "NOT" | "SUB-RULE" | "DOMAIN-REGEX" | "PROCESS-NAME-REGEX" | "PROCESS-PATH-REGEX"
    )
}

/// Split a rule line.
///
/// One item is `("", item)`, two items are `(type, payload)`. Logical and
/// regex types take the remainder as payload; other types take item 1 as
/// payload and the rest as parameters.
pub fn parse_rule(line: &str) -> RuleLine {
    let items: Vec<&str> = line.split(',').collect();
    match items.as_slice() {
        [payload] => RuleLine {
            kind: String::new(),
            payload: payload.trim().to_string(),
            params: Vec::new(),
        },
        [kind, payload] => RuleLine {
            kind: kind.trim().to_ascii_uppercase(),
            payload: payload.trim().to_string(),
            params: Vec::new(),
        },
        [kind, rest @ ..] => {
            let kind = kind.trim().to_ascii_uppercase();
            if takes_rest(&kind) {
                RuleLine {
                    kind,
                    payload: rest.join(",").trim().to_string(),
                    params: Vec::new(),
                }
            } else {
                RuleLine {
                    kind,
                    payload: rest[0].trim().to_string(),
                    params: rest[1..].iter().map(|p| p.trim().to_string()).collect(),
                }
            }
        }
        [] => RuleLine {
            kind: String::new(),
            payload: String::new(),
            params: Vec::new(),
        },
    }
}

/// A matched parenthesis pair in a logical payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Range {
    start: usize,
    end: usize,
    index: usize,
}

impl Range {
    /// Whether `self` lies strictly inside `(start, end)`.
    fn contained_in(&self, start: usize, end: usize) -> bool {
        start < self.start && end > self.end
    }
}

/// Match every parenthesis pair, ordered by the position of the `(`.
fn logic_format(payload: &str) -> Result<Vec<Range>> {
    let mut stack: Vec<Range> = Vec::new();
    let mut closed: Vec<Range> = Vec::new();
    let mut num = 0;
    for (i, c) in payload.char_indices() {
        match c {
            '(' => {
                stack.push(Range {
                    start: i,
                    end: 0,
                    index: num,
                });
                num += 1;
            }
            ')' => {
                let mut range = stack
                    .pop()
                    .ok_or_else(|| Error::Parse(format!("missing '(' in {}", payload)))?;
                range.end = i;
                closed.push(range);
            }
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(Error::Parse(format!("missing ')' in {}", payload)));
    }
    closed.sort_by_key(|r| r.index);
    Ok(closed)
}

/// Pick the direct children: ranges other than the one spanning the whole
/// payload that are not nested inside an already chosen range.
fn find_sub_rule_range(payload: &str, ranges: &[Range]) -> Vec<Range> {
    let last = payload.len().saturating_sub(1);
    let mut chosen: Vec<Range> = Vec::new();
    for range in ranges {
        if range.start == 0 && range.end == last {
            continue;
        }
        if !chosen.iter().any(|c| range.contained_in(c.start, c.end)) {
            chosen.push(*range);
        }
    }
    chosen
}

/// Parse the payload of an `AND`, `OR` or `NOT` line, decoding each child
/// with `leaf`.
pub fn parse_logic_line<F>(name: &str, payload: &str, leaf: &F) -> Result<Rule>
where
    F: Fn(&str) -> Result<Rule>,
{
    if !LOGIC_PAYLOAD.is_match(payload) {
        return Err(Error::Parse(format!("payload format error: {}", payload)));
    }
    let ranges = logic_format(payload)?;
    let mut rules = Vec::new();
    for range in find_sub_rule_range(payload, &ranges) {
        let child = &payload[range.start + 1..range.end];
        rules.push(leaf(child)?);
    }
    if rules.is_empty() {
        return Err(Error::Parse(format!("logical rule without sub-rules: {}", payload)));
    }
    let mode = if name == "OR" {
        LogicalMode::Or
    } else {
        LogicalMode::And
    };
    Ok(Rule::Logical(LogicalRule {
        mode,
        rules,
        invert: name == "NOT",
    }))
}

/// Decode a document of rule lines.
///
/// Blank lines and `#`, `//`, `;` comments are skipped. Lines that fail to
/// parse are logged at debug level, counted and dropped.
pub fn decode_lines<'a, I, F>(lines: I, parse_line: F) -> Vec<Rule>
where
    I: IntoIterator<Item = &'a str>,
    F: Fn(&str) -> Result<Rule>,
{
    let mut rules = Vec::new();
    let mut ignored = 0usize;
    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") || line.starts_with(';') {
            continue;
        }
        match parse_line(line) {
            Ok(rule) => rules.push(rule),
            Err(e) => {
                ignored += 1;
                log::debug!("ignored rule line {}: {}", line, e);
            }
        }
    }
    if ignored > 0 {
        log::info!("parsed rules: {}/{}", rules.len(), rules.len() + ignored);
    }
    rules
}

/// Lines for one match dimension. Alternatives within a group are ORed;
/// groups are ANDed.
pub type LineGroups = Vec<Vec<String>>;

/// Wrap a group of alternative lines as a single parenthesized operand.
fn wrap_group(lines: &[String]) -> Result<String> {
    match lines {
        [] => Err(Error::UnsupportedRule("empty rule group".to_string())),
        [line] => Ok(format!("({})", line)),
        _ => {
            let inner: Vec<String> = lines.iter().map(|l| format!("({})", l)).collect();
            Ok(format!("(OR,({}))", inner.join(",")))
        }
    }
}

/// Join dimension groups into the lines of one rule.
fn join_groups(groups: LineGroups) -> Result<Vec<String>> {
    let groups: Vec<Vec<String>> = groups.into_iter().filter(|g| !g.is_empty()).collect();
    match groups.len() {
        0 => Err(Error::UnsupportedRule("rule has no expressible items".to_string())),
        1 => Ok(groups.into_iter().flatten().collect()),
        _ => {
            let operands = groups
                .iter()
                .map(|g| wrap_group(g))
                .collect::<Result<Vec<_>>>()?;
            Ok(vec![format!("AND,({})", operands.join(","))])
        }
    }
}

/// Encode a rule as lines, using `leaf` for the dialect's default-rule items.
///
/// A top-level default rule may produce several alternative lines; a
/// logical rule always produces exactly one.
pub fn encode_rule<F>(rule: &Rule, leaf: &F) -> Result<Vec<String>>
where
    F: Fn(&DefaultRule) -> Result<LineGroups>,
{
    match rule {
        Rule::Default(default) if default.invert => {
            let plain = DefaultRule {
                invert: false,
                ..default.clone()
            };
            let lines = join_groups(leaf(&plain)?)?;
            Ok(vec![format!("NOT,({})", wrap_group(&lines)?)])
        }
        Rule::Default(default) => join_groups(leaf(default)?),
        Rule::Logical(logical) => {
            let children = logical
                .rules
                .iter()
                .map(|child| encode_rule(child, leaf).and_then(|lines| wrap_group(&lines)))
                .collect::<Result<Vec<_>>>()?;
            let mode = match logical.mode {
                LogicalMode::And => "AND",
                LogicalMode::Or => "OR",
            };
            let line = if !logical.invert {
                format!("{},({})", mode, children.join(","))
            } else if let [child] = children.as_slice() {
                format!("NOT,({})", child)
            } else {
                format!("NOT,(({},({})))", mode, children.join(","))
            };
            Ok(vec![line])
        }
    }
}

/// Encode all rules, one or more lines each.
pub fn encode_rules<F>(rules: &[Rule], leaf: &F) -> Result<Vec<String>>
where
    F: Fn(&DefaultRule) -> Result<LineGroups>,
{
    let mut lines = Vec::new();
    for rule in rules {
        lines.extend(encode_rule(rule, leaf)?);
    }
    Ok(lines)
}
