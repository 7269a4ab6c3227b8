//! Upstream sources for rule-set content.
//!
//! A source turns request parameters into a path through a [`PathTemplate`]
//! and fetches that path, optionally conditionally.

pub mod local;
pub mod remote;

pub use local::LocalSource;
pub use remote::RemoteSource;

use std::collections::HashMap;

use crate::{Error, Result};

/// Conditional fetch state from a previous response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub etag: String,
    /// Unix seconds; 0 when nothing was fetched before.
    pub last_updated: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub content: Vec<u8>,
    pub not_modified: bool,
    pub etag: String,
    pub last_updated: i64,
}

/// A place rule-set content is read from.
pub trait Source: Send + Sync {
    /// Render the path for a request.
    fn path(&self, params: &HashMap<String, String>) -> Result<String>;

    /// Modification time of `path` in unix seconds, or 0 when unknown.
    fn last_updated(&self, path: &str) -> i64;

    fn fetch(&self, path: &str, request: &FetchRequest) -> Result<FetchResponse>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A path or URL with `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let end = rest[start..]
                .find('}')
                .map(|end| start + end)
                .ok_or_else(|| Error::Config(format!("unclosed placeholder in {}", template)))?;
            let name = rest[start + 1..end].trim();
            if name.is_empty() || name.contains('{') {
                return Err(Error::Config(format!("bad placeholder in {}", template)));
            }
            segments.push(Segment::Param(name.to_string()));
            rest = &rest[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Self { segments })
    }

    /// Names of the placeholders, in order.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Match a concrete path against the template, capturing parameters.
    ///
    /// A placeholder captures up to the next literal and never spans `/`.
    pub fn capture(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut rest = path;
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(text) => rest = rest.strip_prefix(text.as_str())?,
                Segment::Param(name) => {
                    let end = match self.segments.get(i + 1) {
                        Some(Segment::Literal(next)) => rest.find(next.as_str())?,
                        _ => rest.len(),
                    };
                    let value = &rest[..end];
                    if value.is_empty() || value.contains('/') {
                        return None;
                    }
                    params.insert(name.clone(), value.to_string());
                    rest = &rest[end..];
                }
            }
        }
        rest.is_empty().then_some(params)
    }

    /// Substitute every placeholder.
    ///
    /// Values must be non-empty single path components.
    pub fn render(&self, params: &HashMap<String, String>) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Param(name) => {
                    let value = params
                        .get(name)
                        .map(String::as_str)
                        .unwrap_or_default();
                    if value.is_empty() {
                        return Err(Error::Template(format!("missing parameter {}", name)));
                    }
                    if value.contains('/') || value.contains('\\') || value == ".." {
                        return Err(Error::Template(format!(
                            "invalid value for parameter {}: {}",
                            name, value
                        )));
                    }
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}
