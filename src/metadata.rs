//! Client metadata detected from the request User-Agent.

use std::cmp::Ordering;
use std::fmt;

/// Client platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Platform {
    SingBox,
    Clash,
    Surge,
    #[default]
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::SingBox => "sing-box",
            Platform::Clash => "clash",
            Platform::Surge => "surge",
            Platform::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A `major.minor.patch` version. Pre-release and build suffixes are kept
/// for display but ignored when comparing.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub suffix: String,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            suffix: String::new(),
        }
    }

    /// Parse `1.10.0`, `v1.10`, `1.11.0-beta.3` and similar forms.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().trim_start_matches('v');
        let end = s.find(['-', '+']).unwrap_or(s.len());
        let (core, suffix) = s.split_at(end);
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
            suffix: suffix.to_string(),
        })
    }

    fn key(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}{}", self.major, self.minor, self.patch, self.suffix)
    }
}

/// Platform and version of the requesting client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub user_agent: String,
    pub platform: Platform,
    pub version: Option<Version>,
}

impl Metadata {
    /// Metadata for a sing-box client of the given version.
    pub fn sing_box(version: Version) -> Self {
        Self {
            user_agent: format!("sing-box {}", version),
            platform: Platform::SingBox,
            version: Some(version),
        }
    }

    /// The sing-box client version, when the client is sing-box and reported one.
    pub fn sing_box_version(&self) -> Option<&Version> {
        match self.platform {
            Platform::SingBox => self.version.as_ref(),
            _ => None,
        }
    }
}

/// Detect the client platform from a User-Agent string.
///
/// sing-box graphical clients embed `sing-box X.Y.Z` inside a longer string,
/// so the token is searched anywhere in the header.
pub fn detect(user_agent: &str) -> Metadata {
    let mut metadata = Metadata {
        user_agent: user_agent.to_string(),
        ..Default::default()
    };

    if let Some(pos) = user_agent.find("sing-box") {
        metadata.platform = Platform::SingBox;
        let rest = user_agent[pos + "sing-box".len()..].trim_start_matches([' ', '/']);
        let token = rest
            .split(|c: char| c.is_whitespace() || c == ';' || c == ')')
            .next()
            .unwrap_or_default();
        metadata.version = Version::parse(token);
        return metadata;
    }

    let lower = user_agent.to_ascii_lowercase();
    if lower.contains("mihomo") || lower.contains("clash") || lower.contains("stash") {
        metadata.platform = Platform::Clash;
    } else if lower.starts_with("surge") || lower.contains(" surge") {
        metadata.platform = Platform::Surge;
    }
    metadata
}
