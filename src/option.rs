//! JSON configuration.
//!
//! ```json
//! {
//!   "log": { "level": "info" },
//!   "cache": { "type": "file", "path": "/var/cache/ruleconv" },
//!   "resources": {
//!     "geoip": {
//!       "source": "remote",
//!       "url": "https://example.com/geoip/{country}.txt",
//!       "source_type": "clash",
//!       "source_behavior": "ipcidr"
//!     }
//!   },
//!   "endpoints": {
//!     "/geosite/{name}.srs": {
//!       "type": "file",
//!       "source": "local",
//!       "path": "/data/geosite/{name}.list",
//!       "source_type": "surge",
//!       "target_type": "binary"
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::convertor::{SourceOptions, TargetOptions};
use crate::source::{LocalSource, PathTemplate, RemoteSource, Source};
use crate::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    #[serde(default)]
    pub log: LogOptions,
    #[serde(default)]
    pub cache: CacheOptions,
    #[serde(default)]
    pub resources: ResourceOptions,
    /// Route template to endpoint. Routes are indexed in sorted order.
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogOptions {
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    #[default]
    Memory,
    File,
    Redis,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    #[serde(rename = "type", default)]
    pub cache_type: CacheType,
    /// Entry TTL in seconds. 0 selects the default for the memory cache
    /// and no expiry for redis.
    #[serde(default)]
    pub timeout: u64,
    /// Memory cache capacity in entries. 0 selects the default.
    #[serde(default)]
    pub capacity: usize,
    /// File cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Redis connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisCacheOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisCacheOptions {
    /// `host:port`
    #[serde(default = "default_redis_address")]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
    /// Idle connections kept open. 0 selects the default.
    #[serde(default)]
    pub pool_size: usize,
}

fn default_redis_address() -> String {
    "localhost:6379".to_string()
}

impl Default for RedisCacheOptions {
    fn default() -> Self {
        Self {
            address: default_redis_address(),
            username: None,
            password: None,
            db: 0,
            pool_size: 0,
        }
    }
}

/// Where content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum SourceConfig {
    Local {
        path: String,
    },
    Remote {
        url: String,
        #[serde(default)]
        user_agent: String,
        /// Revalidation interval in seconds.
        #[serde(default)]
        ttl: u64,
        /// Request timeout in seconds.
        #[serde(default)]
        timeout: u64,
    },
}

impl SourceConfig {
    pub fn template(&self) -> &str {
        match self {
            SourceConfig::Local { path } => path,
            SourceConfig::Remote { url, .. } => url,
        }
    }

    pub fn build(&self) -> Result<Box<dyn Source>> {
        Ok(match self {
            SourceConfig::Local { path } => Box::new(LocalSource::new(path)?),
            SourceConfig::Remote {
                url,
                user_agent,
                ttl,
                timeout,
            } => Box::new(RemoteSource::new(
                url,
                user_agent,
                Duration::from_secs(*ttl),
                Duration::from_secs(*timeout),
            )?),
        })
    }

    fn validate(&self) -> Result<()> {
        match self {
            SourceConfig::Local { path } if path.is_empty() => {
                return Err(Error::Config("missing local source path".to_string()))
            }
            SourceConfig::Remote { url, .. }
                if !url.starts_with("http://") && !url.starts_with("https://") =>
            {
                return Err(Error::Config(format!("invalid remote source url: {}", url)))
            }
            _ => {}
        }
        PathTemplate::parse(self.template())?;
        Ok(())
    }
}

/// A resource source plus how to read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    #[serde(flatten)]
    pub source: SourceConfig,
    #[serde(flatten)]
    pub options: SourceOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geoip: Option<ResourceEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipasn: Option<ResourceEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geosite: Option<ResourceEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointType {
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOptions {
    #[serde(rename = "type")]
    pub endpoint_type: EndpointType,
    #[serde(flatten)]
    pub source: SourceConfig,
    #[serde(flatten)]
    pub source_options: SourceOptions,
    #[serde(flatten)]
    pub target_options: TargetOptions,
}

impl Options {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let options: Options = serde_json::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.cache_type == CacheType::File && self.cache.path.is_none() {
            return Err(Error::Config("file cache requires a path".to_string()));
        }
        if let Some(redis) = &self.cache.redis {
            if redis.address.is_empty() {
                return Err(Error::Config("redis cache requires an address".to_string()));
            }
        }

        for (name, param, entry) in [
            ("geoip", "country", &self.resources.geoip),
            ("ipasn", "asn", &self.resources.ipasn),
            ("geosite", "category", &self.resources.geosite),
        ] {
            let Some(entry) = entry else { continue };
            entry.source.validate()?;
            let template = PathTemplate::parse(entry.source.template())?;
            if template.params().any(|p| p != param) {
                return Err(Error::Config(format!(
                    "{} resource template may only use {{{}}}",
                    name, param
                )));
            }
        }

        for (route, endpoint) in &self.endpoints {
            if !route.starts_with('/') {
                return Err(Error::Config(format!("route must start with '/': {}", route)));
            }
            let route_template = PathTemplate::parse(route)?;
            endpoint.source.validate()?;
            let source_template = PathTemplate::parse(endpoint.source.template())?;
            for param in source_template.params() {
                if !route_template.params().any(|p| p == param) {
                    return Err(Error::Config(format!(
                        "endpoint {}: source parameter {{{}}} is not in the route",
                        route, param
                    )));
                }
            }
        }
        Ok(())
    }
}
