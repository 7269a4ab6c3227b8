//! Assembles a cache, the resource manager and the endpoints from options.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{memory, Cache, FileCache, MemoryCache, RedisCache};
use crate::convertor::ConvertOptions;
use crate::endpoint::{Endpoint, Reply};
use crate::option::{CacheOptions, CacheType, Options, ResourceEntry};
use crate::resource::{Resource, ResourceManager};
use crate::source::PathTemplate;
use crate::{Error, Result};

struct Route {
    name: String,
    template: PathTemplate,
    endpoint: Endpoint,
}

/// A configured set of endpoints sharing one cache.
pub struct Server {
    cache: Arc<dyn Cache>,
    routes: Vec<Route>,
}

fn build_cache(options: &CacheOptions) -> Result<Arc<dyn Cache>> {
    Ok(match options.cache_type {
        CacheType::Memory => {
            let capacity = if options.capacity == 0 {
                memory::DEFAULT_CAPACITY
            } else {
                options.capacity
            };
            let ttl = if options.timeout == 0 {
                memory::DEFAULT_TTL
            } else {
                Duration::from_secs(options.timeout)
            };
            Arc::new(MemoryCache::new(capacity, ttl))
        }
        CacheType::File => {
            let path = options
                .path
                .as_ref()
                .ok_or_else(|| Error::Config("file cache requires a path".to_string()))?;
            Arc::new(FileCache::new(path))
        }
        CacheType::Redis => {
            let redis = options.redis.clone().unwrap_or_default();
            Arc::new(RedisCache::new(&redis, Duration::from_secs(options.timeout))?)
        }
    })
}

fn build_resource(name: &str, entry: &ResourceEntry) -> Result<Resource> {
    let source = entry
        .source
        .build()
        .map_err(|e| Error::Config(format!("create source for {}: {}", name, e)))?;
    Ok(Resource::new(source, entry.options.clone()))
}

impl Server {
    pub fn new(options: &Options) -> Result<Self> {
        let cache = build_cache(&options.cache)?;

        let mut resources = ResourceManager::new(cache.clone());
        if let Some(entry) = &options.resources.geoip {
            resources = resources.with_geoip(build_resource("geoip", entry)?);
        }
        if let Some(entry) = &options.resources.ipasn {
            resources = resources.with_ipasn(build_resource("ipasn", entry)?);
        }
        if let Some(entry) = &options.resources.geosite {
            resources = resources.with_geosite(build_resource("geosite", entry)?);
        }
        let resources = Arc::new(resources);

        let mut routes = Vec::with_capacity(options.endpoints.len());
        for (index, (name, endpoint)) in options.endpoints.iter().enumerate() {
            let source = endpoint.source.build()?;
            let convert = ConvertOptions::new(
                endpoint.source_options.clone(),
                endpoint.target_options.clone(),
            );
            let endpoint = Endpoint::new(index, source, convert, cache.clone(), resources.clone())
                .map_err(|e| Error::Config(format!("endpoint {}: {}", name, e)))?;
            routes.push(Route {
                name: name.clone(),
                template: PathTemplate::parse(name)?,
                endpoint,
            });
        }
        log::info!("configured {} endpoints", routes.len());
        Ok(Self { cache, routes })
    }

    pub fn start(&self) -> Result<()> {
        self.cache.start()
    }

    pub fn close(&self) -> Result<()> {
        self.cache.close()
    }

    /// Configured route templates, in index order.
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.name.as_str())
    }

    /// Endpoint by its route template.
    pub fn endpoint(&self, route: &str) -> Option<&Endpoint> {
        self.routes
            .iter()
            .find(|r| r.name == route)
            .map(|r| &r.endpoint)
    }

    /// Find the endpoint whose route matches a request path.
    pub fn route(&self, path: &str) -> Option<(&Endpoint, HashMap<String, String>)> {
        self.routes
            .iter()
            .find_map(|r| r.template.capture(path).map(|params| (&r.endpoint, params)))
    }

    /// Serve a request path. Unknown paths are 404.
    pub fn handle(&self, path: &str, user_agent: &str) -> Reply {
        match self.route(path) {
            Some((endpoint, params)) => endpoint.handle(&params, user_agent),
            None => {
                log::debug!("no endpoint for {}", path);
                Reply {
                    status: 404,
                    served: None,
                    message: format!("no endpoint for {}", path),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_server_routes_requests() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("ads.list"), "DOMAIN-SUFFIX,ads.example\n").unwrap();
        let config = format!(
            r#"{{
                "cache": {{"type": "file", "path": "{cache}"}},
                "endpoints": {{
                    "/surge/{{name}}.json": {{
                        "type": "file",
                        "source": "local",
                        "path": "{data}/{{name}}.list",
                        "source_type": "surge",
                        "target_type": "source"
                    }}
                }}
            }}"#,
            cache = dir.path().join("cache").display(),
            data = dir.path().display(),
        );
        let server = Server::new(&Options::parse(&config).unwrap()).unwrap();
        server.start().unwrap();
        assert_eq!(server.routes().collect::<Vec<_>>(), vec!["/surge/{name}.json"]);
        assert!(server.endpoint("/surge/{name}.json").is_some());

        let reply = server.handle("/surge/ads.json", "sing-box 1.11.0");
        assert_eq!(reply.status, 200, "{}", reply.message);
        let served = reply.served.unwrap();
        assert!(String::from_utf8(served.content).unwrap().contains("ads.example"));

        assert_eq!(server.handle("/surge/missing.json", "curl").status, 500);
        assert_eq!(server.handle("/other", "curl").status, 404);
        server.close().unwrap();
    }

    #[test]
    fn test_redis_cache_from_options() {
        let options = Options::parse(
            r#"{"cache": {"type": "redis", "redis": {"address": "127.0.0.1:1"}}}"#,
        )
        .unwrap();
        let server = Server::new(&options).unwrap();
        assert!(matches!(server.start(), Err(Error::Cache(_))));
        server.close().unwrap();
    }
}
