//! File endpoint: one configured conversion served on request.
//!
//! A request carries path parameters and the client's User-Agent. The
//! endpoint renders the source path, consults the cache and, when the source
//! changed, runs decode, embed and encode before saving the artifact.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{fetch_cached, Cache};
use crate::convertor::{self, source::downgrade_version, ConvertOptions};
use crate::embed::{embed, Resolver};
use crate::metadata;
use crate::source::Source;
use crate::{Error, Result};

/// A served artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub content_type: String,
    /// Upstream ETag, empty when the source has none.
    pub etag: String,
    pub content: Vec<u8>,
}

/// An HTTP-style reply: a status and either content or an error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub served: Option<Served>,
    pub message: String,
}

/// Status code for a failed request.
pub fn status_code(err: &Error) -> u16 {
    match err {
        Error::Template(_) => 400,
        e if e.is_upstream() => 502,
        _ => 500,
    }
}

pub struct Endpoint {
    index: usize,
    source: Box<dyn Source>,
    options: ConvertOptions,
    cache: Arc<dyn Cache>,
    resolver: Arc<dyn Resolver + Send + Sync>,
}

impl Endpoint {
    /// Create an endpoint. The convertors named in `options` must exist.
    pub fn new(
        index: usize,
        source: Box<dyn Source>,
        options: ConvertOptions,
        cache: Arc<dyn Cache>,
        resolver: Arc<dyn Resolver + Send + Sync>,
    ) -> Result<Self> {
        convertor::get(options.source.source_type)?;
        convertor::get(options.target.target_type)?;
        Ok(Self {
            index,
            source,
            options,
            cache,
            resolver,
        })
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Cache key for a rendered source path.
    ///
    /// Downgraded sing-box output is keyed per rule-set version so that old
    /// and new clients never share an artifact.
    fn cache_key(&self, path: &str, options: &ConvertOptions) -> String {
        let mut key = format!("file.{}.{}", self.index, path);
        if options.target.target_type.is_sing_box() {
            if let Some(version) = downgrade_version(&options.metadata) {
                key.push_str(&format!("#v{}", version));
            }
        }
        key
    }

    /// Run the pipeline for one request.
    pub fn serve(&self, params: &HashMap<String, String>, user_agent: &str) -> Result<Served> {
        let options = self
            .options
            .clone()
            .with_metadata(metadata::detect(user_agent));
        let path = self.source.path(params)?;
        let key = self.cache_key(&path, &options);

        let saved = fetch_cached(
            self.cache.as_ref(),
            self.source.as_ref(),
            &key,
            &path,
            |content| {
                let mut rules =
                    convertor::get(options.source.source_type)?.decode(content, &options)?;
                embed(&mut rules, self.resolver.as_ref())?;
                convertor::get(options.target.target_type)?.encode(&rules, &options)
            },
        )?;

        let content_type = convertor::get(options.target.target_type)?.content_type(&options);
        Ok(Served {
            content_type: format!("{}; charset=utf-8", content_type),
            etag: saved.last_etag,
            content: saved.content,
        })
    }

    /// [`serve`](Self::serve) with failures logged and mapped to a status.
    pub fn handle(&self, params: &HashMap<String, String>, user_agent: &str) -> Reply {
        match self.serve(params, user_agent) {
            Ok(served) => {
                log::debug!("served endpoint {} to {}", self.index, user_agent);
                Reply {
                    status: 200,
                    served: Some(served),
                    message: String::new(),
                }
            }
            Err(e) => {
                log::error!("endpoint {} for {}: {}", self.index, user_agent, e);
                Reply {
                    status: status_code(&e),
                    served: None,
                    message: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::convertor::{ConvertorType, SourceOptions, TargetOptions};
    use crate::embed::NoResolver;
    use crate::source::{FetchRequest, FetchResponse};
    use parking_lot::Mutex;

    struct FixedSource {
        content: &'static str,
        fetches: Mutex<usize>,
    }

    impl Source for FixedSource {
        fn path(&self, params: &HashMap<String, String>) -> Result<String> {
            crate::source::PathTemplate::parse("/rules/{name}.list")?.render(params)
        }

        fn last_updated(&self, _path: &str) -> i64 {
            1_000
        }

        fn fetch(&self, _path: &str, _request: &FetchRequest) -> Result<FetchResponse> {
            *self.fetches.lock() += 1;
            Ok(FetchResponse {
                content: self.content.as_bytes().to_vec(),
                etag: "\"v1\"".to_string(),
                last_updated: 1_000,
                ..Default::default()
            })
        }
    }

    fn endpoint(content: &'static str, target: ConvertorType, cache: Arc<dyn Cache>) -> Endpoint {
        let options = ConvertOptions::new(
            SourceOptions {
                source_behavior: Some(crate::convertor::Behavior::Classical),
                ..SourceOptions::new(ConvertorType::Clash)
            },
            TargetOptions::new(target),
        );
        let source = FixedSource {
            content,
            fetches: Mutex::new(0),
        };
        Endpoint::new(0, Box::new(source), options, cache, Arc::new(NoResolver)).unwrap()
    }

    fn params(name: &str) -> HashMap<String, String> {
        HashMap::from([("name".to_string(), name.to_string())])
    }

    #[test]
    fn test_serve_json() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::default());
        let endpoint = endpoint("DOMAIN-SUFFIX,a.com\n", ConvertorType::Source, cache.clone());
        let served = endpoint.serve(&params("ads"), "curl/8.0").unwrap();
        assert_eq!(served.content_type, "application/json; charset=utf-8");
        assert_eq!(served.etag, "\"v1\"");
        assert!(String::from_utf8(served.content)
            .unwrap()
            .contains("\"domain_suffix\": \"a.com\""));
        assert!(cache.load("file.0./rules/ads.list").unwrap().is_some());
    }

    #[test]
    fn test_downgraded_key() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::default());
        let endpoint = endpoint("DOMAIN,a.com\n", ConvertorType::Binary, cache.clone());
        endpoint.serve(&params("x"), "sing-box 1.9.3").unwrap();
        endpoint.serve(&params("x"), "SFA/1.11.0 (sing-box 1.11.0)").unwrap();
        assert!(cache.load("file.0./rules/x.list#v1").unwrap().is_some());
        assert!(cache.load("file.0./rules/x.list").unwrap().is_some());
    }

    #[test]
    fn test_handle_statuses() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::default());
        let endpoint = endpoint("DOMAIN,a.com\n", ConvertorType::Source, cache);
        assert_eq!(endpoint.handle(&params("x"), "curl").status, 200);

        let reply = endpoint.handle(&params("../etc"), "curl");
        assert_eq!(reply.status, 400);
        assert!(reply.served.is_none());

        assert_eq!(endpoint.handle(&HashMap::new(), "curl").status, 400);
        assert_eq!(status_code(&Error::Fetch("down".to_string())), 502);
        assert_eq!(status_code(&Error::Parse("bad".to_string())), 500);
    }
}
