//! End-to-end pipeline tests: sources, caches and endpoints.

use parking_lot::Mutex;
use ruleconv::cache::{Cache, FileCache, MemoryCache, SavedBinary};
use ruleconv::convertor::{Behavior, ConvertOptions, ConvertorType, SourceOptions, TargetOptions};
use ruleconv::embed::{NoResolver, ResourceKind, Resolver};
use ruleconv::endpoint::Endpoint;
use ruleconv::source::{FetchRequest, FetchResponse, LocalSource, Source};
use ruleconv::{DefaultRule, Error, Result};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

/// Remote-like source: no modification time, answers 304 for a known ETag.
struct MockRemote {
    body: &'static str,
    etag: &'static str,
    fetches: Arc<Mutex<Vec<FetchRequest>>>,
}

impl Source for MockRemote {
    fn path(&self, _params: &HashMap<String, String>) -> Result<String> {
        Ok("https://example.com/rules.list".to_string())
    }

    fn last_updated(&self, _path: &str) -> i64 {
        0
    }

    fn fetch(&self, _path: &str, request: &FetchRequest) -> Result<FetchResponse> {
        let mut fetches = self.fetches.lock();
        fetches.push(request.clone());
        let now = 1_700_000_000 + fetches.len() as i64;
        if !self.etag.is_empty() && request.etag == self.etag {
            return Ok(FetchResponse {
                not_modified: true,
                last_updated: now,
                ..Default::default()
            });
        }
        Ok(FetchResponse {
            content: self.body.as_bytes().to_vec(),
            etag: self.etag.to_string(),
            last_updated: now,
            ..Default::default()
        })
    }
}

fn surge_to_json() -> ConvertOptions {
    ConvertOptions::new(
        SourceOptions::new(ConvertorType::Surge),
        TargetOptions::new(ConvertorType::Source),
    )
}

#[test]
fn test_cache_coherence_with_etag() {
    let fetches = Arc::new(Mutex::new(Vec::new()));
    let source = MockRemote {
        body: "DOMAIN-SUFFIX,example.com\n",
        etag: "\"abc\"",
        fetches: fetches.clone(),
    };
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::default());
    let endpoint = Endpoint::new(
        3,
        Box::new(source),
        surge_to_json(),
        cache.clone(),
        Arc::new(NoResolver),
    )
    .unwrap();

    let first = endpoint.serve(&HashMap::new(), "curl/8").unwrap();
    let key = "file.3.https://example.com/rules.list";
    let saved = cache.load(key).unwrap().unwrap();
    assert_eq!(saved.content, first.content);

    // Mark the artifact so a reconversion would be visible.
    let marked = SavedBinary {
        content: b"cached".to_vec(),
        ..saved
    };
    cache.save(key, &marked).unwrap();

    let second = endpoint.serve(&HashMap::new(), "curl/8").unwrap();
    assert_eq!(second.content, b"cached");
    assert_eq!(second.etag, "\"abc\"");

    let fetches = fetches.lock();
    assert_eq!(fetches.len(), 2);
    assert_eq!(fetches[0], FetchRequest::default());
    assert_eq!(fetches[1].etag, "\"abc\"");
    // The not-modified answer refreshed the stored time.
    assert_eq!(cache.load(key).unwrap().unwrap().last_updated, 1_700_000_002);
}

#[test]
fn test_local_source_with_file_cache() {
    let dir = tempfile::TempDir::new().unwrap();
    let data = dir.path().join("data");
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("ads.list"), "DOMAIN,ads.example\n").unwrap();

    let cache_dir = dir.path().join("cache");
    let file_cache = FileCache::new(&cache_dir);
    file_cache.start().unwrap();
    let cache: Arc<dyn Cache> = Arc::new(file_cache);

    let template = format!("{}/{{name}}.list", data.display());
    let endpoint = Endpoint::new(
        0,
        Box::new(LocalSource::new(&template).unwrap()),
        surge_to_json(),
        cache.clone(),
        Arc::new(NoResolver),
    )
    .unwrap();
    let params = HashMap::from([("name".to_string(), "ads".to_string())]);

    let served = endpoint.serve(&params, "sing-box 1.11.0").unwrap();
    assert!(String::from_utf8(served.content.clone()).unwrap().contains("ads.example"));
    assert_eq!(fs::read_dir(&cache_dir).unwrap().count(), 1);

    let key = format!("file.0.{}/ads.list", data.display());
    let saved = cache.load(&key).unwrap().unwrap();
    assert!(saved.last_updated > 0);

    // Same mtime: the stored artifact is served as is.
    cache
        .save(
            &key,
            &SavedBinary {
                content: b"cached".to_vec(),
                ..saved.clone()
            },
        )
        .unwrap();
    assert_eq!(endpoint.serve(&params, "").unwrap().content, b"cached");

    // A different stored time forces a reconversion.
    cache
        .save(
            &key,
            &SavedBinary {
                content: b"stale".to_vec(),
                last_updated: saved.last_updated - 10,
                last_etag: String::new(),
            },
        )
        .unwrap();
    assert_eq!(endpoint.serve(&params, "").unwrap().content, served.content);
}

/// Resolver backed by a fixed table.
struct TableResolver;

impl Resolver for TableResolver {
    fn configured(&self, kind: ResourceKind) -> bool {
        kind == ResourceKind::GeoIp
    }

    fn resolve(&self, _kind: ResourceKind, code: &str) -> Result<DefaultRule> {
        match code {
            "private" => Ok(DefaultRule {
                ip_cidr: vec!["10.0.0.0/8".to_string(), "192.168.0.0/16".to_string()],
                ..Default::default()
            }),
            _ => Err(Error::Fetch(format!("unknown country {}", code))),
        }
    }
}

#[test]
fn test_endpoint_embeds_resources() {
    let source = MockRemote {
        body: "GEOIP,private\n",
        etag: "",
        fetches: Arc::new(Mutex::new(Vec::new())),
    };
    let options = ConvertOptions::new(
        SourceOptions {
            source_behavior: Some(Behavior::Classical),
            ..SourceOptions::new(ConvertorType::Clash)
        },
        TargetOptions::new(ConvertorType::Source),
    );
    let endpoint = Endpoint::new(
        0,
        Box::new(source),
        options,
        Arc::new(MemoryCache::default()),
        Arc::new(TableResolver),
    )
    .unwrap();
    let served = endpoint.serve(&HashMap::new(), "").unwrap();
    let value: serde_json::Value = serde_json::from_slice(&served.content).unwrap();
    assert_eq!(
        value["rules"][0]["ip_cidr"],
        serde_json::json!(["10.0.0.0/8", "192.168.0.0/16"])
    );
    assert!(value["rules"][0].get("geoip").is_none());
}
