//! Remote HTTP source with ETag revalidation.

use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::Read;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{FetchRequest, FetchResponse, PathTemplate, Source};
use crate::{Error, Result};

/// Revalidation interval used when none is configured.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads rule-sets over HTTP(S).
///
/// The remote side has no cheap modification time, so freshness is decided
/// by the TTL first and by `If-None-Match` once the TTL has passed.
pub struct RemoteSource {
    template: PathTemplate,
    agent: ureq::Agent,
    user_agent: String,
    ttl: Duration,
}

impl RemoteSource {
    /// Create a source. Empty or zero settings fall back to the defaults.
    pub fn new(url: &str, user_agent: &str, ttl: Duration, timeout: Duration) -> Result<Self> {
        let timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        let user_agent = if user_agent.is_empty() {
            default_user_agent()
        } else {
            user_agent.to_string()
        };
        Ok(Self {
            template: PathTemplate::parse(url)?,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            user_agent,
            ttl: if ttl.is_zero() { DEFAULT_TTL } else { ttl },
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

pub fn default_user_agent() -> String {
    format!("ruleconv/{}", env!("CARGO_PKG_VERSION"))
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// Unwrap a gzipped download. Only `.gz` URLs are considered compressed.
fn decompress(url: &str, raw: Vec<u8>) -> Result<Vec<u8>> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    if !path.ends_with(".gz") || !is_gzip(&raw) {
        return Ok(raw);
    }
    let mut data = Vec::new();
    GzDecoder::new(&raw[..])
        .read_to_end(&mut data)
        .map_err(|e| Error::Fetch(format!("gzip decompression failed: {}", e)))?;
    log::debug!("decompressed {} bytes into {}", raw.len(), data.len());
    Ok(data)
}

impl Source for RemoteSource {
    fn path(&self, params: &HashMap<String, String>) -> Result<String> {
        self.template.render(params)
    }

    fn last_updated(&self, _path: &str) -> i64 {
        0
    }

    fn fetch(&self, path: &str, request: &FetchRequest) -> Result<FetchResponse> {
        let now = now();
        if request.last_updated > 0 && now.saturating_sub(request.last_updated) < self.ttl.as_secs() as i64 {
            return Ok(FetchResponse {
                not_modified: true,
                last_updated: request.last_updated,
                ..Default::default()
            });
        }

        let mut call = self.agent.get(path).set("User-Agent", &self.user_agent);
        if !request.etag.is_empty() {
            call = call.set("If-None-Match", &request.etag);
        }
        let response = match call.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(304, _)) => {
                log::debug!("{} not modified (304)", path);
                return Ok(FetchResponse {
                    not_modified: true,
                    last_updated: now,
                    ..Default::default()
                });
            }
            Err(ureq::Error::Status(code, _)) => {
                return Err(Error::Fetch(format!(
                    "unexpected HTTP response {} from {}",
                    code, path
                )))
            }
            Err(ureq::Error::Transport(t)) => {
                return Err(Error::Fetch(format!("fetch {}: {}", path, t)))
            }
        };
        if response.status() != 200 {
            return Err(Error::Fetch(format!(
                "unexpected HTTP response {} from {}",
                response.status(),
                path
            )));
        }

        let etag = response.header("ETag").unwrap_or_default().to_string();
        let mut raw = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut raw)
            .map_err(|e| Error::Fetch(format!("read response from {}: {}", path, e)))?;
        let content = decompress(path, raw)?;
        log::info!("downloaded {} bytes from {}", content.len(), path);
        Ok(FetchResponse {
            content,
            not_modified: false,
            etag,
            last_updated: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn source(url: &str) -> RemoteSource {
        RemoteSource::new(url, "", Duration::ZERO, Duration::from_millis(200)).unwrap()
    }

    #[test]
    fn test_defaults() {
        let source = source("https://example.com/{name}.list");
        assert_eq!(source.ttl(), DEFAULT_TTL);
        assert!(source.user_agent.starts_with("ruleconv/"));
        assert_eq!(source.last_updated("https://example.com/a.list"), 0);
    }

    #[test]
    fn test_within_ttl_skips_network() {
        let source = source("http://127.0.0.1:9/rules.list");
        let recent = now() - 10;
        let response = source
            .fetch(
                "http://127.0.0.1:9/rules.list",
                &FetchRequest {
                    etag: "\"e\"".to_string(),
                    last_updated: recent,
                },
            )
            .unwrap();
        assert!(response.not_modified);
        assert_eq!(response.last_updated, recent);
    }

    #[test]
    fn test_transport_error_is_fetch() {
        let source = source("http://127.0.0.1:9/rules.list");
        let err = source
            .fetch("http://127.0.0.1:9/rules.list", &FetchRequest::default())
            .unwrap_err();
        assert!(err.is_upstream());
    }

    #[test]
    fn test_decompress() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"DOMAIN,a.com\n").unwrap();
        let gz = encoder.finish().unwrap();

        assert_eq!(
            decompress("https://x/rules.list.gz?v=1", gz.clone()).unwrap(),
            b"DOMAIN,a.com\n"
        );
        // Not a .gz URL: passed through untouched.
        assert_eq!(decompress("https://x/rules.srs", gz.clone()).unwrap(), gz);
        assert_eq!(
            decompress("https://x/rules.gz", b"plain".to_vec()).unwrap(),
            b"plain"
        );
    }
}
