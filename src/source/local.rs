//! Local file source.

use std::collections::HashMap;
use std::fs;
use std::time::UNIX_EPOCH;

use super::{FetchRequest, FetchResponse, PathTemplate, Source};
use crate::Result;

/// Reads rule-sets from the local filesystem.
///
/// The file's modification time drives cache freshness, so an unchanged file
/// is never read twice.
pub struct LocalSource {
    template: PathTemplate,
}

impl LocalSource {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self {
            template: PathTemplate::parse(path)?,
        })
    }
}

impl Source for LocalSource {
    fn path(&self, params: &HashMap<String, String>) -> Result<String> {
        self.template.render(params)
    }

    fn last_updated(&self, path: &str) -> i64 {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn fetch(&self, path: &str, _request: &FetchRequest) -> Result<FetchResponse> {
        let content = fs::read(path)?;
        log::debug!("read {} bytes from {}", content.len(), path);
        Ok(FetchResponse {
            content,
            not_modified: false,
            etag: String::new(),
            last_updated: self.last_updated(path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_local_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"DOMAIN,a.com\n").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let source = LocalSource::new(&path).unwrap();
        assert_eq!(source.path(&HashMap::new()).unwrap(), path);
        assert!(source.last_updated(&path) > 0);

        let response = source.fetch(&path, &FetchRequest::default()).unwrap();
        assert_eq!(response.content, b"DOMAIN,a.com\n");
        assert!(!response.not_modified);
        assert_eq!(response.last_updated, source.last_updated(&path));
    }

    #[test]
    fn test_missing_file() {
        let source = LocalSource::new("/nonexistent/{name}").unwrap();
        assert_eq!(source.last_updated("/nonexistent/x"), 0);
        assert!(source.fetch("/nonexistent/x", &FetchRequest::default()).is_err());
    }
}
