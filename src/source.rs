//! External Source boundary: where the authority's snapshot comes from.
//!
//! The engine only needs "fetch the full snapshot or fail". Ordering is not
//! guaranteed and duplicate ids may appear; both are handled by the diff
//! phase, not here.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::entities::ExternalUnit;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SourceError {
    /// Network failure, including timeouts.
    #[error("transport error: {0}")]
    Transport(String),

    /// The authority answered with a non-success status.
    #[error("authority returned HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// The payload was not a list of `{id, name}` objects.
    #[error("malformed snapshot: {0}")]
    Decode(String),

    #[error("cannot read snapshot file: {0}")]
    Io(String),

    #[error("source misconfigured: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

pub trait ExternalSource: Send + Sync {
    /// Human-readable description for logs (URL, file path, ...).
    fn describe(&self) -> String;

    fn fetch_snapshot(&self) -> Result<Vec<ExternalUnit>, SourceError>;
}

/// Decode a JSON snapshot body. `null` and an empty body mean "no units",
/// matching what the authority sends when it has nothing to report.
pub fn parse_json_snapshot(body: &str) -> Result<Vec<ExternalUnit>, SourceError> {
    if body.trim().is_empty() {
        warn!("external snapshot body is empty; treating as zero units");
        return Ok(Vec::new());
    }

    let units: Option<Vec<ExternalUnit>> =
        serde_json::from_str(body).map_err(|e| SourceError::Decode(e.to_string()))?;

    match units {
        Some(units) => Ok(units),
        None => {
            warn!("external snapshot body is null; treating as zero units");
            Ok(Vec::new())
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// GETs the snapshot from the authority's endpoint (blocking, bounded by a timeout).
pub struct HttpSource {
    http: reqwest::blocking::Client,
    url: String,
}

impl HttpSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(SourceError::Config("source url is empty".to_string()));
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("regional-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Config(format!("http client: {e}")))?;

        Ok(HttpSource { http, url })
    }
}

impl ExternalSource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn fetch_snapshot(&self) -> Result<Vec<ExternalUnit>, SourceError> {
        debug!(url = %self.url, "fetching external snapshot");

        let response = self
            .http
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let body = response
            .text()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        parse_json_snapshot(&body)
    }
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// Reads a snapshot exported to disk: `.csv` with an `id,name` header,
/// anything else as a JSON array.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource { path: path.into() }
    }

    fn is_csv(&self) -> bool {
        self.path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false)
    }

    fn read_csv(&self) -> Result<Vec<ExternalUnit>, SourceError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| SourceError::Io(format!("{}: {e}", self.path.display())))?;

        let mut units = Vec::new();
        for (idx, record) in rdr.deserialize().enumerate() {
            let unit: ExternalUnit = record
                .map_err(|e| SourceError::Decode(format!("csv row {}: {e}", idx + 1)))?;
            units.push(unit);
        }

        Ok(units)
    }
}

impl ExternalSource for FileSource {
    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }

    fn fetch_snapshot(&self) -> Result<Vec<ExternalUnit>, SourceError> {
        if self.is_csv() {
            return self.read_csv();
        }

        let body = std::fs::read_to_string(&self.path)
            .map_err(|e| SourceError::Io(format!("{}: {e}", self.path.display())))?;
        parse_json_snapshot(&body)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Fixed snapshot, for tests and for callers that already hold the data.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    units: Vec<ExternalUnit>,
}

impl StaticSource {
    pub fn new(units: Vec<ExternalUnit>) -> Self {
        StaticSource { units }
    }
}

impl ExternalSource for StaticSource {
    fn describe(&self) -> String {
        format!("static ({} units)", self.units.len())
    }

    fn fetch_snapshot(&self) -> Result<Vec<ExternalUnit>, SourceError> {
        Ok(self.units.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::io::Write;

    fn http_source(server: &MockServer, timeout: Duration) -> HttpSource {
        HttpSource::new(server.url("/v1/regionais"), timeout).unwrap()
    }

    #[test]
    fn test_http_source_decodes_snapshot() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/v1/regionais");
            then.status(200).json_body(serde_json::json!([
                {"id": 100, "name": "North"},
                {"id": 200, "nome": "South"}
            ]));
        });

        let units = http_source(&server, Duration::from_secs(5))
            .fetch_snapshot()
            .unwrap();

        mock.assert();
        assert_eq!(
            units,
            vec![ExternalUnit::new(100, "North"), ExternalUnit::new(200, "South")]
        );
    }

    #[test]
    fn test_http_source_server_error_is_http_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/regionais");
            then.status(503);
        });

        let err = http_source(&server, Duration::from_secs(5))
            .fetch_snapshot()
            .unwrap_err();

        assert!(matches!(err, SourceError::Http { status: 503, .. }));
    }

    #[test]
    fn test_http_source_malformed_body_is_decode_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/regionais");
            then.status(200).body(r#"{"unexpected": true}"#);
        });

        let err = http_source(&server, Duration::from_secs(5))
            .fetch_snapshot()
            .unwrap_err();

        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[test]
    fn test_http_source_null_body_is_empty_snapshot() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/regionais");
            then.status(200).body("null");
        });

        let units = http_source(&server, Duration::from_secs(5))
            .fetch_snapshot()
            .unwrap();

        assert!(units.is_empty());
    }

    #[test]
    fn test_http_source_times_out() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/regionais");
            then.status(200)
                .delay(Duration::from_secs(3))
                .json_body(serde_json::json!([]));
        });

        let err = http_source(&server, Duration::from_millis(300))
            .fetch_snapshot()
            .unwrap_err();

        assert!(matches!(err, SourceError::Transport(_)));
    }

    #[test]
    fn test_http_source_rejects_empty_url() {
        assert!(matches!(
            HttpSource::new("  ", Duration::from_secs(1)),
            Err(SourceError::Config(_))
        ));
    }

    #[test]
    fn test_file_source_reads_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"[{{"id": 300, "name": "West"}}]"#).unwrap();

        let units = FileSource::new(file.path()).fetch_snapshot().unwrap();
        assert_eq!(units, vec![ExternalUnit::new(300, "West")]);
    }

    #[test]
    fn test_file_source_reads_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "id,name").unwrap();
        writeln!(file, "100, North").unwrap();
        writeln!(file, "200,\"South, Coast\"").unwrap();

        let units = FileSource::new(file.path()).fetch_snapshot().unwrap();
        assert_eq!(
            units,
            vec![
                ExternalUnit::new(100, "North"),
                ExternalUnit::new(200, "South, Coast")
            ]
        );
    }

    #[test]
    fn test_file_source_bad_csv_row_is_decode_error() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "id,name").unwrap();
        writeln!(file, "not-a-number,North").unwrap();

        let err = FileSource::new(file.path()).fetch_snapshot().unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[test]
    fn test_file_source_missing_file_is_io_error() {
        let err = FileSource::new("/definitely/not/here.json")
            .fetch_snapshot()
            .unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }

    #[test]
    fn test_parse_json_snapshot_empty_body() {
        assert!(parse_json_snapshot("   ").unwrap().is_empty());
    }
}
