//! Configuration sources
//!
//! A snapshot of tunnel descriptors can come from a local JSON file or
//! from a remote HTTP endpoint returning the same document. The
//! supervisor reloads the source on every reconciliation tick.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::TunnelDescriptor;
use crate::error::ConfigError;

/// Total timeout for remote config requests
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Where tunnel configuration snapshots are loaded from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// JSON file on the local filesystem
    File(PathBuf),
    /// HTTP(S) endpoint returning the JSON document
    Remote(String),
}

impl ConfigSource {
    /// Build a source from a CLI-supplied location: `http://` and
    /// `https://` prefixes select the remote source, anything else is
    /// treated as a file path.
    pub fn from_location(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            ConfigSource::Remote(location.to_string())
        } else {
            ConfigSource::File(PathBuf::from(location))
        }
    }

    /// Load a fresh snapshot of tunnel descriptors
    pub async fn load(&self) -> Result<Vec<TunnelDescriptor>, ConfigError> {
        match self {
            ConfigSource::File(path) => {
                let raw = tokio::fs::read(path).await.map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Ok(serde_json::from_slice(&raw)?)
            }
            ConfigSource::Remote(url) => {
                let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
                let response = client.get(url).send().await?;
                if response.status() != reqwest::StatusCode::OK {
                    return Err(ConfigError::Status {
                        url: url.clone(),
                        status: response.status(),
                    });
                }
                Ok(response.json().await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn location_scheme_selects_source() {
        assert!(matches!(
            ConfigSource::from_location("https://example.com/tunnels.json"),
            ConfigSource::Remote(_)
        ));
        assert!(matches!(
            ConfigSource::from_location("http://example.com/tunnels.json"),
            ConfigSource::Remote(_)
        ));
        assert!(matches!(
            ConfigSource::from_location("/etc/burrow/config.json"),
            ConfigSource::File(_)
        ));
    }

    #[tokio::test]
    async fn loads_descriptors_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"[{"id": "a", "tunnel_host": "t", "tunnel_port": "22",
                 "listener_host": "0.0.0.0", "listener_port": "2221",
                 "service_host": "localhost", "service_port": "2222"}]"#,
        );

        let snapshot = ConfigSource::File(path).load().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "a");
        assert!(snapshot[0].is_active());
    }

    #[tokio::test]
    async fn empty_document_yields_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[]");

        let snapshot = ConfigSource::File(path).load().await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let result = ConfigSource::File(PathBuf::from("/nonexistent/burrow.json"))
            .load()
            .await;
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[tokio::test]
    async fn invalid_document_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "{not json");

        let result = ConfigSource::File(path).load().await;
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    async fn serve_one_response(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // Drain the request head before answering.
            let mut head = [0u8; 1024];
            let _ = stream.read(&mut head).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        });
        format!("http://{addr}/config.json")
    }

    #[tokio::test]
    async fn loads_descriptors_from_remote() {
        let url = serve_one_response("200 OK", r#"[{"id": "remote", "state": "inactive"}]"#).await;

        let snapshot = ConfigSource::Remote(url).load().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "remote");
        assert!(!snapshot[0].is_active());
    }

    #[tokio::test]
    async fn non_ok_status_is_an_error() {
        let url = serve_one_response("404 Not Found", "[]").await;

        let result = ConfigSource::Remote(url).load().await;
        assert!(matches!(result, Err(ConfigError::Status { .. })));
    }
}
