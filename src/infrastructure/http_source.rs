// HTTP snapshot source and endpoint probing
use crate::application::snapshot_source::{FetchError, SnapshotSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use std::time::{Duration, Instant};

/// Paths tried, in order, after the configured one.
const DEFAULT_INDEX_PATHS: [&str; 6] = [
    "/index",
    "/api/index",
    "/v1/index",
    "/data/index",
    "/index.json",
    "/api/snapshot",
];

#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    client: Client,
    endpoint: Url,
}

impl HttpSnapshotSource {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> Result<String, FetchError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        if body.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Candidate index paths: the preferred one first, then the built-in list.
/// Every path gets a leading `/`; duplicates keep their first position.
pub fn candidate_paths(preferred: Option<&str>) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    let preferred = preferred.map(str::trim).filter(|path| !path.is_empty());

    for path in preferred.into_iter().chain(DEFAULT_INDEX_PATHS) {
        let normalized = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        if !paths.contains(&normalized) {
            paths.push(normalized);
        }
    }
    paths
}

fn join(base_url: &str, path: &str) -> Result<Url> {
    let raw = format!("{}{}", base_url.trim_end_matches('/'), path);
    Url::parse(&raw).with_context(|| format!("Invalid index URL: {}", raw))
}

/// Return the first candidate that answers 2xx, or the first candidate when
/// none does.
pub async fn probe_endpoint(base_url: &str, paths: &[String], timeout: Duration) -> Result<Url> {
    let client = build_client(timeout)?;
    tracing::info!(target: "pipeline", "Probing {} for an index endpoint: {:?}", base_url, paths);

    for path in paths {
        let url = join(base_url, path)?;
        let started = Instant::now();
        match client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::info!(
                    target: "pipeline",
                    "Selected index endpoint {} ({} in {}ms)",
                    url,
                    response.status(),
                    started.elapsed().as_millis()
                );
                return Ok(url);
            }
            Ok(response) => {
                tracing::debug!(target: "pipeline", "Probe {} answered {}", url, response.status());
            }
            Err(e) => {
                tracing::debug!(target: "pipeline", "Probe {} failed: {}", url, e);
            }
        }
    }

    let fallback = paths.first().map(String::as_str).unwrap_or(DEFAULT_INDEX_PATHS[0]);
    let url = join(base_url, fallback)?;
    tracing::warn!(target: "pipeline", "No index endpoint answered 2xx, falling back to {}", url);
    Ok(url)
}
