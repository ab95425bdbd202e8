//! Fetching command source from a link.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::{CommandError, Result};

/// Hosts that serve raw text under `<link>/raw`.
const RAW_SUFFIX_HOSTS: &[&str] = &["gist.github.com", "rentry.co"];

/// Hosts that serve raw text under `<host>/raw/<path>`.
const RAW_SEGMENT_HOSTS: &[&str] = &["pastebin.com", "pastes.io", "hastebin.com"];

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Retrieves command source text from a URL.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, link: &str) -> Result<String>;
}

/// Rewrite a paste-site link to the address of its raw text.
///
/// The scheme is forced to `https`. Links that already mention `raw` are
/// only re-schemed.
pub fn raw_link(link: &str) -> String {
    let rest = link.split_once("://").map_or(link, |(_, rest)| rest);
    let mut link = format!("https://{rest}");

    if link.contains("raw") {
        return link;
    }

    if RAW_SUFFIX_HOSTS.iter().any(|host| link.contains(host)) {
        link.push_str("/raw");
    } else if RAW_SEGMENT_HOSTS.iter().any(|host| link.contains(host)) {
        let mut parts: Vec<&str> = rest.split('/').collect();
        parts.insert(1, "raw");
        link = format!("https://{}", parts.join("/"));
    }
    link
}

/// Fetches over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with a default client.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| CommandError::fetch("", e))?;
        Ok(Self { client })
    }

    /// Use an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, link: &str) -> Result<String> {
        let target = raw_link(link);
        let url = Url::parse(&target).map_err(|e| CommandError::fetch(link, e))?;
        debug!("Fetching command source from {}", url);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text")
            .send()
            .await
            .map_err(|e| CommandError::fetch(link, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CommandError::fetch(link, format!("HTTP {status}")));
        }

        response.text().await.map_err(|e| CommandError::fetch(link, e))
    }
}

/// Fetcher for registries that must not reach the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFetcher;

#[async_trait]
impl RemoteFetcher for NoFetcher {
    async fn fetch(&self, link: &str) -> Result<String> {
        Err(CommandError::fetch(link, "remote sources are disabled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_link_suffix_hosts() {
        assert_eq!(
            raw_link("https://gist.github.com/someone/8fc611ca"),
            "https://gist.github.com/someone/8fc611ca/raw"
        );
        assert_eq!(raw_link("rentry.co/abc"), "https://rentry.co/abc/raw");
    }

    #[test]
    fn test_raw_link_segment_hosts() {
        assert_eq!(
            raw_link("http://pastebin.com/GiFyqGLS"),
            "https://pastebin.com/raw/GiFyqGLS"
        );
        assert_eq!(raw_link("hastebin.com/abc"), "https://hastebin.com/raw/abc");
    }

    #[test]
    fn test_raw_link_leaves_other_links() {
        assert_eq!(
            raw_link("https://pastebin.com/raw/GiFyqGLS"),
            "https://pastebin.com/raw/GiFyqGLS"
        );
        assert_eq!(raw_link("http://example.com/x.txt"), "https://example.com/x.txt");
    }

    #[tokio::test]
    async fn test_no_fetcher_refuses() {
        let result = NoFetcher.fetch("https://example.com").await;
        assert!(matches!(result, Err(CommandError::Fetch { .. })));
    }
}
