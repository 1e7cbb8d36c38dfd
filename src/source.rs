//! Getting playlist text (and channel logos) from disk or the network.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use tracing::info;

pub const DEFAULT_LOGO_CONTENT_TYPE: &str = "image/png";

/// The remote server answered, but not with a success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamStatus(pub StatusCode);

impl fmt::Display for UpstreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upstream returned {}", self.0)
    }
}

impl std::error::Error for UpstreamStatus {}

/// `.m3u` or `.m3u8`, case-insensitive.
pub fn is_playlist_filename(name: &str) -> bool {
    let name = name.trim().to_lowercase();
    name.ends_with(".m3u") || name.ends_with(".m3u8")
}

/// Read a playlist file, replacing invalid UTF-8 sequences.
pub async fn read_playlist_file(path: &Path) -> anyhow::Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if !is_playlist_filename(name) {
        bail!("Please select a valid M3U file: {}", path.display());
    }
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

pub fn parse_remote_url(url: &str) -> anyhow::Result<Url> {
    let url = url.trim();
    if url.is_empty() {
        bail!("URL cannot be empty");
    }
    let parsed = Url::parse(url).with_context(|| format!("Invalid URL: {url}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(anyhow!("Unsupported URL scheme: {scheme}")),
    }
}

#[derive(Debug, Clone)]
pub struct FetchedLogo {
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct PlaylistFetcher {
    client: reqwest::Client,
}

impl PlaylistFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> anyhow::Result<reqwest::Response> {
        let url = parse_remote_url(url)?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;
        if !resp.status().is_success() {
            return Err(UpstreamStatus(resp.status()).into());
        }
        Ok(resp)
    }

    pub async fn fetch_playlist(&self, url: &str) -> anyhow::Result<String> {
        let resp = self.get(url).await?;
        let text = resp.text().await.context("Failed to read playlist body")?;
        info!("Fetched playlist from {} ({} bytes)", url.trim(), text.len());
        Ok(text)
    }

    pub async fn fetch_logo(&self, url: &str) -> anyhow::Result<FetchedLogo> {
        let resp = self.get(url).await?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_LOGO_CONTENT_TYPE)
            .to_string();
        let bytes = resp.bytes().await.context("Failed to read logo body")?;
        Ok(FetchedLogo { content_type, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, http::StatusCode as HttpStatus, routing::get, Router};

    const PLAYLIST: &str = "#EXTM3U\n#EXTINF:-1 group-title=\"UK\",BBC One\nhttp://example.com/bbc1.m3u8\n";

    async fn serve() -> String {
        let app = Router::new()
            .route("/list.m3u", get(|| async { PLAYLIST }))
            .route("/missing.m3u", get(|| async { (HttpStatus::NOT_FOUND, "gone") }))
            .route(
                "/logo.svg",
                get(|| async { ([(header::CONTENT_TYPE, "image/svg+xml")], "<svg/>") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fetcher() -> PlaylistFetcher {
        PlaylistFetcher::new(Duration::from_secs(5), "m3u-manager-test").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_playlist() {
        let base = serve().await;
        let text = fetcher().fetch_playlist(&format!("  {base}/list.m3u ")).await.unwrap();
        assert_eq!(text, PLAYLIST);
    }

    #[tokio::test]
    async fn test_fetch_playlist_status_error() {
        let base = serve().await;
        let err = fetcher()
            .fetch_playlist(&format!("{base}/missing.m3u"))
            .await
            .unwrap_err();
        let status = err.downcast_ref::<UpstreamStatus>().unwrap();
        assert_eq!(status.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_fetch_logo_keeps_content_type() {
        let base = serve().await;
        let logo = fetcher().fetch_logo(&format!("{base}/logo.svg")).await.unwrap();
        assert_eq!(logo.content_type, "image/svg+xml");
        assert_eq!(&logo.bytes[..], b"<svg/>");
    }

    #[test]
    fn test_parse_remote_url() {
        assert!(parse_remote_url("   ").is_err());
        assert!(parse_remote_url("not a url").is_err());
        assert!(parse_remote_url("file:///etc/passwd").is_err());
        assert_eq!(
            parse_remote_url(" https://example.com/a.m3u ").unwrap().as_str(),
            "https://example.com/a.m3u"
        );
    }

    #[test]
    fn test_playlist_filenames() {
        assert!(is_playlist_filename("list.m3u"));
        assert!(is_playlist_filename("LIST.M3U8"));
        assert!(!is_playlist_filename("list.txt"));
        assert!(!is_playlist_filename(""));
    }

    #[tokio::test]
    async fn test_read_playlist_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.m3u8");
        tokio::fs::write(&path, PLAYLIST).await.unwrap();
        assert_eq!(read_playlist_file(&path).await.unwrap(), PLAYLIST);

        let other = dir.path().join("list.txt");
        tokio::fs::write(&other, PLAYLIST).await.unwrap();
        assert!(read_playlist_file(&other).await.is_err());
    }
}
