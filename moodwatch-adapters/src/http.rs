//! HTTP page source.
//!
//! Downloads a web page and pulls the tracked value out of its markup with a
//! regular expression. The first capture group of the pattern is the raw
//! value handed to [`parse_value`](crate::parse_value).
//!
//! ## Example
//!
//! ```rust,no_run
//! use moodwatch_adapters::http::HttpSource;
//! use moodwatch_adapters::ValueSource;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = HttpSource::builder()
//!         .url("https://www.tickertape.in/market-mood-index")
//!         .pattern(r#"<span[^>]*class="[^"]*number[^"]*"[^>]*>([^<]+)</span>"#)
//!         .timeout(Duration::from_secs(20))
//!         .build()?;
//!
//!     println!("raw: {}", source.fetch_raw().await?);
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use crate::error::BuildError;
use crate::{FetchError, ValueSource};

/// Page scraped when no URL is configured.
pub const DEFAULT_URL: &str = "https://www.tickertape.in/market-mood-index";

/// Matches the text of the first `<span>` whose class mentions `number`.
pub const DEFAULT_PATTERN: &str =
    r#"<span[^>]*class="[^"]*number[^"]*"[^>]*>\s*([^<]+?)\s*</span>"#;

const DEFAULT_USER_AGENT: &str = concat!("moodwatch/", env!("CARGO_PKG_VERSION"));

/// Source that scrapes the value from an HTML page.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    url: String,
    pattern: Regex,
}

impl HttpSource {
    /// Create a new builder for configuring the source.
    pub fn builder() -> HttpSourceBuilder {
        HttpSourceBuilder::default()
    }

    /// The page this source downloads.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Pull the raw value out of a page body.
    pub fn extract(&self, body: &str) -> Result<String, FetchError> {
        self.pattern
            .captures(body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|raw| !raw.is_empty())
            .ok_or(FetchError::NotFound)
    }

    async fn fetch_page(&self) -> Result<String, FetchError> {
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl ValueSource for HttpSource {
    async fn fetch_raw(&self) -> Result<String, FetchError> {
        let body = self.fetch_page().await?;
        self.extract(&body)
    }

    fn description(&self) -> &str {
        &self.url
    }
}

/// Builder for HttpSource.
#[derive(Debug, Default)]
pub struct HttpSourceBuilder {
    url: Option<String>,
    pattern: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl HttpSourceBuilder {
    /// Set the page URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the extraction pattern. It must contain one capture group.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Set the request timeout (default: 20 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Build the source.
    pub fn build(self) -> Result<HttpSource, BuildError> {
        let pattern = Regex::new(self.pattern.as_deref().unwrap_or(DEFAULT_PATTERN))?;
        if pattern.captures_len() < 2 {
            return Err(BuildError::MissingCaptureGroup);
        }

        let client = Client::builder()
            .timeout(self.timeout.unwrap_or(Duration::from_secs(20)))
            .user_agent(
                self.user_agent
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            )
            .build()?;

        Ok(HttpSource {
            client,
            url: self.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
            pattern,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned HTTP response on a random local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });

        format!("http://{}/mmi", addr)
    }

    #[test]
    fn test_builder_defaults() {
        let source = HttpSource::builder().build().unwrap();
        assert_eq!(source.url(), DEFAULT_URL);
        assert_eq!(source.description(), DEFAULT_URL);
    }

    #[test]
    fn test_builder_rejects_pattern_without_group() {
        let err = HttpSource::builder().pattern("number").build().unwrap_err();
        assert!(matches!(err, BuildError::MissingCaptureGroup));
    }

    #[test]
    fn test_builder_rejects_invalid_pattern() {
        let err = HttpSource::builder().pattern("(unclosed").build().unwrap_err();
        assert!(matches!(err, BuildError::Pattern(_)));
    }

    #[test]
    fn test_extract_default_pattern() {
        let source = HttpSource::builder().build().unwrap();
        let body = r#"<div><span class="jsx-1 number-value"> 52.37 </span></div>"#;
        assert_eq!(source.extract(body).unwrap(), "52.37");
    }

    #[test]
    fn test_extract_missing_value() {
        let source = HttpSource::builder().build().unwrap();
        assert_eq!(
            source.extract("<html><body>maintenance</body></html>"),
            Err(FetchError::NotFound)
        );
        assert_eq!(
            source.extract(r#"<span class="number">   </span>"#),
            Err(FetchError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_fetch_raw_from_page() {
        let url = serve_once("200 OK", r#"<span class="number">61.2</span>"#).await;
        let source = HttpSource::builder().url(url).build().unwrap();
        assert_eq!(source.fetch_raw().await.unwrap(), "61.2");
    }

    #[tokio::test]
    async fn test_fetch_raw_error_status() {
        let url = serve_once("503 Service Unavailable", "busy").await;
        let source = HttpSource::builder().url(url).build().unwrap();
        assert_eq!(source.fetch_raw().await, Err(FetchError::Status(503)));
    }
}
