use crate::config::SourceConfig;
use anyhow::{Context, Result, bail};
use rand::Rng;
use reqwest::header::{CONTENT_TYPE, REFERER};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Shared HTTP client for the market-data sources.
///
/// Every request is preceded by a polite delay with jitter. Failed requests
/// are not retried; the caller decides whether to skip or abort.
pub struct HttpClient {
    inner: reqwest::Client,
    request_delay_ms: u64,
    jitter_ms: u64,
}

impl HttpClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // KRX hands out a session cookie on the first request
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            request_delay_ms: config.request_delay_ms,
            jitter_ms: config.jitter_ms,
        })
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        self.polite_delay().await;
        debug!("GET {}", url);

        let resp = self
            .inner
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request failed: {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("HTTP {} for {}", status, url);
        }
        resp.text().await.context("Failed to read response body")
    }

    /// POST an `application/x-www-form-urlencoded` body.
    pub async fn post_form(&self, url: &str, referer: &str, fields: &[(&str, &str)]) -> Result<String> {
        self.polite_delay().await;
        debug!("POST {} {:?}", url, fields);

        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();

        let resp = self
            .inner
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=UTF-8")
            .header(REFERER, referer)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Request failed: {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("HTTP {} for {}", status, url);
        }
        resp.text().await.context("Failed to read response body")
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter = rand::thread_rng().gen_range(0..=self.jitter_ms);
        let total = Duration::from_millis(self.request_delay_ms + jitter);
        sleep(total).await;
    }
}
