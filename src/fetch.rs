use crate::{CrawlerError, Fetcher};
use tokio::{
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::debug;

/// Fetches pages over HTTP, keeping a minimum delay between request starts.
pub struct HttpFetcher {
    client: reqwest::Client,
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl HttpFetcher {
    pub fn new(delay: Duration) -> Self {
        HttpFetcher::with_client(reqwest::Client::new(), delay)
    }

    pub fn with_client(client: reqwest::Client, delay: Duration) -> Self {
        HttpFetcher {
            client,
            delay,
            last_request: Mutex::new(None),
        }
    }

    async fn get(&self, address: &str) -> Result<reqwest::Response, CrawlerError> {
        let mut last_request = self.last_request.lock().await;
        if let Some(last) = last_request.take() {
            let elapsed = Instant::now().duration_since(last);
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        last_request.replace(Instant::now());
        drop(last_request);

        debug!("Visit {}", address);
        let response = self
            .client
            .get(address)
            .send()
            .await
            .map_err(|source| CrawlerError::Fetch {
                address: address.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlerError::FetchStatus {
                address: address.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, address: &str) -> Result<String, CrawlerError> {
        let html = self
            .get(address)
            .await?
            .text()
            .await
            .map_err(|source| CrawlerError::Fetch {
                address: address.to_string(),
                source,
            })?;

        if html.trim().is_empty() {
            return Err(CrawlerError::EmptyPage {
                address: address.to_string(),
            });
        }
        Ok(html)
    }

    async fn fetch_bytes(&self, address: &str) -> Result<Vec<u8>, CrawlerError> {
        let bytes = self
            .get(address)
            .await?
            .bytes()
            .await
            .map_err(|source| CrawlerError::Fetch {
                address: address.to_string(),
                source,
            })?;
        Ok(bytes.to_vec())
    }
}
