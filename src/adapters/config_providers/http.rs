use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    time::Duration,
};

use async_trait::async_trait;
use config::FileFormat;
use eyre::{Context, Result};
use reqwest::{Client, header::CONTENT_TYPE};
use tokio::{sync::mpsc, task::JoinHandle};

use super::take_receiver;
use crate::{
    config::{loader::parse_config_str, models::GatewayConfig},
    ports::config_provider::ConfigProvider,
};

/// Fetches the gateway configuration from an HTTP URL and polls it for changes.
///
/// The body is parsed as JSON, YAML or TOML depending on the response content
/// type, falling back to the URL's extension.
pub struct HttpConfigProvider {
    url: String,
    client: Client,
    poller: JoinHandle<()>,
    update_rx: std::sync::Mutex<Option<mpsc::Receiver<()>>>,
}

impl HttpConfigProvider {
    pub fn new(url: String, poll_interval: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel(1);
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .wrap_err("Failed to build HTTP client for remote configuration")?;

        let poller = tokio::spawn(Self::poll(client.clone(), url.clone(), poll_interval, tx));

        Ok(Self {
            url,
            client,
            poller,
            update_rx: std::sync::Mutex::new(Some(rx)),
        })
    }

    /// Signal a change whenever the fetched document differs from the previous one.
    async fn poll(client: Client, url: String, poll_interval: Duration, tx: mpsc::Sender<()>) {
        let mut last_hash: Option<u64> = None;
        let mut interval = tokio::time::interval(poll_interval);

        loop {
            interval.tick().await;

            match Self::fetch_text(&client, &url).await {
                Ok((body, _)) => {
                    let mut hasher = DefaultHasher::new();
                    body.hash(&mut hasher);
                    let hash = hasher.finish();

                    if last_hash.is_some_and(|last| last != hash) {
                        tracing::info!(url = %url, "Remote configuration changed");
                        let _ = tx.try_send(());
                    }
                    last_hash = Some(hash);
                }
                Err(e) => {
                    tracing::warn!(url = %url, "Failed to poll remote config: {e:#}");
                }
            }
        }
    }

    async fn fetch_text(client: &Client, url: &str) -> Result<(String, FileFormat)> {
        let resp = client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?
            .error_for_status()
            .context("Remote configuration request failed")?;
        let format = format_for(
            resp.headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            url,
        );
        let body = resp.text().await.context("Failed to read response body")?;
        Ok((body, format))
    }
}

impl Drop for HttpConfigProvider {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

fn format_for(content_type: Option<&str>, url: &str) -> FileFormat {
    let content_type = content_type.unwrap_or_default();
    if content_type.contains("json") {
        FileFormat::Json
    } else if content_type.contains("yaml") {
        FileFormat::Yaml
    } else if content_type.contains("toml") {
        FileFormat::Toml
    } else {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        if path.ends_with(".yaml") || path.ends_with(".yml") {
            FileFormat::Yaml
        } else if path.ends_with(".toml") {
            FileFormat::Toml
        } else {
            FileFormat::Json
        }
    }
}

#[async_trait]
impl ConfigProvider for HttpConfigProvider {
    async fn load_config(&self) -> Result<GatewayConfig> {
        let (body, format) = Self::fetch_text(&self.client, &self.url).await?;
        parse_config_str(&body, format).with_context(|| format!("Invalid configuration from {}", self.url))
    }

    fn watch(&self) -> mpsc::Receiver<()> {
        take_receiver(&self.update_rx)
    }
}
