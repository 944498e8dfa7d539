use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::Credentials;

use super::{DeliverySink, SinkError, SinkKind};

/// Sends each document as the JSON body of one POST request.
pub struct HttpSink {
    http_client: Client,
    url: Url,
    credentials: Option<Credentials>,
}

impl HttpSink {
    pub fn new(
        url: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let url = Url::parse(url).map_err(|e| SinkError::InvalidEndpoint(format!("{url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SinkError::InvalidEndpoint(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }

        let http_client = Client::builder()
            .user_agent(concat!("flowdump-exporter/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            url,
            credentials,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl DeliverySink for HttpSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Http
    }

    #[instrument(skip(self, document), fields(url = %self.url))]
    async fn deliver(&self, document: &Value) -> Result<(), SinkError> {
        let mut request = self.http_client.post(self.url.clone()).json(document);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, credentials.password.as_deref());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status));
        }

        debug!(status = status.as_u16(), "document delivered");
        Ok(())
    }
}
