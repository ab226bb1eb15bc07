use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::{debug, info};

use super::batch::ExportBatch;
use crate::types::CredentialProvider;

pub const BATCH_ID_HEADER: &str = "x-mcpwatch-batch-id";
pub const SERVICE_NAME_HEADER: &str = "x-mcpwatch-service-name";
pub const SERVICE_VERSION_HEADER: &str = "x-mcpwatch-service-version";

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("collector responded with status {0}")]
    Status(u16),
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("credential provider failed: {0}")]
    Credentials(String),
}

/// Delivers one sealed batch. Any `Err` counts as a failed attempt.
pub trait Exporter: Send + Sync {
    fn export<'a>(&'a self, batch: &'a ExportBatch) -> BoxFuture<'a, Result<(), ExportError>>;
}

/// POSTs batches as JSON arrays to a collector endpoint.
pub struct HttpExporter {
    client: Client,
    endpoint: Url,
    service_name: String,
    service_version: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpExporter {
    pub fn new(
        endpoint: Url,
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            service_name: service_name.into(),
            service_version: service_version.into(),
            credentials,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The exact request a delivery attempt sends.
    pub fn build_request(&self, batch: &ExportBatch) -> Result<reqwest::Request, ExportError> {
        let body = batch.to_json_bytes()?;
        let request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(BATCH_ID_HEADER, batch.id().to_string())
            .header(SERVICE_NAME_HEADER, self.service_name.as_str())
            .header(SERVICE_VERSION_HEADER, self.service_version.as_str())
            .body(body);
        let request = self.credentials.authorize(request)?;
        Ok(request.build()?)
    }
}

impl Exporter for HttpExporter {
    fn export<'a>(&'a self, batch: &'a ExportBatch) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            let request = self.build_request(batch)?;
            let response = self.client.execute(request).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ExportError::Status(status.as_u16()));
            }
            debug!(batch_id = %batch.id(), events = batch.len(), status = status.as_u16(), "Batch accepted by collector");
            Ok(())
        })
    }
}

/// Writes batches to the log instead of the network.
#[derive(Debug, Default, Clone)]
pub struct ConsoleExporter;

impl Exporter for ConsoleExporter {
    fn export<'a>(&'a self, batch: &'a ExportBatch) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            let body = serde_json::to_string(batch.events())?;
            info!(batch_id = %batch.id(), events = batch.len(), "{}", body);
            Ok(())
        })
    }
}
