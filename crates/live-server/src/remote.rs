//! Remote-write sink for deployments without an outbound HTTP client.

use async_trait::async_trait;
use tenvis_live_core::{RemoteWriteError, RemoteWriteRequest, RemoteWriter};
use tracing::info;

/// Logs each remote write instead of sending it.
#[derive(Debug, Default)]
pub struct LoggingRemoteWriter;

#[async_trait]
impl RemoteWriter for LoggingRemoteWriter {
    async fn write(&self, request: RemoteWriteRequest) -> Result<(), RemoteWriteError> {
        info!(
            org_id = request.org_id,
            channel = %request.channel,
            endpoint = %request.endpoint,
            authenticated = request.password.is_some(),
            bytes = request.data.len(),
            "Remote write"
        );
        Ok(())
    }
}
