use std::time::Duration;

use tracing::warn;

use heatpump_common::OutboundDocument;

/// Outbound HTTP publisher. One document per request, best-effort: anything
/// that goes wrong is logged and the document is dropped, never retried.
#[derive(Clone)]
pub struct Collector {
    client: reqwest::Client,
}

impl Collector {
    pub fn new() -> anyhow::Result<Self> {
        // The collector sits on the local network; a slow endpoint must not
        // stall the tick loop for long.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self { client })
    }

    pub async fn publish(&self, url: &str, document: &OutboundDocument) {
        let result = self.client.post(url).json(&document.to_json()).send().await;
        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!("collector rejected publish: {}", response.status());
            }
            Err(err) => {
                warn!("collector publish failed: {err}");
            }
        }
    }
}
