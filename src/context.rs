// Shared context handed to the player and the status poller.
// Owns what used to be process globals: the runtime handle, the HTTP client and the output device.

use crate::audio::output::{self, RodioOutput, SharedOutput};
use crate::audio::{HttpFetcher, Mp3Decoder, StreamDecoder, StreamFetcher};
use crate::config::NetworkConfig;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

#[derive(Clone)]
pub struct RadioContext {
    runtime: Handle,
    http: reqwest::Client,
    output: SharedOutput,
    fetcher: Arc<dyn StreamFetcher>,
    decoder: Arc<dyn StreamDecoder>,
}

impl RadioContext {
    /// Production wiring: reqwest for transport, symphonia for decode, rodio for output.
    pub fn new(runtime: Handle, network: &NetworkConfig) -> Result<Self> {
        // no overall timeout, the stream body never ends
        let http = reqwest::Client::builder()
            .user_agent(network.user_agent.clone())
            .connect_timeout(Duration::from_secs(network.connect_timeout_secs))
            .build()?;

        Ok(Self::from_parts(
            runtime,
            http.clone(),
            output::shared(RodioOutput::new()),
            Arc::new(HttpFetcher::new(http)),
            Arc::new(Mp3Decoder),
        ))
    }

    pub fn from_parts(
        runtime: Handle,
        http: reqwest::Client,
        output: SharedOutput,
        fetcher: Arc<dyn StreamFetcher>,
        decoder: Arc<dyn StreamDecoder>,
    ) -> Self {
        Self {
            runtime,
            http,
            output,
            fetcher,
            decoder,
        }
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn output(&self) -> &SharedOutput {
        &self.output
    }

    pub fn fetcher(&self) -> &Arc<dyn StreamFetcher> {
        &self.fetcher
    }

    pub fn decoder(&self) -> &Arc<dyn StreamDecoder> {
        &self.decoder
    }
}
