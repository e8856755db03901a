// Now-playing status from the station API.
// Polled on a fixed interval; a failed tick is logged and the next one carries on.

use crate::context::RadioContext;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("status endpoint answered with HTTP {0}")]
    Status(u16),

    #[error("status document is malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RadioApi {
    main: MainStatus,
}

#[derive(Debug, Deserialize)]
struct MainStatus {
    #[serde(default)]
    np: String,
    #[serde(default)]
    listeners: i64,
    #[serde(default)]
    djname: String,
    #[serde(default)]
    start_time: Option<i64>,
    #[serde(default)]
    end_time: Option<i64>,
}

/// What the station says is on air.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NowPlaying {
    pub now_playing: String,
    pub listeners: i64,
    pub dj_name: String,
    pub start_time: Option<i64>, // unix seconds
    pub end_time: Option<i64>,
}

impl NowPlaying {
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        let api: RadioApi = serde_json::from_str(body)?;
        Ok(api.main.into())
    }

    /// Fraction of the current track elapsed at `now`, when the API gave both ends.
    pub fn progress_at(&self, now: i64) -> Option<f64> {
        let (start, end) = (self.start_time?, self.end_time?);
        if end <= start {
            return None;
        }
        let fraction = (now - start) as f64 / (end - start) as f64;
        Some(fraction.clamp(0.0, 1.0))
    }

    pub fn progress(&self) -> Option<f64> {
        self.progress_at(chrono::Utc::now().timestamp())
    }

    pub fn listeners_label(&self) -> String {
        format!("Listeners: {}", self.listeners)
    }

    pub fn dj_label(&self) -> String {
        format!("DJ: {}", self.dj_name)
    }
}

impl From<MainStatus> for NowPlaying {
    fn from(main: MainStatus) -> Self {
        Self {
            now_playing: main.np,
            listeners: main.listeners,
            dj_name: main.djname,
            start_time: main.start_time,
            end_time: main.end_time,
        }
    }
}

pub struct StatusPoller {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    sender: watch::Sender<Option<NowPlaying>>,
}

impl StatusPoller {
    /// The receiver holds `None` until the first successful fetch.
    pub fn new(
        context: &RadioContext,
        url: impl Into<String>,
        interval: Duration,
    ) -> (Self, watch::Receiver<Option<NowPlaying>>) {
        let (sender, receiver) = watch::channel(None);
        let poller = Self {
            client: context.http().clone(),
            url: url.into(),
            interval,
            sender,
        };
        (poller, receiver)
    }

    pub async fn fetch(&self) -> Result<NowPlaying, StatusError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StatusError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(NowPlaying::from_json(&body)?)
    }

    /// Fetch now, then every interval, until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        // first tick fires immediately, which gives us the eager startup fetch
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = self.fetch() => fetched,
            };
            match fetched {
                Ok(now_playing) => {
                    debug!(np = %now_playing.now_playing, listeners = now_playing.listeners, "status updated");
                    self.sender.send_replace(Some(now_playing));
                }
                Err(err) => warn!(url = %self.url, %err, "status poll failed"),
            }
        }
        debug!("status poller stopped");
    }

    pub fn spawn(self, runtime: &Handle, cancel: CancellationToken) -> JoinHandle<()> {
        runtime.spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{self, FakeDecoder, FakeFetcher, FakeOutput, FetchBehavior};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const STATUS: &str = r#"{"main":{"np":"Song A","listeners":42,"djname":"DJ X","start_time":1000,"end_time":1100}}"#;

    fn context() -> RadioContext {
        testing::context(
            FakeFetcher::new(FetchBehavior::Stall),
            FakeDecoder::new(),
            FakeOutput::default(),
        )
    }

    /// Serves `responses` in order, one per connection, repeating the last.
    async fn serve(responses: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let response = responses[n.min(responses.len() - 1)].clone();
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}/api", addr), hits)
    }

    fn http_ok(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    }

    fn http_error() -> String {
        "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    }

    #[test]
    fn test_parse_status_document() {
        let status = NowPlaying::from_json(STATUS).unwrap();
        assert_eq!(status.now_playing, "Song A");
        assert_eq!(status.listeners, 42);
        assert_eq!(status.dj_name, "DJ X");
        assert_eq!(status.listeners_label(), "Listeners: 42");
        assert_eq!(status.dj_label(), "DJ: DJ X");
    }

    #[test]
    fn test_progress_midway() {
        let status = NowPlaying::from_json(STATUS).unwrap();
        assert_eq!(status.progress_at(1050), Some(0.5));
    }

    #[test]
    fn test_progress_clamped_and_optional() {
        let status = NowPlaying::from_json(STATUS).unwrap();
        assert_eq!(status.progress_at(900), Some(0.0));
        assert_eq!(status.progress_at(2000), Some(1.0));

        let no_times = NowPlaying::from_json(r#"{"main":{"np":"x","listeners":1,"djname":"y"}}"#).unwrap();
        assert_eq!(no_times.progress_at(1050), None);

        let inverted = NowPlaying {
            start_time: Some(10),
            end_time: Some(10),
            ..Default::default()
        };
        assert_eq!(inverted.progress_at(10), None);
    }

    #[test]
    fn test_missing_fields_default() {
        let status = NowPlaying::from_json(r#"{"main":{}}"#).unwrap();
        assert_eq!(status, NowPlaying::default());
        assert!(NowPlaying::from_json(r#"{"np":"no main"}"#).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_over_http() {
        let (url, _) = serve(vec![http_ok(STATUS)]).await;
        let (poller, _rx) = StatusPoller::new(&context(), url, Duration::from_secs(5));

        let status = poller.fetch().await.unwrap();
        assert_eq!(status.now_playing, "Song A");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_errors_are_typed() {
        let (url, _) = serve(vec![http_error(), http_ok("{not json")]).await;
        let (poller, _rx) = StatusPoller::new(&context(), url, Duration::from_secs(5));

        assert!(matches!(poller.fetch().await, Err(StatusError::Status(500))));
        assert!(matches!(poller.fetch().await, Err(StatusError::Parse(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_poll_is_eager_and_survives_failures() {
        let (url, hits) = serve(vec![http_error(), http_ok(STATUS)]).await;
        let (poller, mut rx) = StatusPoller::new(&context(), url, Duration::from_millis(50));
        let cancel = CancellationToken::new();
        let task = poller.spawn(&Handle::current(), cancel.clone());

        // first tick failed, a later one lands
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.is_some()))
            .await
            .expect("status never arrived")
            .unwrap();
        assert!(hits.load(Ordering::SeqCst) >= 2);
        assert_eq!(rx.borrow().as_ref().unwrap().dj_name, "DJ X");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
