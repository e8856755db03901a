// Stream transport: an HTTP GET whose body is handed to the decoder as a blocking reader.
// The body is pumped by an async task into a bounded channel; the decoder side blocks on it.

use super::error::TransportError;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::io::{self, Read, Seek, SeekFrom};
use symphonia::core::io::MediaSource;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Body of a stream response, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Opens the byte stream behind a URL.
pub trait StreamFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<ByteStream, TransportError>>;
}

/// Plain GET over reqwest. No auth, no range requests.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl StreamFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<ByteStream, TransportError>> {
        let request = self.client.get(url);
        let url = url.to_string();

        async move {
            let response = request.send().await.map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status {
                    url,
                    status: status.as_u16(),
                });
            }

            debug!(%url, content_type = ?response.headers().get(reqwest::header::CONTENT_TYPE), "stream response received");

            let body = response
                .bytes_stream()
                .map_ok(|chunk| chunk.to_vec())
                .map_err(TransportError::Body);
            Ok(body.boxed())
        }
        .boxed()
    }
}

type Chunk = Result<Vec<u8>, TransportError>;

/// Blocking `Read` over a stream body. Not seekable: it only reports its position.
///
/// Must be read from a blocking context (`spawn_blocking` or a plain thread),
/// never from inside an async task.
pub struct StreamReader {
    // Mutex only to make the reader Sync for symphonia; reads go through get_mut.
    chunks: Mutex<mpsc::Receiver<Chunk>>,
    pending: Vec<u8>,
    offset: usize,
    position: u64,
}

impl StreamReader {
    /// Start pumping `body` into a new reader. The pump stops on cancellation,
    /// end of body, a body error, or when the reader is dropped.
    pub fn spawn(
        runtime: &Handle,
        body: ByteStream,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pump = runtime.spawn(pump(body, tx, cancel));
        (Self::from_receiver(rx), pump)
    }

    fn from_receiver(rx: mpsc::Receiver<Chunk>) -> Self {
        Self {
            chunks: Mutex::new(rx),
            pending: Vec::new(),
            offset: 0,
            position: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

async fn pump(mut body: ByteStream, tx: mpsc::Sender<Chunk>, cancel: CancellationToken) {
    let mut forwarded = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = body.next() => next,
        };
        let Some(chunk) = next else {
            debug!(bytes = forwarded, "stream body ended");
            break;
        };

        let failed = chunk.is_err();
        if let Ok(bytes) = &chunk {
            forwarded += bytes.len() as u64;
        }

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(chunk) => sent,
        };
        if sent.is_err() {
            // reader dropped, nobody wants the rest
            break;
        }
        if failed {
            warn!(bytes = forwarded, "stream body failed, stopping pump");
            break;
        }
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.offset >= self.pending.len() {
            match self.chunks.get_mut().blocking_recv() {
                Some(Ok(chunk)) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                Some(Err(err)) => return Err(io::Error::new(io::ErrorKind::Other, err)),
                None => return Ok(0),
            }
        }

        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for StreamReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "live streams cannot seek",
            )),
        }
    }
}

impl MediaSource for StreamReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn body_of(chunks: Vec<&'static [u8]>) -> ByteStream {
        stream::iter(chunks.into_iter().map(|c| Ok(c.to_vec()))).boxed()
    }

    async fn read_all(mut reader: StreamReader) -> io::Result<Vec<u8>> {
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            reader.read_to_end(&mut out)?;
            Ok(out)
        })
        .await
        .unwrap()
    }

    /// One-shot HTTP server answering every connection with `response`.
    async fn serve(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/main.mp3", addr)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reader_concatenates_chunks() {
        let cancel = CancellationToken::new();
        let body = body_of(vec![&b"ID3"[..], &b""[..], &b"\xff\xfb"[..], &b"tail"[..]]);
        let (reader, pump) = StreamReader::spawn(&Handle::current(), body, 2, cancel);

        let bytes = read_all(reader).await.unwrap();
        assert_eq!(bytes, b"ID3\xff\xfbtail");
        pump.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reader_surfaces_body_error() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(b"abc".to_vec())).await.unwrap();
        tx.send(Err(TransportError::Status {
            url: "http://x".into(),
            status: 502,
        }))
        .await
        .unwrap();

        let err = read_all(StreamReader::from_receiver(rx)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_stops_pump() {
        let cancel = CancellationToken::new();
        let body: ByteStream = stream::pending().boxed();
        let (reader, pump) = StreamReader::spawn(&Handle::current(), body, 1, cancel.clone());

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), pump)
            .await
            .expect("pump should exit on cancel")
            .unwrap();

        // sender is gone, so the reader sees end of stream
        assert!(read_all(reader).await.unwrap().is_empty());
    }

    #[test]
    fn test_reader_is_not_seekable() {
        let (_tx, rx) = mpsc::channel(1);
        let mut reader = StreamReader::from_receiver(rx);
        assert!(!reader.is_seekable());
        assert_eq!(reader.byte_len(), None);
        assert_eq!(reader.seek(SeekFrom::Current(0)).unwrap(), 0);
        assert_eq!(
            reader.seek(SeekFrom::Start(10)).unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_fetch_streams_body() {
        let url = serve("HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello").await;
        let fetcher = HttpFetcher::new(reqwest::Client::new());

        let body = fetcher.fetch(&url).await.unwrap();
        let chunks: Vec<Vec<u8>> = body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"hello");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_fetch_rejects_error_status() {
        let url = serve("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let fetcher = HttpFetcher::new(reqwest::Client::new());

        match fetcher.fetch(&url).await {
            Err(TransportError::Status { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected status error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_http_fetch_connection_refused() {
        // bind then drop to get a port nothing listens on
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let fetcher = HttpFetcher::new(reqwest::Client::new());

        let result = fetcher.fetch(&format!("http://{}/main.mp3", addr)).await;
        assert!(matches!(result, Err(TransportError::Request { .. })));
    }
}
