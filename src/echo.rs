//! TCP echo server and client (`tft simple-echo`), the tool behind the
//! SIMPLE test type.
//!
//! The client sends random chunks and verifies that each one comes back
//! unchanged. Both sides stop once the global duration expired, which counts
//! as success.

use std::future::Future;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_ADDR: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5201;
pub const DEFAULT_BUFSIZE: usize = 65495;
pub const DEFAULT_NUM_CLIENTS: usize = 1;

/// Longest the client keeps retrying a refused connection.
const CONNECT_RETRY_LIMIT: Duration = Duration::from_secs(60);
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(500);
/// The echo of a chunk must start arriving within the first timeout, and
/// complete within the second.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);
const RESPONSE_TIMEOUT_EXTRA: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum EchoError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not connect to {0}")]
    Connect(String),

    #[error("unexpected response. Timeout after {0:?} to receive a response")]
    ResponseTimeout(Duration),

    #[error("unexpected response. Connection closed by the server")]
    Closed,

    #[error("unexpected response. Expect an echo of the data we sent")]
    Mismatch,
}

fn io_err(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> EchoError {
    let context = context.into();
    move |source| EchoError::Io { context, source }
}

/// How a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOutcome {
    /// The server served `num_clients` clients.
    Completed,
    /// The duration expired.
    DurationExpired,
}

#[derive(Debug, Clone)]
pub struct EchoOptions {
    pub addr: String,
    pub port: u16,
    /// Zero runs forever.
    pub duration: Duration,
    /// Pause after each chunk.
    pub sleep: Duration,
    pub bufsize: usize,
    /// Server only. Zero accepts clients forever.
    pub num_clients: usize,
    /// Client only. Send printable ASCII instead of random bytes.
    pub echo_ascii: bool,
}

impl Default for EchoOptions {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            port: DEFAULT_PORT,
            duration: Duration::ZERO,
            sleep: Duration::from_millis(1),
            bufsize: DEFAULT_BUFSIZE,
            num_clients: DEFAULT_NUM_CLIENTS,
            echo_ascii: false,
        }
    }
}

/// Absolute end of a run, or none for an unlimited one.
#[derive(Debug, Clone, Copy)]
struct Deadline(Option<Instant>);

impl Deadline {
    fn after(start: Instant, duration: Duration) -> Self {
        Self((!duration.is_zero()).then(|| start + duration))
    }

    /// Run `f` unless the deadline passes first.
    async fn within<F: Future>(self, f: F) -> Option<F::Output> {
        match self.0 {
            None => Some(f.await),
            Some(at) => tokio::time::timeout_at(at, f).await.ok(),
        }
    }

    /// Sleep for `pause`, cut short by the deadline. False once expired.
    async fn sleep(self, pause: Duration) -> bool {
        if !pause.is_zero() {
            let _ = self.within(tokio::time::sleep(pause)).await;
        }
        self.0.map_or(true, |at| Instant::now() < at)
    }
}

pub async fn run_server(opts: &EchoOptions) -> Result<EchoOutcome, EchoError> {
    let start = Instant::now();
    let listener = TcpListener::bind((opts.addr.as_str(), opts.port))
        .await
        .map_err(io_err(format!("cannot listen on {}:{}", opts.addr, opts.port)))?;
    info!("server: listen on {}:{}", opts.addr, opts.port);
    serve(listener, opts, start).await
}

/// Accept and echo clients one at a time.
pub async fn serve(
    listener: TcpListener,
    opts: &EchoOptions,
    start: Instant,
) -> Result<EchoOutcome, EchoError> {
    let deadline = Deadline::after(start, opts.duration);
    let mut buf = vec![0u8; opts.bufsize.max(1)];
    let mut client_count = 0;
    loop {
        if opts.num_clients > 0 && client_count >= opts.num_clients {
            info!("server: number of clients {} reached. Quit", opts.num_clients);
            return Ok(EchoOutcome::Completed);
        }
        let Some(accepted) = deadline.within(listener.accept()).await else {
            return Ok(EchoOutcome::DurationExpired);
        };
        let (mut conn, peer) = accepted.map_err(io_err("accept failed"))?;
        client_count += 1;
        info!("server: new connection #{client_count} from {peer}");

        let mut chunks = 0u64;
        let mut total = 0usize;
        loop {
            let Some(read) = deadline.within(conn.read(&mut buf)).await else {
                info!("server: {chunks} chunks received and returned ({total} bytes) in total");
                return Ok(EchoOutcome::DurationExpired);
            };
            let n = read.unwrap_or(0);
            if n == 0 {
                info!("server: {chunks} chunks received and returned ({total} bytes) in total");
                info!("server: connection {peer} closed");
                break;
            }
            chunks += 1;
            total += n;
            match deadline.within(conn.write_all(&buf[..n])).await {
                None => return Ok(EchoOutcome::DurationExpired),
                Some(Err(e)) => {
                    debug!(error = %e, "server: write failed");
                    info!("server: connection {peer} closed");
                    break;
                }
                Some(Ok(())) => {}
            }
            if !deadline.sleep(opts.sleep).await {
                return Ok(EchoOutcome::DurationExpired);
            }
        }
    }
}

pub async fn run_client(opts: &EchoOptions) -> Result<EchoOutcome, EchoError> {
    let start = Instant::now();
    let deadline = Deadline::after(start, opts.duration);
    let target = format!("{}:{}", opts.addr, opts.port);
    info!("client: connecting to {target}");

    let retry_deadline = Deadline::after(start, opts.duration.min(CONNECT_RETRY_LIMIT));
    let mut first_attempt = true;
    let mut conn = loop {
        match deadline.within(TcpStream::connect(target.as_str())).await {
            None => return Ok(EchoOutcome::DurationExpired),
            Some(Ok(conn)) => break conn,
            Some(Err(e)) => {
                if first_attempt {
                    first_attempt = false;
                    info!(error = %e, "client: connection refused. Retry");
                }
                if !retry_deadline.sleep(CONNECT_RETRY_INTERVAL).await {
                    return Err(EchoError::Connect(target));
                }
            }
        }
    };
    info!("client: connected to {target}");

    let bufsize = opts.bufsize.max(1);
    let mut rng = StdRng::from_entropy();
    let mut sent = vec![0u8; bufsize];
    let mut received = vec![0u8; bufsize];
    let mut chunks = 0u64;
    let mut total = 0usize;
    loop {
        let len = rng.gen_range(1..=bufsize);
        let chunk = &mut sent[..len];
        if opts.echo_ascii {
            chunk.iter_mut().for_each(|b| *b = rng.sample(Alphanumeric));
        } else {
            rng.fill(chunk);
        }
        match deadline.within(conn.write_all(&sent[..len])).await {
            None => {
                info!("client: {chunks} chunks send and received ({total} bytes) in total");
                return Ok(EchoOutcome::DurationExpired);
            }
            Some(r) => r.map_err(io_err("send failed"))?,
        }
        chunks += 1;

        let mut got = 0;
        while got < len {
            let read = match tokio::time::timeout(RESPONSE_TIMEOUT, conn.read(&mut received[got..len])).await {
                Ok(r) => r,
                Err(_) => tokio::time::timeout(RESPONSE_TIMEOUT_EXTRA, conn.read(&mut received[got..len]))
                    .await
                    .map_err(|_| EchoError::ResponseTimeout(RESPONSE_TIMEOUT))?,
            };
            match read.map_err(io_err("receive failed"))? {
                0 => return Err(EchoError::Closed),
                n => got += n,
            }
        }
        if received[..len] != sent[..len] {
            return Err(EchoError::Mismatch);
        }
        total += len;
        if chunks % 10000 == 0 {
            info!("client: {chunks} chunks send and received ({total} bytes) for {target}");
        }
        if !deadline.sleep(opts.sleep).await {
            info!("client: {chunks} chunks send and received ({total} bytes) in total");
            return Ok(EchoOutcome::DurationExpired);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn listener() -> (TcpListener, u16) {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = l.local_addr().unwrap().port();
        (l, port)
    }

    fn opts(port: u16, duration_ms: u64) -> EchoOptions {
        EchoOptions {
            port,
            duration: Duration::from_millis(duration_ms),
            bufsize: 4096,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_echo_until_duration_expired() {
        let (l, port) = listener().await;
        let server_opts = opts(port, 3000);
        let server = tokio::spawn(async move { serve(l, &server_opts, Instant::now()).await });

        let client = run_client(&opts(port, 500)).await.unwrap();
        assert_eq!(client, EchoOutcome::DurationExpired);

        // The client went away and the server only accepts one.
        let server = server.await.unwrap().unwrap();
        assert_eq!(server, EchoOutcome::Completed);
    }

    #[tokio::test]
    async fn test_ascii_echo() {
        let (l, port) = listener().await;
        let server_opts = opts(port, 2000);
        tokio::spawn(async move { serve(l, &server_opts, Instant::now()).await });
        let mut client_opts = opts(port, 300);
        client_opts.echo_ascii = true;
        assert_eq!(
            run_client(&client_opts).await.unwrap(),
            EchoOutcome::DurationExpired
        );
    }

    #[tokio::test]
    async fn test_server_without_clients_expires() {
        let (l, _) = listener().await;
        let out = serve(l, &opts(0, 200), Instant::now()).await.unwrap();
        assert_eq!(out, EchoOutcome::DurationExpired);
    }

    #[tokio::test]
    async fn test_detects_mismatch() {
        let (l, port) = listener().await;
        tokio::spawn(async move {
            let (mut conn, _) = l.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            while let Ok(n) = conn.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                buf[..n].iter_mut().for_each(|b| *b ^= 0xff);
                if conn.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        });
        let err = run_client(&opts(port, 2000)).await.unwrap_err();
        assert!(matches!(err, EchoError::Mismatch));
    }

    #[tokio::test]
    async fn test_connect_gives_up() {
        let (l, port) = listener().await;
        drop(l);
        let err = run_client(&opts(port, 700)).await;
        // Either the retry window or the duration ends first.
        match err {
            Err(EchoError::Connect(_)) | Ok(EchoOutcome::DurationExpired) => {}
            other => panic!("unexpected {other:?}"),
        }
    }
}
