use async_trait::async_trait;
use metrix_common::cipher::{CipherError, PayloadEncryptor};
use metrix_common::codec::{gzip_compress, CodecError};
use metrix_common::signature::HashSigner;
use metrix_common::types::Metric;
use metrix_common::{HASH_HEADER, REAL_IP_HEADER};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::net::{IpAddr, UdpSocket};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{Instrument, Span};

/// Longest response body kept in an error or log line.
const MAX_BODY_LENGTH: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Compress(#[from] CodecError),

    #[error("failed to encrypt batch: {0}")]
    Encrypt(#[from] CipherError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("server answered {status} after {attempts} attempt(s): {body}")]
    Status {
        attempts: u32,
        status: u16,
        body: String,
    },

    #[error("request failed after {attempts} attempt(s): {source}")]
    Network {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("transport is closed")]
    Closed,
}

/// Delivers one chunk of metrics to the collector.
///
/// A call either delivers the whole chunk or fails as a whole; any retrying
/// happens inside the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_batch(&self, chunk: &[Metric]) -> Result<(), TransportError>;

    /// Releases pooled connections. Sends after `close` fail with
    /// [`TransportError::Closed`].
    async fn close(&self) {}
}

/// How often and how patiently a failed request is repeated.
///
/// The wait before retry `n` (0-based) is `base_delay + n * delay_step`.
/// The default gives 3 attempts in total with waits of 1 s and 3 s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub delay_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            delay_step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` tries with no wait in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            delay_step: Duration::ZERO,
        }
    }

    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay + self.delay_step * retry
    }
}

fn truncate_body(text: &str) -> String {
    if text.len() <= MAX_BODY_LENGTH {
        return text.to_string();
    }
    let mut end = MAX_BODY_LENGTH;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// `{address}/updates/`, defaulting to plain HTTP when no scheme is given.
pub fn batch_endpoint(address: &str) -> String {
    let base = address.trim().trim_end_matches('/');
    if base.contains("://") {
        format!("{base}/updates/")
    } else {
        format!("http://{base}/updates/")
    }
}

/// Outward-facing address of this host: the local end of a UDP route to a
/// public resolver. No packet is sent.
pub fn resolve_real_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}

/// JSON-over-HTTP transport posting gzipped batches to `/updates/`.
///
/// The body is serialized, gzipped, optionally encrypted, and the final bytes
/// are signed when a key is configured.
pub struct HttpTransport {
    client: Mutex<Option<reqwest::Client>>,
    endpoint: String,
    signer: HashSigner,
    encryptor: Option<PayloadEncryptor>,
    real_ip: Option<IpAddr>,
    retry: RetryPolicy,
    span: Span,
}

impl HttpTransport {
    pub fn new(address: &str, timeout: Duration, span: Span) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self {
            client: Mutex::new(Some(client)),
            endpoint: batch_endpoint(address),
            signer: HashSigner::default(),
            encryptor: None,
            real_ip: None,
            retry: RetryPolicy::default(),
            span,
        })
    }

    pub fn with_signer(mut self, signer: HashSigner) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_encryptor(mut self, encryptor: PayloadEncryptor) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    pub fn with_real_ip(mut self, ip: IpAddr) -> Self {
        self.real_ip = Some(ip);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Request body and its signature.
    fn encode(&self, chunk: &[Metric]) -> Result<(Vec<u8>, Option<String>), TransportError> {
        let json = serde_json::to_vec(chunk)?;
        let mut body = gzip_compress(&json)?;
        if let Some(encryptor) = &self.encryptor {
            body = encryptor.encrypt(&body)?;
        }
        let signature = self.signer.sign(&body);
        Ok((body, signature))
    }

    fn client(&self) -> Result<reqwest::Client, TransportError> {
        self.client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(TransportError::Closed)
    }

    async fn deliver(&self, chunk: &[Metric]) -> Result<(), TransportError> {
        let (body, signature) = self.encode(chunk)?;
        let client = self.client()?;
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut request = client
                .post(&self.endpoint)
                .header(CONTENT_TYPE, "application/json")
                .header(CONTENT_ENCODING, "gzip")
                .body(body.clone());
            if let Some(signature) = &signature {
                request = request.header(HASH_HEADER, signature);
            }
            if let Some(ip) = self.real_ip {
                request = request.header(REAL_IP_HEADER, ip.to_string());
            }

            let failure = match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let status = resp.status();
                    match resp.text().await {
                        Ok(text) => tracing::debug!(
                            attempt,
                            count = chunk.len(),
                            status = %status,
                            response = %truncate_body(&text),
                            "Batch delivered"
                        ),
                        Err(e) => tracing::debug!(
                            attempt,
                            count = chunk.len(),
                            error = %e,
                            "Batch delivered, response body unreadable"
                        ),
                    }
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = match resp.text().await {
                        Ok(text) => truncate_body(&text),
                        Err(_) => "[Failed to read response body]".to_string(),
                    };
                    TransportError::Status {
                        attempts: attempt,
                        status: status.as_u16(),
                        body,
                    }
                }
                Err(source) => TransportError::Network {
                    attempts: attempt,
                    source,
                },
            };

            if attempt >= max_attempts {
                return Err(failure);
            }
            let delay = self.retry.backoff(attempt - 1);
            tracing::warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Batch send failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_batch(&self, chunk: &[Metric]) -> Result<(), TransportError> {
        self.deliver(chunk).instrument(self.span.clone()).await
    }

    async fn close(&self) {
        let client = self
            .client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if client.is_some() {
            self.span.in_scope(|| tracing::info!(endpoint = %self.endpoint, "Transport closed"));
        }
    }
}
