//! Handshake gate that upgrades an HTTP exchange to a WebSocket stream.
//!
//! Acceptance follows the usual RFC 6455 server checks plus a same-origin
//! policy by default. Rejections are silent: unless an [`Upgrader`] opts in
//! with [`Upgrader::with_error_responses`], nothing is written back to the
//! peer and the caller only observes the returned [`HandshakeError`]. Older
//! clients do not expect an error body on a failed upgrade.

use std::{fmt, io, sync::Arc, time::Duration};

use http::{HeaderMap, Method, Request, StatusCode, header};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        handshake::derive_accept_key,
        protocol::{Role, WebSocketConfig},
    },
};
use tracing::{debug, warn};
use url::Url;

use super::exchange::Exchange;

/// Read and write buffer size used by the upgrade entry point.
pub const DEFAULT_BUFFER_SIZE: usize = 10_240;
/// Time allowed for a client to send its request head and complete the
/// upgrade.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const WEBSOCKET_VERSION: &[u8] = b"13";
const CHALLENGE_KEY_LEN: usize = 24;

/// Errors raised while reading or upgrading an exchange.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// A buffer size of zero was configured.
    #[error("buffer sizes must be positive (read {read}, write {write})")]
    InvalidBufferSize {
        /// Requested read buffer size.
        read: usize,
        /// Requested write buffer size.
        write: usize,
    },
    /// The request head could not be parsed.
    #[error("malformed request head: {0}")]
    MalformedRequest(String),
    /// The request head exceeded the size limit.
    #[error("request head exceeds 8 KiB")]
    HeadTooLarge,
    /// The `Connection` header lacks the `upgrade` token.
    #[error("websocket: 'upgrade' token not found in 'Connection' header")]
    MissingConnectionUpgrade,
    /// The `Upgrade` header lacks the `websocket` token.
    #[error("websocket: 'websocket' token not found in 'Upgrade' header")]
    MissingUpgradeWebsocket,
    /// The request method is not `GET`.
    #[error("websocket: request method is not GET")]
    MethodNotAllowed,
    /// The client speaks a WebSocket version other than 13.
    #[error("websocket: unsupported version: 13 not found in 'Sec-Websocket-Version' header")]
    UnsupportedVersion,
    /// The origin policy refused the request.
    #[error("websocket: request origin {0:?} not allowed")]
    OriginRejected(String),
    /// `Sec-WebSocket-Key` is missing or is not a 16-byte base64 nonce.
    #[error("websocket: 'Sec-WebSocket-Key' header is missing or invalid")]
    InvalidKey,
    /// The client did not complete the handshake in time.
    #[error("handshake timed out")]
    TimedOut,
    /// I/O failure while reading the request or writing the response.
    #[error("I/O error during handshake: {0}")]
    Io(#[from] io::Error),
}

impl HandshakeError {
    /// HTTP status an upgrade library would answer this failure with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::OriginRejected(_) => StatusCode::FORBIDDEN,
            Self::HeadTooLarge => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            Self::TimedOut => StatusCode::REQUEST_TIMEOUT,
            Self::InvalidBufferSize { .. } | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MalformedRequest(_)
            | Self::MissingConnectionUpgrade
            | Self::MissingUpgradeWebsocket
            | Self::UnsupportedVersion
            | Self::InvalidKey => StatusCode::BAD_REQUEST,
        }
    }
}

/// Read and write buffer sizes for an upgraded connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    read: usize,
    write: usize,
}

impl BufferConfig {
    /// Create a buffer configuration from positive sizes.
    ///
    /// # Errors
    /// Returns [`HandshakeError::InvalidBufferSize`] when either size is zero.
    pub const fn new(read: usize, write: usize) -> Result<Self, HandshakeError> {
        if read == 0 || write == 0 {
            return Err(HandshakeError::InvalidBufferSize { read, write });
        }
        Ok(Self { read, write })
    }

    /// Return the read buffer size.
    #[must_use]
    pub const fn read_buffer_size(&self) -> usize { self.read }

    /// Return the write buffer size.
    #[must_use]
    pub const fn write_buffer_size(&self) -> usize { self.write }

    fn websocket_config(self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.read_buffer_size = self.read;
        config.write_buffer_size = self.write;
        config
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            read: DEFAULT_BUFFER_SIZE,
            write: DEFAULT_BUFFER_SIZE,
        }
    }
}

type OriginPolicy = Arc<dyn Fn(&Request<()>) -> bool + Send + Sync>;

/// Upgrade policy applied to inbound exchanges.
#[derive(Clone, Default)]
pub struct Upgrader {
    buffers: BufferConfig,
    check_origin: Option<OriginPolicy>,
    write_error_response: bool,
}

impl fmt::Debug for Upgrader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgrader")
            .field("buffers", &self.buffers)
            .field("custom_origin_policy", &self.check_origin.is_some())
            .field("write_error_response", &self.write_error_response)
            .finish()
    }
}

impl Upgrader {
    /// Create an upgrader with the given buffer sizes, the same-origin
    /// policy and silent rejections.
    #[must_use]
    pub fn new(buffers: BufferConfig) -> Self {
        Self {
            buffers,
            ..Self::default()
        }
    }

    /// Replace the same-origin check with a custom policy.
    #[must_use]
    pub fn with_origin_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(&Request<()>) -> bool + Send + Sync + 'static,
    {
        self.check_origin = Some(Arc::new(policy));
        self
    }

    /// Choose whether rejected upgrades receive an HTTP error response.
    #[must_use]
    pub const fn with_error_responses(mut self, enabled: bool) -> Self {
        self.write_error_response = enabled;
        self
    }

    /// Return the configured buffer sizes.
    #[must_use]
    pub const fn buffers(&self) -> BufferConfig { self.buffers }

    /// Validate the exchange and switch it to the WebSocket protocol.
    ///
    /// On success the `101 Switching Protocols` response has been written
    /// and the connection now carries WebSocket frames only.
    ///
    /// # Errors
    /// Returns the first validation failure, or [`HandshakeError::Io`] if
    /// the response cannot be written.
    pub async fn upgrade<S>(&self, exchange: Exchange<S>) -> Result<WebSocketStream<S>, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (request, mut io) = exchange.into_parts();
        let key = match self.validate(&request) {
            Ok(key) => key,
            Err(error) => {
                warn!(%error, status = %error.status(), "rejecting websocket upgrade");
                if self.write_error_response {
                    write_error_response(&mut io, &error).await;
                }
                return Err(error);
            }
        };

        let response = switching_protocols(&derive_accept_key(key.as_bytes()));
        io.write_all(response.as_bytes()).await?;
        io.flush().await?;
        debug!(uri = %request.uri(), "websocket upgrade complete");

        Ok(WebSocketStream::from_raw_socket(io, Role::Server, Some(self.buffers.websocket_config())).await)
    }

    fn validate(&self, request: &Request<()>) -> Result<String, HandshakeError> {
        let headers = request.headers();
        if !header_has_token(headers, &header::CONNECTION, "upgrade") {
            return Err(HandshakeError::MissingConnectionUpgrade);
        }
        if !header_has_token(headers, &header::UPGRADE, "websocket") {
            return Err(HandshakeError::MissingUpgradeWebsocket);
        }
        if request.method() != Method::GET {
            return Err(HandshakeError::MethodNotAllowed);
        }
        if !headers
            .get(header::SEC_WEBSOCKET_VERSION)
            .is_some_and(|value| value.as_bytes() == WEBSOCKET_VERSION)
        {
            return Err(HandshakeError::UnsupportedVersion);
        }
        let allowed = self
            .check_origin
            .as_ref()
            .map_or_else(|| same_origin(request), |policy| policy(request));
        if !allowed {
            let origin = headers
                .get(header::ORIGIN)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_owned();
            return Err(HandshakeError::OriginRejected(origin));
        }
        headers
            .get(header::SEC_WEBSOCKET_KEY)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|key| is_valid_challenge_key(key))
            .map(ToOwned::to_owned)
            .ok_or(HandshakeError::InvalidKey)
    }
}

fn header_has_token(headers: &HeaderMap, name: &header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}

/// Accept requests without an `Origin` header, or whose origin host matches
/// the `Host` header.
fn same_origin(request: &Request<()>) -> bool {
    let Some(origin) = request.headers().get(header::ORIGIN) else {
        return true;
    };
    let Some(origin) = origin.to_str().ok().and_then(|value| Url::parse(value).ok()) else {
        return false;
    };
    let Some(host) = origin.host_str() else {
        return false;
    };
    let Some(request_host) = request_host(request) else {
        return false;
    };
    // `Url` drops a default port, so restore it when `Host` names one.
    let port = if has_port(request_host) {
        origin.port_or_known_default()
    } else {
        origin.port()
    };
    let origin_host = match port {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };
    request_host.eq_ignore_ascii_case(&origin_host)
}

fn has_port(authority: &str) -> bool {
    authority
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}

fn request_host(request: &Request<()>) -> Option<&str> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().authority().map(http::uri::Authority::as_str))
}

/// A challenge key is the base64 form of a 16-byte nonce: 22 significant
/// characters followed by `==`.
fn is_valid_challenge_key(key: &str) -> bool {
    key.len() == CHALLENGE_KEY_LEN
        && key.ends_with("==")
        && key
            .bytes()
            .take(CHALLENGE_KEY_LEN - 2)
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

fn switching_protocols(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

async fn write_error_response<S>(io: &mut S, error: &HandshakeError)
where
    S: AsyncWrite + Unpin,
{
    let status = error.status();
    let body = status.canonical_reason().unwrap_or_default();
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nSec-Websocket-Version: 13\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(io_error) = io.write_all(response.as_bytes()).await {
        debug!(error = %io_error, "failed to write handshake error response");
    }
}
