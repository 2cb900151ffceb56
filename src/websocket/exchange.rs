//! Inbound HTTP exchange awaiting a protocol upgrade.

use http::{Request, Version};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::handshake::HandshakeError;

/// Upper bound on the size of a request head read by [`Exchange::read_from`].
pub const MAX_HEAD_LEN: usize = 8 * 1024;
/// Upper bound on the number of request headers.
pub const MAX_HEADERS: usize = 64;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// A parsed request head paired with the raw connection it arrived on.
///
/// The exchange is consumed by the handshake gate, so a connection can be
/// upgraded at most once and its response side is never reused afterwards.
#[derive(Debug)]
pub struct Exchange<S> {
    request: Request<()>,
    io: S,
}

impl<S> Exchange<S> {
    /// Pair an already parsed request head with its connection.
    #[must_use]
    pub const fn new(request: Request<()>, io: S) -> Self { Self { request, io } }

    /// The request head.
    #[must_use]
    pub const fn request(&self) -> &Request<()> { &self.request }

    /// Split the exchange into its request head and connection.
    #[must_use]
    pub fn into_parts(self) -> (Request<()>, S) { (self.request, self.io) }
}

impl<S> Exchange<S>
where
    S: AsyncRead + Unpin,
{
    /// Read and parse an HTTP/1.x request head from `io`.
    ///
    /// Bytes are consumed one at a time so nothing past the blank line that
    /// ends the head is taken from the connection.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::Io`] if the peer disconnects mid-head,
    /// [`HandshakeError::HeadTooLarge`] past [`MAX_HEAD_LEN`] bytes, or
    /// [`HandshakeError::MalformedRequest`] if the head does not parse.
    pub async fn read_from(mut io: S) -> Result<Self, HandshakeError> {
        let head = read_head(&mut io).await?;
        let request = parse_head(&head)?;
        Ok(Self { request, io })
    }
}

async fn read_head<S>(io: &mut S) -> Result<Vec<u8>, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(512);
    while !head.ends_with(HEAD_TERMINATOR) {
        if head.len() >= MAX_HEAD_LEN {
            return Err(HandshakeError::HeadTooLarge);
        }
        head.push(io.read_u8().await?);
    }
    Ok(head)
}

fn parse_head(head: &[u8]) -> Result<Request<()>, HandshakeError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    let status = parsed
        .parse(head)
        .map_err(|err| HandshakeError::MalformedRequest(err.to_string()))?;
    if status.is_partial() {
        return Err(HandshakeError::MalformedRequest(
            "incomplete request head".to_owned(),
        ));
    }
    let (Some(method), Some(path)) = (parsed.method, parsed.path) else {
        return Err(HandshakeError::MalformedRequest(
            "missing method or path".to_owned(),
        ));
    };
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let mut builder = Request::builder().method(method).uri(path).version(version);
    for header in parsed.headers.iter() {
        builder = builder.header(header.name, header.value);
    }
    builder
        .body(())
        .map_err(|err| HandshakeError::MalformedRequest(err.to_string()))
}
