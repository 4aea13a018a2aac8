//! Request bodies and response transfer decoding.
//!
//! Responses are framed by one of four strategies (no body, fixed length,
//! chunked, read-until-close); [`drain_body`] decodes a framed body off a
//! buffered stream and reports whether the connection came out clean
//! enough to recycle.

use crate::base::neterror::NetError;
use crate::http::headers::{read_wire_line, HeaderTable};
use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Body attached to an outgoing request.
#[derive(Default)]
pub enum RequestBody {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// Fully buffered body; can be sent again on retry.
    Buffered(Bytes),
    /// Streamed body read once from the source. A request carrying one
    /// cannot be retried or redirected.
    Streamed {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        /// Declared length; `None` means chunked transfer encoding.
        length: Option<u64>,
    },
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// True if the body can be written a second time.
    pub fn is_replayable(&self) -> bool {
        !matches!(self, RequestBody::Streamed { .. })
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Buffered(Bytes::from(s))
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Buffered(Bytes::from(s.to_owned()))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Buffered(Bytes::from(v))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Buffered(b)
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Buffered(b) => f.debug_tuple("Buffered").field(&b.len()).finish(),
            RequestBody::Streamed { length, .. } => {
                f.debug_struct("Streamed").field("length", length).finish()
            }
        }
    }
}

/// How a response body is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDecoder {
    /// The response has no body by protocol rule.
    None,
    /// `Content-Length` bytes follow the headers.
    Fixed(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Body runs to connection close (HTTP/1.0 style).
    UntilClose,
}

impl TransferDecoder {
    /// Pick the framing for a response to `method` with these headers.
    pub fn from_response(method: &str, headers: &HeaderTable) -> Result<Self, NetError> {
        let status = headers.response_code()?;
        if method.eq_ignore_ascii_case("HEAD")
            || (100..200).contains(&status)
            || status == 204
            || status == 304
        {
            return Ok(TransferDecoder::None);
        }
        if headers
            .get("Transfer-Encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
        {
            return Ok(TransferDecoder::Chunked);
        }
        if let Some(length) = headers.get("Content-Length") {
            let length = length
                .trim()
                .parse::<u64>()
                .map_err(|_| NetError::InvalidResponse)?;
            return Ok(TransferDecoder::Fixed(length));
        }
        Ok(TransferDecoder::UntilClose)
    }
}

/// A fully drained response body.
#[derive(Debug)]
pub struct DrainedBody {
    pub bytes: Vec<u8>,
    /// True if the body ended exactly where its framing said it would,
    /// leaving the connection positioned for another exchange.
    pub connection_reusable: bool,
}

/// Read an entire framed body off `reader`.
///
/// `limit` bounds the decoded size; exceeding it fails with
/// [`NetError::BodyLengthExceeded`] rather than buffering without bound.
pub async fn drain_body<R>(
    reader: &mut R,
    decoder: TransferDecoder,
    limit: usize,
) -> Result<DrainedBody, NetError>
where
    R: AsyncBufRead + Unpin,
{
    match decoder {
        TransferDecoder::None => Ok(DrainedBody { bytes: Vec::new(), connection_reusable: true }),
        TransferDecoder::Fixed(length) => drain_fixed(reader, length, limit).await,
        TransferDecoder::Chunked => drain_chunked(reader, limit).await,
        TransferDecoder::UntilClose => drain_until_close(reader, limit).await,
    }
}

async fn drain_fixed<R>(reader: &mut R, length: u64, limit: usize) -> Result<DrainedBody, NetError>
where
    R: AsyncBufRead + Unpin,
{
    if length > limit as u64 {
        return Err(NetError::BodyLengthExceeded);
    }
    let mut bytes = vec![0u8; length as usize];
    reader.read_exact(&mut bytes).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            NetError::ContentLengthMismatch
        } else {
            NetError::from_io(&e)
        }
    })?;
    Ok(DrainedBody { bytes, connection_reusable: true })
}

async fn drain_chunked<R>(reader: &mut R, limit: usize) -> Result<DrainedBody, NetError>
where
    R: AsyncBufRead + Unpin,
{
    let mut bytes = Vec::new();
    loop {
        let size_line = read_wire_line(reader)
            .await?
            .ok_or(NetError::InvalidChunkedEncoding)?;
        // Chunk extensions after ';' are ignored.
        let size_token = size_line
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        let chunk_size = usize::from_str_radix(size_token, 16)
            .map_err(|_| NetError::InvalidChunkedEncoding)?;

        if chunk_size == 0 {
            // Trailers run to the blank line and are discarded.
            loop {
                match read_wire_line(reader).await? {
                    Some(line) if line.is_empty() => {
                        return Ok(DrainedBody { bytes, connection_reusable: true });
                    }
                    Some(_) => {}
                    None => return Err(NetError::InvalidChunkedEncoding),
                }
            }
        }

        if bytes.len() + chunk_size > limit {
            return Err(NetError::BodyLengthExceeded);
        }
        let start = bytes.len();
        bytes.resize(start + chunk_size, 0);
        reader
            .read_exact(&mut bytes[start..])
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => NetError::InvalidChunkedEncoding,
                _ => NetError::from_io(&e),
            })?;

        // The CRLF that terminates the chunk data.
        match read_wire_line(reader).await? {
            Some(line) if line.is_empty() => {}
            _ => return Err(NetError::InvalidChunkedEncoding),
        }
    }
}

async fn drain_until_close<R>(reader: &mut R, limit: usize) -> Result<DrainedBody, NetError>
where
    R: AsyncBufRead + Unpin,
{
    let mut bytes = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| NetError::from_io(&e))?;
        if n == 0 {
            // Close is the terminator; the connection is spent either way.
            return Ok(DrainedBody { bytes, connection_reusable: false });
        }
        if bytes.len() + n > limit {
            return Err(NetError::BodyLengthExceeded);
        }
        bytes.extend_from_slice(&chunk[..n]);
    }
}

/// Stream a request body as chunked transfer encoding. Returns the number
/// of payload bytes written.
pub async fn write_chunked<W, R>(writer: &mut W, reader: &mut R) -> Result<u64, NetError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut total = 0u64;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| NetError::from_io(&e))?;
        if n == 0 {
            writer
                .write_all(b"0\r\n\r\n")
                .await
                .map_err(|e| NetError::from_io(&e))?;
            return Ok(total);
        }
        let header = format!("{n:x}\r\n");
        writer
            .write_all(header.as_bytes())
            .await
            .map_err(|e| NetError::from_io(&e))?;
        writer
            .write_all(&chunk[..n])
            .await
            .map_err(|e| NetError::from_io(&e))?;
        writer
            .write_all(b"\r\n")
            .await
            .map_err(|e| NetError::from_io(&e))?;
        total += n as u64;
    }
}

/// Decompress a gzip-compressed body.
pub async fn gunzip(compressed: &[u8]) -> Result<Vec<u8>, NetError> {
    use async_compression::tokio::bufread::GzipDecoder;
    let mut decoder = GzipDecoder::new(compressed);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .await
        .map_err(|_| NetError::ContentDecodingFailed)?;
    Ok(decoded)
}
