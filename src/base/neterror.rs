use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("Connect timed out")]
    ConnectionTimedOut,
    #[error("Read timed out")]
    ReadTimedOut,
    #[error("Tunnel connection failed")]
    TunnelConnectionFailed,
    #[error("Unsupported URL scheme for this transport")]
    UnsupportedScheme,

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Invalid header name or value")]
    InvalidHeader,
    #[error("Malformed status line")]
    MalformedStatusLine,
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Empty response")]
    EmptyResponse,
    #[error("Invalid chunked encoding")]
    InvalidChunkedEncoding,
    #[error("Content-Length mismatch")]
    ContentLengthMismatch,
    #[error("Too many redirects")]
    TooManyRedirects,
    #[error("Cannot retry streamed HTTP body")]
    CannotRetryStreamedBody,
    #[error("Received authentication challenge is null")]
    MissingAuthChallenge,
    #[error("Received HTTP 407 while not using a proxy")]
    UnexpectedProxyAuth,
    #[error("Content decoding failed")]
    ContentDecodingFailed,
    #[error("Response body exceeds the configured size limit")]
    BodyLengthExceeded,
    #[error("Request cannot be satisfied from cache (only-if-cached)")]
    UnsatisfiableRequest,
}

impl NetError {
    /// Map a transport-level I/O error to the closest protocol condition.
    pub fn from_io(error: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match error.kind() {
            ErrorKind::ConnectionReset => NetError::ConnectionReset,
            ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
            ErrorKind::NotConnected => NetError::SocketNotConnected,
            ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
            ErrorKind::TimedOut => NetError::ReadTimedOut,
            _ => NetError::ConnectionFailed,
        }
    }
}
