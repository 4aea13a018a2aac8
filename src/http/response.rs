//! The response handed back to callers.

use crate::base::neterror::NetError;
use crate::http::cachepolicy::ResponseSource;
use crate::http::headers::HeaderTable;
use bytes::Bytes;

/// A completed HTTP exchange: status, headers, and the fully received,
/// already-decoded body. Transfer framing and transparent gzip are gone
/// by the time a response exists.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    headers: HeaderTable,
    body: Bytes,
    source: ResponseSource,
}

impl HttpResponse {
    pub(crate) fn new(headers: HeaderTable, body: Bytes, source: ResponseSource) -> Self {
        let status = headers.response_code().unwrap_or(0);
        Self { status, headers, body, source }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Reason phrase from the status line, if the server sent one.
    pub fn message(&self) -> Option<&str> {
        self.headers.response_message()
    }

    pub fn headers(&self) -> &HeaderTable {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Where this response came from: the network, the cache, or a
    /// revalidated cache entry.
    pub fn source(&self) -> ResponseSource {
        self.source
    }

    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|_| NetError::ContentDecodingFailed)
    }

    #[cfg(feature = "json")]
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|_| NetError::ContentDecodingFailed)
    }

    pub fn content_length(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(status_line: &str, body: &str) -> HttpResponse {
        let mut headers = HeaderTable::new();
        headers.set_status_line(status_line);
        HttpResponse::new(headers, Bytes::from(body.to_owned()), ResponseSource::Network)
    }

    #[test]
    fn test_accessors() {
        let response = make("HTTP/1.1 200 OK", "hello");
        assert_eq!(response.status(), 200);
        assert!(response.is_success());
        assert_eq!(response.message(), Some("OK"));
        assert_eq!(response.text().unwrap(), "hello");
        assert_eq!(response.content_length(), 5);
        assert_eq!(response.source(), ResponseSource::Network);
    }

    #[test]
    fn test_invalid_utf8_text() {
        let mut headers = HeaderTable::new();
        headers.set_status_line("HTTP/1.1 200 OK");
        let response = HttpResponse::new(
            headers,
            Bytes::from_static(&[0xff, 0xfe]),
            ResponseSource::Network,
        );
        assert_eq!(response.text(), Err(NetError::ContentDecodingFailed));
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json() {
        #[derive(serde::Deserialize)]
        struct Payload {
            value: u32,
        }
        let response = make("HTTP/1.1 200 OK", "{\"value\": 7}");
        let payload: Payload = response.json().unwrap();
        assert_eq!(payload.value, 7);
    }
}
