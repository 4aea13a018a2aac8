//! Ordered, case-preserving HTTP header table.
//!
//! HTTP/1.1 header names are case-insensitive, but the wire order and the
//! original casing are preserved for transmission. Multiple entries with the
//! same name are legal (`Set-Cookie`); single-value lookup returns the
//! last-added entry so that the most recent `set`/`add` wins.

use crate::base::neterror::NetError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Ordered multimap of header fields plus the request or status line.
#[derive(Debug, Clone, Default)]
pub struct HeaderTable {
    status_line: Option<String>,
    entries: Vec<(String, String)>,
}

impl HeaderTable {
    pub fn new() -> Self {
        Self { status_line: None, entries: Vec::new() }
    }

    /// Set the request line (`GET / HTTP/1.1`) or status line
    /// (`HTTP/1.1 200 OK`).
    pub fn set_status_line(&mut self, line: impl Into<String>) {
        self.status_line = Some(line.into());
    }

    pub fn status_line(&self) -> Option<&str> {
        self.status_line.as_deref()
    }

    /// HTTP minor version from a `HTTP/1.x ...` status line. A response
    /// that isn't HTTP/1.x downgrades the client to 1.0 behavior.
    pub fn http_minor_version(&self) -> u8 {
        match self.status_line.as_deref() {
            Some(line) if line.starts_with("HTTP/1.1") => 1,
            _ => 0,
        }
    }

    /// Response code parsed from the status line.
    pub fn response_code(&self) -> Result<u16, NetError> {
        let line = self.status_line.as_deref().ok_or(NetError::MalformedStatusLine)?;
        if !line.starts_with("HTTP/") {
            return Err(NetError::MalformedStatusLine);
        }
        line.split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or(NetError::MalformedStatusLine)
    }

    /// Reason phrase from the status line, if any.
    pub fn response_message(&self) -> Option<&str> {
        let line = self.status_line.as_deref()?;
        let mut parts = line.splitn(3, ' ');
        parts.next()?;
        parts.next()?;
        parts.next()
    }

    /// Replace every entry named `name` with a single new entry.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.remove_all(name);
        self.entries.push((name.to_string(), value.into()));
    }

    /// Append an entry, keeping any existing entries with the same name.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((name.to_string(), value.into()));
    }

    /// Append an entry only if no entry with that name exists.
    pub fn add_if_absent(&mut self, name: &str, value: impl Into<String>) {
        if self.get(name).is_none() {
            self.add(name, value);
        }
    }

    /// Append several values under the same name.
    pub fn add_all(&mut self, name: &str, values: impl IntoIterator<Item = String>) {
        for value in values {
            self.add(name, value);
        }
    }

    /// Value of the last-added entry named `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value named `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Delete every entry named `name`.
    pub fn remove_all(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Render for wire transmission: status line, then `name: value\r\n`
    /// pairs in insertion order, then the terminating blank line.
    pub fn to_header_string(&self) -> String {
        let mut out = String::with_capacity(256);
        if let Some(line) = &self.status_line {
            out.push_str(line);
            out.push_str("\r\n");
        }
        for (name, value) in &self.entries {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }

    /// Read header lines (no status line) from `reader` until the blank
    /// line. A line without a colon is tolerated as an empty-named entry.
    pub async fn read_headers<R>(&mut self, reader: &mut R) -> Result<(), NetError>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            let line = match read_wire_line(reader).await? {
                Some(line) => line,
                None => return Err(NetError::ConnectionClosed),
            };
            if line.is_empty() {
                return Ok(());
            }
            match line.find(':') {
                Some(idx) => {
                    let name = line[..idx].trim().to_string();
                    let value = line[idx + 1..].trim().to_string();
                    self.entries.push((name, value));
                }
                None => self.entries.push((String::new(), line)),
            }
        }
    }
}

/// Read one `\r\n`- or `\n`-terminated line, decoded as Latin-1-tolerant
/// text. Returns `None` if the stream ended before any byte arrived.
pub(crate) async fn read_wire_line<R>(reader: &mut R) -> Result<Option<String>, NetError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(80);
    let n = reader
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|e| NetError::from_io(&e))?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    // Header bytes are ISO-8859-1; map each byte to the code point.
    Ok(Some(buf.iter().map(|&b| b as char).collect()))
}
