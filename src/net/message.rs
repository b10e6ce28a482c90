//! Request/response framing shared by HTTP/1.1 and RTSP/1.0

use super::HttpError;

/// Maximum accepted response size.
const MAX_RESPONSE: usize = 4 * 1024 * 1024;

/// Ordered, case-insensitive header collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for a name, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parsed `Content-Length`, when present.
    #[must_use]
    pub fn content_length(&self) -> Option<usize> {
        self.get("content-length").and_then(|v| v.trim().parse().ok())
    }

    /// True when `Transfer-Encoding: chunked` is declared.
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.get("transfer-encoding")
            .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    }

    /// Iterate over all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Headers {
    fn from(entries: [(&str, &str); N]) -> Self {
        Self(
            entries
                .into_iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Verb; RTSP adds `ANNOUNCE`, `SETUP`, `RECORD`, `FLUSH`,
    /// `TEARDOWN`, `GET_PARAMETER`, `SET_PARAMETER`, `FEEDBACK`
    pub method: String,
    /// Request target
    pub path: String,
    /// `HTTP/1.1` or `RTSP/1.0`
    pub protocol: String,
    /// Headers (`Content-Length` is added automatically)
    pub headers: Headers,
    /// Body bytes
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Create an HTTP/1.1 request.
    #[must_use]
    pub fn http(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            protocol: "HTTP/1.1".to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Create an RTSP/1.0 request.
    #[must_use]
    pub fn rtsp(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            protocol: "RTSP/1.0".to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Attach a body.
    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(
            format!("{} {} {}\r\n", self.method, self.path, self.protocol).as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        if !self.body.is_empty() && self.headers.get("content-length").is_none() {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// A parsed response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// `HTTP/1.1` or `RTSP/1.0`
    pub protocol: String,
    /// Status code
    pub code: u16,
    /// Reason phrase
    pub message: String,
    /// Response headers
    pub headers: Headers,
    /// Decoded body (chunked transfer already reassembled)
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// True for 2xx status codes.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_status_line(line: &str) -> Result<(String, u16, String), HttpError> {
    let mut parts = line.splitn(3, ' ');
    let protocol = parts
        .next()
        .filter(|p| p.starts_with("HTTP/") || p.starts_with("RTSP/"))
        .ok_or_else(|| HttpError::InvalidStatusLine(line.to_string()))?;
    let code = parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| HttpError::InvalidStatusLine(line.to_string()))?;
    let message = parts.next().unwrap_or("").to_string();
    Ok((protocol.to_string(), code, message))
}

fn decode_chunked(data: &[u8]) -> Result<Option<(Vec<u8>, usize)>, HttpError> {
    let mut body = Vec::new();
    let mut pos = 0;
    loop {
        let rest = &data[pos..];
        let Some(line_end) = find_subslice(rest, b"\r\n") else {
            return Ok(None);
        };
        let size_line = std::str::from_utf8(&rest[..line_end])
            .map_err(|_| HttpError::InvalidChunk)?
            .trim();
        let size_str = size_line.split(';').next().unwrap_or("");
        let size = usize::from_str_radix(size_str, 16).map_err(|_| HttpError::InvalidChunk)?;

        let chunk_start = pos + line_end + 2;
        let chunk_end = chunk_start + size;
        if chunk_end + 2 > data.len() {
            return Ok(None);
        }
        if size == 0 {
            return Ok(Some((body, chunk_end + 2)));
        }
        body.extend_from_slice(&data[chunk_start..chunk_end]);
        pos = chunk_end + 2;
    }
}

/// Try to parse one complete response from the start of `data`.
///
/// Returns the response and the number of consumed bytes, or `None`
/// when more data is needed.
///
/// # Errors
///
/// Returns [`HttpError`] on malformed framing or oversized responses.
pub fn parse_response(data: &[u8]) -> Result<Option<(HttpResponse, usize)>, HttpError> {
    if data.len() > MAX_RESPONSE {
        return Err(HttpError::ResponseTooLarge(data.len()));
    }
    let Some(header_end) = find_subslice(data, b"\r\n\r\n") else {
        return Ok(None);
    };

    let header_text = std::str::from_utf8(&data[..header_end])
        .map_err(|_| HttpError::InvalidHeader("non-UTF8 header block".to_string()))?;
    let mut lines = header_text.split("\r\n");
    let status_line = lines
        .next()
        .ok_or_else(|| HttpError::InvalidStatusLine(String::new()))?;
    let (protocol, code, message) = parse_status_line(status_line)?;

    let mut headers = Headers::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::InvalidHeader(line.to_string()))?;
        headers.set(name.trim(), value.trim());
    }

    let body_start = header_end + 4;
    let (body, consumed) = if headers.is_chunked() {
        match decode_chunked(&data[body_start..])? {
            Some((body, used)) => (body, body_start + used),
            None => return Ok(None),
        }
    } else {
        let length = headers.content_length().unwrap_or(0);
        if data.len() < body_start + length {
            return Ok(None);
        }
        (
            data[body_start..body_start + length].to_vec(),
            body_start + length,
        )
    };

    Ok(Some((
        HttpResponse {
            protocol,
            code,
            message,
            headers,
            body,
        },
        consumed,
    )))
}
