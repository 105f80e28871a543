use http::Method;
use serde_json::Value;
use smallvec::SmallVec;
use std::fmt;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;

/// Maximum inline headers before heap allocation
pub const MAX_INLINE_HEADERS: usize = 16;
/// Maximum inline query parameters before heap allocation
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated header storage; names are shared `Arc<str>`
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;
/// Stack-allocated query parameter storage
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Streaming source of the request body
pub type BodyReader = Box<dyn Read + Send>;

/// The request half of a connection
///
/// Method, URL and headers come from the listener. The three body fields
/// (`body`, `body_text`, `body_json`) stay `None` until the pipeline ingests
/// the body, and remain `None` when ingestion is skipped.
pub struct RequestView {
    /// HTTP method (GET, POST, etc.)
    pub method: Method,
    /// Raw request target including the query string
    pub url: String,
    /// Path portion of the URL
    pub path: String,
    /// Parsed query string parameters
    pub query_params: ParamVec,
    /// HTTP headers (lowercase names)
    pub headers: HeaderVec,
    /// Client endpoint, when the transport knows it
    pub remote_addr: Option<SocketAddr>,
    /// Declared `Content-Length`, if any
    pub content_length: Option<u64>,
    /// Raw body bytes
    pub body: Option<Vec<u8>>,
    /// Body decoded as single-byte text
    pub body_text: Option<String>,
    /// Body parsed as JSON; `None` when it does not parse
    pub body_json: Option<Value>,
    body_reader: Option<BodyReader>,
}

impl fmt::Debug for RequestView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestView")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("remote_addr", &self.remote_addr)
            .field("content_length", &self.content_length)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("body_json", &self.body_json)
            .finish()
    }
}

impl RequestView {
    /// Create a request view for `method url` with no headers and no body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let url = url.into();
        let path = url.split('?').next().unwrap_or("/").to_string();
        let query_params = parse_query_params(&url);
        Self {
            method,
            url,
            path,
            query_params,
            headers: HeaderVec::new(),
            remote_addr: None,
            content_length: None,
            body: None,
            body_text: None,
            body_json: None,
            body_reader: None,
        }
    }

    /// Add a header; names are stored lowercase.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .push((Arc::from(name.to_ascii_lowercase()), value.into()));
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Attach the body stream and its declared length.
    pub fn with_body_reader(mut self, reader: BodyReader, content_length: Option<u64>) -> Self {
        self.body_reader = Some(reader);
        self.content_length = content_length;
        self
    }

    /// Convenience for in-memory bodies: the declared length is the byte count.
    pub fn with_body_bytes(self, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as u64;
        self.with_body_reader(Box::new(std::io::Cursor::new(bytes)), Some(len))
    }

    /// Hand out the body stream. Returns `None` on every call after the first,
    /// so the body can be read at most once.
    pub fn take_body_reader(&mut self) -> Option<BodyReader> {
        self.body_reader.take()
    }

    /// Whether the body stream is still unread
    pub fn has_unread_body(&self) -> bool {
        self.body_reader.is_some()
    }

    /// Get a header by name (case-insensitive)
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get a query parameter by name (last occurrence wins)
    #[inline]
    #[must_use]
    pub fn get_query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse query string parameters from a URL
///
/// Extracts everything after the `?` character and URL-decodes names and values.
pub fn parse_query_params(url: &str) -> ParamVec {
    match url.split_once('?') {
        Some((_, query)) => url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (Arc::from(&*k), v.into_owned()))
            .collect(),
        None => ParamVec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_params() {
        let q = parse_query_params("/p?x=1&y=hello%20world");
        assert_eq!(q.len(), 2);
        assert_eq!(q[1].1, "hello world");
        assert!(parse_query_params("/p").is_empty());
    }

    #[test]
    fn test_request_view_path_and_query() {
        let req = RequestView::new(Method::GET, "/users?limit=10&limit=20");
        assert_eq!(req.path, "/users");
        assert_eq!(req.get_query_param("limit"), Some("20"));
    }

    #[test]
    fn test_headers_case_insensitive() {
        let req = RequestView::new(Method::GET, "/").with_header("X-Trace", "abc");
        assert_eq!(req.get_header("x-trace"), Some("abc"));
        assert_eq!(req.get_header("X-TRACE"), Some("abc"));
    }

    #[test]
    fn test_body_reader_taken_once() {
        let mut req = RequestView::new(Method::POST, "/").with_body_bytes("hi");
        assert_eq!(req.content_length, Some(2));
        assert!(req.take_body_reader().is_some());
        assert!(req.take_body_reader().is_none());
        assert!(!req.has_unread_body());
    }
}
