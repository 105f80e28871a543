use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Final bytes and metadata handed to the transport on close
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseParts {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: Vec<u8>,
}

/// Transport side of a response
///
/// `finish` consumes the sink, so a sink can be finished at most once.
pub trait ResponseSink: Send {
    fn finish(self: Box<Self>, parts: ResponseParts) -> io::Result<()>;
}

/// Snapshot of the fields body resolution depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseState {
    pub file_override: Option<PathBuf>,
    pub written: usize,
    pub content_type: Option<String>,
}

/// The response half of a connection
///
/// Handlers write into the buffered output stream through [`io::Write`], set
/// status and headers, or point `file_override` at a file to send instead of
/// any return value. [`ResponseView::close`] hands everything to the transport
/// exactly once; a view dropped without being closed closes itself.
pub struct ResponseView {
    status: u16,
    headers: Vec<(String, String)>,
    content_type: Option<String>,
    content_length: Option<u64>,
    file_override: Option<PathBuf>,
    output: Vec<u8>,
    sink: Option<Box<dyn ResponseSink>>,
}

impl fmt::Debug for ResponseView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseView")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("file_override", &self.file_override)
            .field("written", &self.output.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ResponseView {
    pub fn new(sink: Box<dyn ResponseSink>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            content_type: None,
            content_length: None,
            file_override: None,
            output: Vec::new(),
            sink: Some(sink),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// Add or replace a header (case-insensitive name match).
    ///
    /// `Content-Type` is routed to [`ResponseView::set_content_type`] and
    /// `Content-Length` to [`ResponseView::set_content_length`]; an
    /// unparseable length is ignored. Neither lands in the header list.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        if name.eq_ignore_ascii_case("content-type") {
            self.set_content_type(value);
            return;
        }
        if name.eq_ignore_ascii_case("content-length") {
            if let Ok(length) = value.into().trim().parse() {
                self.set_content_length(length);
            }
            return;
        }
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("content-type") {
            return self.content_type();
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, value: impl Into<String>) {
        self.content_type = Some(value.into());
    }

    /// Set the content type only when none has been chosen yet.
    pub fn default_content_type(&mut self, value: &str) {
        if self.content_type.is_none() {
            self.content_type = Some(value.to_string());
        }
    }

    /// Declared body length. Replaced whenever the body is rewritten.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn set_content_length(&mut self, length: u64) {
        self.content_length = Some(length);
    }

    pub fn file_override(&self) -> Option<&Path> {
        self.file_override.as_deref()
    }

    /// Send this file instead of anything the handler returns.
    pub fn set_file_override(&mut self, path: impl Into<PathBuf>) {
        self.file_override = Some(path.into());
    }

    pub fn clear_file_override(&mut self) {
        self.file_override = None;
    }

    /// Bytes written to the output stream so far
    pub fn written(&self) -> usize {
        self.output.len()
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn state(&self) -> ResponseState {
        ResponseState {
            file_override: self.file_override.clone(),
            written: self.output.len(),
            content_type: self.content_type.clone(),
        }
    }

    /// Replace the output stream with `body` and record its length.
    pub fn replace_body(&mut self, body: Vec<u8>) {
        self.content_length = Some(body.len() as u64);
        self.output = body;
    }

    /// Append to the output stream and record the resulting length.
    pub fn write_body(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
        self.content_length = Some(self.output.len() as u64);
    }

    /// Turn the response into a bare error: status set, body and overrides gone.
    pub fn fail(&mut self, status: u16) {
        self.status = status;
        self.output.clear();
        self.content_type = None;
        self.content_length = Some(0);
        self.file_override = None;
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_none()
    }

    /// Hand the response to the transport.
    ///
    /// Returns `Ok(true)` on the closing call and `Ok(false)` on any later call.
    pub fn close(&mut self) -> io::Result<bool> {
        let Some(sink) = self.sink.take() else {
            return Ok(false);
        };
        let parts = ResponseParts {
            status: self.status,
            headers: std::mem::take(&mut self.headers),
            content_type: self.content_type.clone(),
            content_length: self.content_length,
            body: std::mem::take(&mut self.output),
        };
        sink.finish(parts)?;
        Ok(true)
    }
}

impl io::Write for ResponseView {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "response already closed",
            ));
        }
        self.write_body(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ResponseView {
    fn drop(&mut self) {
        if !self.is_closed() {
            // Nothing left to report the error to
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<ResponseParts>>>);

    impl ResponseSink for Capture {
        fn finish(self: Box<Self>, parts: ResponseParts) -> io::Result<()> {
            self.0.lock().unwrap().push(parts);
            Ok(())
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let capture = Capture::default();
        let mut res = ResponseView::new(Box::new(capture.clone()));
        write!(res, "hello").unwrap();
        assert!(res.close().unwrap());
        assert!(!res.close().unwrap());
        drop(res);
        let parts = capture.0.lock().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].body, b"hello");
    }

    #[test]
    fn test_drop_closes_unclosed_response() {
        let capture = Capture::default();
        {
            let mut res = ResponseView::new(Box::new(capture.clone()));
            res.set_status(204);
        }
        let parts = capture.0.lock().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].status, 204);
    }

    #[test]
    fn test_write_after_close_fails() {
        let mut res = ResponseView::new(Box::new(Capture::default()));
        res.close().unwrap();
        assert!(res.write_all(b"late").is_err());
    }

    #[test]
    fn test_content_type_header_routing() {
        let mut res = ResponseView::new(Box::new(Capture::default()));
        res.set_header("Content-Type", "text/plain");
        assert_eq!(res.content_type(), Some("text/plain"));
        res.default_content_type("text/html");
        assert_eq!(res.header("content-type"), Some("text/plain"));
        res.set_header("X-One", "1");
        res.set_header("x-one", "2");
        assert_eq!(res.header("X-ONE"), Some("2"));
    }

    #[test]
    fn test_content_length_header_routing() {
        let mut res = ResponseView::new(Box::new(Capture::default()));
        res.set_header("Content-Length", "3");
        assert_eq!(res.content_length(), Some(3));
        assert!(res.header("content-length").is_none());
        res.set_header("content-length", "lots");
        assert_eq!(res.content_length(), Some(3));
        res.fail(500);
        assert_eq!(res.content_length(), Some(0));
    }

    #[test]
    fn test_fail_discards_output() {
        let mut res = ResponseView::new(Box::new(Capture::default()));
        res.write_body(b"partial secrets");
        res.set_file_override("/etc/passwd");
        res.fail(500);
        assert_eq!(res.status(), 500);
        assert_eq!(res.written(), 0);
        assert!(res.file_override().is_none());
    }
}
