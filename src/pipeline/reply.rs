use crate::handler::Reply;
use crate::server::{ResponseState, ResponseView};
use crate::static_files::content_type;
use serde_json::Value;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// How the response body gets produced
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Stream a file's bytes
    FileResponse(PathBuf),
    /// Keep what the handler wrote to the stream
    AlreadyWritten,
    /// Send text verbatim
    RawText(String),
    /// Serialize a value to JSON
    StructuredValue(Value),
    /// No body
    Empty,
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::FileResponse(path) => write!(f, "file {}", path.display()),
            ResponseBody::AlreadyWritten => f.write_str("already written"),
            ResponseBody::RawText(_) => f.write_str("text"),
            ResponseBody::StructuredValue(_) => f.write_str("json"),
            ResponseBody::Empty => f.write_str("empty"),
        }
    }
}

/// Decide how the body is produced from the response state and the reply.
///
/// Priority: file override, then anything already written, then a non-empty
/// text or structured reply, then nothing. A [`Reply::File`] counts as a file
/// override.
pub fn resolve_body(state: &ResponseState, reply: Reply) -> ResponseBody {
    if let Some(path) = &state.file_override {
        return ResponseBody::FileResponse(path.clone());
    }
    if let Reply::File(path) = reply {
        return ResponseBody::FileResponse(path);
    }
    if state.written > 0 {
        return ResponseBody::AlreadyWritten;
    }
    if reply.is_empty() {
        return ResponseBody::Empty;
    }
    match reply {
        Reply::Text(text) => ResponseBody::RawText(text),
        Reply::Json(value) => ResponseBody::StructuredValue(value),
        _ => ResponseBody::Empty,
    }
}

/// Write the resolved body into the response.
///
/// # Errors
///
/// Fails when the override file cannot be read or a value cannot be
/// serialized; the response is left for the caller to turn into an error.
pub fn apply_body(response: &mut ResponseView, body: &ResponseBody) -> io::Result<()> {
    match body {
        ResponseBody::FileResponse(path) => {
            let bytes = std::fs::read(path)?;
            response.default_content_type(content_type(path));
            response.replace_body(bytes);
        }
        ResponseBody::RawText(text) => {
            response.default_content_type("text/html");
            response.replace_body(text.as_bytes().to_vec());
        }
        ResponseBody::StructuredValue(value) => {
            let bytes = serde_json::to_vec(value)?;
            response.default_content_type("application/json");
            response.replace_body(bytes);
        }
        ResponseBody::AlreadyWritten | ResponseBody::Empty => {}
    }
    Ok(())
}
