use serde_json::Value;
use std::io::{self, Read};

/// Chunk size for reads without a declared length
const READ_CHUNK: usize = 8 * 1024;

/// Read the request body.
///
/// With a declared length, reads until exactly `declared` bytes arrived or the
/// stream ends early, whichever comes first; a single short read never ends
/// ingestion. Without one, reads to end of stream.
pub fn read_declared<R: Read + ?Sized>(
    reader: &mut R,
    declared: Option<u64>,
) -> io::Result<Vec<u8>> {
    match declared {
        Some(len) => {
            let mut buf = Vec::with_capacity(len.min(1 << 20) as usize);
            reader.take(len).read_to_end(&mut buf)?;
            Ok(buf)
        }
        None => {
            let mut buf = Vec::with_capacity(READ_CHUNK);
            reader.read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Decode bytes as single-byte Latin-1 text; every byte maps to one char.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Best-effort JSON parse of the decoded text. `None` on any failure,
/// including empty input.
pub fn parse_structured(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    serde_json::from_str(text).ok()
}
