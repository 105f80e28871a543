use crate::handler::{Handler, Reply};
use crate::server::ConnectionContext;
use std::path::{Component, Path, PathBuf};

/// File served for a request path ending in `/`
pub const INDEX_FILE: &str = "index.html";

/// Content type inferred from a file extension
pub fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
        .as_str()
    {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

/// Handler that answers every request with a file below `root`
///
/// It only sets the response's file override; the pipeline streams the file.
/// Paths that would leave `root` and missing files get `404`.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a URL path below the root. `None` for any `..`, root or prefix
    /// component.
    fn map_path(&self, url_path: &str) -> Option<PathBuf> {
        let mut pb = self.root.clone();
        for comp in Path::new(url_path.trim_start_matches('/')).components() {
            match comp {
                Component::Normal(s) => pb.push(s),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(pb)
    }

    /// The existing file a URL path refers to
    pub fn resolve(&self, url_path: &str) -> Option<PathBuf> {
        let decoded = urlencoding::decode(url_path).ok()?;
        let mut path = self.map_path(&decoded)?;
        if path.is_dir() {
            path.push(INDEX_FILE);
        }
        path.is_file().then_some(path)
    }
}

impl Handler for StaticFiles {
    fn handle(&self, ctx: &mut ConnectionContext) -> anyhow::Result<Reply> {
        match self.resolve(&ctx.request.path) {
            Some(path) => {
                ctx.log(format!("serving {}", path.display()));
                ctx.response.set_file_override(path);
                Ok(Reply::Empty)
            }
            None => {
                ctx.response.set_status(404);
                ctx.response.set_content_type("text/plain");
                Ok(Reply::text("not found"))
            }
        }
    }
}
