//! Built-in handlers used by the `parley` binary.

use crate::handler::Reply;
use crate::server::ConnectionContext;
use serde_json::{json, Map, Value};

/// Echoes the request back as JSON.
pub fn echo_handler(ctx: &mut ConnectionContext) -> anyhow::Result<Reply> {
    let request = &ctx.request;
    let headers: Map<String, Value> = request
        .headers
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
        .collect();
    let query: Map<String, Value> = request
        .query_params
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
        .collect();

    Ok(Reply::Json(json!({
        "connection": ctx.id,
        "method": request.method.as_str(),
        "path": request.path,
        "query": query,
        "headers": headers,
        "identity": ctx.identity,
        "body": request.body_json.clone().or_else(|| request.body_text.clone().map(Value::String)),
    })))
}

/// Greets the caller in HTML, by identity name when authenticated.
pub fn hello_handler(ctx: &mut ConnectionContext) -> anyhow::Result<Reply> {
    let name = ctx
        .identity
        .as_ref()
        .map(|id| id.name.clone())
        .or_else(|| ctx.request.get_query_param("name").map(str::to_string))
        .unwrap_or_else(|| "world".to_string());
    Ok(Reply::text(format!("<h1>Hello {}</h1>", escape_html(&name))))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
