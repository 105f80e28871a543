use super::body::{decode_latin1, parse_structured, read_declared};
use super::reply::{apply_body, resolve_body, ResponseBody};
use super::DispatchConfig;
use crate::diagnostics::{DiagnosticLevel, Publisher};
use crate::security::impersonate;
use crate::server::{Connection, ConnectionContext, RequestView};
use crate::worker_pool::panic_message;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Run one connection through the pipeline. Never panics and never returns
/// an error; failures end up as a `500` response and diagnostic lines.
pub fn process(connection: Connection, config: &DispatchConfig) {
    let log = Publisher::new(config.diagnostics.clone(), connection.id.to_string());

    let endpoint = connection
        .request
        .remote_addr
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    match &connection.identity {
        Some(identity) => log.info(format!(
            "{} {} from {} as {}",
            connection.request.method, connection.request.url, endpoint, identity
        )),
        None => log.info(format!(
            "{} {} from {}",
            connection.request.method, connection.request.url, endpoint
        )),
    }

    let mut ctx = ConnectionContext::new(connection, log.clone(), Arc::clone(&config.modules));

    if config.skip_body_read {
        log.publish(DiagnosticLevel::Debug, "body read skipped");
    } else {
        ingest_body(&mut ctx.request, &log);
    }

    ctx.response.clear_file_override();

    let outcome = catch_unwind(AssertUnwindSafe(|| run_guarded(&mut ctx, config, &log)));
    match outcome {
        Ok(Ok(body)) => log.publish(DiagnosticLevel::Debug, format!("response body: {body}")),
        Ok(Err(e)) => {
            log.error(format!("request failed: {e:#}"));
            ctx.response.fail(500);
        }
        Err(panic) => {
            log.error(format!("handler panicked: {}", panic_message(&panic)));
            ctx.response.fail(500);
        }
    }

    let status = ctx.response.status();
    match ctx.response.close() {
        Ok(true) => log.info(format!("closed with status {status}")),
        Ok(false) => {}
        Err(e) => log.warn(format!("failed to send response: {e}")),
    }
}

/// Impersonation, handler and body resolution. The impersonation guard lives
/// only as long as the handler call, so it is reverted before anything else.
fn run_guarded(
    ctx: &mut ConnectionContext,
    config: &DispatchConfig,
    log: &Publisher,
) -> anyhow::Result<ResponseBody> {
    let reply = {
        let guard = if config.impersonate {
            let guard = impersonate(config.impersonator.as_ref(), ctx.identity.as_ref())?;
            log.info(format!(
                "impersonating {}",
                guard.identity().unwrap_or_default()
            ));
            Some(guard)
        } else {
            None
        };
        log.publish(DiagnosticLevel::Debug, "invoking handler");
        let reply = config.handler.handle(ctx);
        if let Some(guard) = guard {
            guard.revert();
            log.info("impersonation reverted");
        }
        reply
    }?;

    let body = resolve_body(&ctx.response.state(), reply);
    apply_body(&mut ctx.response, &body)?;
    Ok(body)
}

fn ingest_body(request: &mut RequestView, log: &Publisher) {
    let Some(mut reader) = request.take_body_reader() else {
        return;
    };
    match read_declared(reader.as_mut(), request.content_length) {
        Ok(bytes) => {
            let text = decode_latin1(&bytes);
            let json = parse_structured(&text);
            log.publish(
                DiagnosticLevel::Debug,
                format!(
                    "read {} body bytes ({})",
                    bytes.len(),
                    if json.is_some() { "json" } else { "text" }
                ),
            );
            request.body = Some(bytes);
            request.body_text = Some(text);
            request.body_json = json;
        }
        Err(e) => log.warn(format!("failed to read request body: {e}")),
    }
}
