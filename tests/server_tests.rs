#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::connections::{connection, Recorded};
use common::http::send;
use common::listener::MemoryListener;
use common::test_server::setup_may_runtime;
use http::Method;
use parley::config::{AuthScheme, ServerConfig, UserEntry};
use parley::echo::{echo_handler, hello_handler};
use parley::security::sha256_hex;
use parley::server::{ConnectionContext, RequestView, MAX_CONSECUTIVE_ACCEPT_ERRORS};
use parley::{ConfigError, ModuleRegistry, Reply, Server, ServerError};
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type HandlerResult = anyhow::Result<Reply>;

fn memory_config(workers: usize) -> ServerConfig {
    ServerConfig {
        workers,
        poll_interval_ms: 0,
        ..ServerConfig::default()
    }
}

fn socket_config() -> ServerConfig {
    ServerConfig {
        addr: "127.0.0.1:0".to_string(),
        poll_interval_ms: 1,
        accept_wait_ms: 20,
        ..ServerConfig::default()
    }
}

fn get(path: &str) -> (parley::Connection, Recorded) {
    connection(RequestView::new(Method::GET, path))
}

#[test]
fn test_acceptor_serves_queued_connections() {
    setup_may_runtime();
    let listener = Arc::new(MemoryListener::new());
    let server = Server::builder(memory_config(2))
        .handler(|ctx: &mut ConnectionContext| -> HandlerResult {
            Ok(Reply::text(ctx.request.path.clone()))
        })
        .listener(listener.clone())
        .build()
        .unwrap();

    let recorded: Vec<Recorded> = ["/a", "/b", "/c"]
        .iter()
        .map(|path| {
            let (conn, rec) = get(path);
            listener.push(conn);
            rec
        })
        .collect();
    listener.stop_when_drained();
    server.run().unwrap();

    for (rec, path) in recorded.iter().zip(["/a", "/b", "/c"]) {
        assert_eq!(rec.closes(), 1);
        assert_eq!(rec.body_text(), path);
    }
    assert!(listener.is_stopped());
    assert!(server.diagnostics().is_empty());
    assert_eq!(server.pool().metrics().get_completed_count(), 3);
}

#[test]
fn test_failed_request_does_not_affect_later_ones() {
    setup_may_runtime();
    let running = Arc::new(AtomicUsize::new(0));
    let max_after_failure = Arc::new(AtomicUsize::new(0));
    let (r, m) = (Arc::clone(&running), Arc::clone(&max_after_failure));

    let listener = Arc::new(MemoryListener::new());
    let server = Server::builder(memory_config(2))
        .handler(move |ctx: &mut ConnectionContext| -> HandlerResult {
            if ctx.request.path == "/boom" {
                panic!("handler blew up");
            }
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(now, Ordering::SeqCst);
            may::coroutine::sleep(Duration::from_millis(40));
            r.fetch_sub(1, Ordering::SeqCst);
            Ok(Reply::text("fine"))
        })
        .listener(listener.clone())
        .build()
        .unwrap();

    let (boom, boom_rec) = get("/boom");
    listener.push(boom);
    let later: Vec<Recorded> = (0..4)
        .map(|_| {
            let (conn, rec) = get("/slow");
            listener.push(conn);
            rec
        })
        .collect();
    listener.stop_when_drained();
    server.run().unwrap();

    assert_eq!(boom_rec.closes(), 1);
    assert_eq!(boom_rec.last().status, 500);
    for rec in &later {
        assert_eq!(rec.closes(), 1);
        assert_eq!(rec.last().status, 200);
        assert_eq!(rec.body_text(), "fine");
    }
    assert_eq!(max_after_failure.load(Ordering::SeqCst), 2);
}

#[test]
fn test_capacity_one_runs_requests_one_after_another() {
    setup_may_runtime();
    let events = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&events);

    let listener = Arc::new(MemoryListener::new());
    let server = Server::builder(memory_config(1))
        .handler(move |ctx: &mut ConnectionContext| -> HandlerResult {
            let path = ctx.request.path.clone();
            log.lock().unwrap().push(format!("start {path}"));
            may::coroutine::sleep(Duration::from_millis(30));
            log.lock().unwrap().push(format!("end {path}"));
            Ok(Reply::Empty)
        })
        .listener(listener.clone())
        .build()
        .unwrap();

    let (first, first_rec) = get("/first");
    let (second, second_rec) = get("/second");
    listener.push(first);
    listener.push(second);
    listener.stop_when_drained();
    server.run().unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec!["start /first", "end /first", "start /second", "end /second"]
    );
    assert_eq!(first_rec.closes(), 1);
    assert_eq!(second_rec.closes(), 1);
}

#[test]
fn test_acceptor_does_not_wait_for_dispatch() {
    setup_may_runtime();
    let listener = Arc::new(MemoryListener::new());
    let server = Server::builder(memory_config(4))
        .handler(|_: &mut ConnectionContext| -> HandlerResult {
            may::coroutine::sleep(Duration::from_millis(100));
            Ok(Reply::Empty)
        })
        .listener(listener.clone())
        .build()
        .unwrap();

    for _ in 0..4 {
        listener.push(get("/").0);
    }
    listener.stop_when_drained();
    let started = Instant::now();
    server.run().unwrap();
    // Four 100ms handlers on four workers overlap instead of adding up
    assert!(started.elapsed() < Duration::from_millis(350));
    assert_eq!(server.pool().metrics().get_completed_count(), 4);
}

#[test]
fn test_closed_pool_rejects_with_503() {
    setup_may_runtime();
    let listener = Arc::new(MemoryListener::new());
    let server = Server::builder(memory_config(1))
        .handler(|_: &mut ConnectionContext| -> HandlerResult { Ok(Reply::text("unreachable")) })
        .listener(listener.clone())
        .build()
        .unwrap();
    server.pool().shutdown();

    let (conn, rec) = get("/");
    listener.push(conn);
    listener.stop_when_drained();
    server.run().unwrap();

    assert_eq!(rec.closes(), 1);
    assert_eq!(rec.last().status, 503);
}

#[test]
fn test_transient_accept_errors_are_survived() {
    setup_may_runtime();
    let listener = Arc::new(MemoryListener::new());
    let server = Server::builder(memory_config(1))
        .handler(|_: &mut ConnectionContext| -> HandlerResult { Ok(Reply::text("ok")) })
        .listener(listener.clone())
        .build()
        .unwrap();

    listener.fail_next(3);
    let (conn, rec) = get("/");
    listener.push(conn);
    listener.stop_when_drained();
    server.run().unwrap();
    assert_eq!(rec.body_text(), "ok");
}

#[test]
fn test_repeated_accept_errors_end_the_loop() {
    setup_may_runtime();
    let listener = Arc::new(MemoryListener::new());
    let server = Server::builder(memory_config(1))
        .handler(|_: &mut ConnectionContext| -> HandlerResult { Ok(Reply::Empty) })
        .listener(listener.clone())
        .build()
        .unwrap();

    listener.fail_next(MAX_CONSECUTIVE_ACCEPT_ERRORS as usize);
    let result = server.run();
    assert!(matches!(result, Err(ServerError::Io(_))));
    assert!(listener.is_stopped());
}

#[test]
fn test_impersonation_with_anonymous_is_rejected_before_bind() {
    let probe = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let config = ServerConfig {
        addr: addr.to_string(),
        impersonate: true,
        auth: AuthScheme::Anonymous,
        ..ServerConfig::default()
    };
    let result = Server::builder(config).handler(echo_handler).build();
    assert!(matches!(
        result,
        Err(ServerError::Config(ConfigError::ImpersonationRequiresAuth))
    ));
    // The address is still free, so nothing was bound
    TcpListener::bind(addr).unwrap();
}

#[test]
fn test_build_requires_handler() {
    let result = Server::builder(memory_config(1)).build();
    assert!(matches!(
        result,
        Err(ServerError::Config(ConfigError::MissingHandler))
    ));
}

#[test]
fn test_negotiate_requires_authenticator() {
    let config = ServerConfig {
        auth: AuthScheme::Negotiate,
        ..memory_config(1)
    };
    let result = Server::builder(config).handler(echo_handler).build();
    assert!(matches!(
        result,
        Err(ServerError::Config(ConfigError::MissingAuthenticator { .. }))
    ));
}

#[test]
fn test_unknown_preload_fails_startup() {
    let config = ServerConfig {
        preload: vec!["metrics".to_string()],
        ..memory_config(1)
    };
    let mut registry = ModuleRegistry::new();
    registry.register_value("version", "1".to_string());
    let result = Server::builder(config)
        .handler(echo_handler)
        .modules(registry)
        .build();
    assert!(matches!(
        result,
        Err(ServerError::Config(ConfigError::UnknownModule { .. }))
    ));
}

#[test]
fn test_bind_failure_is_reported() {
    setup_may_runtime();
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = ServerConfig {
        addr: taken.local_addr().unwrap().to_string(),
        ..socket_config()
    };
    let result = Server::builder(config).handler(echo_handler).build();
    assert!(matches!(result, Err(ServerError::Bind { .. })));
}

#[test]
fn test_http_echo_round_trip() {
    setup_may_runtime();
    let server = Server::builder(socket_config())
        .handler(echo_handler)
        .build()
        .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.start().unwrap();
    handle.wait_ready().unwrap();

    let response = send(
        addr,
        "POST",
        "/echo?x=1",
        &[("Content-Type", "application/json")],
        br#"{"name":"x"}"#,
    );
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("application/json"));
    let body: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], "/echo");
    assert_eq!(body["query"], json!({"x": "1"}));
    assert_eq!(body["body"], json!({"name": "x"}));
    assert_eq!(body["identity"], Value::Null);

    handle.stop().unwrap();
}

#[test]
fn test_http_text_body_is_latin1_text() {
    setup_may_runtime();
    let server = Server::builder(socket_config())
        .handler(echo_handler)
        .build()
        .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.start().unwrap();
    handle.wait_ready().unwrap();

    let response = send(addr, "PUT", "/", &[], b"not json");
    let body: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["body"], "not json");

    handle.stop().unwrap();
}

#[test]
fn test_http_basic_auth() {
    setup_may_runtime();
    let config = ServerConfig {
        auth: AuthScheme::Basic,
        realm: "test".to_string(),
        users: vec![UserEntry {
            name: "alice".to_string(),
            password_sha256: sha256_hex("s3cret"),
        }],
        ..socket_config()
    };
    let server = Server::builder(config).handler(hello_handler).build().unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.start().unwrap();
    handle.wait_ready().unwrap();

    let missing = send(addr, "GET", "/", &[], b"");
    assert_eq!(missing.status, 401);
    assert_eq!(
        missing.header("WWW-Authenticate"),
        Some("Basic realm=\"test\"")
    );

    // "alice:wrong"
    let wrong = send(addr, "GET", "/", &[("Authorization", "Basic YWxpY2U6d3Jvbmc=")], b"");
    assert_eq!(wrong.status, 401);

    let bearer = send(addr, "GET", "/", &[("Authorization", "Bearer abc")], b"");
    assert_eq!(bearer.status, 401);

    // "alice:s3cret"
    let ok = send(addr, "GET", "/", &[("Authorization", "Basic YWxpY2U6czNjcmV0")], b"");
    assert_eq!(ok.status, 200);
    assert_eq!(ok.header("Content-Type"), Some("text/html"));
    assert_eq!(ok.text(), "<h1>Hello alice</h1>");

    handle.stop().unwrap();
}

#[test]
fn test_http_static_file_override() {
    setup_may_runtime();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("page.html"), "<p>static</p>").unwrap();

    let server = Server::builder(socket_config())
        .handler(parley::static_files::StaticFiles::new(dir.path()))
        .build()
        .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.start().unwrap();
    handle.wait_ready().unwrap();

    let found = send(addr, "GET", "/page.html", &[], b"");
    assert_eq!(found.status, 200);
    assert_eq!(found.header("Content-Type"), Some("text/html"));
    assert_eq!(found.header("Content-Length"), Some("13"));
    assert_eq!(found.text(), "<p>static</p>");

    let missing = send(addr, "GET", "/nope.html", &[], b"");
    assert_eq!(missing.status, 404);

    let escape = send(addr, "GET", "/../Cargo.toml", &[], b"");
    assert_eq!(escape.status, 404);

    handle.stop().unwrap();
}

#[test]
fn test_stop_handle_ends_running_server() {
    setup_may_runtime();
    let server = Server::builder(socket_config())
        .handler(echo_handler)
        .build()
        .unwrap();
    let handle = server.start().unwrap();
    handle.wait_ready().unwrap();
    let stop = handle.stop_handle();
    stop.stop();
    stop.stop();
    handle.join().unwrap();
}

#[test]
fn test_idle_acceptor_flushes_diagnostics_within_a_poll_interval() {
    setup_may_runtime();
    let config = ServerConfig {
        addr: "127.0.0.1:0".to_string(),
        poll_interval_ms: 30,
        accept_wait_ms: 1000,
        ..ServerConfig::default()
    };
    let server = Server::builder(config)
        .handler(|ctx: &mut ConnectionContext| -> HandlerResult {
            // Publish well after dispatch so the acceptor is parked in accept
            may::coroutine::sleep(Duration::from_millis(100));
            ctx.log("late line");
            Ok(Reply::text("done"))
        })
        .build()
        .unwrap();
    let diagnostics = server.diagnostics().clone();
    let handle = server.start().unwrap();
    handle.wait_ready().unwrap();
    let addr = handle.local_addr().unwrap();

    let response = send(addr, "GET", "/", &[], b"");
    assert_eq!(response.status, 200);
    let received = Instant::now();
    while !diagnostics.is_empty() && received.elapsed() < Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(diagnostics.is_empty());
    assert!(
        received.elapsed() < Duration::from_millis(250),
        "diagnostics lingered for {:?}",
        received.elapsed()
    );
    handle.stop().unwrap();
}
