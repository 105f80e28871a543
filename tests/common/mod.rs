#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

pub mod test_server {
    use std::sync::Once;

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_workers(4).set_stack_size(0x40000);
        });
    }
}

pub mod connections {
    use parley::server::{Connection, RequestView, ResponseParts, ResponseSink, ResponseView};
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Every response finished through a [`RecordingSink`]
    #[derive(Clone, Default)]
    pub struct Recorded(Arc<Mutex<Vec<ResponseParts>>>);

    impl Recorded {
        /// Number of times the response was closed
        pub fn closes(&self) -> usize {
            self.0.lock().unwrap().len()
        }

        pub fn last(&self) -> ResponseParts {
            self.0.lock().unwrap().last().cloned().expect("response never closed")
        }

        pub fn body_text(&self) -> String {
            String::from_utf8(self.last().body).unwrap()
        }
    }

    /// Response sink that records instead of writing to a socket
    pub struct RecordingSink(pub Recorded);

    impl ResponseSink for RecordingSink {
        fn finish(self: Box<Self>, parts: ResponseParts) -> io::Result<()> {
            self.0 .0.lock().unwrap().push(parts);
            Ok(())
        }
    }

    /// Wrap `request` in a connection whose response is recorded.
    pub fn connection(request: RequestView) -> (Connection, Recorded) {
        let recorded = Recorded::default();
        let response = ResponseView::new(Box::new(RecordingSink(recorded.clone())));
        (Connection::new(request, response, None), recorded)
    }
}

pub mod listener {
    use parley::server::{Accepted, Connection, Listener};
    use std::collections::VecDeque;
    use std::io;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory listener fed by the test
    ///
    /// Hands out queued connections in order, reports `Idle` when empty and
    /// `Stopped` once stopped. With `stop_when_drained` it stops itself after
    /// the queue empties.
    #[derive(Default)]
    pub struct MemoryListener {
        queue: Mutex<VecDeque<Connection>>,
        errors: Mutex<usize>,
        stopped: AtomicBool,
        stop_when_drained: AtomicBool,
    }

    impl MemoryListener {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, connection: Connection) {
            self.queue.lock().unwrap().push_back(connection);
        }

        /// Make the next `n` accept calls fail.
        pub fn fail_next(&self, n: usize) {
            *self.errors.lock().unwrap() = n;
        }

        pub fn stop_when_drained(&self) {
            self.stop_when_drained.store(true, Ordering::SeqCst);
        }

        pub fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    impl Listener for MemoryListener {
        fn accept(&self) -> io::Result<Accepted> {
            {
                let mut errors = self.errors.lock().unwrap();
                if *errors > 0 {
                    *errors -= 1;
                    return Err(io::Error::new(io::ErrorKind::Other, "injected accept failure"));
                }
            }
            if self.is_stopped() {
                return Ok(Accepted::Stopped);
            }
            if let Some(connection) = self.queue.lock().unwrap().pop_front() {
                return Ok(Accepted::Connection(Box::new(connection)));
            }
            if self.stop_when_drained.load(Ordering::SeqCst) {
                self.stop();
                return Ok(Accepted::Stopped);
            }
            std::thread::sleep(Duration::from_millis(1));
            Ok(Accepted::Idle)
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        fn local_addr(&self) -> Option<SocketAddr> {
            None
        }
    }
}

pub mod dispatch {
    use super::listener::MemoryListener;
    use super::test_server::setup_may_runtime;
    use parley::diagnostics::Diagnostics;
    use parley::handler::Handler;
    use parley::modules::Modules;
    use parley::pipeline::DispatchConfig;
    use parley::security::{Impersonator, TracingImpersonator};
    use parley::worker_pool::{WorkerPool, WorkerPoolConfig};
    use std::sync::Arc;

    /// Dispatch config for running `process` directly on the test thread
    pub fn dispatch_config<H: Handler>(handler: H) -> DispatchConfig {
        setup_may_runtime();
        let diagnostics = Diagnostics::new(1024);
        let pool = WorkerPool::new(WorkerPoolConfig::new(1, 0x40000), diagnostics.clone()).unwrap();
        DispatchConfig {
            listener: Arc::new(MemoryListener::new()),
            pool: Arc::new(pool),
            diagnostics,
            handler: Arc::new(handler),
            impersonator: Arc::new(TracingImpersonator::new()),
            impersonate: false,
            skip_body_read: false,
            capacity: 1,
            modules: Arc::new(Modules::empty()),
        }
    }

    pub fn with_impersonator(
        mut config: DispatchConfig,
        impersonator: Arc<dyn Impersonator>,
    ) -> DispatchConfig {
        config.impersonator = impersonator;
        config.impersonate = true;
        config
    }
}

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// A parsed HTTP/1.1 response
    #[derive(Debug)]
    pub struct RawResponse {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl RawResponse {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    /// Send one request with `Connection: close` and read the whole response.
    pub fn send(
        addr: SocketAddr,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> RawResponse {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut request =
            format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
        for (name, value) in headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        stream.write_all(request.as_bytes()).unwrap();
        stream.write_all(body).unwrap();

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).unwrap();
        parse(&raw)
    }

    fn parse(raw: &[u8]) -> RawResponse {
        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("no header terminator");
        let head = String::from_utf8_lossy(&raw[..split]).into_owned();
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap();
        let status = status_line.split_whitespace().nth(1).unwrap().parse().unwrap();
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        RawResponse {
            status,
            headers,
            body: raw[split + 4..].to_vec(),
        }
    }
}
