/// Scripted in-memory transport for unit tests.
///
/// Connections are scripted per host as a queue of outcomes: each `connect`
/// consumes the next outcome for that host, and each `receive` on a served
/// connection consumes the next step. Hosts and connections without a script
/// answer 200 with an empty body, tagged with an `x-mock-host` header so
/// tests can assert which host produced a response.
use crate::error::TransportError;
use crate::transport::{Connection, Connector, Method, Response};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;

/// Install a test subscriber once; `RUST_LOG=debug` shows routing events.
pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared record of connects, sends, and resets, in call order.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, event: String) {
        self.0.lock().push(event);
    }

    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// One scripted `receive` result.
pub(crate) enum ReceiveStep {
    /// Empty-body response with this status.
    Status(u16),
    /// JSON response with this status and body.
    Body(u16, Value),
    /// Redirect response pointing at this location.
    Redirect(u16, &'static str),
    /// Connection reset (indeterminate, triggers broadcast resend).
    Reset,
    /// Non-reset transport failure (must propagate).
    Aborted,
    /// Malformed status line (must propagate without failover).
    Malformed,
}

/// Behavior of one connection handed out by the connector.
pub(crate) enum Outcome {
    /// `connect` fails with connection-refused.
    Refuse,
    /// `connect` succeeds; `receive` walks these steps, then defaults to 200.
    Serve(Vec<ReceiveStep>),
}

pub(crate) struct MockConnector {
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    pub log: EventLog,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            log: EventLog::default(),
        })
    }

    /// Queue the next connection outcome for a host.
    pub fn script(&self, host: &str, outcome: Outcome) {
        self.scripts
            .lock()
            .entry(host.to_string())
            .or_default()
            .push_back(outcome);
    }
}

impl Connector for MockConnector {
    fn connect(&self, host: &str) -> Result<Box<dyn Connection>, TransportError> {
        self.log.push(format!("connect {host}"));
        let outcome = self
            .scripts
            .lock()
            .get_mut(host)
            .and_then(VecDeque::pop_front);
        match outcome {
            Some(Outcome::Refuse) => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{host} refused"),
            ))),
            Some(Outcome::Serve(steps)) => Ok(Box::new(MockConnection {
                host: host.to_string(),
                steps: steps.into(),
                log: self.log.clone(),
            })),
            None => Ok(Box::new(MockConnection {
                host: host.to_string(),
                steps: VecDeque::new(),
                log: self.log.clone(),
            })),
        }
    }
}

struct MockConnection {
    host: String,
    steps: VecDeque<ReceiveStep>,
    log: EventLog,
}

impl Connection for MockConnection {
    fn send(
        &mut self,
        method: Method,
        path: &str,
        _body: Option<&Value>,
    ) -> Result<(), TransportError> {
        self.log.push(format!("send {} {} {}", self.host, method, path));
        Ok(())
    }

    fn receive(&mut self) -> Result<Response, TransportError> {
        match self.steps.pop_front() {
            None => Ok(status_response(200, &self.host)),
            Some(ReceiveStep::Status(status)) => Ok(status_response(status, &self.host)),
            Some(ReceiveStep::Body(status, value)) => Ok(json_response(status, &self.host, &value)),
            Some(ReceiveStep::Redirect(status, location)) => Ok(Response::new(
                status,
                reason(status).to_string(),
                vec![
                    ("location".to_string(), location.to_string()),
                    ("x-mock-host".to_string(), self.host.clone()),
                ],
                Vec::new(),
            )),
            Some(ReceiveStep::Reset) => {
                self.log.push(format!("reset {}", self.host));
                Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    format!("{} reset", self.host),
                )))
            }
            Some(ReceiveStep::Aborted) => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                format!("{} aborted", self.host),
            ))),
            Some(ReceiveStep::Malformed) => {
                Err(TransportError::MalformedResponse("HTP/1.1 garbage".to_string()))
            }
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        400 => "Bad Request",
        404 => "Not Found",
        408 => "Request Timeout",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "",
    }
}

/// Empty-body response tagged with the producing host.
pub(crate) fn status_response(status: u16, host: &str) -> Response {
    Response::new(
        status,
        reason(status).to_string(),
        vec![("x-mock-host".to_string(), host.to_string())],
        Vec::new(),
    )
}

/// JSON response tagged with the producing host.
pub(crate) fn json_response(status: u16, host: &str, value: &Value) -> Response {
    Response::new(
        status,
        reason(status).to_string(),
        vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("x-mock-host".to_string(), host.to_string()),
        ],
        serde_json::to_vec(value).unwrap_or_default(),
    )
}
