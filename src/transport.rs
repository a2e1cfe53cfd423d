/// Single-host transport surface
///
/// The actual HTTP session (TLS, chunked encoding, gzip decompression, JSON
/// encoding of request bodies) is an external collaborator behind the
/// `Connection` trait; this module only defines the request vocabulary, the
/// completed `Response`, and the bounded redirect-following `call` that the
/// routing layers orchestrate.
use crate::error::{Error, Result, TransportError};
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// Agent identifier this library announces and matches in warning headers.
pub const AGENT: &str = "faro";

/// Request methods supported by the routing core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }

    /// Mutating methods route to a replica set's primary and trigger
    /// host removal on unreachability; GET balances across replicas.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered query parameters. Array-valued parameters repeat the key.
pub type Params = Vec<(String, String)>;

/// Percent-encode one query component, form style (space becomes '+').
fn percent_encode(component: &str) -> String {
    let mut encoded = String::with_capacity(component.len());
    for byte in component.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            b' ' => encoded.push('+'),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Encode parameters as a query string, preserving order and repeated keys.
pub fn encode_query(params: &Params) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", percent_encode(key), percent_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Append encoded parameters to a path; empty parameters leave it untouched.
pub fn append_query(path: &str, params: &Params) -> String {
    if params.is_empty() {
        return path.to_string();
    }
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{}{}{}", path, separator, encode_query(params))
}

/// A completed response handed back by the transport.
///
/// The transport contract is that `body` holds the final bytes: gzip
/// content-encoding is already undone. JSON decoding happens lazily in
/// `evaluate`, since unsuccessful responses are ordinary values until the
/// caller asks for the body.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Server-side timing from the `x-response-time` header; NaN when absent.
    pub time: f64,
}

impl Response {
    pub fn new(status: u16, reason: String, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        let headers: Vec<(String, String)> = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        let time = headers
            .iter()
            .find(|(name, _)| name == "x-response-time")
            .and_then(|(_, value)| value.parse::<f64>().ok())
            .unwrap_or(f64::NAN);
        Self {
            status,
            reason,
            headers,
            body,
            time,
        }
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(header, _)| *header == name)
            .map(|(_, value)| value.as_str())
    }

    /// Whether the status code is in [200, 300).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body: JSON when the content type says so, a string
    /// otherwise, null when empty.
    pub fn decoded_body(&self) -> Result<Value> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        let json = self
            .header("content-type")
            .is_some_and(|ct| ct.starts_with("application/json"));
        if json {
            Ok(serde_json::from_slice(&self.body)?)
        } else {
            Ok(Value::String(String::from_utf8_lossy(&self.body).into_owned()))
        }
    }

    /// Return the evaluated body or raise the HTTP failure.
    ///
    /// A `warning: <code> <agent> <text>` header addressed to this library's
    /// agent is surfaced as a deprecation-style warning.
    pub fn evaluate(&self) -> Result<Value> {
        let body = self.decoded_body()?;
        if let Some(warning) = self.header("warning") {
            let mut parts = warning.splitn(3, ' ');
            let code = parts.next().unwrap_or("");
            let agent = parts.next().unwrap_or("");
            let text = parts.next().unwrap_or("");
            if agent == AGENT {
                warn!(code, text, "deprecation warning from server");
            }
        }
        if self.is_success() {
            Ok(body)
        } else {
            Err(Error::Http {
                status: self.status,
                reason: self.reason.clone(),
                body,
            })
        }
    }
}

/// One synchronous HTTP session to one host.
///
/// `send` writes a request without waiting for the response; `receive` blocks
/// until the matching response completes. The split is what lets the router
/// interleave pipelines across hosts without an async runtime.
pub trait Connection: Send {
    fn send(
        &mut self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> std::result::Result<(), TransportError>;

    fn receive(&mut self) -> std::result::Result<Response, TransportError>;
}

/// Factory for new connections, injected into the pool.
pub trait Connector: Send + Sync {
    fn connect(&self, host: &str) -> std::result::Result<Box<dyn Connection>, TransportError>;
}

/// Split a Location header into (netloc, path), tolerating a missing scheme.
fn split_location(location: &str) -> (&str, &str) {
    let rest = location
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(location);
    match rest.find('/') {
        Some(index) => (&rest[..index], &rest[index..]),
        None => (rest, "/"),
    }
}

/// Send one request on an already-open connection and return the completed
/// response, following up to `redirects` same-host 3xx hops.
pub fn call(
    conn: &mut dyn Connection,
    host: &str,
    method: Method,
    path: &str,
    body: Option<&Value>,
    params: &Params,
    mut redirects: u8,
) -> Result<Response> {
    let mut path = append_query(path, params);
    conn.send(method, &path, body)?;
    let mut response = conn.receive()?;
    while redirects > 0 && (300..304).contains(&response.status) {
        let location = match response.header("location") {
            Some(location) => location.to_string(),
            None => {
                return Err(Error::Transport(TransportError::MalformedResponse(format!(
                    "{} response without location header",
                    response.status
                ))))
            }
        };
        let (netloc, redirect_path) = split_location(&location);
        if !netloc.starts_with(host) {
            return Err(Error::foreign_redirect(location));
        }
        warn!(reason = %response.reason, path = redirect_path, "following redirect");
        // The caller's parameters travel with the request on every hop.
        path = append_query(redirect_path, params);
        conn.send(method, &path, body)?;
        response = conn.receive()?;
        redirects -= 1;
    }
    Ok(response)
}
