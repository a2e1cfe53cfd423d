/// Replicated hosts with write failover
///
/// An ordered host list layered on the router: the head is the write
/// primary, the tail is the fallback order. Reads balance across every
/// healthy host. Confirmed unreachability of a write target permanently
/// drops it from the ordered list and the call retries against the new
/// topology; read failures only set the failure mark, which excludes the
/// host from selection until cleared.
use crate::error::{Error, Result};
use crate::route::{Host, ResourceRouter};
use crate::transport::{append_query, Method, Params, Response};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

pub struct ReplicaSet {
    router: ResourceRouter,
    /// Ordered replicas, head = write primary. Removal is atomic with
    /// respect to concurrent calls reading the list.
    ordered: Mutex<Vec<Host>>,
}

impl ReplicaSet {
    pub fn new(router: ResourceRouter, hosts: Vec<Host>) -> Self {
        Self {
            router,
            ordered: Mutex::new(hosts),
        }
    }

    pub fn router(&self) -> &ResourceRouter {
        &self.router
    }

    /// Current ordered host list (head = write primary).
    pub fn hosts(&self) -> Vec<Host> {
        self.ordered.lock().clone()
    }

    /// Send a request, failing over and retrying until a response completes
    /// or the topology is exhausted.
    ///
    /// GET balances across all tracked hosts; mutating methods always target
    /// the current head. An unreachable host is marked failed and, for
    /// mutating methods, dropped from the ordered list before the whole call
    /// retries. A completed but unsuccessful response is returned as-is once
    /// the retry budget is spent.
    pub fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        params: &Params,
        mut retry: u32,
    ) -> Result<Response> {
        let path = append_query(path, params);
        loop {
            let snapshot = self.hosts();
            let host = match snapshot.first() {
                None => return Err(Error::HostsExhausted),
                Some(head) if method.is_mutating() => head.clone(),
                Some(_) => self.router.choose(&snapshot)?,
            };
            debug!(%host, %method, path, "replica call");
            match self.router.execute(&host, method, &path, body) {
                Ok(response) => {
                    if response.is_success() || retry == 0 {
                        return Ok(response);
                    }
                    debug!(%host, status = response.status, retry, "unsuccessful response, retrying");
                    retry -= 1;
                }
                Err(Error::Transport(error)) if error.is_unreachable() => {
                    warn!(%host, %error, "replica unreachable");
                    self.router.pool().mark_failure(&host);
                    if method.is_mutating() {
                        self.remove(&host);
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Drop a host from the write failover order. It is never written to
    /// again within this replica set's lifetime.
    fn remove(&self, host: &str) {
        let mut ordered = self.ordered.lock();
        ordered.retain(|candidate| candidate != host);
        warn!(host, remaining = ordered.len(), "failing over writes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::ConnectionPool;
    use crate::testing::{MockConnector, Outcome, ReceiveStep};
    use std::sync::Arc;

    fn replicas(connector: Arc<MockConnector>, limit: usize, hosts: &[&str]) -> ReplicaSet {
        let router = ResourceRouter::with_rng_seed(ConnectionPool::new(connector, limit), 7);
        ReplicaSet::new(router, hosts.iter().map(|host| host.to_string()).collect())
    }

    #[test]
    fn test_writes_target_the_head() {
        let connector = MockConnector::new();
        let set = replicas(connector.clone(), 4, &["a:8080", "b:8080", "c:8080"]);
        let response = set
            .call(Method::Post, "/docs", None, &Params::new(), 0)
            .unwrap();
        assert_eq!(response.header("x-mock-host"), Some("a:8080"));
        assert!(connector.log.with_prefix("send b:8080").is_empty());
    }

    #[test]
    fn test_write_failover_drops_the_head() {
        crate::testing::init_tracing();
        let connector = MockConnector::new();
        connector.script("a:8080", Outcome::Refuse);
        let set = replicas(connector.clone(), 4, &["a:8080", "b:8080", "c:8080"]);

        let response = set
            .call(Method::Put, "/docs/1", None, &Params::new(), 0)
            .unwrap();
        assert_eq!(response.header("x-mock-host"), Some("b:8080"));
        assert_eq!(set.hosts(), vec!["b:8080".to_string(), "c:8080".to_string()]);
        assert!(set.router().pool().failure("a:8080").is_some());

        // a is never written again: the next write goes straight to b.
        let response = set
            .call(Method::Put, "/docs/2", None, &Params::new(), 0)
            .unwrap();
        assert_eq!(response.header("x-mock-host"), Some("b:8080"));
        assert_eq!(connector.log.with_prefix("connect a:8080").len(), 1);
    }

    #[test]
    fn test_cascading_failover_exhausts_topology() {
        let connector = MockConnector::new();
        connector.script("a:8080", Outcome::Refuse);
        connector.script("b:8080", Outcome::Refuse);
        let set = replicas(connector, 4, &["a:8080", "b:8080"]);
        let result = set.call(Method::Post, "/docs", None, &Params::new(), 0);
        assert!(matches!(result, Err(Error::HostsExhausted)));
        assert!(set.hosts().is_empty());
    }

    #[test]
    fn test_read_failure_marks_but_keeps_host() {
        let connector = MockConnector::new();
        connector.script("a:8080", Outcome::Refuse);
        let set = replicas(connector, 4, &["a:8080"]);
        let result = set.call(Method::Get, "/search", None, &Params::new(), 0);
        // The host stays tracked but is excluded by the priority sentinel.
        assert!(matches!(result, Err(Error::NoEligibleHosts { .. })));
        assert_eq!(set.hosts(), vec!["a:8080".to_string()]);
        assert!(set.router().pool().failure("a:8080").is_some());

        // Externally clearing the mark makes the host selectable again.
        set.router().pool().clear_failure("a:8080");
        let response = set
            .call(Method::Get, "/search", None, &Params::new(), 0)
            .unwrap();
        assert!(response.is_success());
    }

    #[test]
    fn test_retry_budget_on_unsuccessful_responses() {
        let connector = MockConnector::new();
        connector.script(
            "a:8080",
            Outcome::Serve(vec![
                ReceiveStep::Status(502),
                ReceiveStep::Status(502),
                ReceiveStep::Status(200),
            ]),
        );
        let set = replicas(connector, 4, &["a:8080"]);
        let response = set
            .call(Method::Get, "/search", None, &Params::new(), 2)
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[test]
    fn test_exhausted_retry_returns_last_response() {
        let connector = MockConnector::new();
        connector.script(
            "a:8080",
            Outcome::Serve(vec![
                ReceiveStep::Status(502),
                ReceiveStep::Status(502),
                ReceiveStep::Status(502),
            ]),
        );
        let set = replicas(connector, 4, &["a:8080"]);
        let response = set
            .call(Method::Get, "/search", None, &Params::new(), 2)
            .unwrap();
        // Budget spent: the unsuccessful response comes back as a value.
        assert_eq!(response.status, 502);
    }

    #[test]
    fn test_no_retry_returns_first_unsuccessful_response() {
        let connector = MockConnector::new();
        connector.script("a:8080", Outcome::Serve(vec![ReceiveStep::Status(404)]));
        let set = replicas(connector, 4, &["a:8080"]);
        let response = set
            .call(Method::Get, "/missing", None, &Params::new(), 0)
            .unwrap();
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_malformed_response_propagates_without_failover() {
        let connector = MockConnector::new();
        connector.script("a:8080", Outcome::Serve(vec![ReceiveStep::Malformed]));
        let set = replicas(connector, 4, &["a:8080", "b:8080"]);
        let result = set.call(Method::Post, "/docs", None, &Params::new(), 0);
        assert!(matches!(
            result,
            Err(Error::Transport(crate::error::TransportError::MalformedResponse(_)))
        ));
        // Not an unreachability signal: the topology is untouched.
        assert_eq!(set.hosts().len(), 2);
        assert!(set.router().pool().failure("a:8080").is_none());
    }

    #[test]
    fn test_query_params_are_appended() {
        let connector = MockConnector::new();
        let set = replicas(connector.clone(), 4, &["a:8080"]);
        let params: Params = vec![
            ("q".to_string(), "rust".to_string()),
            ("count".to_string(), "10".to_string()),
        ];
        set.call(Method::Get, "/search", None, &params, 0).unwrap();
        let sends = connector.log.with_prefix("send a:8080");
        assert_eq!(sends[0], "send a:8080 GET /search?q=rust&count=10");
    }
}
