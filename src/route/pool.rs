/// Per-host pools of reusable connections
///
/// Each host owns a bounded FIFO of idle connections plus a failure mark.
/// Queues are created lazily on first use and every queue operation happens
/// under the pool lock, so multi-threaded callers stay correct without any
/// further discipline.
use crate::error::Result;
use crate::route::Host;
use crate::transport::{Connection, Connector, Response};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Pluggable check for a connection the server tore down while answering
/// 400. The exact body text is backend-specific, so it is injected rather
/// than hard-coded.
pub type PoisonPredicate = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Idle connections and health state for one host.
#[derive(Default)]
struct HostQueue {
    idle: VecDeque<Box<dyn Connection>>,
    /// Time of the last unreachable error; None = healthy.
    failure: Option<SystemTime>,
}

/// Keyed container of per-host connection queues.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    queues: Mutex<HashMap<Host, HostQueue>>,
    /// Maximum idle connections cached per host; 0 means never cache.
    limit: usize,
    poisoned: Option<PoisonPredicate>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, limit: usize) -> Self {
        Self {
            connector,
            queues: Mutex::new(HashMap::new()),
            limit,
            poisoned: None,
        }
    }

    /// Install the poisoned-body check applied to 400 responses.
    pub fn with_poison_predicate(mut self, predicate: PoisonPredicate) -> Self {
        self.poisoned = Some(predicate);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Pop an idle connection for the host, or open a fresh one. Never
    /// blocks: a pool miss is simply a new connection.
    pub fn acquire(&self, host: &str) -> Result<Box<dyn Connection>> {
        let idle = self
            .queues
            .lock()
            .get_mut(host)
            .and_then(|queue| queue.idle.pop_front());
        if let Some(conn) = idle {
            debug!(host, "reusing idle connection");
            return Ok(conn);
        }
        debug!(host, "opening new connection");
        Ok(self.connector.connect(host)?)
    }

    /// Decide whether a just-completed connection is reusable and, if so,
    /// cache it subject to the limit. Returns whether the connection was
    /// retained; a false return means the caller's drop closes it.
    ///
    /// Callers on transport-error paths never reach here: the erroring
    /// connection is dropped where the error surfaced.
    pub fn release(&self, host: &str, conn: Box<dyn Connection>, response: &Response) -> bool {
        if !self.reusable(response) {
            debug!(host, status = response.status, "connection not reusable, closing");
            return false;
        }
        let mut queues = self.queues.lock();
        let queue = queues.entry(host.to_string()).or_default();
        if queue.idle.len() < self.limit {
            queue.idle.push_back(conn);
            true
        } else {
            debug!(host, limit = self.limit, "idle queue full, closing connection");
            false
        }
    }

    /// A request-timeout status, or a bad-request status the poison check
    /// recognizes, means the server already closed this connection.
    fn reusable(&self, response: &Response) -> bool {
        if response.status == 408 {
            return false;
        }
        if response.status == 400 {
            if let Some(poisoned) = &self.poisoned {
                if poisoned(response) {
                    return false;
                }
            }
        }
        true
    }

    /// Load priority for host selection: None while a failure mark is set,
    /// otherwise the negated idle count (more idle connections implies less
    /// recent load, and lower values win).
    pub fn priority(&self, host: &str) -> Option<i64> {
        let queues = self.queues.lock();
        match queues.get(host) {
            Some(queue) if queue.failure.is_some() => None,
            Some(queue) => Some(-(queue.idle.len() as i64)),
            None => Some(0),
        }
    }

    /// Record an unreachable error for the host, excluding it from
    /// selection until cleared.
    pub fn mark_failure(&self, host: &str) {
        let mut queues = self.queues.lock();
        let queue = queues.entry(host.to_string()).or_default();
        queue.failure = Some(SystemTime::now());
    }

    /// Clear the failure mark, making the host selectable again.
    pub fn clear_failure(&self, host: &str) {
        if let Some(queue) = self.queues.lock().get_mut(host) {
            queue.failure = None;
        }
    }

    pub fn failure(&self, host: &str) -> Option<SystemTime> {
        self.queues.lock().get(host).and_then(|queue| queue.failure)
    }

    pub fn idle_count(&self, host: &str) -> usize {
        self.queues
            .lock()
            .get(host)
            .map_or(0, |queue| queue.idle.len())
    }
}
