/// Host selection and staged request execution
///
/// Broadcast "concurrency" is cooperative: one pipeline per host, all
/// advanced stage by stage in the same relative order, so a send and a
/// receive overlap across hosts without an async runtime. Stage two gives
/// at-least-once semantics: a reset on a pooled connection cannot tell us
/// whether the server saw the request, so it is resent on a fresh
/// connection rather than silently dropped. Callers of non-idempotent
/// operations must tolerate a possible duplicate application.
use crate::error::{Error, Result};
use crate::route::{ConnectionPool, Host};
use crate::transport::{Connection, Method, Response};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Routes requests across a pool of hosts by load priority.
pub struct ResourceRouter {
    pool: ConnectionPool,
    rng: Mutex<StdRng>,
}

impl ResourceRouter {
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seeded variant for deterministic tie-breaking.
    pub fn with_rng_seed(pool: ConnectionPool, seed: u64) -> Self {
        Self {
            pool,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Uniform random index in [0, len); len must be nonzero.
    pub(crate) fn pick_index(&self, len: usize) -> usize {
        self.rng.lock().gen_range(0..len)
    }

    /// Pick the least-loaded healthy host among the candidates: group by
    /// priority, take the best group, break ties uniformly at random.
    pub fn choose(&self, candidates: &[Host]) -> Result<Host> {
        let mut groups: BTreeMap<i64, Vec<&Host>> = BTreeMap::new();
        for host in candidates {
            if let Some(priority) = self.pool.priority(host) {
                groups.entry(priority).or_default().push(host);
            }
        }
        let best = match groups.into_iter().next() {
            Some((_, hosts)) => hosts,
            None => {
                return Err(Error::NoEligibleHosts {
                    candidates: candidates.len(),
                })
            }
        };
        Ok(best[self.pick_index(best.len())].clone())
    }

    /// Run one full request/response cycle against a specific host.
    pub fn execute(
        &self,
        host: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response> {
        Pipeline::open(&self.pool, host, method, path, body)?
            .confirm()?
            .finish()
    }

    /// Choose one host among the candidates and send to it.
    pub fn unicast(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        candidates: &[Host],
    ) -> Result<Response> {
        let host = self.choose(candidates)?;
        debug!(%host, %method, path, "unicast");
        self.execute(&host, method, path, body)
    }

    /// Send to every host, collecting one response per host in input order.
    ///
    /// Pipelines advance in lockstep rounds: all sends, then all
    /// confirmations (with resend on indeterminate resets), then all final
    /// receives. The first unrecoverable error aborts the whole broadcast.
    pub fn broadcast(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        hosts: &[Host],
    ) -> Result<Vec<Response>> {
        debug!(hosts = hosts.len(), %method, path, "broadcast");
        let mut pipelines = Vec::with_capacity(hosts.len());
        for host in hosts {
            pipelines.push(Pipeline::open(&self.pool, host, method, path, body)?);
        }
        let mut confirmed = Vec::with_capacity(pipelines.len());
        for pipeline in pipelines {
            confirmed.push(pipeline.confirm()?);
        }
        confirmed.into_iter().map(Pipeline::finish).collect()
    }
}

/// Per-host pipeline stage.
enum Stage {
    /// Request written; response not yet read.
    Sent(Box<dyn Connection>),
    /// First receive hit an indeterminate reset; the request was resent on
    /// a fresh connection and awaits confirmation.
    Resent(Box<dyn Connection>),
    /// Final response collected.
    Done(Response),
}

/// One host's slice of a broadcast, advanced stage by stage by the driver.
struct Pipeline<'a> {
    pool: &'a ConnectionPool,
    host: &'a str,
    method: Method,
    path: &'a str,
    body: Option<&'a Value>,
    stage: Stage,
}

impl<'a> Pipeline<'a> {
    /// Stage one: acquire a connection and write the request.
    fn open(
        pool: &'a ConnectionPool,
        host: &'a str,
        method: Method,
        path: &'a str,
        body: Option<&'a Value>,
    ) -> Result<Self> {
        let mut conn = pool.acquire(host)?;
        conn.send(method, path, body)?;
        Ok(Self {
            pool,
            host,
            method,
            path,
            body,
            stage: Stage::Sent(conn),
        })
    }

    /// Stage two: try to read the response. A reset here usually means a
    /// stale pooled connection the server closed under us; whether the
    /// request arrived is unknowable, so resend on a fresh connection.
    /// Any other transport error propagates.
    fn confirm(mut self) -> Result<Self> {
        self.stage = match self.stage {
            Stage::Sent(mut conn) => match conn.receive() {
                Ok(response) => {
                    self.pool.release(self.host, conn, &response);
                    Stage::Done(response)
                }
                Err(error) if error.is_reset() => {
                    debug!(host = self.host, "reset on pooled connection, resending");
                    drop(conn);
                    let mut fresh = self.pool.acquire(self.host)?;
                    fresh.send(self.method, self.path, self.body)?;
                    Stage::Resent(fresh)
                }
                Err(error) => return Err(error.into()),
            },
            done => done,
        };
        Ok(self)
    }

    /// Stage three: read the final response if stage two had to resend.
    fn finish(self) -> Result<Response> {
        match self.stage {
            Stage::Done(response) => Ok(response),
            Stage::Resent(mut conn) | Stage::Sent(mut conn) => {
                let response = conn.receive()?;
                self.pool.release(self.host, conn, &response);
                Ok(response)
            }
        }
    }
}
