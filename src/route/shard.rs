/// Key-partitioned routing over shard groups
///
/// Maps application keys to the set of hosts serving that shard. Groups may
/// overlap: one host can serve several keys and one key can be replicated
/// across several hosts. Multicast finds a minimal set of hosts covering a
/// batch of keys, so overlapping responses are expected and acceptable when
/// partitioning is not disjoint.
use crate::error::{Error, Result};
use crate::route::{Host, ResourceRouter};
use crate::transport::{Method, Response};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Keyed container mapping shard keys to host groups, with a router over
/// the union of hosts.
pub struct ShardIndex {
    groups: BTreeMap<String, BTreeSet<Host>>,
    router: ResourceRouter,
}

impl ShardIndex {
    /// Build from (host, key) pairs; repeated pairs are idempotent.
    pub fn new<I>(router: ResourceRouter, pairs: I) -> Self
    where
        I: IntoIterator<Item = (Host, String)>,
    {
        let mut groups: BTreeMap<String, BTreeSet<Host>> = BTreeMap::new();
        for (host, key) in pairs {
            groups.entry(key).or_default().insert(host);
        }
        Self { groups, router }
    }

    /// Build from a host to keys multimap (a host may serve many keys).
    pub fn from_multimap(router: ResourceRouter, multimap: &BTreeMap<Host, Vec<String>>) -> Self {
        let pairs = multimap.iter().flat_map(|(host, keys)| {
            keys.iter().map(move |key| (host.clone(), key.clone()))
        });
        Self::new(router, pairs)
    }

    pub fn router(&self) -> &ResourceRouter {
        &self.router
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// The shard group (host set) for a key.
    pub fn hosts(&self, key: &str) -> Option<&BTreeSet<Host>> {
        self.groups.get(key)
    }

    fn group(&self, key: &str) -> Result<Vec<Host>> {
        match self.groups.get(key) {
            Some(group) => Ok(group.iter().cloned().collect()),
            None => Err(Error::unknown_key(key)),
        }
    }

    /// Send to one host of the key's shard group.
    pub fn unicast(
        &self,
        key: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response> {
        let group = self.group(key)?;
        self.router.unicast(method, path, body, &group)
    }

    /// Send to every host of the key's shard group.
    pub fn broadcast(
        &self,
        key: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Vec<Response>> {
        let group = self.group(key)?;
        self.router.broadcast(method, path, body, &group)
    }

    /// Send to a minimal host set covering every key's shard group.
    pub fn multicast(
        &self,
        keys: &[&str],
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Vec<Response>> {
        let chosen = self.covering_hosts(keys)?;
        debug!(keys = keys.len(), hosts = chosen.len(), "multicast");
        self.router.broadcast(method, path, body, &chosen)
    }

    /// Compute the host set for a multicast: expand combinations key by key
    /// (cross product of each key's hosts against the partial combinations),
    /// then among the fewest-host combinations pick by aggregate priority,
    /// ties at random.
    ///
    /// Combination count can grow exponentially with distinct shard groups;
    /// key batches and replication factors are small in practice, so this is
    /// a known scaling limit rather than a bug.
    pub fn covering_hosts(&self, keys: &[&str]) -> Result<Vec<Host>> {
        let mut combinations = BTreeSet::from([BTreeSet::new()]);
        for key in keys {
            let group = self.groups.get(*key).ok_or_else(|| Error::unknown_key(*key))?;
            let mut expanded = BTreeSet::new();
            for combination in &combinations {
                for host in group {
                    let mut candidate: BTreeSet<Host> = combination.clone();
                    candidate.insert(host.clone());
                    expanded.insert(candidate);
                }
            }
            combinations = expanded;
        }

        let smallest = combinations.iter().map(BTreeSet::len).min().unwrap_or(0);
        let minimal: Vec<&BTreeSet<Host>> = combinations
            .iter()
            .filter(|combination| combination.len() == smallest)
            .collect();

        // Rank minimal combinations by summed host priority; a combination
        // containing a failed host is ineligible.
        let mut ranked: BTreeMap<i64, Vec<&BTreeSet<Host>>> = BTreeMap::new();
        for &combination in &minimal {
            let score: Option<i64> = combination
                .iter()
                .map(|host| self.router.pool().priority(host))
                .sum();
            if let Some(score) = score {
                ranked.entry(score).or_default().push(combination);
            }
        }
        let best = match ranked.into_iter().next() {
            Some((_, combinations)) => combinations,
            None => {
                return Err(Error::NoEligibleHosts {
                    candidates: minimal.len(),
                })
            }
        };
        let chosen = best[self.router.pick_index(best.len())];
        Ok(chosen.iter().cloned().collect())
    }
}
