//! In-process SNMP agent
//!
//! A [`MemoryAgent`] holds an ordered OID tree and answers `get` / `walk` the
//! way a real agent would. Failures can be injected per OID, for the whole
//! agent, or for the next `n` session opens, which is how the retry and
//! degradation paths are exercised without a network.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::{Oid, Session, SessionFactory, SessionOptions, SnmpError, SnmpResult, SnmpValue};

#[derive(Default)]
struct AgentState {
    tree: BTreeMap<Oid, SnmpValue>,
    failing: HashSet<Oid>,
    unreachable: bool,
}

/// Simulated agent shared between the test and the sessions it hands out
#[derive(Default)]
pub struct MemoryAgent {
    state: RwLock<AgentState>,
    failing_opens: AtomicU32,
    opens: AtomicUsize,
    requests: AtomicUsize,
}

impl MemoryAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single value; builder form
    pub fn with(self, oid: &[u32], value: SnmpValue) -> Self {
        self.set(Oid::from(oid), value);
        self
    }

    pub fn set(&self, oid: Oid, value: SnmpValue) {
        self.write().tree.insert(oid, value);
    }

    /// Set a table cell `column.index`
    pub fn set_row(&self, column: &[u32], index: u32, value: SnmpValue) {
        self.set(Oid::from(column).child(index), value);
    }

    /// Set a cell with an arbitrary multi-arc suffix (e.g. a MAC-indexed row)
    pub fn set_indexed(&self, column: &[u32], suffix: &[u32], value: SnmpValue) {
        self.set(Oid::from(column).join(&Oid::from(suffix)), value);
    }

    pub fn remove(&self, oid: &Oid) {
        self.write().tree.remove(oid);
    }

    /// Every request touching this OID (or walking a subtree containing it) times out
    pub fn fail_oid(&self, oid: Oid) {
        self.write().failing.insert(oid);
    }

    pub fn clear_failures(&self) {
        self.write().failing.clear();
    }

    /// Make every request time out until reset
    pub fn set_unreachable(&self, unreachable: bool) {
        self.write().unreachable = unreachable;
    }

    /// Refuse the next `count` session opens
    pub fn fail_next_opens(&self, count: u32) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Number of sessions opened against this agent
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of `get` / `walk` calls served (including failed ones)
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, AgentState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, AgentState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_open(&self, host: &str) -> SnmpResult<()> {
        let refused = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(SnmpError::Unreachable(format!("{host}: connection refused")));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, host: &str, oid: &Oid) -> SnmpResult<SnmpValue> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let state = self.read();
        if state.unreachable || state.failing.contains(oid) {
            return Err(SnmpError::Timeout {
                host: host.to_string(),
            });
        }

        match state.tree.get(oid) {
            Some(value) if !value.is_exception() => Ok(value.clone()),
            _ => Err(SnmpError::NoSuchObject(oid.clone())),
        }
    }

    fn walk(&self, host: &str, base: &Oid) -> SnmpResult<Vec<(Oid, SnmpValue)>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let state = self.read();
        if state.unreachable || state.failing.iter().any(|f| f.starts_with(base)) {
            return Err(SnmpError::Timeout {
                host: host.to_string(),
            });
        }

        Ok(state
            .tree
            .range(base.clone()..)
            .map_while(|(oid, value)| oid.suffix_after(base).map(|s| (s, value.clone())))
            .filter(|(suffix, _)| !suffix.is_empty())
            .collect())
    }
}

/// Session bound to a [`MemoryAgent`]
pub struct MemorySession {
    host: String,
    agent: Arc<MemoryAgent>,
}

#[async_trait]
impl Session for MemorySession {
    async fn get(&self, oid: &Oid) -> SnmpResult<SnmpValue> {
        self.agent.get(&self.host, oid)
    }

    async fn walk(&self, oid: &Oid) -> SnmpResult<Vec<(Oid, SnmpValue)>> {
        self.agent.walk(&self.host, oid)
    }
}

/// Routes sessions to agents by host; unknown hosts are unreachable
#[derive(Default, Clone)]
pub struct MemorySessionFactory {
    agents: Arc<RwLock<HashMap<String, Arc<MemoryAgent>>>>,
}

impl MemorySessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, host: impl Into<String>, agent: MemoryAgent) -> Arc<MemoryAgent> {
        let agent = Arc::new(agent);
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host.into(), agent.clone());
        agent
    }

    pub fn agent(&self, host: &str) -> Option<Arc<MemoryAgent>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .cloned()
    }
}

#[async_trait]
impl SessionFactory for MemorySessionFactory {
    async fn open(&self, options: &SessionOptions) -> SnmpResult<Box<dyn Session>> {
        let agent = self
            .agent(&options.host)
            .ok_or_else(|| SnmpError::Unreachable(format!("{}: no route to host", options.host)))?;
        agent.try_open(&options.host)?;

        Ok(Box::new(MemorySession {
            host: options.host.clone(),
            agent,
        }))
    }
}
