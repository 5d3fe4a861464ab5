//! Cogniton - a named reactive unit with bounded per-channel memory
//!
//! A cogniton reacts to payloads on its input channels, may fire itself from
//! pacemakers, and publishes on the channel named after its own id.
//!
//! ## Record after react
//!
//! When a payload arrives on an input channel the cognitor runs first and
//! only then is the payload pushed into that channel's ring. Inside the
//! reaction `memory(channel, 0)` therefore still returns the previous payload,
//! which is what "did I see this before" logic compares against.
//!
//! ## Outbox
//!
//! The cognitor and thunks run with the cogniton's state locked. Payloads
//! they `emit` are recorded immediately but published only after the lock is
//! released, so reaction cycles between cognitons cannot deadlock.

use crate::bus::ChannelBus;
use crate::config::{Cognitor, CognitonConfig, Thunk, EMITTED};
use crate::error::{NetworkError, Result};
use crate::observer::{Payload, Timestamp};
use crate::ring::MemoryRing;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{error, trace};

/// Mutable state of a cogniton, handed to its cognitor and thunks.
pub struct CognitonState {
    id: String,
    max_mem_length: usize,
    mem: HashMap<String, MemoryRing>,
    vars: HashMap<String, Value>,
    outbox: Vec<Payload>,
}

impl CognitonState {
    fn new(id: String, max_mem_length: usize, inputs: &[String]) -> Self {
        let mut mem = HashMap::with_capacity(inputs.len() + 1);
        mem.insert(EMITTED.to_string(), MemoryRing::new(max_mem_length));
        for input in inputs {
            mem.insert(input.clone(), MemoryRing::new(max_mem_length));
        }

        Self {
            id,
            max_mem_length,
            mem,
            vars: HashMap::new(),
            outbox: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // =========================================================================
    // MEMORY
    // =========================================================================

    /// Look back into a memory channel.
    ///
    /// Depth 0 is the most recent payload. An unknown channel is logged and
    /// yields `None`.
    pub fn memory(&self, key: &str, depth: usize) -> Option<&Payload> {
        match self.mem.get(key) {
            Some(ring) => ring.peek(depth),
            None => {
                error!(
                    cogniton = %self.id,
                    channel = key,
                    existing = ?self.memory_channels(),
                    "trying to access nonexistent memory channel"
                );
                None
            }
        }
    }

    /// Look back into what this cogniton emitted.
    pub fn emitted(&self, depth: usize) -> Option<&Payload> {
        self.memory(EMITTED, depth)
    }

    /// The whole ring of a memory channel.
    pub fn ring(&self, key: &str) -> Option<&MemoryRing> {
        self.mem.get(key)
    }

    /// Names of all memory channels, sorted.
    pub fn memory_channels(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.mem.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn record(&mut self, channel: &str, payload: Payload) {
        let bound = self.max_mem_length;
        self.mem
            .entry(channel.to_string())
            .or_insert_with(|| MemoryRing::new(bound))
            .push(payload);
    }

    // =========================================================================
    // SCRATCH STATE
    // =========================================================================

    pub fn remember(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn recall(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn forget(&mut self, key: &str) -> Option<Value> {
        self.vars.remove(key)
    }

    // =========================================================================
    // OUTPUT
    // =========================================================================

    /// Record into the `emitted` ring and queue for publishing on this
    /// cogniton's channel.
    pub fn emit(&mut self, payload: impl Into<Payload>) {
        let payload = payload.into();
        self.record(EMITTED, payload.clone());
        self.outbox.push(payload);
    }

    fn take_outbox(&mut self) -> Vec<Payload> {
        std::mem::take(&mut self.outbox)
    }
}

impl fmt::Debug for CognitonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CognitonState")
            .field("id", &self.id)
            .field("max_mem_length", &self.max_mem_length)
            .field("memory_channels", &self.memory_channels())
            .field("vars", &self.vars)
            .finish()
    }
}

/// A registered cogniton.
///
/// Shared between the network, the bus listeners of its inputs and its
/// pacemaker timers.
pub struct Cogniton {
    id: String,
    description: Option<String>,
    inputs: Vec<String>,
    cognitor: Cognitor,
    pacemakers: BTreeMap<u64, Thunk>,
    init: Option<Thunk>,
    init_pacemakers: Vec<u64>,
    state: Mutex<CognitonState>,
    bus: Arc<ChannelBus>,
}

impl Cogniton {
    /// Build a cogniton from a definition. Does not touch the bus.
    pub(crate) fn new(config: CognitonConfig, default_max_mem_length: usize, bus: Arc<ChannelBus>) -> Result<Self> {
        config.validate()?;

        let CognitonConfig {
            id,
            description,
            max_mem_length,
            inputs,
            pacemakers,
            init,
            init_pacemakers,
            cognitor,
        } = config;

        let state = CognitonState::new(
            id.clone(),
            max_mem_length.unwrap_or(default_max_mem_length),
            &inputs,
        );

        Ok(Self {
            id,
            description,
            inputs,
            cognitor,
            pacemakers,
            init,
            init_pacemakers,
            state: Mutex::new(state),
            bus,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn max_mem_length(&self) -> usize {
        self.state.lock().max_mem_length
    }

    /// Declared pacemaker intervals, ascending.
    pub fn pacemaker_rates(&self) -> Vec<u64> {
        self.pacemakers.keys().copied().collect()
    }

    pub fn init_pacemakers(&self) -> &[u64] {
        &self.init_pacemakers
    }

    pub fn has_pacemaker(&self, rate: u64) -> bool {
        self.pacemakers.contains_key(&rate)
    }

    // =========================================================================
    // INVOCATION
    // =========================================================================

    /// Bus listener body for one input channel.
    pub(crate) fn receive(&self, channel: &str, payload: &Payload, timestamp: Timestamp) {
        trace!(cogniton = %self.id, channel, "receive");
        let outbox = {
            let mut state = self.state.lock();
            (self.cognitor)(&mut *state, payload, timestamp, Some(channel));
            state.record(channel, payload.clone());
            state.take_outbox()
        };
        self.flush(outbox);
    }

    /// Invoke the cognitor directly, bypassing the bus.
    ///
    /// With a channel, that channel's ring is created if needed and the
    /// payload is recorded after the reaction.
    pub fn fire(&self, payload: impl Into<Payload>, channel: Option<&str>) {
        let payload = payload.into();
        let outbox = {
            let mut state = self.state.lock();
            (self.cognitor)(&mut *state, &payload, Utc::now(), channel);
            if let Some(channel) = channel {
                state.record(channel, payload);
            }
            state.take_outbox()
        };
        self.flush(outbox);
    }

    /// Record into `emitted` and publish on this cogniton's channel.
    pub fn emit(&self, payload: impl Into<Payload>) {
        let outbox = {
            let mut state = self.state.lock();
            state.emit(payload);
            state.take_outbox()
        };
        self.flush(outbox);
    }

    /// Run one pacemaker thunk now.
    pub fn fire_pacemaker(&self, rate: u64) -> Result<()> {
        let thunk = self
            .pacemakers
            .get(&rate)
            .ok_or_else(|| NetworkError::UnknownPacemaker {
                unit: self.id.clone(),
                rate,
            })?;
        self.run_thunk(thunk);
        Ok(())
    }

    /// Run the `init` thunk, if any. Returns whether one was declared.
    pub fn run_init(&self) -> bool {
        match &self.init {
            Some(init) => {
                self.run_thunk(init);
                true
            }
            None => false,
        }
    }

    fn run_thunk(&self, thunk: &Thunk) {
        let outbox = {
            let mut state = self.state.lock();
            thunk(&mut *state);
            state.take_outbox()
        };
        self.flush(outbox);
    }

    fn flush(&self, outbox: Vec<Payload>) {
        for payload in outbox {
            self.bus.publish(&self.id, payload);
        }
    }

    // =========================================================================
    // STATE ACCESS
    // =========================================================================

    /// Cloned lookback into a memory channel; see `CognitonState::memory`.
    pub fn memory(&self, key: &str, depth: usize) -> Option<Payload> {
        self.state.lock().memory(key, depth).cloned()
    }

    pub fn emitted(&self, depth: usize) -> Option<Payload> {
        self.memory(EMITTED, depth)
    }

    pub fn remember(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.lock().remember(key, value);
    }

    pub fn recall(&self, key: &str) -> Option<Value> {
        self.state.lock().recall(key).cloned()
    }

    pub fn memory_channels(&self) -> Vec<String> {
        self.state
            .lock()
            .memory_channels()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Run a closure against the locked state.
    ///
    /// Emits made inside are published once the lock is released.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut CognitonState) -> R) -> R {
        let (result, outbox) = {
            let mut state = self.state.lock();
            let result = f(&mut *state);
            (result, state.take_outbox())
        };
        self.flush(outbox);
        result
    }
}

impl fmt::Debug for Cogniton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cogniton")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("inputs", &self.inputs)
            .field("pacemakers", &self.pacemaker_rates())
            .field("init", &self.init.is_some())
            .field("init_pacemakers", &self.init_pacemakers)
            .finish()
    }
}
