//! Network and cogniton configuration

use crate::cogniton::CognitonState;
use crate::error::{NetworkError, Result};
use crate::observer::{Payload, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Ring bound used when a cogniton does not set `max_mem_length`.
pub const DEFAULT_MAX_MEM_LENGTH: usize = 1024;

/// Reserved memory channel holding what a cogniton emitted.
pub const EMITTED: &str = "emitted";

/// Reaction function, invoked as `(state, payload, timestamp, channel)`.
///
/// `channel` is `None` only for direct `fire` calls without a channel.
pub type Cognitor =
    Arc<dyn Fn(&mut CognitonState, &Payload, Timestamp, Option<&str>) + Send + Sync>;

/// Thunk bound to a cogniton (pacemakers and `init`).
pub type Thunk = Arc<dyn Fn(&mut CognitonState) + Send + Sync>;

/// How re-entrant publishes are ordered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchOrder {
    /// Publishes are queued and delivered in FIFO order by a single drain
    /// loop. Deep reaction chains do not grow the call stack.
    #[default]
    BreadthFirst,
    /// Each publish is delivered immediately and recursively.
    DepthFirst,
}

/// Configuration for a network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Delivery ordering on the channel bus.
    pub dispatch: DispatchOrder,

    /// Ring bound for cognitons that don't set their own.
    pub default_max_mem_length: usize,
}

impl NetworkConfig {
    /// Create a configuration with the given dispatch order.
    pub fn new(dispatch: DispatchOrder) -> Self {
        Self {
            dispatch,
            default_max_mem_length: DEFAULT_MAX_MEM_LENGTH,
        }
    }

    pub fn with_default_max_mem_length(mut self, len: usize) -> Self {
        self.default_max_mem_length = len;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.default_max_mem_length == 0 {
            return Err(NetworkError::InvalidNetworkConfig(
                "default_max_mem_length must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::new(DispatchOrder::default())
    }
}

/// Definition of a cogniton, handed to `Network::add`.
///
/// ```rust
/// use cogniton_network::CognitonConfig;
///
/// let config = CognitonConfig::new("doubler", |me, payload, _ts, _channel| {
///     if let Some(n) = payload.as_i64() {
///         me.emit(n * 2);
///     }
/// })
/// .description("doubles every number it hears")
/// .input("numbers")
/// .max_mem_length(16);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct CognitonConfig {
    /// Identity and output channel name.
    pub id: String,

    /// Documentation only.
    pub description: Option<String>,

    /// Ring bound. `None` falls back to the network default.
    pub max_mem_length: Option<usize>,

    /// Channels subscribed to at add time.
    pub inputs: Vec<String>,

    /// Interval in milliseconds -> thunk.
    pub pacemakers: BTreeMap<u64, Thunk>,

    /// One-time setup run by `Network::run`.
    pub init: Option<Thunk>,

    /// Pacemaker intervals fired once, in order, by `Network::run`.
    pub init_pacemakers: Vec<u64>,

    pub(crate) cognitor: Cognitor,
}

impl CognitonConfig {
    pub fn new<F>(id: impl Into<String>, cognitor: F) -> Self
    where
        F: Fn(&mut CognitonState, &Payload, Timestamp, Option<&str>) + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: None,
            max_mem_length: None,
            inputs: Vec::new(),
            pacemakers: BTreeMap::new(),
            init: None,
            init_pacemakers: Vec::new(),
            cognitor: Arc::new(cognitor),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn max_mem_length(mut self, len: usize) -> Self {
        self.max_mem_length = Some(len);
        self
    }

    pub fn input(mut self, channel: impl Into<String>) -> Self {
        self.inputs.push(channel.into());
        self
    }

    pub fn inputs<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(channels.into_iter().map(Into::into));
        self
    }

    /// Add a pacemaker firing every `rate_ms` milliseconds.
    pub fn pacemaker<F>(mut self, rate_ms: u64, thunk: F) -> Self
    where
        F: Fn(&mut CognitonState) + Send + Sync + 'static,
    {
        self.pacemakers.insert(rate_ms, Arc::new(thunk));
        self
    }

    pub fn init<F>(mut self, thunk: F) -> Self
    where
        F: Fn(&mut CognitonState) + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(thunk));
        self
    }

    pub fn init_pacemakers(mut self, rates: impl IntoIterator<Item = u64>) -> Self {
        self.init_pacemakers.extend(rates);
        self
    }

    /// Validate the definition.
    ///
    /// `init_pacemakers` is not checked here; `Network::run` rejects keys
    /// that name no declared pacemaker.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(NetworkError::config(
                self.id.clone(),
                "\"id\" is required and must be a non-empty string",
            ));
        }
        if self.max_mem_length == Some(0) {
            return Err(NetworkError::config(
                self.id.clone(),
                "max_mem_length must be an integer greater than 0",
            ));
        }
        if self.pacemakers.contains_key(&0) {
            return Err(NetworkError::config(
                self.id.clone(),
                "rate of pacemaker must be an integer greater than 0",
            ));
        }

        let mut seen = HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            if input.is_empty() {
                return Err(NetworkError::config(
                    self.id.clone(),
                    "input channel names must be non-empty",
                ));
            }
            if input == EMITTED {
                return Err(NetworkError::config(
                    self.id.clone(),
                    format!("input \"{EMITTED}\" collides with the reserved memory channel"),
                ));
            }
            if !seen.insert(input.as_str()) {
                return Err(NetworkError::config(
                    self.id.clone(),
                    format!("input \"{input}\" is listed more than once"),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CognitonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CognitonConfig")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("max_mem_length", &self.max_mem_length)
            .field("inputs", &self.inputs)
            .field("pacemakers", &self.pacemakers.keys().collect::<Vec<_>>())
            .field("init", &self.init.is_some())
            .field("init_pacemakers", &self.init_pacemakers)
            .finish()
    }
}
