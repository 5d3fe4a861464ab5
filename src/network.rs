//! Network - registry and scheduler for cognitons
//!
//! ## Lifecycle
//!
//! `Built` -> `Running` -> `Stopped`
//!
//! - **Built**: cognitons are added, validated and wired to the bus.
//! - **Running**: every pacemaker has a live tokio timer and every cogniton
//!   has been initialised. Adding more cognitons is allowed, but their
//!   pacemakers are not armed.
//! - **Stopped**: all timers aborted. Terminal.

use crate::bus::{ChannelBus, SubscriptionId};
use crate::cogniton::Cogniton;
use crate::config::{CognitonConfig, NetworkConfig};
use crate::error::{NetworkError, Result};
use crate::observer::{ChannelSubscriber, Delivery, FnSubscriber, Payload, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkState {
    Built,
    Running,
    Stopped,
}

/// One (interval, cogniton) pair collected at add time.
#[derive(Clone)]
struct Pacemaker {
    rate: u64,
    cogniton: Arc<Cogniton>,
}

/// Owning registry and scheduler for a set of cognitons.
///
/// Each network has its own channel bus, so independent networks never see
/// each other's traffic.
pub struct Network {
    config: NetworkConfig,
    bus: Arc<ChannelBus>,
    cognitons: Vec<Arc<Cogniton>>,
    events: HashSet<String>,
    pacemakers: Vec<Pacemaker>,
    timers: Vec<JoinHandle<()>>,
    state: NetworkState,
}

impl Network {
    /// Create a network with the default configuration.
    pub fn new() -> Self {
        Self::build(NetworkConfig::default())
    }

    /// Create a network with a validated configuration.
    pub fn with_config(config: NetworkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: NetworkConfig) -> Self {
        Self {
            bus: Arc::new(ChannelBus::new(config.dispatch)),
            config,
            cognitons: Vec::new(),
            events: HashSet::new(),
            pacemakers: Vec::new(),
            timers: Vec::new(),
            state: NetworkState::Built,
        }
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Validate, register and wire a cogniton.
    ///
    /// Nothing is registered or subscribed if validation fails or the id is
    /// already taken.
    pub fn add(&mut self, config: CognitonConfig) -> Result<Arc<Cogniton>> {
        if self.state == NetworkState::Stopped {
            return Err(NetworkError::InvalidState {
                operation: "add a cogniton",
                state: self.state,
            });
        }

        let cogniton = Cogniton::new(
            config,
            self.config.default_max_mem_length,
            Arc::clone(&self.bus),
        )?;
        if self.events.contains(cogniton.id()) {
            return Err(NetworkError::DuplicateId(cogniton.id().to_string()));
        }
        let cogniton = Arc::new(cogniton);

        self.events.insert(cogniton.id().to_string());
        self.cognitons.push(Arc::clone(&cogniton));

        for input in cogniton.inputs() {
            let listener = Arc::downgrade(&cogniton);
            let channel = input.clone();
            self.bus.subscribe(
                input.clone(),
                Arc::new(FnSubscriber(move |payload: &Payload, timestamp: Timestamp| {
                    if let Some(cogniton) = listener.upgrade() {
                        cogniton.receive(&channel, payload, timestamp);
                    }
                })),
            );
        }

        for rate in cogniton.pacemaker_rates() {
            self.pacemakers.push(Pacemaker {
                rate,
                cogniton: Arc::clone(&cogniton),
            });
        }

        if self.state == NetworkState::Running && !cogniton.pacemaker_rates().is_empty() {
            warn!(
                cogniton = %cogniton.id(),
                "added to a running network; its pacemakers will not be armed"
            );
        }
        info!(
            cogniton = %cogniton.id(),
            inputs = ?cogniton.inputs(),
            pacemakers = ?cogniton.pacemaker_rates(),
            "cogniton added"
        );
        Ok(cogniton)
    }

    /// Subscribe an external handler to a channel.
    pub fn on<F>(&self, channel: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Payload, Timestamp) + Send + Sync + 'static,
    {
        self.bus.subscribe_fn(channel, handler)
    }

    /// Remove a subscription made with `on` or `observe`.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Receive every payload published on a channel through an mpsc receiver.
    pub fn observe(&self, channel: impl Into<String>) -> Receiver<Delivery> {
        let (tx, rx) = mpsc::channel();
        self.bus
            .subscribe(channel, Arc::new(ChannelSubscriber::new(tx)));
        rx
    }

    /// Publish on a channel from outside the network.
    pub fn publish(&self, channel: &str, payload: impl Into<Payload>) {
        self.bus.publish(channel, payload.into());
    }

    // =========================================================================
    // SCHEDULING
    // =========================================================================

    /// Arm all pacemakers and initialise every cogniton.
    ///
    /// Every `init_pacemakers` key is checked before anything is armed or
    /// invoked; an undeclared key fails the whole call and leaves the network
    /// `Built`. Requires a tokio runtime.
    pub fn run(&mut self) -> Result<()> {
        if self.state != NetworkState::Built {
            return Err(NetworkError::InvalidState {
                operation: "run",
                state: self.state,
            });
        }

        for cogniton in &self.cognitons {
            if let Some(&rate) = cogniton
                .init_pacemakers()
                .iter()
                .find(|&&rate| !cogniton.has_pacemaker(rate))
            {
                return Err(NetworkError::UnknownPacemaker {
                    unit: cogniton.id().to_string(),
                    rate,
                });
            }
        }

        let runtime = Handle::try_current().map_err(|_| NetworkError::NoRuntime)?;

        for pacemaker in &self.pacemakers {
            self.timers.push(arm(&runtime, pacemaker.clone()));
        }
        self.state = NetworkState::Running;
        info!(
            cognitons = self.cognitons.len(),
            timers = self.timers.len(),
            "network running"
        );

        for cogniton in &self.cognitons {
            if cogniton.run_init() {
                debug!(cogniton = %cogniton.id(), "init");
            }
            for &rate in cogniton.init_pacemakers() {
                cogniton.fire_pacemaker(rate)?;
            }
        }
        Ok(())
    }

    /// Abort every armed timer. The network cannot be run again.
    pub fn stop(&mut self) {
        if self.state == NetworkState::Stopped {
            return;
        }
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        self.state = NetworkState::Stopped;
        info!("network stopped");
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn state(&self) -> NetworkState {
        self.state
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<ChannelBus> {
        &self.bus
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Cogniton>> {
        self.cognitons.iter().find(|c| c.id() == id)
    }

    /// Cognitons in registration order.
    pub fn cognitons(&self) -> &[Arc<Cogniton>] {
        &self.cognitons
    }

    pub fn ids(&self) -> Vec<&str> {
        self.cognitons.iter().map(|c| c.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.cognitons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cognitons.is_empty()
    }

    /// Number of collected (interval, cogniton) pacemaker entries.
    pub fn pacemaker_count(&self) -> usize {
        self.pacemakers.len()
    }

    /// Number of live timers.
    pub fn timer_count(&self) -> usize {
        self.timers.iter().filter(|t| !t.is_finished()).count()
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        if self.state == NetworkState::Running {
            self.stop();
        }
    }
}

/// Spawn the recurring timer for one pacemaker.
///
/// The first firing happens one interval after arming. Late ticks are not
/// bunched up; the schedule just shifts.
fn arm(runtime: &Handle, pacemaker: Pacemaker) -> JoinHandle<()> {
    let period = Duration::from_millis(pacemaker.rate);
    debug!(
        cogniton = %pacemaker.cogniton.id(),
        rate_ms = pacemaker.rate,
        "arming pacemaker"
    );

    let start = Instant::now() + period;
    runtime.spawn(async move {
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            beat(&pacemaker);
        }
    })
}

/// One timer firing.
fn beat(pacemaker: &Pacemaker) {
    if let Err(err) = pacemaker.cogniton.fire_pacemaker(pacemaker.rate) {
        error!(%err, "pacemaker failed");
    }
}
