//! Cogniton Network - reactive units wired through broadcast channels
//!
//! No unit calls another. Every output is a broadcast.
//!
//! # Core Types
//!
//! - **Cogniton**: a named reaction with bounded per-channel memory
//! - **ChannelBus**: named broadcast channels, one bus per network
//! - **MemoryRing**: bounded FIFO history with lookback by depth
//! - **Network**: registry and scheduler that wires and drives cognitons
//!
//! # Architecture: Unit / Channel / Pacemaker
//!
//! 1. **Units** - cognitons react to payloads on their input channels
//! 2. **Channels** - a cogniton's id is its output channel; `emit` broadcasts
//!    to every cogniton that lists that id as an input
//! 3. **Pacemakers** - periodic timers that let a cogniton act on its own
//!
//! Reactions may emit, which triggers further reactions. The network forms an
//! implicit, possibly cyclic, event graph with no central control logic.
//!
//! # Core Concepts
//!
//! - **Record after react**: a payload lands in memory only after the
//!   cognitor has seen it, so memory always holds *prior* history
//! - **Bounded memory**: every ring keeps at most `max_mem_length` payloads
//! - **Scratch state**: `remember`/`recall` for free-form per-unit variables
//! - **Explicit lifecycle**: `run` arms timers, `stop` cancels them
//!
//! # Example: A Heartbeat and a Listener
//!
//! ```rust
//! use cogniton_network::{CognitonConfig, Network};
//! use serde_json::json;
//!
//! let mut network = Network::new();
//!
//! // 1. A cogniton that emits on every heartbeat
//! let heart = network.add(
//!     CognitonConfig::new("heart", |_, _, _, _| {})
//!         .pacemaker(1000, |me| me.emit(42)),
//! )?;
//!
//! // 2. A cogniton listening to the heart
//! let ear = network.add(
//!     CognitonConfig::new("ear", |me, payload, _ts, _channel| {
//!         // Memory still holds the previous beat here
//!         let before = me.memory("heart", 0).cloned();
//!         me.remember("before", before.unwrap_or_default());
//!         me.remember("last", payload.clone());
//!     })
//!     .input("heart"),
//! )?;
//!
//! // 3. Beat once by hand (Network::run arms the timers inside tokio)
//! heart.fire_pacemaker(1000)?;
//!
//! assert_eq!(ear.recall("last"), Some(json!(42)));
//! assert_eq!(ear.recall("before"), Some(json!(null)));
//! assert_eq!(ear.memory("heart", 0), Some(json!(42)));
//! # Ok::<(), cogniton_network::NetworkError>(())
//! ```

mod bus;
mod cogniton;
mod config;
mod error;
mod network;
mod observer;
mod ring;

#[cfg(test)]
mod testing;

pub use bus::{BusStats, ChannelBus, SubscriptionId};
pub use cogniton::{Cogniton, CognitonState};
pub use config::{
    Cognitor, CognitonConfig, DispatchOrder, NetworkConfig, Thunk, DEFAULT_MAX_MEM_LENGTH, EMITTED,
};
pub use error::{NetworkError, Result};
pub use network::{Network, NetworkState};
pub use observer::{ChannelSubscriber, Delivery, FnSubscriber, Payload, Subscriber, Timestamp};
pub use ring::MemoryRing;
