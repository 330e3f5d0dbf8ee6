//! Collaborator implementations shipped with the crate.
//!
//! - [`replay`]: plays a recorded frame capture through the peer radio interface.
//! - [`memory`]: scriptable in-memory radio, network and broker for tests and simulation.

pub mod memory;
pub mod replay;

pub use memory::{Event, EventLog, MemoryBroker, MemoryNetwork, MemoryRadio};
pub use replay::ReplayRadio;
