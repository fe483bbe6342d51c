//! Shared connection and slot status store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use deck_offload_types::SlotStatus;

/// Lifecycle of the single device connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Default)]
pub struct DeckStatus {
    pub state: ConnectionState,
    pub address: Option<String>,
    pub slots: BTreeMap<u8, SlotStatus>,
}

#[derive(Debug, serde::Serialize)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    pub address: Option<String>,
    pub slots: Vec<SlotStatus>,
}

impl DeckStatus {
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            address: self.address.clone(),
            slots: self.slots.values().cloned().collect(),
        }
    }
}
