//! In-process event bus for core → dispatcher updates.
//!
//! Whatever dispatch layer is attached (websocket relay, CLI log drain)
//! subscribes here; the core never knows who is listening.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use deck_offload_types::{ClipRecord, SlotStatus, TransferredFile};

/// Tagged payloads the core publishes upward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OffloadEvent {
    Connected { address: String },
    Disconnected,
    Error { message: String },
    ClipCatalog { clips: Vec<ClipRecord> },
    SlotStatus { status: SlotStatus },
    MonitoringStarted { slots: Vec<u8>, destination: String },
    FileDetected { slot: u8, name: String },
    TransferStarted { name: String },
    TransferComplete { name: String, destination: String },
    MonitoringStopped { last_transferred: Option<TransferredFile> },
    FileRenamed { old_name: String, new_name: String },
}

#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<OffloadEvent>,
}

impl EventBus {
    /// Create a new event bus with a bounded broadcast channel.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<OffloadEvent> {
        self.sender.subscribe()
    }

    pub fn connected(&self, address: &str) {
        let _ = self.sender.send(OffloadEvent::Connected {
            address: address.to_string(),
        });
    }

    pub fn disconnected(&self) {
        let _ = self.sender.send(OffloadEvent::Disconnected);
    }

    /// Report a failure with a human-readable message.
    pub fn error(&self, message: impl Into<String>) {
        let _ = self.sender.send(OffloadEvent::Error {
            message: message.into(),
        });
    }

    /// Publish a freshly assembled clip catalog, in device order.
    pub fn clip_catalog(&self, clips: Vec<ClipRecord>) {
        let _ = self.sender.send(OffloadEvent::ClipCatalog { clips });
    }

    pub fn slot_status(&self, status: SlotStatus) {
        let _ = self.sender.send(OffloadEvent::SlotStatus { status });
    }

    pub fn monitoring_started(&self, slots: &[u8], destination: &Path) {
        let _ = self.sender.send(OffloadEvent::MonitoringStarted {
            slots: slots.to_vec(),
            destination: destination.display().to_string(),
        });
    }

    pub fn file_detected(&self, slot: u8, name: &str) {
        let _ = self.sender.send(OffloadEvent::FileDetected {
            slot,
            name: name.to_string(),
        });
    }

    pub fn transfer_started(&self, name: &str) {
        let _ = self.sender.send(OffloadEvent::TransferStarted {
            name: name.to_string(),
        });
    }

    pub fn transfer_complete(&self, name: &str, destination: &Path) {
        let _ = self.sender.send(OffloadEvent::TransferComplete {
            name: name.to_string(),
            destination: destination.display().to_string(),
        });
    }

    pub fn monitoring_stopped(&self, last_transferred: Option<TransferredFile>) {
        let _ = self
            .sender
            .send(OffloadEvent::MonitoringStopped { last_transferred });
    }

    pub fn file_renamed(&self, old_name: &str, new_name: &str) {
        let _ = self.sender.send(OffloadEvent::FileRenamed {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
