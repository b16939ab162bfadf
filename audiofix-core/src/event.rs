use crate::error::FailureKind;
use crate::format::ContainerFormat;
use crate::state::{GenerationState, VerificationState};
use tokio::sync::broadcast;

/// Events emitted while generating or verifying fixtures
#[derive(Debug, Clone)]
pub enum Event {
    // Generation events
    GenerationStarted { total: usize },
    FixtureStateChanged { id: String, state: GenerationState },
    FixtureFailed { id: String, kind: FailureKind, message: String },
    FamilySkipped { format: ContainerFormat, reason: String },
    ManifestCommitted { entries: usize },
    GenerationFinished { generated: usize, failed: usize },

    // Verification events
    VerificationStateChanged { id: String, state: VerificationState },
    VerificationFinished { passed: usize, failed: usize },
}

/// Central event bus
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    pub fn emit(&self, event: Event) {
        // Ignore errors - means no subscribers
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
