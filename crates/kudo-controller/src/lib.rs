//! Escalation reconciler and work-queue runner for kudo.
//!
//! The controller consumes add/update/delete events for escalation objects
//! through a typed, keyed, deduplicating work queue, drives the escalation
//! state machine, fans out to grant providers, writes status back through
//! the store seam and emits an audit trail. Every timing decision reads an
//! injected clock so the state machine is deterministic under test.

pub mod audit;
pub mod clock;
pub mod config;
pub mod queue;
pub mod reconciler;

pub use audit::{AuditSink, EventRecorder, K8sEventSink, MultiAsyncSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuditConfig, Config, ControllerConfig, WebhookConfig};
pub use queue::{Event, EventHandler, EventInsight, HandlerError, Keyed, QueuedEventHandler};
pub use reconciler::EscalationController;
