//! Audit trail emission.
//!
//! Every escalation create, state change and delete is reported to a set
//! of sinks. Sinks are fire-and-forget: each record is dispatched on its
//! own task, a panicking sink is logged and never reaches the reconciler,
//! and reconciliation never waits for a sink to finish.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use kudo_api::{Escalation, ValueError, ValueWithKind};

use crate::config::AuditConfig;

/// Receiver of escalation lifecycle records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// An escalation entered the system.
    async fn record_create(&self, escalation: &Escalation);

    /// An escalation's status changed.
    async fn record_update(&self, old: &Escalation, new: &Escalation);

    /// An escalation left the system.
    async fn record_delete(&self, escalation: &Escalation);
}

/// Fans every record out to all member sinks, each on an isolated task.
#[derive(Default)]
pub struct MultiAsyncSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl std::fmt::Debug for MultiAsyncSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiAsyncSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl MultiAsyncSink {
    /// An empty fan-out.
    pub fn new() -> Self {
        MultiAsyncSink::default()
    }

    /// Add a member sink, builder style.
    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of member sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether there are no member sinks.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn dispatch<F>(&self, call: F)
    where
        F: Fn(Arc<dyn AuditSink>) -> tokio::task::JoinHandle<()>,
    {
        for sink in &self.sinks {
            let handle = call(Arc::clone(sink));

            // The record task is already detached; this watcher only turns
            // a sink panic into a log line.
            tokio::spawn(async move {
                if let Err(err) = handle.await {
                    if err.is_panic() {
                        error!("recovered panic from audit sink");
                    }
                }
            });
        }
    }
}

#[async_trait]
impl AuditSink for MultiAsyncSink {
    async fn record_create(&self, escalation: &Escalation) {
        let escalation = escalation.clone();
        self.dispatch(move |sink| {
            let escalation = escalation.clone();
            tokio::spawn(async move { sink.record_create(&escalation).await })
        });
    }

    async fn record_update(&self, old: &Escalation, new: &Escalation) {
        let old = old.clone();
        let new = new.clone();
        self.dispatch(move |sink| {
            let old = old.clone();
            let new = new.clone();
            tokio::spawn(async move { sink.record_update(&old, &new).await })
        });
    }

    async fn record_delete(&self, escalation: &Escalation) {
        let escalation = escalation.clone();
        self.dispatch(move |sink| {
            let escalation = escalation.clone();
            tokio::spawn(async move { sink.record_delete(&escalation).await })
        });
    }
}

/// External event-recording surface (the Kubernetes event broadcaster).
pub trait EventRecorder: Send + Sync {
    /// Attach an event of `event_type`/`reason` to the escalation.
    fn event(&self, escalation: &Escalation, event_type: &str, reason: &str, message: &str);
}

/// Audit sink writing Kubernetes events next to the escalation object.
pub struct K8sEventSink {
    recorder: Arc<dyn EventRecorder>,
}

impl K8sEventSink {
    /// Build the sink over an external recorder.
    pub fn new(recorder: Arc<dyn EventRecorder>) -> Self {
        K8sEventSink { recorder }
    }
}

#[async_trait]
impl AuditSink for K8sEventSink {
    async fn record_create(&self, escalation: &Escalation) {
        self.recorder
            .event(escalation, "Normal", "Create", "Escalation has been created");
    }

    async fn record_update(&self, _old: &Escalation, new: &Escalation) {
        self.recorder.event(
            new,
            "Normal",
            "Update",
            &format!(
                "New state {}, reason is: {}",
                new.status.state, new.status.state_details
            ),
        );
    }

    async fn record_delete(&self, escalation: &Escalation) {
        self.recorder.event(
            escalation,
            "Warning",
            "Delete",
            "Escalation has been deleted",
        );
    }
}

/// Sink kind writing Kubernetes events.
pub const K8S_EVENTS_SINK: &str = "K8sEvents";

/// Payload of a `K8sEvents` entry in `audit.sinks[]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sEventsConfig {
    /// Namespace the events are written to; empty means the default.
    pub namespace: String,
}

/// Failure to assemble sinks from configuration.
#[derive(Debug, Error)]
pub enum AuditBuildError {
    /// The configuration names a sink kind nobody implements.
    #[error("unsupported sink kind {0:?}")]
    UnsupportedSink(String),
    /// A sink payload could not be decoded.
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Assemble the audit fan-out from the tagged `audit.sinks[]` list.
///
/// `make_recorder` bridges to the external event machinery; it receives the
/// decoded per-sink configuration.
pub fn build_sink_from_config(
    cfg: &AuditConfig,
    make_recorder: impl Fn(&K8sEventsConfig) -> Arc<dyn EventRecorder>,
) -> Result<MultiAsyncSink, AuditBuildError> {
    let mut sinks = MultiAsyncSink::new();

    for sink_cfg in &cfg.sinks {
        match sink_cfg.kind() {
            K8S_EVENTS_SINK => {
                let k8s_cfg: K8sEventsConfig = sink_cfg.decode()?;
                sinks = sinks.with(Arc::new(K8sEventSink::new(make_recorder(&k8s_cfg))));
            }
            other => return Err(AuditBuildError::UnsupportedSink(other.to_string())),
        }
    }

    Ok(sinks)
}

/// The tagged default sink entry: Kubernetes events in the default
/// namespace.
pub fn default_sinks() -> Vec<ValueWithKind> {
    vec![ValueWithKind::must_encode(
        K8S_EVENTS_SINK,
        &K8sEventsConfig::default(),
    )]
}
