use rollcall_core::{MonitorSnapshot, Stopper};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.freedesktop.Rollcall1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Rollcall1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.freedesktop.Rollcall1
/// Object path: /org/freedesktop/Rollcall1
pub struct RollcallService {
    snapshots: watch::Receiver<MonitorSnapshot>,
    stopper: Stopper,
    enrolled: usize,
    stopped: AtomicBool,
    shutdown: Arc<Notify>,
}

impl RollcallService {
    pub fn new(
        snapshots: watch::Receiver<MonitorSnapshot>,
        stopper: Stopper,
        enrolled: usize,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            snapshots,
            stopper,
            enrolled,
            stopped: AtomicBool::new(false),
            shutdown,
        }
    }

    fn status_json(&self) -> serde_json::Value {
        let snapshot = self.snapshots.borrow().clone();
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "enrolled_embeddings": self.enrolled,
            "stopped": self.stopped.load(Ordering::SeqCst),
            "monitor": snapshot,
        })
    }

    fn request_stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.stopper.stop();
        self.shutdown.notify_one();
        true
    }
}

#[interface(name = "org.freedesktop.Rollcall1")]
impl RollcallService {
    /// Current monitor state as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.status_json().to_string())
    }

    /// Stop monitoring. Returns false if it was already stopping.
    async fn stop(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("stop requested over D-Bus");
        Ok(self.request_stop())
    }

    /// Per-tick notices and the absence alert.
    #[zbus(signal)]
    pub async fn notification(
        emitter: &SignalEmitter<'_>,
        message: &str,
        duration_ms: u32,
    ) -> zbus::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{MonitorPhase, MonitorState};

    fn service() -> (RollcallService, watch::Receiver<bool>) {
        let snapshot = MonitorSnapshot {
            session: Default::default(),
            label: "Alice".into(),
            state: MonitorState::default(),
            phase: MonitorPhase::Idle,
            last_report: None,
            last_tick_at: None,
        };
        let (_tx, snapshots) = watch::channel(snapshot);
        let (stopper, stop_rx) = Stopper::pair();
        (
            RollcallService::new(snapshots, stopper, 3, Arc::new(Notify::new())),
            stop_rx,
        )
    }

    #[test]
    fn test_status_json_shape() {
        let (svc, _stop) = service();
        let status = svc.status_json();
        assert_eq!(status["enrolled_embeddings"], 3);
        assert_eq!(status["monitor"]["label"], "Alice");
        assert_eq!(status["monitor"]["phase"], "idle");
        assert_eq!(status["stopped"], false);
    }

    #[test]
    fn test_stop_only_once() {
        let (svc, stop) = service();
        assert!(svc.request_stop());
        assert!(*stop.borrow());
        assert!(!svc.request_stop());
        assert_eq!(svc.status_json()["stopped"], true);
    }
}
