use crate::dbus_interface::{RollcallService, OBJECT_PATH};
use rollcall_core::Notifier;
use std::time::Duration;
use zbus::object_server::SignalEmitter;
use zbus::Connection;

/// Emits `Notification` signals for desktop clients and logs every message.
pub struct DbusNotifier {
    connection: Connection,
}

impl DbusNotifier {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

impl Notifier for DbusNotifier {
    fn notify(&self, message: &str, duration: Duration) {
        let duration_ms = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
        tracing::info!(message, duration_ms, "notify");

        let connection = self.connection.clone();
        let message = message.to_string();
        tokio::spawn(async move {
            let emitted = match SignalEmitter::new(&connection, OBJECT_PATH) {
                Ok(emitter) => RollcallService::notification(&emitter, &message, duration_ms).await,
                Err(err) => Err(err),
            };
            if let Err(err) = emitted {
                tracing::warn!(error = %err, "failed to emit notification signal");
            }
        });
    }
}
