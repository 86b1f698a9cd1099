//! Per-session notification timers.
//!
//! Each session owns one scheduler holding explicit task handles: a
//! resource-update tick over the current subscription set and a heartbeat
//! log tick filtered by the session's level threshold. Teardown aborts the
//! handles exactly once; a session that reached Closed never emits again.

use crate::error::Result;
use crate::types::{LoggingLevel, LoggingMessageParams, Notification, ResourceUpdatedParams};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Session state observed by both the dispatcher and the timer tasks.
///
/// Guarded by a std `Mutex`; the lock is never held across an await.
#[derive(Debug)]
pub struct SessionShared {
    pub subscriptions: HashSet<String>,
    pub log_level: LoggingLevel,
}

impl Default for SessionShared {
    fn default() -> Self {
        Self {
            subscriptions: HashSet::new(),
            log_level: LoggingLevel::Info,
        }
    }
}

/// Sends a log notification to the session's sink, honoring the session's
/// level threshold. Messages below the threshold are suppressed.
pub async fn send_log(
    shared: &Arc<Mutex<SessionShared>>,
    sink: &mpsc::Sender<String>,
    level: LoggingLevel,
    logger: Option<&str>,
    data: Value,
) -> Result<()> {
    {
        let state = shared.lock().unwrap();
        if level < state.log_level {
            return Ok(());
        }
    }
    let notification = Notification::new(
        "notifications/message",
        LoggingMessageParams {
            level,
            logger: logger.map(str::to_string),
            data,
        },
    );
    sink.send(serde_json::to_string(&notification)?).await?;
    Ok(())
}

/// Handles for one session's periodic notification tasks.
pub struct NotificationScheduler {
    handles: Vec<JoinHandle<()>>,
}

impl NotificationScheduler {
    /// Starts the resource-update and heartbeat tasks for a session.
    pub fn start(
        session_id: String,
        shared: Arc<Mutex<SessionShared>>,
        sink: mpsc::Sender<String>,
        resource_tick: Duration,
        heartbeat_tick: Duration,
    ) -> Self {
        let resource_handle = {
            let shared = shared.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(resource_tick);
                interval.tick().await; // the first tick fires immediately
                loop {
                    interval.tick().await;
                    let uris: Vec<String> = {
                        let state = shared.lock().unwrap();
                        state.subscriptions.iter().cloned().collect()
                    };
                    for uri in uris {
                        let notification = Notification::new(
                            "notifications/resources/updated",
                            ResourceUpdatedParams { uri },
                        );
                        let Ok(payload) = serde_json::to_string(&notification) else {
                            continue;
                        };
                        if sink.send(payload).await.is_err() {
                            return;
                        }
                    }
                }
            })
        };

        let heartbeat_handle = {
            let session_id = session_id.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(heartbeat_tick);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let subscriptions = shared.lock().unwrap().subscriptions.len();
                    let result = send_log(
                        &shared,
                        &sink,
                        LoggingLevel::Info,
                        Some("gateway"),
                        json!({
                            "message": "session heartbeat",
                            "subscriptions": subscriptions,
                        }),
                    )
                    .await;
                    if result.is_err() {
                        return;
                    }
                }
            })
        };

        debug!(session = %session_id, "notification scheduler started");
        Self {
            handles: vec![resource_handle, heartbeat_handle],
        }
    }

    /// A scheduler with no tasks, for sessions that never activated.
    pub fn idle() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Cancels all timer tasks. Idempotent; called during teardown.
    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for NotificationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
