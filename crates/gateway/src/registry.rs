//! Device registry: IMEI to live session, plus a status cache.
//!
//! The maps are guarded by plain mutexes; no store or broker call happens
//! under a lock. Sessions are represented by handles so the registry never
//! owns a socket: the session task owns its socket and the handle carries
//! the outbound channel and cancellation token needed to reach it.

use chrono::{DateTime, Duration, Utc};
use domain::models::Device;
use protocol::ProtocolKind;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::GatewayStore;

/// One payload queued for a session's socket.
///
/// The optional `result` channel reports the outcome of the actual
/// `write_all` on the socket; the dispatcher settles the broker delivery
/// and the command row from that outcome, never from the enqueue alone.
/// Dropping the frame unwritten (session teardown) drops the sender, which
/// the waiter observes as a failed write.
pub struct OutboundFrame {
    pub bytes: Vec<u8>,
    pub result: Option<oneshot::Sender<std::io::Result<()>>>,
}

impl OutboundFrame {
    /// A frame nobody waits on (session-generated acks in tests).
    pub fn untracked(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            result: None,
        }
    }

    /// A frame plus the receiver resolving when the socket write does.
    pub fn tracked(bytes: Vec<u8>) -> (Self, oneshot::Receiver<std::io::Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                bytes,
                result: Some(tx),
            },
            rx,
        )
    }
}

/// How a session is reachable from outside its own task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub imei: String,
    pub device_id: i64,
    pub protocol: ProtocolKind,
    pub outbound: mpsc::Sender<OutboundFrame>,
    pub cancel: CancellationToken,
}

/// What a session provides when it asks to be registered.
#[derive(Debug, Clone)]
pub struct SessionSeed {
    pub session_id: Uuid,
    pub protocol: ProtocolKind,
    pub outbound: mpsc::Sender<OutboundFrame>,
    pub cancel: CancellationToken,
}

/// Cached per-device liveness state.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    pub activity_count: u64,
}

impl DeviceStatus {
    fn new_online(now: DateTime<Utc>) -> Self {
        Self {
            online: true,
            last_seen: now,
            last_heartbeat: None,
            last_login: None,
            last_activity: now,
            activity_count: 0,
        }
    }
}

/// Result of an authentication attempt.
#[derive(Debug)]
pub enum AuthOutcome {
    Accepted(Device),
    /// Unknown IMEI or `active == false`.
    Rejected,
}

pub struct DeviceRegistry {
    store: Arc<dyn GatewayStore>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    status: Mutex<HashMap<String, DeviceStatus>>,
    /// Per-IMEI FIFO of command ids awaiting a device reply. Devices answer
    /// commands in the order they receive them, which is the per-queue
    /// delivery order, so the oldest outstanding id matches the next
    /// command response.
    pending_commands: Mutex<HashMap<String, VecDeque<String>>>,
}

// Mutex poisoning only happens if a panic escaped while holding the lock;
// the maps stay usable, so recover the guard instead of propagating.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn GatewayStore>) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
            status: Mutex::new(HashMap::new()),
            pending_commands: Mutex::new(HashMap::new()),
        }
    }

    /// Authenticates `imei` against the store and installs the session.
    ///
    /// A second session for the same IMEI displaces the first: the older
    /// handle is cancelled and its socket closes from its own task.
    pub async fn authenticate(
        &self,
        imei: &str,
        seed: SessionSeed,
    ) -> Result<AuthOutcome, sqlx::Error> {
        let device = match self.store.get_device_by_imei(imei).await? {
            Some(device) if device.active => device,
            Some(_) => {
                warn!(imei, "authentication rejected: device inactive");
                return Ok(AuthOutcome::Rejected);
            }
            None => {
                warn!(imei, "authentication rejected: unknown imei");
                return Ok(AuthOutcome::Rejected);
            }
        };

        let handle = SessionHandle {
            session_id: seed.session_id,
            imei: imei.to_string(),
            device_id: device.id,
            protocol: seed.protocol,
            outbound: seed.outbound,
            cancel: seed.cancel,
        };
        let displaced = lock(&self.sessions).insert(imei.to_string(), handle);
        if let Some(old) = displaced {
            if old.session_id != seed.session_id {
                info!(imei, "displacing previous session for imei");
                old.cancel.cancel();
            }
        }

        if let Err(err) = self.store.set_online(imei, true).await {
            // keep the registry invariant: a session that is not marked
            // online in the store is not considered authenticated
            lock(&self.sessions).remove(imei);
            return Err(err);
        }
        self.touch_cache(imei, |status| {
            status.online = true;
        });
        Ok(AuthOutcome::Accepted(device))
    }

    pub fn lookup(&self, imei: &str) -> Option<SessionHandle> {
        lock(&self.sessions).get(imei).cloned()
    }

    /// Removes the session if it is still the registered one and marks the
    /// device offline. Returns whether a removal happened.
    pub async fn remove_session(
        &self,
        imei: &str,
        session_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let removed = {
            let mut sessions = lock(&self.sessions);
            match sessions.get(imei) {
                Some(handle) if handle.session_id == session_id => {
                    sessions.remove(imei);
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.mark_offline(imei).await?;
            self.fail_outstanding_commands(imei).await;
        }
        Ok(removed)
    }

    /// Fails every command still awaiting this device's reply. Without it
    /// a disconnect would strand `sent` rows with no terminal outcome.
    async fn fail_outstanding_commands(&self, imei: &str) {
        let outstanding: Vec<String> = lock(&self.pending_commands)
            .remove(imei)
            .map(Vec::from)
            .unwrap_or_default();
        for id in outstanding {
            match self
                .store
                .mark_command_failed(&id, "connection closed before acknowledgement")
                .await
            {
                Ok(true) => {
                    warn!(imei, command = %id, "command unacknowledged at disconnect, failed")
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(imei, command = %id, error = %err, "store error failing unacknowledged command")
                }
            }
        }
    }

    pub async fn mark_offline(&self, imei: &str) -> Result<(), sqlx::Error> {
        self.store.set_online(imei, false).await?;
        let mut status = lock(&self.status);
        if let Some(entry) = status.get_mut(imei) {
            // last_seen survives going offline
            entry.online = false;
        }
        Ok(())
    }

    pub async fn touch_heartbeat(&self, imei: &str) -> Result<(), sqlx::Error> {
        self.store.touch_heartbeat(imei).await?;
        self.touch_cache(imei, |status| {
            status.online = true;
            status.last_heartbeat = Some(Utc::now());
        });
        Ok(())
    }

    pub async fn touch_login(&self, imei: &str) -> Result<(), sqlx::Error> {
        self.store.touch_login(imei).await?;
        self.touch_cache(imei, |status| {
            status.online = true;
            status.last_login = Some(Utc::now());
        });
        Ok(())
    }

    /// Cache-only liveness bump, called for every decoded frame.
    pub fn touch_activity(&self, imei: &str) {
        self.touch_cache(imei, |_| {});
    }

    fn touch_cache<F>(&self, imei: &str, apply: F)
    where
        F: FnOnce(&mut DeviceStatus),
    {
        let now = Utc::now();
        let mut status = lock(&self.status);
        let entry = status
            .entry(imei.to_string())
            .or_insert_with(|| DeviceStatus::new_online(now));
        entry.last_seen = now;
        entry.last_activity = now;
        entry.activity_count += 1;
        apply(entry);
    }

    /// Appends a command to the IMEI's outstanding-reply queue.
    pub fn note_command_sent(&self, imei: &str, command_id: &str) {
        lock(&self.pending_commands)
            .entry(imei.to_string())
            .or_default()
            .push_back(command_id.to_string());
    }

    /// Pops the oldest command awaiting a reply from this IMEI.
    pub fn take_pending_command(&self, imei: &str) -> Option<String> {
        let mut pending = lock(&self.pending_commands);
        let queue = pending.get_mut(imei)?;
        let id = queue.pop_front();
        if queue.is_empty() {
            pending.remove(imei);
        }
        id
    }

    /// Marks devices offline whose cached `last_seen` is older than `idle`.
    /// Returns how many devices were swept.
    pub async fn sweep_offline(&self, idle: Duration) -> usize {
        let now = Utc::now();
        let stale: Vec<String> = lock(&self.status)
            .iter()
            .filter(|(_, status)| status.online && now - status.last_seen > idle)
            .map(|(imei, _)| imei.clone())
            .collect();
        let mut swept = 0;
        for imei in &stale {
            match self.mark_offline(imei).await {
                Ok(()) => {
                    info!(imei = %imei, "device idle, marked offline");
                    swept += 1;
                }
                Err(err) => warn!(imei = %imei, error = %err, "offline sweep store update failed"),
            }
        }
        swept
    }

    /// Drops cached rows not touched within `max_age`. Returns how many
    /// rows were removed.
    pub fn compact_cache(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut status = lock(&self.status);
        let before = status.len();
        status.retain(|_, entry| now - entry.last_activity <= max_age);
        before - status.len()
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Cancels every live session; used during shutdown.
    pub fn cancel_all_sessions(&self) {
        for handle in lock(&self.sessions).values() {
            handle.cancel.cancel();
        }
    }

    pub fn status_of(&self, imei: &str) -> Option<DeviceStatus> {
        lock(&self.status).get(imei).cloned()
    }
}
