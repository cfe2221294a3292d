use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::decode::{decode, HEART_RATE_MEASUREMENT_UUID};
use crate::error::ConnectError;
use crate::registry::DeviceRegistry;
use crate::sink::{HeartRateReading, ReadingSink};
use crate::transport::{Link, NotificationStream, Transport};


pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Streaming,
    Disconnected,
    Failed,
}

impl ConnectionState {
    /// The coarse status a dashboard shows.
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Idle | ConnectionState::Disconnected => "not_connected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected | ConnectionState::Streaming => "connected",
            ConnectionState::Failed => "failed",
        }
    }

    fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Streaming
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State the listener task shares with its monitor.
struct Shared {
    state: watch::Sender<ConnectionState>,
    latest_bpm: AtomicU16,
    sink: ReadingSink,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn handle_notification(&self, raw: &[u8]) {
        match decode(raw) {
            Ok(bpm) => {
                self.latest_bpm.store(bpm, Ordering::Relaxed);
                debug!(bpm, "Heart rate");
                self.sink.on_reading(&HeartRateReading::now(bpm));
            }
            Err(err) => warn!(?raw, "Dropping notification: {err}"),
        }
    }
}

struct Session {
    address: String,
    link: Arc<dyn Link>,
    listener: JoinHandle<()>,
    /// Set by the listener once it has released the link after a link loss.
    released: Arc<AtomicBool>,
}

impl Session {
    async fn finish(self) {
        if let Err(err) = self.listener.await {
            warn!("Listener task ended abnormally: {err}");
        }
        if self.released.load(Ordering::SeqCst) {
            debug!(address = %self.address, "Peripheral already released after link loss");
            return;
        }
        info!(address = %self.address, "Releasing peripheral");
        release(&*self.link).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the connection to the selected heart rate peripheral.
///
/// `connect` reads the device from the registry at call time, connects,
/// subscribes to the Heart Rate Measurement characteristic and spawns a
/// listener task that feeds every notification through the decoder into the
/// [`ReadingSink`]. There is no automatic reconnect: after a link loss the
/// state is [`ConnectionState::Disconnected`] until `connect` is called again.
pub struct HrMonitor {
    transport: Arc<dyn Transport>,
    registry: DeviceRegistry,
    shared: Arc<Shared>,
    poll_interval: Duration,
    /// Cancels the current attempt and its listener. Replaced on every connect.
    cancel: Mutex<CancellationToken>,
    session: Mutex<Option<Session>>,
}

impl HrMonitor {
    pub fn new(transport: Arc<dyn Transport>, registry: DeviceRegistry, sink: ReadingSink) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        HrMonitor {
            transport,
            registry,
            shared: Arc::new(Shared {
                state,
                latest_bpm: AtomicU16::new(0),
                sink,
            }),
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: Mutex::new(CancellationToken::new()),
            session: Mutex::new(None),
        }
    }

    /// How often the listener asks the transport whether the link is still up.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == ConnectionState::Streaming
    }

    /// Last decoded BPM, 0 before the first reading.
    pub fn latest_bpm(&self) -> u16 {
        self.shared.latest_bpm.load(Ordering::Relaxed)
    }

    pub fn connected_address(&self) -> Option<String> {
        lock(&self.session)
            .as_ref()
            .filter(|s| !s.released.load(Ordering::SeqCst))
            .map(|s| s.address.clone())
    }

    /// Connects to the selected device and starts streaming.
    ///
    /// Any previous session on this monitor is torn down first. Transport
    /// errors leave the monitor in [`ConnectionState::Failed`]; a concurrent
    /// [`HrMonitor::disconnect`] makes this return [`ConnectError::Cancelled`].
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let Some(device) = self.registry.selected() else {
            warn!("No device selected, not connecting");
            return Err(ConnectError::NoDeviceSelected);
        };

        self.teardown().await;

        let cancel = CancellationToken::new();
        *lock(&self.cancel) = cancel.clone();
        self.shared.set_state(ConnectionState::Connecting);
        info!(
            address = %device.address,
            name = device.name.as_deref().unwrap_or("unknown"),
            "Connecting..."
        );

        let link = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConnectError::Cancelled),
            result = self.transport.connect(&device.address) => match result {
                Ok(link) => link,
                Err(err) => {
                    warn!(address = %device.address, "Connection failed: {err}");
                    self.advance(&cancel, ConnectionState::Failed);
                    return Err(err.into());
                }
            },
        };

        if !self.advance(&cancel, ConnectionState::Connected) {
            release(&*link).await;
            return Err(ConnectError::Cancelled);
        }
        info!(address = %device.address, "Connected, subscribing to heart rate notifications");

        let notifications = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = link.subscribe(HEART_RATE_MEASUREMENT_UUID) => Some(result),
        };
        let notifications = match notifications {
            Some(Ok(notifications)) => notifications,
            Some(Err(err)) => {
                warn!(address = %device.address, "Subscribing failed: {err}");
                self.advance(&cancel, ConnectionState::Failed);
                release(&*link).await;
                return Err(err.into());
            }
            None => {
                release(&*link).await;
                return Err(ConnectError::Cancelled);
            }
        };

        let started = {
            let mut slot = lock(&self.session);
            if self.advance(&cancel, ConnectionState::Streaming) {
                let released = Arc::new(AtomicBool::new(false));
                let listener = tokio::spawn(listen(
                    notifications,
                    link.clone(),
                    cancel.clone(),
                    self.poll_interval,
                    self.shared.clone(),
                    released.clone(),
                ));
                *slot = Some(Session {
                    address: device.address.clone(),
                    link: link.clone(),
                    listener,
                    released,
                });
                true
            } else {
                false
            }
        };

        if !started {
            release(&*link).await;
            return Err(ConnectError::Cancelled);
        }
        info!(address = %device.address, "Streaming heart rate");
        Ok(())
    }

    /// Stops the listener and releases the link. Safe to call in any state;
    /// on a monitor that never connected it does nothing.
    pub async fn disconnect(&self) {
        let was_active = self.state().is_active();
        let had_session = self.teardown().await;

        if was_active || had_session {
            self.shared.set_state(ConnectionState::Disconnected);
            info!("Disconnected");
        }
    }

    /// Applies `state` unless `cancel` has fired. Checked under the same lock
    /// `teardown` cancels with, so a cancelled attempt never overwrites the
    /// state a disconnect settles on.
    fn advance(&self, cancel: &CancellationToken, state: ConnectionState) -> bool {
        let _guard = lock(&self.cancel);
        if cancel.is_cancelled() {
            return false;
        }
        self.shared.set_state(state);
        true
    }

    async fn teardown(&self) -> bool {
        lock(&self.cancel).cancel();
        let session = lock(&self.session).take();
        let Some(session) = session else { return false; };

        session.finish().await;
        true
    }
}

impl Drop for HrMonitor {
    fn drop(&mut self) {
        lock(&self.cancel).cancel();
        let Some(session) = lock(&self.session).take() else { return; };

        // Releasing is async; hand it to the runtime if there still is one.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(session.finish());
        }
    }
}

async fn release(link: &dyn Link) {
    if let Err(err) = link.disconnect().await {
        warn!("Error disconnecting from peripheral: {err}");
    }
}

async fn listen(
    mut notifications: NotificationStream,
    link: Arc<dyn Link>,
    cancel: CancellationToken,
    poll_interval: Duration,
    shared: Arc<Shared>,
    released: Arc<AtomicBool>,
) {
    let mut liveness = tokio::time::interval(poll_interval);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
    liveness.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Listener cancelled");
                return;
            }
            _ = liveness.tick() => {
                if !link.is_connected().await {
                    warn!("Peripheral is no longer connected");
                    break;
                }
            }
            notification = notifications.next() => match notification {
                Some(raw) => shared.handle_notification(&raw),
                None => {
                    warn!("Notification stream ended");
                    break;
                }
            },
        }
    }

    // No reconnect: give the peripheral back before reporting the loss.
    release(&*link).await;
    released.store(true, Ordering::SeqCst);
    shared.set_state(ConnectionState::Disconnected);
}
