//! A scripted stand-in for a BLE stack.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rand::Rng;
use tracing::debug;
use uuid::Uuid;

use crate::decode::HEART_RATE_MEASUREMENT_UUID;
use crate::error::TransportError;
use crate::transport::{Advertisement, Link, NotificationStream, Transport};


#[derive(Default)]
struct FakeState {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    link_up: AtomicBool,
}

/// Observes and pokes a [`FakeTransport`] after it has been handed to the core.
#[derive(Clone)]
pub struct FakeHandle {
    state: Arc<FakeState>,
}

impl FakeHandle {
    pub fn connect_calls(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn is_link_up(&self) -> bool {
        self.state.link_up.load(Ordering::SeqCst)
    }

    /// Simulates the peripheral going out of range.
    pub fn drop_link(&self) {
        self.state.link_up.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeTransport {
    advertisements: Vec<Advertisement>,
    fail_discovery: bool,
    fail_connect: bool,
    fail_subscribe: bool,
    connect_delay: Duration,
    payloads: Vec<Vec<u8>>,
    random_period: Option<Duration>,
    end_stream: bool,
    state: Arc<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> FakeHandle {
        FakeHandle { state: self.state.clone() }
    }

    pub fn with_advertisement(mut self, name: Option<&str>, address: &str) -> Self {
        self.advertisements.push(Advertisement::new(name, address));
        self
    }

    /// Payloads delivered right after subscribing. The stream then stays open
    /// until the link is released, unless [`FakeTransport::ending_stream`] is set.
    pub fn with_payloads(mut self, payloads: Vec<Vec<u8>>) -> Self {
        self.payloads = payloads;
        self
    }

    /// Emits an 8-bit heart rate between 50 and 70 BPM every `period`.
    pub fn with_random_heart_rate(mut self, period: Duration) -> Self {
        self.random_period = Some(period);
        self
    }

    /// Ends the notification stream once the canned payloads are delivered,
    /// while the link itself still reports as connected.
    pub fn ending_stream(mut self) -> Self {
        self.end_stream = true;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn failing_discovery(mut self) -> Self {
        self.fail_discovery = true;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn discover(&self, timeout: Duration) -> Result<Vec<Advertisement>, TransportError> {
        if self.fail_discovery {
            return Err(TransportError::Simulated("adapter unavailable".into()));
        }
        tokio::time::sleep(timeout).await;
        Ok(self.advertisements.clone())
    }

    async fn connect(&self, address: &str) -> Result<Arc<dyn Link>, TransportError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.connect_delay).await;
        if self.fail_connect {
            return Err(TransportError::Simulated(format!("{address} refused the connection")));
        }

        debug!(%address, "Fake link up");
        self.state.link_up.store(true, Ordering::SeqCst);
        Ok(Arc::new(FakeLink {
            state: self.state.clone(),
            fail_subscribe: self.fail_subscribe,
            payloads: self.payloads.clone(),
            random_period: self.random_period,
            end_stream: self.end_stream,
        }))
    }
}

struct FakeLink {
    state: Arc<FakeState>,
    fail_subscribe: bool,
    payloads: Vec<Vec<u8>>,
    random_period: Option<Duration>,
    end_stream: bool,
}

#[async_trait]
impl Link for FakeLink {
    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationStream, TransportError> {
        if self.fail_subscribe || characteristic != HEART_RATE_MEASUREMENT_UUID {
            return Err(TransportError::CharacteristicNotFound(characteristic));
        }

        let canned = stream::iter(self.payloads.clone());
        let rest = match self.random_period {
            _ if self.end_stream => stream::empty().boxed(),
            Some(period) => random_heart_rate(period),
            None => stream::pending().boxed(),
        };
        Ok(canned.chain(rest).boxed())
    }

    async fn is_connected(&self) -> bool {
        self.state.link_up.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state.link_up.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn random_heart_rate(period: Duration) -> NotificationStream {
    stream::unfold((), move |()| async move {
        tokio::time::sleep(period).await;
        let hr: u8 = rand::thread_rng().gen_range(50..70);
        Some((vec![0x00, hr], ()))
    })
    .boxed()
}
