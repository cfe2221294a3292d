//! The seam between the heart rate core and a BLE stack.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use uuid::Uuid;

use crate::error::TransportError;


/// Raw characteristic values, in the order the peripheral sent them.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub name: Option<String>,
    pub address: String,
}

impl Advertisement {
    pub fn new(name: Option<&str>, address: &str) -> Self {
        Self {
            name: name.map(str::to_string),
            address: address.to_string(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Listens for advertisements for `timeout` and returns what was seen,
    /// in discovery order.
    async fn discover(&self, timeout: Duration) -> Result<Vec<Advertisement>, TransportError>;

    async fn connect(&self, address: &str) -> Result<Arc<dyn Link>, TransportError>;
}

/// One live connection to a peripheral.
#[async_trait]
pub trait Link: Send + Sync {
    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationStream, TransportError>;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
