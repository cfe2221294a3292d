//! Bluetooth LE heart rate client.
//!
//! Scan for named peripherals with a [`Scanner`], pick one in the shared
//! [`DeviceRegistry`], then let an [`HrMonitor`] connect to it and stream
//! Heart Rate Measurement notifications. Every decoded value goes to the
//! [`ReadingSink`], which calls the application callback and appends a line
//! to `hr_log_<YYYY-MM-DD>.csv`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hrstream::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let transport: Arc<dyn Transport> = Arc::new(BtleTransport::new(std::time::Duration::from_secs(10)).await?);
//! let registry = DeviceRegistry::new();
//!
//! let scanner = Scanner::new(transport.clone(), registry.clone());
//! let found = scanner.scan(DEFAULT_SCAN_TIMEOUT, DEFAULT_SCAN_LIMIT).await;
//! if let Some(device) = found.first() {
//!     registry.set_device(device.address.clone(), Some(device.name.clone()))?;
//! }
//!
//! let sink = ReadingSink::with_callback(|bpm| println!("heartbeat: {bpm}"))
//!     .logging_to(DailyLog::new("data"));
//! let monitor = HrMonitor::new(transport, registry, sink);
//! monitor.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod btle;
pub mod config;
pub mod decode;
pub mod error;
pub mod fake;
pub mod logging;
pub mod monitor;
pub mod registry;
pub mod scanner;
pub mod sink;
pub mod transport;

pub use btle::BtleTransport;
pub use decode::{decode, HEART_RATE_MEASUREMENT_UUID};
pub use fake::FakeTransport;
pub use monitor::{ConnectionState, HrMonitor};
pub use registry::{DeviceRegistry, ScanResult, SelectedDevice, Subscription};
pub use scanner::Scanner;
pub use sink::{DailyLog, HeartRateReading, ReadingSink};

pub mod prelude {
    pub use crate::btle::BtleTransport;
    pub use crate::error::{ConnectError, DecodeError, LogWriteError, RegistryError, ScanError, TransportError};
    pub use crate::fake::{FakeHandle, FakeTransport};
    pub use crate::monitor::{ConnectionState, HrMonitor, DEFAULT_POLL_INTERVAL};
    pub use crate::registry::{DeviceRegistry, ScanResult, SelectedDevice, Subscription};
    pub use crate::scanner::{Scanner, DEFAULT_SCAN_LIMIT, DEFAULT_SCAN_TIMEOUT};
    pub use crate::sink::{DailyLog, HeartRateReading, ReadingSink};
    pub use crate::transport::{Advertisement, Link, NotificationStream, Transport};
}
