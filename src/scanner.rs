use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::ScanError;
use crate::registry::{DeviceRegistry, ScanResult};
use crate::transport::{Advertisement, Transport};


pub const DEFAULT_SCAN_LIMIT: usize = 5;
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Timed discovery of named peripherals.
///
/// Results keep discovery order and are not deduplicated beyond what the
/// platform already does, so a device advertising under two addresses shows
/// up twice.
pub struct Scanner {
    transport: Arc<dyn Transport>,
    registry: DeviceRegistry,
    keywords: Vec<String>,
}

impl Scanner {
    pub fn new(transport: Arc<dyn Transport>, registry: DeviceRegistry) -> Self {
        Scanner {
            transport,
            registry,
            keywords: vec![],
        }
    }

    /// Only keep devices whose name contains one of `keywords`, ignoring case.
    /// An empty list keeps every named device.
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords.into_iter().map(|k| k.to_lowercase()).collect();
        self
    }

    /// Like [`Scanner::try_scan`], but a transport failure is logged and
    /// reported as an empty result.
    pub async fn scan(&self, timeout: Duration, limit: usize) -> Vec<ScanResult> {
        match self.try_scan(timeout, limit).await {
            Ok(results) => results,
            Err(err) => {
                warn!("{err}");
                vec![]
            }
        }
    }

    /// Discovers for `timeout` and returns at most `limit` named devices.
    ///
    /// On success the registry's last scan results are replaced; a failed scan
    /// leaves them as they were.
    pub async fn try_scan(&self, timeout: Duration, limit: usize) -> Result<Vec<ScanResult>, ScanError> {
        info!(timeout_secs = timeout.as_secs_f64(), limit, "Scanning for named BLE devices...");
        let advertisements = self.transport.discover(timeout).await?;

        let results: Vec<ScanResult> = advertisements
            .into_iter()
            .filter_map(|adv| self.accept(adv))
            .take(limit)
            .collect();

        for (i, result) in results.iter().enumerate() {
            info!("  {}. {} | {}", i + 1, result.name, result.address);
        }
        self.registry.replace_scan_results(results.clone());
        Ok(results)
    }

    fn accept(&self, adv: Advertisement) -> Option<ScanResult> {
        let Some(name) = adv.name.filter(|n| !n.is_empty()) else {
            debug!(address = %adv.address, "Skipping unnamed advertisement");
            return None;
        };

        if !self.keywords.is_empty() {
            let lower = name.to_lowercase();
            if !self.keywords.iter().any(|k| lower.contains(k.as_str())) {
                debug!(%name, "Skipping device without a heart rate keyword");
                return None;
            }
        }

        Some(ScanResult { name, address: adv.address })
    }
}
