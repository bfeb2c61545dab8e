/*!
 # Wireless transport seam

 The rest of the crate only ever talks to [`Transport`] and [`Link`]:
 object-safe async traits over the scan/connect/write/disconnect
 primitives the BLE stack provides. [`BleTransport`] is the production
 implementation over `btleplug`; tests script a mock against the same
 traits, so session and orchestration logic is exercised without a radio.
*/

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use btleplug::api::{Central, CharPropFlags, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, trace};
use uuid::Uuid;

/// Interval between peripheral polls while a scan is running.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One advertisement seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertised local name.
    pub name: String,
    /// Stable link address, compared case-insensitively.
    pub address: String,
    /// Signal strength, if the stack reported one.
    pub rssi: Option<i16>,
}

/// Failures reported by the transport layer.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No Bluetooth adapters found on this host.
    #[error("No Bluetooth adapters found")]
    NoAdapter,

    /// The operation did not complete within its timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The link to the device dropped.
    #[error("Link is down")]
    LinkDown,

    /// The connected device does not expose the expected characteristic.
    #[error("Characteristic {0} not present on device")]
    CharacteristicNotFound(Uuid),

    /// Any other stack-level failure.
    #[error("{0}")]
    Backend(String),
}

impl TransportError {
    /// Whether the session layer may usefully retry the failed operation.
    /// A lost link or a missing characteristic will not heal on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_) | TransportError::Backend(_)
        )
    }
}

fn backend_error(error: btleplug::Error) -> TransportError {
    match error {
        btleplug::Error::NotConnected => TransportError::LinkDown,
        other => TransportError::Backend(other.to_string()),
    }
}

/// Scan and connect primitives of the wireless stack.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs a time-bounded scan, returning every named advertisement seen.
    ///
    /// `stop` is consulted for each new advertisement; returning `true`
    /// ends the scan early. Callers that already know the target address
    /// use this to avoid sitting out the full window.
    async fn scan(
        &self,
        timeout: Duration,
        stop: &(dyn for<'a> Fn(&'a Advertisement) -> bool + Send + Sync),
    ) -> Result<Vec<Advertisement>, TransportError>;

    /// Connects to a previously discovered device.
    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Box<dyn Link>, TransportError>;
}

/// An established connection to one device.
#[async_trait]
pub trait Link: Send + Sync {
    /// Writes one payload to the given characteristic.
    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Tears the connection down.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Production transport over the platform BLE stack.
pub struct BleTransport {
    adapter: Adapter,
    /// The scan radio is process-wide; concurrent discoveries queue here
    /// rather than sharing or stealing an in-flight scan.
    scan_lock: Mutex<()>,
    /// Peripherals seen by past scans, keyed by lowercased address.
    /// Connecting requires the peripheral handle, not just the address.
    seen: Mutex<HashMap<String, Peripheral>>,
}

impl BleTransport {
    /// Opens the default Bluetooth adapter.
    pub async fn new() -> Result<Self, TransportError> {
        debug!("Getting default Bluetooth adapter");
        let manager = Manager::new().await.map_err(backend_error)?;
        let adapters = manager.adapters().await.map_err(backend_error)?;
        let Some(adapter) = adapters.into_iter().next() else {
            return Err(TransportError::NoAdapter);
        };
        Ok(Self {
            adapter,
            scan_lock: Mutex::new(()),
            seen: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn scan(
        &self,
        timeout: Duration,
        stop: &(dyn for<'a> Fn(&'a Advertisement) -> bool + Send + Sync),
    ) -> Result<Vec<Advertisement>, TransportError> {
        let _radio = self.scan_lock.lock().await;

        debug!("Scanning for BLE devices ({}s window)", timeout.as_secs());
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(backend_error)?;

        let started = Instant::now();
        let mut found: Vec<Advertisement> = Vec::new();
        let mut early_match = false;

        'scan: while started.elapsed() < timeout {
            let peripherals = self.adapter.peripherals().await.map_err(backend_error)?;
            trace!("{} peripheral(s) visible so far", peripherals.len());

            for peripheral in peripherals {
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };
                let Some(name) = properties.local_name else {
                    continue;
                };
                let address = peripheral.address().to_string();
                self.seen
                    .lock()
                    .await
                    .insert(address.to_lowercase(), peripheral);

                if found
                    .iter()
                    .any(|a| a.address.eq_ignore_ascii_case(&address))
                {
                    continue;
                }

                let advertisement = Advertisement {
                    name,
                    address,
                    rssi: properties.rssi,
                };
                debug!(
                    "Discovered {:?} at {}",
                    advertisement.name, advertisement.address
                );
                let hit = stop(&advertisement);
                found.push(advertisement);
                if hit {
                    debug!("Target seen, stopping scan early");
                    early_match = true;
                    break 'scan;
                }
            }

            time::sleep(SCAN_POLL_INTERVAL).await;
        }

        self.adapter.stop_scan().await.map_err(backend_error)?;
        if !early_match {
            debug!("Scan window elapsed with {} advertisement(s)", found.len());
        }
        Ok(found)
    }

    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Box<dyn Link>, TransportError> {
        let peripheral = {
            let seen = self.seen.lock().await;
            seen.get(&address.to_lowercase()).cloned()
        };
        let Some(peripheral) = peripheral else {
            return Err(TransportError::Backend(format!(
                "device {address} has not been discovered"
            )));
        };

        debug!("Connecting to {address}");
        time::timeout(timeout, async {
            if !peripheral.is_connected().await.map_err(backend_error)? {
                peripheral.connect().await.map_err(backend_error)?;
            }
            trace!("Discovering services");
            peripheral.discover_services().await.map_err(backend_error)
        })
        .await
        .map_err(|_| TransportError::Timeout(timeout))??;

        debug!("Connected to {address}");
        Ok(Box::new(BleLink { peripheral }))
    }
}

struct BleLink {
    peripheral: Peripheral,
}

#[async_trait]
impl Link for BleLink {
    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or(TransportError::CharacteristicNotFound(characteristic))?;

        // KS firmwares frequently reject acknowledged writes; prefer the
        // unacknowledged variant whenever the characteristic offers it.
        let write_type = if target.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        trace!("Writing {} byte(s) with {write_type:?}", payload.len());
        time::timeout(timeout, self.peripheral.write(&target, payload, write_type))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(backend_error)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await.map_err(backend_error)
    }
}
