/*!
 # KS Smart LED Lamp Controller Library

 A Rust library for controlling KS-series Bluetooth LED lamps (KS01-KS04
 ceiling and floor models). Commands are fixed-layout binary frames
 written to each lamp's command characteristic; the library maps user
 intents (power, RGB color, brightness) onto the per-model frame
 dialects, disambiguates devices whose advertised names overlap, and
 manages the connect/write/disconnect lifecycle over an unreliable link.

 ## Features

 * Power on/off control
 * RGB color control
 * Brightness adjustment (floor lamps)
 * Discovery with ambiguity detection and RSSI ranking
 * Concurrent fan-out to every lamp of a model
 * Bounded retries and deadlines around an unreliable transport

 ## Example

 ```no_run
 use ks_led_controller::*;
 use std::time::Duration;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let controller = LampController::ble().await?;
     let lamp = Selector::Prefix("KS03~".to_string());

     // Basic operations
     controller.execute(&lamp, &Intent::PowerOn, None).await?;

     let red = Intent::SetColor {
         color: Color::new(255, 0, 0),
         brightness: Some(Brightness::FULL),
     };
     controller
         .execute(&lamp, &red, Some(Duration::from_secs(30)))
         .await?;

     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the KS LED controller library
#[derive(Error, Debug)]
pub enum Error {
    /// Input outside its valid range; a caller bug, never retried
    #[error("Value {0} out of range ({1}..={2})")]
    ValueOutOfRange(u32, u32, u32),

    /// The device dialect cannot perform the requested operation
    #[error("{dialect} devices cannot {operation}")]
    UnsupportedCapability {
        dialect: Dialect,
        operation: &'static str,
    },

    /// Advertised name matches no known device profile
    #[error("No known profile matches device name {0:?}")]
    UnknownDevice(String),

    /// The selector matched nothing within the scan window
    #[error("No device found matching {0}")]
    DeviceNotFound(String),

    /// A single-target selector matched several devices
    #[error("Selector {selector} matched {} devices; pass an explicit address", .candidates.len())]
    AmbiguousSelector {
        selector: String,
        candidates: Vec<DeviceIdentity>,
    },

    /// Connecting kept failing after the configured retries
    #[error("Failed to connect to {address} after {attempts} attempt(s)")]
    ConnectionFailed {
        address: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Writing kept failing after the configured retries
    #[error("Write to {address} failed after {attempts} attempt(s)")]
    WriteFailed {
        address: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The link dropped mid-write; the session is closed, not retried
    #[error("Link to {address} lost during write")]
    LinkLost { address: String },

    /// The caller-supplied deadline elapsed before the command completed
    #[error("Deadline expired before the command completed")]
    DeadlineExpired,

    /// Transport failure outside any session (adapter, scan)
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, Error>;

// Re-export modules
pub mod codec;
pub mod controller;
pub mod discovery;
pub mod profile;
pub mod session;
pub mod transport;

// Re-export key types
pub use codec::{encode_brightness, encode_color, encode_intent, encode_power};
pub use codec::{Brightness, Color, CommandFrame, Intent};
pub use controller::{ControllerConfig, LampController, Outcome};
pub use discovery::{discover, scan_known, DeviceIdentity, Selector};
pub use profile::{resolve, DeviceProfile, Dialect};
pub use transport::{Advertisement, BleTransport, Link, Transport, TransportError};
pub use session::{RetryPolicy, Session, SessionConfig, SessionState};
