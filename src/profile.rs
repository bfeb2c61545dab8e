/*!
 # Device profile registry

 Maps a lamp's advertised name prefix to the GATT endpoints and frame
 dialect it speaks. The KS family reuses the same model number across
 hardware revisions that differ only in the separator character, so the
 tilde/hyphen distinction is load-bearing: `KS03~` floor lamps and `KS03-`
 ceiling lamps accept entirely different frame layouts, and a frame built
 for the wrong one is silently ignored by the device.
*/

use btleplug::api::bleuuid::uuid_from_u16;
use uuid::Uuid;

use crate::{Error, Result};

/// Frame dialect spoken by a device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// 10-byte `5A .. A5` frames with a dedicated brightness channel
    /// (floor lamps).
    ExtendedRgbBrightness,
    /// 9-byte `7E .. EF` frames without brightness control (ceiling lamps).
    StandardRgb,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::ExtendedRgbBrightness => write!(f, "extended RGB+brightness"),
            Dialect::StandardRgb => write!(f, "standard RGB"),
        }
    }
}

/// Everything needed to address and talk to one device model.
///
/// Resolved once per command from the advertised name; immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    /// The advertised-name prefix this profile was resolved from.
    pub prefix: &'static str,
    /// Frame dialect the codec must use.
    pub dialect: Dialect,
    /// GATT service containing the write characteristic.
    pub service: Uuid,
    /// Characteristic command frames are written to.
    pub write_characteristic: Uuid,
}

/// Known models: name prefix, dialect, service and write-characteristic
/// short UUIDs (expanded over the Bluetooth base UUID on resolution).
const PROFILE_TABLE: &[(&str, Dialect, u16, u16)] = &[
    ("KS03~", Dialect::ExtendedRgbBrightness, 0xAFD0, 0xAFD1),
    ("KS03-", Dialect::StandardRgb, 0xFFF0, 0xFFF3),
    ("KS04-", Dialect::StandardRgb, 0xFFF0, 0xFFF3),
    ("KS01-", Dialect::StandardRgb, 0xAE00, 0xAE01),
    ("KS02-", Dialect::StandardRgb, 0xAE00, 0xAE01),
];

/// Resolves an advertised device name to its profile.
///
/// Matching is exact, case-sensitive, and the longest matching prefix wins
/// should future entries overlap. Names matching no entry yield
/// [`Error::UnknownDevice`]; callers decide whether that is fatal (an
/// explicit target) or ignorable (an unrelated device seen during a scan).
pub fn resolve(name: &str) -> Result<DeviceProfile> {
    PROFILE_TABLE
        .iter()
        .filter(|(prefix, ..)| name.starts_with(prefix))
        .max_by_key(|(prefix, ..)| prefix.len())
        .map(|&(prefix, dialect, service, write)| DeviceProfile {
            prefix,
            dialect,
            service: uuid_from_u16(service),
            write_characteristic: uuid_from_u16(write),
        })
        .ok_or_else(|| Error::UnknownDevice(name.to_string()))
}
