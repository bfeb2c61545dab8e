/*!
 # Discovery and disambiguation

 Turns a caller-supplied [`Selector`] into concrete [`DeviceIdentity`]
 targets by running a time-bounded scan and filtering to recognized
 models. Ambiguity is never resolved silently: if a single-target
 selector matches several lamps, the caller gets the ranked candidate
 list back and must narrow the selection, typically with an explicit
 address.
*/

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::profile::{self, DeviceProfile};
use crate::transport::{Advertisement, Transport};
use crate::{Error, Result};

/// A device as seen during one scan. Created at discovery time and
/// discarded with the command; the core never persists identities.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    /// Advertised name, e.g. `KS03~370058`.
    pub name: String,
    /// Stable link address, compared case-insensitively.
    pub address: String,
    /// Signal strength, used only to rank candidates.
    pub rssi: Option<i16>,
    /// Profile resolved from the name prefix.
    pub profile: DeviceProfile,
}

/// How the caller names the device(s) a command targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// A single device expected to match this name prefix.
    Prefix(String),
    /// An explicit link address; the scan stops as soon as it is seen.
    Address(String),
    /// Every discovered device matching this prefix; callers fan out one
    /// command per device.
    AllWithPrefix(String),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Prefix(prefix) => write!(f, "prefix {prefix:?}"),
            Selector::Address(address) => write!(f, "address {address}"),
            Selector::AllWithPrefix(prefix) => write!(f, "all devices with prefix {prefix:?}"),
        }
    }
}

/// Scans for every recognized device in range, strongest signal first.
///
/// Unrecognized advertisements are dropped, not errors: scans see every
/// BLE gadget nearby and most of them are somebody else's.
pub async fn scan_known(
    transport: &dyn Transport,
    timeout: Duration,
) -> Result<Vec<DeviceIdentity>> {
    collect(transport, timeout, &|_| false).await
}

async fn collect(
    transport: &dyn Transport,
    timeout: Duration,
    stop: &(dyn for<'a> Fn(&'a Advertisement) -> bool + Send + Sync),
) -> Result<Vec<DeviceIdentity>> {
    let advertisements = transport.scan(timeout, stop).await?;

    let mut identities: Vec<DeviceIdentity> = Vec::new();
    for advertisement in advertisements {
        let Ok(profile) = profile::resolve(&advertisement.name) else {
            debug!("Ignoring unrecognized device {:?}", advertisement.name);
            continue;
        };
        if identities
            .iter()
            .any(|d| d.address.eq_ignore_ascii_case(&advertisement.address))
        {
            continue;
        }
        identities.push(DeviceIdentity {
            name: advertisement.name,
            address: advertisement.address,
            rssi: advertisement.rssi,
            profile,
        });
    }

    // Strongest signal first; devices without an RSSI reading sort last.
    identities.sort_by_key(|d| std::cmp::Reverse(d.rssi.unwrap_or(i16::MIN)));
    Ok(identities)
}

/// Resolves a selector to its target devices.
///
/// - [`Selector::Address`] ends the scan as soon as the address appears
///   and yields exactly that device, or [`Error::DeviceNotFound`].
/// - [`Selector::Prefix`] requires exactly one match; several matches
///   yield [`Error::AmbiguousSelector`] carrying the ranked candidates.
/// - [`Selector::AllWithPrefix`] yields every match, at least one.
pub async fn discover(
    transport: &dyn Transport,
    selector: &Selector,
    timeout: Duration,
) -> Result<Vec<DeviceIdentity>> {
    let stop: Box<dyn for<'a> Fn(&'a Advertisement) -> bool + Send + Sync> = match selector {
        Selector::Address(address) => {
            let address = address.clone();
            Box::new(move |a: &Advertisement| a.address.eq_ignore_ascii_case(&address))
        }
        _ => Box::new(|_: &Advertisement| false),
    };

    let found = collect(transport, timeout, stop.as_ref()).await?;
    debug!(
        "Scan finished with {} recognized device(s) for {selector}",
        found.len()
    );

    match selector {
        Selector::Address(address) => {
            let matched: Vec<_> = found
                .into_iter()
                .filter(|d| d.address.eq_ignore_ascii_case(address))
                .collect();
            if matched.is_empty() {
                return Err(Error::DeviceNotFound(selector.to_string()));
            }
            Ok(matched)
        }
        Selector::Prefix(prefix) => {
            let matched: Vec<_> = found
                .into_iter()
                .filter(|d| d.name.starts_with(prefix.as_str()))
                .collect();
            match matched.len() {
                0 => Err(Error::DeviceNotFound(selector.to_string())),
                1 => Ok(matched),
                _ => Err(Error::AmbiguousSelector {
                    selector: selector.to_string(),
                    candidates: matched,
                }),
            }
        }
        Selector::AllWithPrefix(prefix) => {
            let matched: Vec<_> = found
                .into_iter()
                .filter(|d| d.name.starts_with(prefix.as_str()))
                .collect();
            if matched.is_empty() {
                return Err(Error::DeviceNotFound(selector.to_string()));
            }
            Ok(matched)
        }
    }
}
