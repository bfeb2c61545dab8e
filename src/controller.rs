/*!
 # Command orchestrator

 The façade CLI and menu callers use: resolve a selector to devices,
 encode the intent per device dialect, and drive one session per device
 to deliver it. Wildcard selectors fan out concurrently; one unreachable
 lamp never stalls or aborts the others, its failure just shows up in
 that device's [`Outcome`].
*/

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::codec::{self, Intent};
use crate::discovery::{self, DeviceIdentity, Selector};
use crate::session::{Session, SessionConfig};
use crate::transport::{BleTransport, Transport};
use crate::{Error, Result};

/// Orchestrator-level settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How long discovery scans for devices.
    pub scan_timeout: Duration,
    /// Timeouts and retry policy applied to every session.
    pub session: SessionConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(8),
            session: SessionConfig::default(),
        }
    }
}

/// The result of one command against one device.
#[derive(Debug)]
pub struct Outcome {
    pub name: String,
    pub address: String,
    pub result: Result<()>,
}

/// High-level entry point for executing intents against lamps.
///
/// Stateless per call: every invocation carries its own selector, so
/// there is no hidden "current device". Conveniences like a remembered
/// last selection belong to the caller.
pub struct LampController {
    transport: Arc<dyn Transport>,
    config: ControllerConfig,
}

impl LampController {
    pub fn new(transport: Arc<dyn Transport>, config: ControllerConfig) -> Self {
        Self { transport, config }
    }

    /// Builds a controller over the platform BLE stack with defaults.
    pub async fn ble() -> Result<Self> {
        Ok(Self::new(
            Arc::new(BleTransport::new().await?),
            ControllerConfig::default(),
        ))
    }

    /// Lists every recognized device in range, strongest signal first.
    pub async fn scan(&self) -> Result<Vec<DeviceIdentity>> {
        discovery::scan_known(self.transport.as_ref(), self.config.scan_timeout).await
    }

    /// Executes one intent against every device the selector resolves to.
    ///
    /// Selector-level failures (`DeviceNotFound`, `AmbiguousSelector`)
    /// surface as the top-level error; per-device delivery failures land
    /// in that device's [`Outcome`] instead. With a deadline, devices
    /// still in flight when it expires report [`Error::DeadlineExpired`]
    /// and get a best-effort disconnect; finished outcomes are returned
    /// as gathered.
    #[instrument(skip(self, selector, intent), fields(selector = %selector, intent = ?intent))]
    pub async fn execute(
        &self,
        selector: &Selector,
        intent: &Intent,
        deadline: Option<Duration>,
    ) -> Result<Vec<Outcome>> {
        let deadline = deadline.map(|d| Instant::now() + d);

        let scan_timeout = match deadline {
            Some(at) => self
                .config
                .scan_timeout
                .min(at.saturating_duration_since(Instant::now())),
            None => self.config.scan_timeout,
        };
        let candidates =
            discovery::discover(self.transport.as_ref(), selector, scan_timeout).await?;
        info!("Executing {intent:?} on {} device(s)", candidates.len());

        let outcomes = future::join_all(candidates.into_iter().map(|identity| {
            let transport = Arc::clone(&self.transport);
            let session_config = self.config.session.clone();
            let intent = intent.clone();
            async move {
                let result = deliver(
                    transport.as_ref(),
                    &identity,
                    &intent,
                    session_config,
                    deadline,
                )
                .await;
                if let Err(ref cause) = result {
                    warn!("Command for {} failed: {cause}", identity.address);
                }
                Outcome {
                    name: identity.name,
                    address: identity.address,
                    result,
                }
            }
        }))
        .await;

        Ok(outcomes)
    }
}

/// Runs one session for one device: encode, connect, write, close.
///
/// Encoding comes first so capability mismatches are reported without
/// touching the radio. The known intents are all single-frame, so a
/// command either fully applies or fails as a whole.
async fn deliver(
    transport: &dyn Transport,
    identity: &DeviceIdentity,
    intent: &Intent,
    config: SessionConfig,
    deadline: Option<Instant>,
) -> Result<()> {
    let frame = codec::encode_intent(identity.profile.dialect, intent)?;

    let mut session = bounded(deadline, Session::connect(transport, identity, config)).await?;
    let result = bounded(deadline, session.write_frame(&frame)).await;
    session.close().await;
    result
}

async fn bounded<T>(
    deadline: Option<Instant>,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        Some(at) => match tokio::time::timeout_at(at, operation).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExpired),
        },
        None => operation.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Brightness, Color};
    use crate::session::RetryPolicy;
    use crate::transport::mock::MockTransport;

    fn controller(transport: &MockTransport) -> LampController {
        LampController::new(
            Arc::new(transport.clone()),
            ControllerConfig {
                scan_timeout: Duration::from_secs(1),
                session: SessionConfig {
                    retry: RetryPolicy {
                        backoff: Duration::ZERO,
                        ..RetryPolicy::default()
                    },
                    ..SessionConfig::default()
                },
            },
        )
    }

    #[tokio::test]
    async fn power_on_lands_on_the_target_device() {
        let transport = MockTransport::new();
        transport.advertise("KS03~370058", "BE:60:4D:00:58:37", Some(-50));

        let outcomes = controller(&transport)
            .execute(&Selector::Prefix("KS03~".into()), &Intent::PowerOn, None)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(outcomes[0].address, "BE:60:4D:00:58:37");

        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].payload, [0x5b, 0xf0, 0x01, 0xb5]);
    }

    #[tokio::test]
    async fn red_at_full_brightness_encodes_the_extended_frame() {
        let transport = MockTransport::new();
        transport.advertise("KS03~370058", "BE:60:4D:00:58:37", Some(-50));

        let intent = Intent::SetColor {
            color: Color::new(255, 0, 0),
            brightness: Some(Brightness::FULL),
        };
        let outcomes = controller(&transport)
            .execute(&Selector::Prefix("KS03~".into()), &intent, None)
            .await
            .unwrap();
        assert!(outcomes[0].result.is_ok());

        let writes = transport.writes();
        assert_eq!(
            writes[0].payload,
            [0x5a, 0x00, 0x01, 0xff, 0x00, 0x00, 0x00, 0xff, 0x00, 0xa5]
        );
    }

    #[tokio::test]
    async fn wildcard_collects_per_device_outcomes() {
        let transport = MockTransport::new();
        transport.advertise("KS03~000001", "11:11:11:11:11:11", Some(-40));
        transport.advertise("KS03~000002", "22:22:22:22:22:22", Some(-50));
        transport.advertise("KS03~000003", "33:33:33:33:33:33", Some(-60));
        transport.refuse_connect("22:22:22:22:22:22");

        let outcomes = controller(&transport)
            .execute(
                &Selector::AllWithPrefix("KS03~".into()),
                &Intent::PowerOff,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        let succeeded = outcomes.iter().filter(|o| o.result.is_ok()).count();
        assert_eq!(succeeded, 2);
        let failed: Vec<_> = outcomes.iter().filter(|o| o.result.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].address, "22:22:22:22:22:22");
        assert!(matches!(
            failed[0].result,
            Err(Error::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn capability_mismatch_never_touches_the_radio() {
        let transport = MockTransport::new();
        transport.advertise("KS04-000001", "44:44:44:44:44:44", Some(-40));

        let intent = Intent::SetBrightness(Brightness::FULL);
        let outcomes = controller(&transport)
            .execute(&Selector::Prefix("KS04-".into()), &intent, None)
            .await
            .unwrap();

        assert!(matches!(
            outcomes[0].result,
            Err(Error::UnsupportedCapability { .. })
        ));
        assert_eq!(transport.connect_attempts("44:44:44:44:44:44"), 0);
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn standard_dialect_color_uses_its_own_frame_and_endpoints() {
        let transport = MockTransport::new();
        transport.advertise("KS04-000001", "44:44:44:44:44:44", Some(-40));

        let intent = Intent::SetColor {
            color: Color::new(0, 128, 255),
            brightness: None,
        };
        let outcomes = controller(&transport)
            .execute(&Selector::Prefix("KS04-".into()), &intent, None)
            .await
            .unwrap();
        assert!(outcomes[0].result.is_ok());

        let writes = transport.writes();
        assert_eq!(
            writes[0].payload,
            [0x7e, 0x07, 0x05, 0x03, 0x00, 0x80, 0xff, 0x00, 0xef]
        );
        let profile = crate::profile::resolve("KS04-000001").unwrap();
        assert_eq!(writes[0].service, profile.service);
        assert_eq!(writes[0].characteristic, profile.write_characteristic);
    }

    #[tokio::test]
    async fn selector_level_failures_surface_at_the_top() {
        let transport = MockTransport::new();

        let error = controller(&transport)
            .execute(&Selector::Prefix("KS03~".into()), &Intent::PowerOn, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(error, Error::DeviceNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_yields_partial_results() {
        let transport = MockTransport::new();
        transport.advertise("KS03~000001", "11:11:11:11:11:11", Some(-40));
        transport.advertise("KS03~000002", "22:22:22:22:22:22", Some(-50));
        // One lamp answers promptly, the other never makes it in time.
        transport.delay_connect("22:22:22:22:22:22", Duration::from_secs(120));

        let outcomes = controller(&transport)
            .execute(
                &Selector::AllWithPrefix("KS03~".into()),
                &Intent::PowerOn,
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        let fast = outcomes
            .iter()
            .find(|o| o.address == "11:11:11:11:11:11")
            .unwrap();
        assert!(fast.result.is_ok());
        let slow = outcomes
            .iter()
            .find(|o| o.address == "22:22:22:22:22:22")
            .unwrap();
        assert!(matches!(slow.result, Err(Error::DeadlineExpired)));
    }
}
