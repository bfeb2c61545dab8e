/*!
 # Session manager

 One [`Session`] owns the connection to one lamp for the duration of one
 command. The state machine is
 `Idle -> Connecting -> Connected -> Writing -> (Connected | Disconnecting)
 -> Closed`; connecting and writing are the only suspension points and
 both are bounded by timeouts. A closed session is never reused, the next
 command builds a fresh one.

 Transient link faults are retried here, under one [`RetryPolicy`] shared
 by the connect and write paths, so call sites never grow their own retry
 loops.
*/

use std::time::Duration;

use tracing::{debug, instrument, trace, warn};

use crate::codec::CommandFrame;
use crate::discovery::DeviceIdentity;
use crate::profile::DeviceProfile;
use crate::transport::{Link, Transport, TransportError};
use crate::{Error, Result};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Writing,
    Disconnecting,
    Closed,
}

/// Bounded-retry settings, shared by connect and write paths.
///
/// Attempt counts are totals: a transport that always fails surfaces the
/// error after exactly that many tries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total connect attempts before `ConnectionFailed`.
    pub connect_attempts: u32,
    /// Total write attempts before `WriteFailed`.
    pub write_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            write_attempts: 2,
            backoff: Duration::from_millis(300),
        }
    }
}

/// Timeouts and retry policy for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// A live connection to exactly one device.
pub struct Session {
    address: String,
    profile: DeviceProfile,
    config: SessionConfig,
    link: Option<Box<dyn Link>>,
    state: SessionState,
}

impl Session {
    /// Connects to the device, retrying transient failures per the
    /// configured policy. Exhaustion surfaces
    /// [`Error::ConnectionFailed`] carrying the last underlying cause.
    #[instrument(skip(transport, identity, config), fields(address = %identity.address))]
    pub async fn connect(
        transport: &dyn Transport,
        identity: &DeviceIdentity,
        config: SessionConfig,
    ) -> Result<Session> {
        let mut session = Session {
            address: identity.address.clone(),
            profile: identity.profile,
            config,
            link: None,
            state: SessionState::Idle,
        };

        session.state = SessionState::Connecting;
        let attempts = session.config.retry.connect_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            trace!("Connect attempt {attempt}/{attempts}");
            match transport
                .connect(&session.address, session.config.connect_timeout)
                .await
            {
                Ok(link) => {
                    debug!("Session connected");
                    session.link = Some(link);
                    session.state = SessionState::Connected;
                    return Ok(session);
                }
                Err(cause) => {
                    warn!("Connect attempt {attempt}/{attempts} failed: {cause}");
                    if attempt >= attempts {
                        session.state = SessionState::Closed;
                        return Err(Error::ConnectionFailed {
                            address: session.address,
                            attempts,
                            source: cause,
                        });
                    }
                    tokio::time::sleep(session.config.retry.backoff).await;
                }
            }
        }
    }

    /// Delivers one frame. `&mut self` guarantees a single in-flight
    /// write: frames are never pipelined, the lamps want ordered,
    /// one-at-a-time delivery.
    ///
    /// Transient failures are retried within the configured attempts; if the
    /// link drops mid-write the session closes and surfaces
    /// [`Error::LinkLost`] without reconnecting. Whether to re-invoke is
    /// the caller's call.
    #[instrument(skip(self, frame), fields(address = %self.address, frame = ?frame))]
    pub async fn write_frame(&mut self, frame: &CommandFrame) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(Error::LinkLost {
                address: self.address.clone(),
            });
        }

        self.state = SessionState::Writing;
        let attempts = self.config.retry.write_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            trace!("Write attempt {attempt}/{attempts}");
            let result = match &self.link {
                Some(link) => {
                    link.write(
                        self.profile.service,
                        self.profile.write_characteristic,
                        frame.as_bytes(),
                        self.config.write_timeout,
                    )
                    .await
                }
                None => Err(TransportError::LinkDown),
            };

            match result {
                Ok(()) => {
                    debug!("Frame delivered");
                    self.state = SessionState::Connected;
                    return Ok(());
                }
                Err(TransportError::LinkDown) => {
                    warn!("Link lost during write");
                    self.link = None;
                    self.state = SessionState::Closed;
                    return Err(Error::LinkLost {
                        address: self.address.clone(),
                    });
                }
                Err(cause) if attempt >= attempts || !cause.is_transient() => {
                    // The link is still up; the caller decides what happens next.
                    self.state = SessionState::Connected;
                    return Err(Error::WriteFailed {
                        address: self.address.clone(),
                        attempts: attempt,
                        source: cause,
                    });
                }
                Err(cause) => {
                    warn!("Write attempt {attempt}/{attempts} failed: {cause}");
                    tokio::time::sleep(self.config.retry.backoff).await;
                }
            }
        }
    }

    /// Tears the session down. Disconnect failures are logged, not
    /// surfaced: either way the device ends up unreachable.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn close(&mut self) {
        if let Some(link) = self.link.take() {
            self.state = SessionState::Disconnecting;
            debug!("Disconnecting");
            if let Err(cause) = link.disconnect().await {
                debug!("Disconnect failed: {cause}");
            }
        }
        self.state = SessionState::Closed;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_power;
    use crate::discovery::DeviceIdentity;
    use crate::profile;
    use crate::transport::mock::MockTransport;

    const ADDRESS: &str = "be:60:4d:00:58:37";

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            name: "KS03~370058".into(),
            address: ADDRESS.into(),
            rssi: Some(-50),
            profile: profile::resolve("KS03~370058").unwrap(),
        }
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            retry: RetryPolicy {
                backoff: Duration::ZERO,
                ..RetryPolicy::default()
            },
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn connect_recovers_within_retry_limit() {
        let transport = MockTransport::new();
        transport.fail_connects(ADDRESS, 2);

        let session = Session::connect(&transport, &identity(), fast_config())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(transport.connect_attempts(ADDRESS), 3);
    }

    #[tokio::test]
    async fn connect_exhaustion_reports_attempt_count() {
        let transport = MockTransport::new();
        transport.refuse_connect(ADDRESS);

        let error = Session::connect(&transport, &identity(), fast_config())
            .await
            .err()
            .unwrap();
        match error {
            Error::ConnectionFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
        assert_eq!(transport.connect_attempts(ADDRESS), 3);
    }

    #[tokio::test]
    async fn write_recovers_from_one_transient_failure() {
        let transport = MockTransport::new();
        transport.fail_writes(ADDRESS, 1);

        let mut session = Session::connect(&transport, &identity(), fast_config())
            .await
            .unwrap();
        session.write_frame(&encode_power(true)).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(transport.writes().len(), 1);
    }

    #[tokio::test]
    async fn write_exhaustion_surfaces_last_cause() {
        let transport = MockTransport::new();
        transport.fail_writes(ADDRESS, 10);

        let mut session = Session::connect(&transport, &identity(), fast_config())
            .await
            .unwrap();
        let error = session.write_frame(&encode_power(true)).await.err().unwrap();
        match error {
            Error::WriteFailed { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected WriteFailed, got {other:?}"),
        }
        // The link survived, only the writes failed.
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn link_drop_closes_the_session_without_reconnecting() {
        let transport = MockTransport::new();
        transport.drop_link_on_write(ADDRESS);

        let mut session = Session::connect(&transport, &identity(), fast_config())
            .await
            .unwrap();
        let error = session.write_frame(&encode_power(true)).await.err().unwrap();
        assert!(matches!(error, Error::LinkLost { .. }));
        assert_eq!(session.state(), SessionState::Closed);
        // No implicit reconnect happened.
        assert_eq!(transport.connect_attempts(ADDRESS), 1);
    }

    #[tokio::test]
    async fn closed_sessions_are_not_reused() {
        let transport = MockTransport::new();

        let mut session = Session::connect(&transport, &identity(), fast_config())
            .await
            .unwrap();
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);

        let error = session.write_frame(&encode_power(true)).await.err().unwrap();
        assert!(matches!(error, Error::LinkLost { .. }));
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn frames_land_on_the_profile_endpoints() {
        let transport = MockTransport::new();

        let mut session = Session::connect(&transport, &identity(), fast_config())
            .await
            .unwrap();
        session.write_frame(&encode_power(true)).await.unwrap();
        session.close().await;

        let profile = profile::resolve("KS03~370058").unwrap();
        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].service, profile.service);
        assert_eq!(writes[0].characteristic, profile.write_characteristic);
        assert_eq!(writes[0].payload, [0x5b, 0xf0, 0x01, 0xb5]);
    }
}
