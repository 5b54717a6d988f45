//! Optional NAT port mapping.
//!
//! When the listener is behind a NAT gateway, an external gateway port is
//! mapped onto the local listening port so that remote peers can dial in.
//! Discovery of the gateway and the mapping protocol itself belong to the
//! [`PortMapper`] implementation; this module only decides when to map and
//! keeps track of the active lease.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ReachabilityConfig;
use crate::error::MappingError;

/// Lowest and highest+1 external ports picked when rotating.
const ROTATION_PORTS: std::ops::Range<u16> = 1023..65535;

#[async_trait]
pub trait PortMapper: Send + Sync + 'static {
    /// Map TCP `external` on the gateway to `internal` on this host. A zero
    /// `lease` requests a permanent mapping.
    async fn map_port(&self, internal: u16, external: u16, lease: Duration)
    -> Result<(), MappingError>;

    async fn unmap_port(&self, external: u16) -> Result<(), MappingError>;
}

/// Outcome of a hop-limited probe. TTL-expired and timed-out probes are
/// reported as `reachable_via_lan == false`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Probe {
    pub reachable_via_lan: bool,
}

impl Probe {
    pub fn behind_nat(&self) -> bool {
        !self.reachable_via_lan
    }
}

#[async_trait]
pub trait ReachabilityProbe: Send + Sync + 'static {
    async fn probe(&self, address: IpAddr) -> Result<Probe, MappingError>;
}

/// The single active gateway mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReachabilityState {
    pub external_port: u16,
    pub internal_port: u16,
    /// `None` for permanent mappings.
    pub lease_expiry: Option<Instant>,
}

#[derive(Default)]
struct Mappings {
    current: Option<ReachabilityState>,
    previous: Option<ReachabilityState>,
}

pub struct ReachabilityManager {
    mapper: Arc<dyn PortMapper>,
    probe: Arc<dyn ReachabilityProbe>,
    config: ReachabilityConfig,
    mappings: Mutex<Mappings>,
}

impl ReachabilityManager {
    pub fn new(
        mapper: Arc<dyn PortMapper>,
        probe: Arc<dyn ReachabilityProbe>,
        config: ReachabilityConfig,
    ) -> Self {
        Self {
            mapper,
            probe,
            config,
            mappings: Mutex::new(Mappings::default()),
        }
    }

    pub fn config(&self) -> &ReachabilityConfig {
        &self.config
    }

    pub fn current(&self) -> Option<ReachabilityState> {
        self.mappings.lock().current
    }

    pub fn previous(&self) -> Option<ReachabilityState> {
        self.mappings.lock().previous
    }

    /// Port peers should dial, if a mapping is active.
    pub fn external_port(&self) -> Option<u16> {
        self.current().map(|state| state.external_port)
    }

    /// Map the rendezvous port onto `internal_port` when the host looks like
    /// it sits behind a NAT. Returns the new mapping, or `None` when no
    /// mapping was needed.
    pub async fn setup(
        &self,
        internal_port: u16,
        local_ip: IpAddr,
    ) -> Result<Option<ReachabilityState>, MappingError> {
        if internal_port == self.config.rendezvous_port {
            debug!(port = internal_port, "listening on rendezvous port, no mapping needed");
            return Ok(None);
        }
        let probe = self.probe.probe(local_ip).await?;
        if !probe.behind_nat() {
            debug!(%local_ip, "host reachable without gateway mapping");
            return Ok(None);
        }

        let external = self.config.rendezvous_port;
        self.mapper
            .map_port(internal_port, external, self.config.lease)
            .await?;
        let state = self.lease(external, internal_port);
        self.mappings.lock().current = Some(state);
        info!(external, internal = internal_port, "gateway port mapping created");
        Ok(Some(state))
    }

    /// Replace the active mapping with one on a random external port and
    /// release the old one. No-op without an active mapping.
    pub async fn rotate(&self) -> Result<Option<ReachabilityState>, MappingError> {
        let Some(current) = self.current() else {
            return Ok(None);
        };
        let external = pick_rotation_port(current.external_port);
        self.mapper
            .map_port(current.internal_port, external, self.config.lease)
            .await?;
        let next = self.lease(external, current.internal_port);
        let replaced = {
            let mut mappings = self.mappings.lock();
            if mappings.current == Some(current) {
                mappings.previous = mappings.current.replace(next);
                true
            } else {
                false
            }
        };
        if !replaced {
            // Torn down or replaced while the gateway was answering.
            debug!(port = external, "mapping changed during rotation, releasing new port");
            if let Err(err) = self.mapper.unmap_port(external).await {
                warn!(port = external, error = %err, "failed to release abandoned mapping");
            }
            return Ok(None);
        }
        info!(
            from = current.external_port,
            to = external,
            "rotated gateway port mapping"
        );
        if let Err(err) = self.mapper.unmap_port(current.external_port).await {
            warn!(port = current.external_port, error = %err, "failed to release previous mapping");
        }
        Ok(Some(next))
    }

    /// Release the active mapping.
    pub async fn teardown(&self) -> Result<(), MappingError> {
        let current = self.mappings.lock().current.take();
        if let Some(state) = current {
            self.mapper.unmap_port(state.external_port).await?;
            self.mappings.lock().previous = Some(state);
        }
        Ok(())
    }

    /// Rotate every `interval` until the returned task is aborted.
    pub fn spawn_rotation(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = manager.rotate().await {
                    warn!(error = %err, "gateway port rotation failed");
                }
            }
        })
    }

    fn lease(&self, external_port: u16, internal_port: u16) -> ReachabilityState {
        let lease_expiry = (!self.config.lease.is_zero()).then(|| Instant::now() + self.config.lease);
        ReachabilityState {
            external_port,
            internal_port,
            lease_expiry,
        }
    }
}

impl std::fmt::Debug for ReachabilityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachabilityManager")
            .field("config", &self.config)
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

fn pick_rotation_port(current: u16) -> u16 {
    let mut rng = rand::thread_rng();
    loop {
        let port = rng.gen_range(ROTATION_PORTS);
        if port != current {
            return port;
        }
    }
}

/// Address of the interface used for outbound traffic. No packet is sent:
/// connecting a UDP socket only selects a route.
pub fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).ok()?;
    socket
        .connect(SocketAddr::from((Ipv4Addr::new(192, 0, 2, 1), 9)))
        .ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RENDEZVOUS_PORT;

    #[derive(Default)]
    struct RecordingMapper {
        mapped: Mutex<Vec<(u16, u16)>>,
        unmapped: Mutex<Vec<u16>>,
        fail: bool,
    }

    #[async_trait]
    impl PortMapper for RecordingMapper {
        async fn map_port(
            &self,
            internal: u16,
            external: u16,
            _lease: Duration,
        ) -> Result<(), MappingError> {
            if self.fail {
                return Err(MappingError::NoGateway("no upnp device".into()));
            }
            self.mapped.lock().push((internal, external));
            Ok(())
        }

        async fn unmap_port(&self, external: u16) -> Result<(), MappingError> {
            self.unmapped.lock().push(external);
            Ok(())
        }
    }

    struct FixedProbe(bool);

    #[async_trait]
    impl ReachabilityProbe for FixedProbe {
        async fn probe(&self, _address: IpAddr) -> Result<Probe, MappingError> {
            Ok(Probe {
                reachable_via_lan: self.0,
            })
        }
    }

    fn manager(mapper: Arc<RecordingMapper>, reachable: bool) -> ReachabilityManager {
        ReachabilityManager::new(
            mapper,
            Arc::new(FixedProbe(reachable)),
            ReachabilityConfig::default(),
        )
    }

    const LAN: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

    #[tokio::test]
    async fn maps_rendezvous_port_when_behind_nat() {
        let mapper = Arc::new(RecordingMapper::default());
        let manager = manager(mapper.clone(), false);
        let state = manager.setup(6886, LAN).await.expect("setup").expect("mapped");
        assert_eq!(state.external_port, 15);
        assert_eq!(state.internal_port, 6886);
        assert_eq!(state.lease_expiry, None);
        assert_eq!(*mapper.mapped.lock(), vec![(6886, 15)]);
        assert_eq!(manager.external_port(), Some(15));
    }

    #[tokio::test]
    async fn skips_mapping_on_rendezvous_port() {
        let mapper = Arc::new(RecordingMapper::default());
        let manager = manager(mapper.clone(), false);
        assert_eq!(manager.setup(15, LAN).await.expect("setup"), None);
        assert!(mapper.mapped.lock().is_empty());
    }

    #[tokio::test]
    async fn skips_mapping_when_reachable() {
        let mapper = Arc::new(RecordingMapper::default());
        let manager = manager(mapper.clone(), true);
        assert_eq!(manager.setup(6886, LAN).await.expect("setup"), None);
        assert!(mapper.mapped.lock().is_empty());
        assert_eq!(manager.current(), None);
    }

    #[tokio::test]
    async fn mapping_failure_leaves_no_state() {
        let mapper = Arc::new(RecordingMapper {
            fail: true,
            ..RecordingMapper::default()
        });
        let manager = manager(mapper, false);
        assert!(manager.setup(6886, LAN).await.is_err());
        assert_eq!(manager.current(), None);
    }

    #[tokio::test]
    async fn rotation_tracks_and_releases_previous_mapping() {
        let mapper = Arc::new(RecordingMapper::default());
        let manager = manager(mapper.clone(), false);
        assert_eq!(manager.rotate().await.expect("noop"), None);

        manager.setup(6886, LAN).await.expect("setup");
        let next = manager.rotate().await.expect("rotate").expect("rotated");
        assert!(ROTATION_PORTS.contains(&next.external_port));
        assert_ne!(next.external_port, 15);
        assert_eq!(next.internal_port, 6886);
        assert_eq!(manager.previous().map(|s| s.external_port), Some(15));
        assert_eq!(manager.current(), Some(next));
        assert_eq!(*mapper.unmapped.lock(), vec![15]);

        manager.teardown().await.expect("teardown");
        assert_eq!(manager.current(), None);
        assert_eq!(*mapper.unmapped.lock(), vec![15, next.external_port]);
    }

    struct SlowMapper {
        inner: RecordingMapper,
        delay: Duration,
    }

    #[async_trait]
    impl PortMapper for SlowMapper {
        async fn map_port(
            &self,
            internal: u16,
            external: u16,
            lease: Duration,
        ) -> Result<(), MappingError> {
            if external != RENDEZVOUS_PORT {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.map_port(internal, external, lease).await
        }

        async fn unmap_port(&self, external: u16) -> Result<(), MappingError> {
            self.inner.unmap_port(external).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_during_rotation_releases_new_port() {
        let mapper = Arc::new(SlowMapper {
            inner: RecordingMapper::default(),
            delay: Duration::from_millis(200),
        });
        let manager = Arc::new(ReachabilityManager::new(
            mapper.clone(),
            Arc::new(FixedProbe(false)),
            ReachabilityConfig::default(),
        ));
        manager.setup(6886, LAN).await.expect("setup");

        let rotating = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.rotate().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.teardown().await.expect("teardown");

        let rotated = rotating.await.expect("join").expect("rotate");
        assert_eq!(rotated, None);
        assert_eq!(manager.current(), None);
        assert_eq!(manager.external_port(), None);

        let mapped = mapper.inner.mapped.lock().clone();
        assert_eq!(mapped.len(), 2);
        let abandoned = mapped[1].1;
        assert_eq!(*mapper.inner.unmapped.lock(), vec![RENDEZVOUS_PORT, abandoned]);
    }

    #[test]
    fn rotation_port_differs_from_current() {
        for _ in 0..100 {
            let port = pick_rotation_port(2000);
            assert_ne!(port, 2000);
            assert!(ROTATION_PORTS.contains(&port));
        }
    }
}
