use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port used on the gateway side of a NAT mapping. Listeners already bound
/// to it are assumed to be directly reachable.
pub const RENDEZVOUS_PORT: u16 = 15;

/// Runtime configuration for the peer-to-peer stack.
#[derive(Clone, Debug)]
pub struct P2pConfig {
    /// Interface to accept inbound peers on.
    pub bind_ip: IpAddr,
    /// Local listening port. `0` picks an ephemeral port.
    pub listen_port: u16,
    /// Pending connection queue length handed to `listen(2)`.
    pub backlog: u32,
    /// Maximum bytes per envelope frame.
    pub max_frame_len: usize,
    /// Upper bound on dialing a peer.
    pub connect_timeout: Duration,
    /// Upper bound on receiving the single envelope of an inbound connection.
    pub read_timeout: Duration,
    pub reachability: ReachabilityConfig,
}

impl P2pConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.listen_port)
    }
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: 6886,
            backlog: 100,
            max_frame_len: 2 * 1024 * 1024,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            reachability: ReachabilityConfig::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReachabilityConfig {
    /// External gateway port mapped to the listening port.
    pub rendezvous_port: u16,
    /// Lease requested from the gateway; zero asks for a permanent mapping.
    pub lease: Duration,
    /// When set, the external port is replaced at this interval.
    pub rotation_interval: Option<Duration>,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            rendezvous_port: RENDEZVOUS_PORT,
            lease: Duration::ZERO,
            rotation_interval: None,
        }
    }
}
