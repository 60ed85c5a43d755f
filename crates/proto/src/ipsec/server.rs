//! UDP front end of the gateway
//!
//! [`GatewayServer`] owns the IKE (500) and NAT-T (4500) sockets. Each
//! datagram is handed to the engine on a blocking worker, since IKE_SA_INIT
//! does a modular exponentiation. A ticker drives retransmission of gateway
//! requests.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tngf_proto::ipsec::{EngineConfig, GatewayServer};
//! use tngf_proto::ipsec::signaling::MemorySignaling;
//! use tngf_proto::ipsec::xfrm::TracingSink;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::builder()
//!         .with_bind_address("192.0.2.10".parse()?)
//!         .with_gateway_address("10.0.0.1".parse()?)
//!         .with_ue_subnet("10.0.0.0/24".parse()?)
//!         .with_fqdn("tngf.example.org")
//!         .with_nas_tcp_port(20000)
//!         .with_up_ip_address("192.0.2.11".parse()?)
//!         .build()?;
//!
//!     let server = GatewayServer::bind(
//!         config,
//!         Arc::new(MemorySignaling::new()),
//!         Arc::new(TracingSink),
//!     )
//!     .await?;
//!     server.run_until(tokio::signal::ctrl_c()).await?;
//!     Ok(())
//! }
//! ```

use super::{
    config::EngineConfig,
    engine::IkeEngine,
    signaling::SignalingLayer,
    transport::UdpTransport,
    xfrm::KernelRuleSink,
    Error, Result,
};
use std::future::Future;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Largest datagram read from a socket
const RECV_BUFFER_SIZE: usize = 65536;

/// How often outstanding requests are checked
const RETRANSMIT_TICK: Duration = Duration::from_millis(100);

/// Retransmit poll running beside the receive loop
#[derive(Debug, Default)]
struct PollSlot {
    running: Option<JoinHandle<()>>,
}

impl PollSlot {
    /// Start `job` on the blocking pool unless the previous one is still running
    fn start<F>(&mut self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_idle() {
            return false;
        }
        self.running = Some(tokio::spawn(async move {
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                warn!(error = %e, "Retransmit poll panicked");
            }
        }));
        true
    }

    fn is_idle(&self) -> bool {
        self.running.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

/// UDP server feeding an [`IkeEngine`]
pub struct GatewayServer {
    engine: Arc<IkeEngine>,
    ike: Arc<UdpSocket>,
    nat_t: Arc<UdpSocket>,
    ike_addr: SocketAddrV4,
    nat_t_addr: SocketAddrV4,
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("ike_addr", &self.ike_addr)
            .field("nat_t_addr", &self.nat_t_addr)
            .finish_non_exhaustive()
    }
}

impl GatewayServer {
    /// Bind both sockets and create the engine
    ///
    /// A port of 0 in `config` binds an ephemeral port; the engine is
    /// configured with the port actually bound.
    ///
    /// # Errors
    ///
    /// Returns `Io` if a socket cannot be bound
    pub async fn bind(
        mut config: EngineConfig,
        signaling: Arc<dyn SignalingLayer>,
        kernel: Arc<dyn KernelRuleSink>,
    ) -> Result<Self> {
        let ike = Arc::new(UdpSocket::bind((config.bind_address, config.ike_port)).await?);
        let nat_t = Arc::new(UdpSocket::bind((config.bind_address, config.nat_t_port)).await?);

        config.ike_port = ike.local_addr()?.port();
        config.nat_t_port = nat_t.local_addr()?.port();
        let ike_addr = SocketAddrV4::new(config.bind_address, config.ike_port);
        let nat_t_addr = SocketAddrV4::new(config.bind_address, config.nat_t_port);

        let transport = Arc::new(UdpTransport::new(ike.clone(), nat_t.clone())?);
        let engine = Arc::new(IkeEngine::new(config, signaling, kernel, transport));

        info!(ike = %ike_addr, nat_t = %nat_t_addr, "IKE server bound");

        Ok(GatewayServer {
            engine,
            ike,
            nat_t,
            ike_addr,
            nat_t_addr,
        })
    }

    /// The engine, for the signaling side of the gateway
    pub fn engine(&self) -> Arc<IkeEngine> {
        Arc::clone(&self.engine)
    }

    /// Address of the IKE socket
    pub fn ike_addr(&self) -> SocketAddrV4 {
        self.ike_addr
    }

    /// Address of the NAT-T socket
    pub fn nat_t_addr(&self) -> SocketAddrV4 {
        self.nat_t_addr
    }

    /// Serve until `shutdown` completes
    ///
    /// # Errors
    ///
    /// Returns `Io` if a socket fails while receiving
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future,
    {
        let mut ike_buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut nat_t_buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut ticker = tokio::time::interval(RETRANSMIT_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut poll = PollSlot::default();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("IKE server stopping");
                    return Ok(());
                }
                received = self.ike.recv_from(&mut ike_buf) => {
                    let (len, peer) = received.map_err(|e| Error::Io(e.to_string()))?;
                    self.dispatch(&ike_buf[..len], self.ike_addr, peer);
                }
                received = self.nat_t.recv_from(&mut nat_t_buf) => {
                    let (len, peer) = received.map_err(|e| Error::Io(e.to_string()))?;
                    self.dispatch(&nat_t_buf[..len], self.nat_t_addr, peer);
                }
                _ = ticker.tick() => {
                    let engine = Arc::clone(&self.engine);
                    if !poll.start(move || engine.poll_retransmits(Instant::now())) {
                        trace!("Retransmit poll still running, tick skipped");
                    }
                }
            }
        }
    }

    /// Serve until the process is stopped
    ///
    /// # Errors
    ///
    /// Returns `Io` if a socket fails while receiving
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    fn dispatch(&self, data: &[u8], local: SocketAddrV4, peer: SocketAddr) {
        let SocketAddr::V4(peer) = peer else {
            debug!(%peer, "IPv6 datagram ignored");
            return;
        };

        trace!(%peer, %local, len = data.len(), "Datagram received");
        let engine = Arc::clone(&self.engine);
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || engine.handle_datagram(&data, local, peer));
    }
}
