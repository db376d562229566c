/// Control-channel server.
///
/// Accepts TCP connections on the control port and handles each request on
/// its own thread: send requests get a UDP socket and a receiver pipeline
/// writing into storage, delete requests remove a stored file.

use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use udpsync_transfer::{
    CONTROL_PORT, ControlRequest, DEFAULT_STORAGE_DIR, SendAccepted, TransferConfig,
    TransferContext, UdpLink, bind_udp, run_receiver,
};

use crate::storage::Storage;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the control listener binds; its IP is also used for UDP.
    pub control_addr: SocketAddr,
    /// UDP port for incoming transfers. 0 binds an ephemeral port per
    /// transfer; any other value pins it and serializes transfers.
    pub udp_port: u16,
    pub storage_dir: PathBuf,
    pub transfer: TransferConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            control_addr: SocketAddr::from(([0, 0, 0, 0], CONTROL_PORT)),
            udp_port: 0,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            transfer: TransferConfig::default(),
        }
    }
}

/// State shared by all connection threads.
struct Shared {
    storage: Storage,
    config: ServerConfig,
    /// Held for the whole transfer when the UDP port is pinned.
    pinned_port: Mutex<()>,
}

pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl Server {
    /// Create the storage directory and bind the control listener.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let storage = Storage::new(config.storage_dir.clone())?;
        let stored = storage.list_files()?;
        info!("{} file(s) already in storage", stored.len());

        let listener = TcpListener::bind(config.control_addr)
            .with_context(|| format!("binding control port {}", config.control_addr))?;
        info!("udpsync server listening on {}", listener.local_addr()?);
        if config.udp_port != 0 {
            info!("UDP port pinned to {}; transfers run one at a time", config.udp_port);
        }

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                storage,
                config,
                pinned_port: Mutex::new(()),
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one thread per connection. A failing
    /// request is logged and never stops the server.
    pub fn serve(self) -> Result<()> {
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };
            let peer = match stream.peer_addr() {
                Ok(p) => p,
                Err(e) => {
                    warn!("Connection without peer address: {}", e);
                    continue;
                }
            };
            info!("New request from {}", peer);

            let shared = self.shared.clone();
            thread::spawn(move || {
                if let Err(e) = handle_connection(stream, peer, &shared) {
                    warn!("Request from {} failed: {:#}", peer, e);
                }
            });
        }
        Ok(())
    }
}

fn handle_connection(stream: TcpStream, peer: SocketAddr, shared: &Shared) -> Result<()> {
    let timeout = Some(shared.config.transfer.control_timeout);
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;

    let request = ControlRequest::read_from(&mut BufReader::new(&stream))
        .context("reading control request")?;
    match request {
        Some(ControlRequest::Send {
            file_name,
            udp_port,
        }) => {
            info!("Send request: {} from {}:{}", file_name, peer.ip(), udp_port);
            receive_transfer(stream, SocketAddr::new(peer.ip(), udp_port), &file_name, shared)
        }
        Some(ControlRequest::Delete { file_name }) => {
            info!("Delete request: {}", file_name);
            if let Err(e) = shared.storage.delete_file(&file_name) {
                warn!("Delete of {} failed: {:#}", file_name, e);
            }
            Ok(())
        }
        None => {
            debug!("Connection from {} carried no request", peer);
            Ok(())
        }
    }
}

/// Bind the transfer socket, reply with its port, then run the receiver
/// pipeline to completion.
fn receive_transfer(
    mut stream: TcpStream,
    sender: SocketAddr,
    file_name: &str,
    shared: &Shared,
) -> Result<()> {
    let config = &shared.config;
    let _pinned = if config.udp_port != 0 {
        Some(
            shared
                .pinned_port
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    } else {
        None
    };

    let socket = bind_udp(SocketAddr::new(config.control_addr.ip(), config.udp_port))
        .with_context(|| format!("binding UDP port {}", config.udp_port))?;
    let link = UdpLink::connect(socket, sender)?;
    let udp_port = link.local_addr()?.port();

    SendAccepted { udp_port }.write_to(&mut stream)?;
    drop(stream);
    info!("Receiving {} on UDP port {}", file_name, udp_port);

    let ctx = TransferContext::new(file_name);
    let received = run_receiver(
        shared.storage.dir().to_path_buf(),
        link,
        config.transfer.clone(),
        ctx.clone(),
    )
    .with_context(|| format!("receiving {}", file_name))?;

    let stats = ctx.stats().snapshot();
    info!(
        "Stored {} ({} bytes, {} packets, {} duplicates re-acked)",
        received.path.display(),
        received.bytes,
        received.packets,
        stats.duplicates
    );
    Ok(())
}
