use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use udpsync_transfer::{
    CONTROL_PORT, TransferConfig, TransferContext, UdpLink, bind_udp, negotiate_send,
    request_delete, run_sender,
};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "udpsync",
    version,
    about = "Send files to or delete files from a udpsync server",
    long_about = "`udpsync` pushes a file to a udpsync server over UDP with stop-and-wait \
acknowledgments, or asks the server to delete a file it stores.

EXAMPLE:
    # Send a file to a server on another machine
    udpsync --host 192.168.1.20 send ./notes.txt

    # Remove it again
    udpsync --host 192.168.1.20 delete notes.txt"
)]
struct Args {
    /// Server host name or address
    #[arg(long, env = "UDPSYNC_HOST", default_value = "127.0.0.1", global = true)]
    host: String,

    /// Server TCP control port
    #[arg(long, env = "UDPSYNC_CONTROL_PORT", default_value_t = CONTROL_PORT, global = true)]
    control_port: u16,

    /// Local UDP port to send from; 0 picks a fresh port
    #[arg(long, env = "UDPSYNC_UDP_PORT", default_value_t = 0, global = true)]
    udp_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Send a file to the server
    Send {
        /// File to send; stored on the server under its file name
        path: PathBuf,
    },
    /// Delete a file from the server's storage
    Delete {
        /// Name of the stored file
        name: String,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "udpsync=info,udpsync_transfer=warn".into()),
        )
        .init();

    let args = Args::parse();
    let config = TransferConfig::from_env();
    let server = resolve(&args.host, args.control_port)?;

    match args.command {
        Command::Send { path } => send(server, args.udp_port, path, config),
        Command::Delete { name } => {
            request_delete(server, &name, config.control_timeout)
                .with_context(|| format!("requesting delete of {}", name))?;
            println!("Delete request for {} sent to {}", name, server);
            Ok(())
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("resolving {}", host))?
        .next()
        .ok_or_else(|| anyhow!("{} did not resolve to any address", host))
}

fn send(server: SocketAddr, udp_port: u16, path: PathBuf, config: TransferConfig) -> Result<()> {
    if !path.is_file() {
        bail!("{} does not exist or is not a regular file", path.display());
    }
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?
        .to_string();

    let bind_ip = if server.is_ipv4() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    };
    let socket = bind_udp(SocketAddr::new(bind_ip, udp_port))
        .with_context(|| format!("binding UDP port {}", udp_port))?;
    let local_port = socket.local_addr()?.port();

    let server_port = negotiate_send(server, &name, local_port, config.control_timeout)
        .context("negotiating transfer")?;
    info!("Server receives {} on UDP port {}", name, server_port);

    let link = UdpLink::connect(socket, SocketAddr::new(server.ip(), server_port))?;
    let ctx = TransferContext::new(name.as_str());
    let report = run_sender(path, link, config, ctx.clone())
        .with_context(|| format!("sending {}", name))?;

    let stats = ctx.stats().snapshot();
    println!(
        "Sent {} ({} bytes in {} packets, {} retransmits, {} stale acks) in {:.2?}",
        name, report.bytes, report.packets, report.retransmits, stats.stale_acks, report.duration
    );
    Ok(())
}
