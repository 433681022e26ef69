//! REUSEPORT UDP socket construction, one per worker. Binding the same
//! `addr:port` from multiple sockets with `SO_REUSEPORT` set lets the
//! kernel fan datagrams out across workers by flow hash, with no userspace
//! dispatch step on the hot path.

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{info, warn};

pub const VXLAN_PORT: u16 = 4789;
const TARGET_RCVBUF: usize = 128 * 1024 * 1024;
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Build and bind a single worker's receive socket.
pub fn bind_reuseport(bind_addr: &str) -> Result<UdpSocket> {
    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {bind_addr}"))?;

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("failed to create UDP socket")?;
    socket
        .set_reuse_address(true)
        .context("failed to set SO_REUSEADDR")?;
    socket
        .set_reuse_port(true)
        .context("failed to set SO_REUSEPORT")?;
    socket
        .set_recv_buffer_size(TARGET_RCVBUF)
        .context("failed to set receive buffer size")?;
    socket
        .set_read_timeout(Some(RECV_TIMEOUT))
        .context("failed to set receive timeout")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("failed to bind {addr}"))?;

    let granted = socket.recv_buffer_size().unwrap_or(0);
    if granted < TARGET_RCVBUF {
        warn!(
            requested = TARGET_RCVBUF,
            granted, "kernel granted a smaller receive buffer than requested"
        );
    } else {
        info!(granted, "receive buffer size");
    }

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_sockets_can_bind_the_same_reuseport_address() {
        let addr = "127.0.0.1:0";
        let first = bind_reuseport(addr).expect("first bind");
        let bound = first.local_addr().expect("local addr");
        let second = bind_reuseport(&bound.to_string()).expect("second bind should succeed under reuseport");
        drop(first);
        drop(second);
    }
}
