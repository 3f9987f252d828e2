//
// Copyright (c) 2023 ZettaScale Technology
//
// This program and the accompanying materials are made available under the
// terms of the Eclipse Public License 2.0 which is available at
// http://www.eclipse.org/legal/epl-2.0, or the Apache License, Version 2.0
// which is available at https://www.apache.org/licenses/LICENSE-2.0.
//
// SPDX-License-Identifier: EPL-2.0 OR Apache-2.0
//
// Contributors:
//   ZettaScale Zenoh Team, <zenoh@zettascale.tech>
//
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use zenoh_leaf_core::{bail, ZError, ZResult};
use zenoh_leaf_protocol::core::Locator;

use crate::{Link, LinkCapabilities, LinkFlow, LinkTrait, LinkTransport, UDP_LOCATOR_PREFIX};

/// Maximum UDP payload; the effective MTU of the path is usually lower
/// and fragmentation at the transport layer takes care of the rest.
pub const UDP_DEFAULT_MTU: u16 = 65_507u16;

pub struct LinkUdp {
    socket: UdpSocket,
    multicast: bool,
    dst_addr: SocketAddr,
    src_locator: Locator,
    dst_locator: Locator,
}

impl LinkTrait for LinkUdp {
    fn mtu(&self) -> u16 {
        UDP_DEFAULT_MTU
    }

    fn is_reliable(&self) -> bool {
        false
    }

    fn is_streamed(&self) -> bool {
        false
    }

    fn capabilities(&self) -> LinkCapabilities {
        LinkCapabilities {
            transport: if self.multicast {
                LinkTransport::Multicast
            } else {
                LinkTransport::Unicast
            },
            flow: LinkFlow::Datagram,
        }
    }

    fn get_src(&self) -> &Locator {
        &self.src_locator
    }

    fn get_dst(&self) -> &Locator {
        &self.dst_locator
    }

    fn write(&self, buffer: &[u8]) -> ZResult<usize> {
        self.socket.send_to(buffer, self.dst_addr).map_err(|e| {
            log::trace!("write error on udp link {}: {}", self.dst_locator, e);
            ZError::TransportNotAvailable
        })
    }

    fn write_all(&self, buffer: &[u8]) -> ZResult<()> {
        let n = self.write(buffer)?;
        if n != buffer.len() {
            bail!(ZError::TransportNotAvailable);
        }
        Ok(())
    }

    fn read(&self, buffer: &mut [u8]) -> ZResult<usize> {
        self.socket.recv(buffer).map_err(|e| map_read_err(e, &self.dst_locator))
    }

    fn read_exact(&self, buffer: &mut [u8]) -> ZResult<()> {
        let n = self.read(buffer)?;
        if n != buffer.len() {
            bail!(ZError::DidNotRead);
        }
        Ok(())
    }

    fn read_from(&self, buffer: &mut [u8]) -> ZResult<(usize, String)> {
        let (n, addr) = self
            .socket
            .recv_from(buffer)
            .map_err(|e| map_read_err(e, &self.dst_locator))?;
        Ok((n, addr.to_string()))
    }

    fn close(&self) -> ZResult<()> {
        log::trace!("closing udp link: {}", self.dst_locator);
        // The socket closes on drop; readers wake at the next timeout.
        Ok(())
    }
}

/// Timeouts are reported apart so that polling loops can keep going.
fn map_read_err(e: std::io::Error, locator: &Locator) -> ZError {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => ZError::TimedOut,
        _ => {
            log::trace!("read error on udp link {locator}: {e}");
            ZError::DidNotRead
        }
    }
}

fn resolve(locator: &Locator) -> ZResult<SocketAddr> {
    locator
        .address
        .to_socket_addrs()
        .map_err(|_| ZError::Invalid)?
        .next()
        .ok_or(ZError::Invalid)
}

/// Open a UDP link towards `locator`: connected unicast, or a multicast
/// group membership when the address is multicast.
pub fn connect(locator: &Locator) -> ZResult<Link> {
    connect_inner(locator, None)
}

/// Like [`connect`], with a receive timeout on the socket so that a
/// polling loop (scouting) can observe its deadline.
pub fn connect_timeout(locator: &Locator, timeout: Duration) -> ZResult<Link> {
    connect_inner(locator, Some(timeout))
}

/// Receive timeout applied when the caller does not pick one: keeps the
/// read task able to observe session shutdown.
const UDP_DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

fn connect_inner(locator: &Locator, timeout: Option<Duration>) -> ZResult<Link> {
    let timeout = timeout.unwrap_or(UDP_DEFAULT_READ_TIMEOUT);
    let dst_addr = resolve(locator)?;
    if dst_addr.ip().is_multicast() {
        return open_multicast(locator, dst_addr, timeout);
    }
    let socket = UdpSocket::bind(match dst_addr {
        SocketAddr::V4(_) => "0.0.0.0:0",
        SocketAddr::V6(_) => "[::]:0",
    })
    .map_err(|_| ZError::TransportOpenFailed)?;
    socket
        .connect(dst_addr)
        .map_err(|_| ZError::TransportOpenFailed)?;
    socket
        .set_read_timeout(Some(timeout))
        .map_err(|_| ZError::TransportOpenFailed)?;
    let src_addr = socket.local_addr().map_err(|_| ZError::TransportOpenFailed)?;
    Ok(Link::new(Arc::new(LinkUdp {
        socket,
        multicast: false,
        dst_addr,
        src_locator: Locator::new(UDP_LOCATOR_PREFIX, &src_addr.to_string()),
        dst_locator: locator.clone(),
    })))
}

fn open_multicast(locator: &Locator, dst_addr: SocketAddr, timeout: Duration) -> ZResult<Link> {
    let group = match dst_addr.ip() {
        IpAddr::V4(addr) => addr,
        IpAddr::V6(_) => {
            log::error!("ipv6 multicast is not supported: {locator}");
            bail!(ZError::TransportNotAvailable);
        }
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|_| ZError::TransportOpenFailed)?;
    socket
        .set_reuse_address(true)
        .map_err(|_| ZError::TransportOpenFailed)?;
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), dst_addr.port());
    socket
        .bind(&bind_addr.into())
        .map_err(|e| {
            log::warn!("can not bind the multicast udp socket on {bind_addr}: {e}");
            ZError::TransportOpenFailed
        })?;
    let iface = match locator.param("iface").map(|s| s.parse::<Ipv4Addr>()) {
        Some(Ok(iface)) => iface,
        _ => Ipv4Addr::UNSPECIFIED,
    };
    socket
        .join_multicast_v4(&group, &iface)
        .map_err(|e| {
            log::warn!("can not join the multicast group {group}: {e}");
            ZError::TransportOpenFailed
        })?;
    socket
        .set_multicast_loop_v4(true)
        .map_err(|_| ZError::TransportOpenFailed)?;

    let socket: UdpSocket = socket.into();
    socket
        .set_read_timeout(Some(timeout))
        .map_err(|_| ZError::TransportOpenFailed)?;
    let src_addr = socket.local_addr().map_err(|_| ZError::TransportOpenFailed)?;
    Ok(Link::new(Arc::new(LinkUdp {
        socket,
        multicast: true,
        dst_addr,
        src_locator: Locator::new(UDP_LOCATOR_PREFIX, &src_addr.to_string()),
        dst_locator: locator.clone(),
    })))
}
