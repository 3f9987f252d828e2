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
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use zenoh_leaf_core::{bail, ZError, ZResult};
use zenoh_leaf_protocol::core::Locator;

use crate::{Link, LinkCapabilities, LinkFlow, LinkTrait, LinkTransport, TCP_LOCATOR_PREFIX};

pub const TCP_DEFAULT_MTU: u16 = u16::MAX;

pub struct LinkTcp {
    socket: TcpStream,
    src_locator: Locator,
    dst_locator: Locator,
}

impl LinkTcp {
    fn new(socket: TcpStream, src_addr: SocketAddr, dst_addr: SocketAddr) -> LinkTcp {
        // Favor latency over throughput for small session messages.
        if let Err(e) = socket.set_nodelay(true) {
            log::warn!("unable to set NODELAY on tcp link {src_addr} => {dst_addr}: {e}");
        }
        LinkTcp {
            socket,
            src_locator: Locator::new(TCP_LOCATOR_PREFIX, &src_addr.to_string()),
            dst_locator: Locator::new(TCP_LOCATOR_PREFIX, &dst_addr.to_string()),
        }
    }
}

impl LinkTrait for LinkTcp {
    fn mtu(&self) -> u16 {
        TCP_DEFAULT_MTU
    }

    fn is_reliable(&self) -> bool {
        true
    }

    fn is_streamed(&self) -> bool {
        true
    }

    fn capabilities(&self) -> LinkCapabilities {
        LinkCapabilities {
            transport: LinkTransport::Unicast,
            flow: LinkFlow::Stream,
        }
    }

    fn get_src(&self) -> &Locator {
        &self.src_locator
    }

    fn get_dst(&self) -> &Locator {
        &self.dst_locator
    }

    fn write(&self, buffer: &[u8]) -> ZResult<usize> {
        (&self.socket).write(buffer).map_err(|e| {
            log::trace!("write error on tcp link {}: {}", self.dst_locator, e);
            ZError::TransportNotAvailable
        })
    }

    fn write_all(&self, buffer: &[u8]) -> ZResult<()> {
        (&self.socket).write_all(buffer).map_err(|e| {
            log::trace!("write error on tcp link {}: {}", self.dst_locator, e);
            ZError::TransportNotAvailable
        })
    }

    fn read(&self, buffer: &mut [u8]) -> ZResult<usize> {
        match (&self.socket).read(buffer) {
            Ok(0) => Err(ZError::DidNotRead),
            Ok(n) => Ok(n),
            Err(e) => {
                log::trace!("read error on tcp link {}: {}", self.dst_locator, e);
                Err(ZError::DidNotRead)
            }
        }
    }

    fn read_exact(&self, buffer: &mut [u8]) -> ZResult<()> {
        (&self.socket).read_exact(buffer).map_err(|e| {
            log::trace!("read error on tcp link {}: {}", self.dst_locator, e);
            ZError::DidNotRead
        })
    }

    fn close(&self) -> ZResult<()> {
        log::trace!("closing tcp link: {}", self.dst_locator);
        let _ = self.socket.shutdown(Shutdown::Both);
        Ok(())
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

/// Open a TCP link towards `locator`.
pub fn connect(locator: &Locator) -> ZResult<Link> {
    let addr = resolve(locator)?;
    let socket = TcpStream::connect(addr).map_err(|e| {
        log::warn!("can not create a new tcp link bound to {addr}: {e}");
        ZError::TransportOpenFailed
    })?;
    let src_addr = socket.local_addr().map_err(|_| ZError::TransportOpenFailed)?;
    let dst_addr = socket.peer_addr().map_err(|_| ZError::TransportOpenFailed)?;
    Ok(Link::new(Arc::new(LinkTcp::new(socket, src_addr, dst_addr))))
}

/// A blocking acceptor of incoming TCP links.
pub struct LinkTcpListener {
    listener: std::net::TcpListener,
    locator: Locator,
}

impl LinkTcpListener {
    pub fn bind(locator: &Locator) -> ZResult<LinkTcpListener> {
        let addr = resolve(locator)?;
        let listener = std::net::TcpListener::bind(addr).map_err(|e| {
            log::warn!("can not create a new tcp listener on {addr}: {e}");
            ZError::TransportOpenFailed
        })?;
        let local = listener
            .local_addr()
            .map_err(|_| ZError::TransportOpenFailed)?;
        Ok(LinkTcpListener {
            listener,
            locator: Locator::new(TCP_LOCATOR_PREFIX, &local.to_string()),
        })
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn accept(&self) -> ZResult<Link> {
        let (socket, dst_addr) = self.listener.accept().map_err(|e| {
            log::warn!("can not accept tcp connection on {}: {}", self.locator, e);
            ZError::TransportOpenFailed
        })?;
        let src_addr = socket.local_addr().map_err(|_| ZError::TransportOpenFailed)?;
        if socket.take_error().is_err() {
            bail!(ZError::TransportOpenFailed);
        }
        Ok(Link::new(Arc::new(LinkTcp::new(socket, src_addr, dst_addr))))
    }
}
