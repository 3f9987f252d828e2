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
//! Uniform byte-oriented link layer.
//!
//! A [`Link`] abstracts one concrete connection; its capability record is
//! the sole source of link behavior for the transport above (MTU,
//! reliability, datagram vs stream, unicast vs multicast).

#[cfg(feature = "test")]
pub mod mem;
pub mod tcp;
pub mod udp;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use zenoh_leaf_core::{bail, ZError, ZResult};
use zenoh_leaf_protocol::core::Locator;

pub const TCP_LOCATOR_PREFIX: &str = "tcp";
pub const UDP_LOCATOR_PREFIX: &str = "udp";
#[cfg(feature = "test")]
pub const MEM_LOCATOR_PREFIX: &str = "mem";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransport {
    Unicast,
    Multicast,
    Raweth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFlow {
    Datagram,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkCapabilities {
    pub transport: LinkTransport,
    pub flow: LinkFlow,
}

pub trait LinkTrait: Send + Sync {
    fn mtu(&self) -> u16;
    fn is_reliable(&self) -> bool;
    fn is_streamed(&self) -> bool;
    fn capabilities(&self) -> LinkCapabilities;
    fn get_src(&self) -> &Locator;
    fn get_dst(&self) -> &Locator;
    fn write(&self, buffer: &[u8]) -> ZResult<usize>;
    fn write_all(&self, buffer: &[u8]) -> ZResult<()>;
    fn read(&self, buffer: &mut [u8]) -> ZResult<usize>;
    fn read_exact(&self, buffer: &mut [u8]) -> ZResult<()>;
    /// Like `read`, additionally reporting the sender's address; only
    /// meaningful on multicast links.
    fn read_from(&self, buffer: &mut [u8]) -> ZResult<(usize, String)> {
        self.read(buffer).map(|n| (n, String::new()))
    }
    fn close(&self) -> ZResult<()>;
}

#[derive(Clone)]
pub struct Link(Arc<dyn LinkTrait>);

impl Link {
    pub fn new(link: Arc<dyn LinkTrait>) -> Link {
        Link(link)
    }
}

impl Deref for Link {
    type Target = dyn LinkTrait;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Link")
            .field("src", self.get_src())
            .field("dst", self.get_dst())
            .finish()
    }
}

/// Open a link towards the given locator, dispatching on its protocol.
pub fn new_link(locator: &Locator) -> ZResult<Link> {
    match locator.protocol.as_str() {
        TCP_LOCATOR_PREFIX => tcp::connect(locator),
        UDP_LOCATOR_PREFIX => udp::connect(locator),
        _ => {
            log::error!("no link support for locator {locator}");
            bail!(ZError::TransportNotAvailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_protocols_are_rejected(){
        let locator: Locator = "quic/127.0.0.1:7447".parse().unwrap();
        assert_eq!(
            new_link(&locator).err(),
            Some(ZError::TransportNotAvailable)
        );
    }

    #[test]
    fn mem_pair_carries_datagrams() {
        let (a, b) = mem::MemLink::pair("pair0");
        a.write_all(&[1, 2, 3]).unwrap();
        let mut buf = [0u8; 8];
        let n = b.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);

        b.write_all(&[9]).unwrap();
        let n = a.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[9]);

        a.close().unwrap();
        assert!(b.read(&mut buf).is_err());
    }
}
