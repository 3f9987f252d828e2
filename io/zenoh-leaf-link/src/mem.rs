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
//! In-process link pairs: reliable, datagram-flow, with the loss and
//! reordering characteristics of a channel. Test-only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use zenoh_leaf_core::{bail, zlock, ZError, ZResult};
use zenoh_leaf_protocol::core::Locator;

use crate::{Link, LinkCapabilities, LinkFlow, LinkTrait, LinkTransport, MEM_LOCATOR_PREFIX};

pub const MEM_DEFAULT_MTU: u16 = u16::MAX;

pub struct MemLink {
    tx: Mutex<Option<flume::Sender<Vec<u8>>>>,
    rx: flume::Receiver<Vec<u8>>,
    closed: AtomicBool,
    src_locator: Locator,
    dst_locator: Locator,
}

impl MemLink {
    /// A connected pair of in-memory links.
    pub fn pair(name: &str) -> (Link, Link) {
        let (atx, arx) = flume::unbounded();
        let (btx, brx) = flume::unbounded();
        let a = MemLink {
            tx: Mutex::new(Some(atx)),
            rx: brx,
            closed: AtomicBool::new(false),
            src_locator: Locator::new(MEM_LOCATOR_PREFIX, &format!("{name}.a")),
            dst_locator: Locator::new(MEM_LOCATOR_PREFIX, &format!("{name}.b")),
        };
        let b = MemLink {
            tx: Mutex::new(Some(btx)),
            rx: arx,
            closed: AtomicBool::new(false),
            src_locator: Locator::new(MEM_LOCATOR_PREFIX, &format!("{name}.b")),
            dst_locator: Locator::new(MEM_LOCATOR_PREFIX, &format!("{name}.a")),
        };
        (Link::new(Arc::new(a)), Link::new(Arc::new(b)))
    }
}

impl LinkTrait for MemLink {
    fn mtu(&self) -> u16 {
        MEM_DEFAULT_MTU
    }

    fn is_reliable(&self) -> bool {
        true
    }

    fn is_streamed(&self) -> bool {
        false
    }

    fn capabilities(&self) -> LinkCapabilities {
        LinkCapabilities {
            transport: LinkTransport::Unicast,
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
        let guard = zlock!(self.tx);
        match guard.as_ref() {
            Some(tx) => tx
                .send(buffer.to_vec())
                .map(|_| buffer.len())
                .map_err(|_| ZError::TransportNotAvailable),
            None => Err(ZError::TransportNotAvailable),
        }
    }

    fn write_all(&self, buffer: &[u8]) -> ZResult<()> {
        self.write(buffer).map(|_| ())
    }

    fn read(&self, buffer: &mut [u8]) -> ZResult<usize> {
        // Poll so that a local close is observable while blocked.
        let msg = loop {
            if self.closed.load(Ordering::Acquire) {
                bail!(ZError::DidNotRead);
            }
            match self.rx.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(msg) => break msg,
                Err(flume::RecvTimeoutError::Timeout) => continue,
                Err(flume::RecvTimeoutError::Disconnected) => bail!(ZError::DidNotRead),
            }
        };
        if msg.len() > buffer.len() {
            bail!(ZError::DidNotRead);
        }
        buffer[..msg.len()].copy_from_slice(&msg);
        Ok(msg.len())
    }

    fn read_exact(&self, buffer: &mut [u8]) -> ZResult<()> {
        let n = self.read(buffer)?;
        if n != buffer.len() {
            bail!(ZError::DidNotRead);
        }
        Ok(())
    }

    fn read_from(&self, buffer: &mut [u8]) -> ZResult<(usize, String)> {
        let n = self.read(buffer)?;
        Ok((n, self.dst_locator.address.clone()))
    }

    fn close(&self) -> ZResult<()> {
        self.closed.store(true, Ordering::Release);
        // Dropping our sender disconnects the peer's receiver, waking
        // any blocked read over there.
        zlock!(self.tx).take();
        Ok(())
    }
}
