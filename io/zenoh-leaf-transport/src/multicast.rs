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
//! Multicast transport: peers announce themselves with Join and are
//! tracked in a table keyed by their datagram source address.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use zenoh_leaf_buffers::{ZBuf, ZSlice};
use zenoh_leaf_codec::LeafCodec;
use zenoh_leaf_collections::RecyclingBufferPool;
use zenoh_leaf_core::{bail, zlock, ZError, ZResult};
use zenoh_leaf_link::Link;
use zenoh_leaf_protocol::core::{close_reason, SnResolution, ZenohId};
use zenoh_leaf_protocol::defaults;
use zenoh_leaf_protocol::transport::{
    Join, NextSn, PrioritySn, TransportBody, TransportMessage,
};
use zenoh_leaf_protocol::zenoh::ZenohMessage;

use crate::common::{
    accept_frame, read_batch_from, PeerState, RxOutcome, StopSignal, TransportConfig,
    TransportEventHandler,
};
use crate::tx::TransportTx;

struct TransportMulticastInner {
    config: TransportConfig,
    link: Link,
    codec: LeafCodec,
    sn_resolution: SnResolution,
    tx: TransportTx,
    peers: Mutex<HashMap<String, PeerState>>,
    handler: Arc<dyn TransportEventHandler>,
    pool: RecyclingBufferPool,
    initial_sn: u64,
    running: AtomicBool,
    closed: AtomicBool,
    stop: StopSignal,
    read_handle: Mutex<Option<JoinHandle<()>>>,
    lease_handle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct TransportMulticast {
    inner: Arc<TransportMulticastInner>,
}

/// Join the multicast group over `link` and announce ourselves.
pub fn open_peer(
    link: Link,
    config: &TransportConfig,
    handler: Arc<dyn TransportEventHandler>,
) -> ZResult<TransportMulticast> {
    let initial_sn = crate::seq_num::rand(config.sn_resolution);
    let tx = TransportTx::new(
        link.clone(),
        config.sn_resolution,
        config.batch_size,
        initial_sn,
    );
    let pool = RecyclingBufferPool::new(defaults::POOL_SIZE, link.mtu() as usize);
    let transport = TransportMulticast {
        inner: Arc::new(TransportMulticastInner {
            config: config.clone(),
            codec: LeafCodec::new(config.sn_resolution),
            sn_resolution: config.sn_resolution,
            link,
            tx,
            peers: Mutex::new(HashMap::new()),
            handler,
            pool,
            initial_sn,
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            stop: StopSignal::new(),
            read_handle: Mutex::new(None),
            lease_handle: Mutex::new(None),
        }),
    };
    transport.send_join()?;
    Ok(transport)
}

impl TransportMulticast {
    pub fn local_zid(&self) -> ZenohId {
        self.inner.config.zid
    }

    pub fn peers(&self) -> Vec<(ZenohId, u64)> {
        zlock!(self.inner.peers)
            .values()
            .map(|p| (p.zid, p.whatami))
            .collect()
    }

    pub fn write_zenoh_message(&self, msg: ZenohMessage) -> ZResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            bail!(ZError::TransportNotAvailable);
        }
        self.inner.tx.write_zenoh_message(msg)
    }

    pub fn flush(&self) -> ZResult<()> {
        self.inner.tx.flush()
    }

    pub fn set_batching(&self, enabled: bool) -> ZResult<()> {
        self.inner.tx.set_batching(enabled)
    }

    fn send_join(&self) -> ZResult<()> {
        let inner = &self.inner;
        inner.tx.send_transport_message(&TransportMessage::make_join(
            inner.config.version,
            inner.config.whatami,
            inner.config.zid,
            inner.config.lease_ms,
            inner.sn_resolution,
            inner.config.batch_size,
            NextSn::Plain(PrioritySn {
                reliable: inner.initial_sn,
                best_effort: inner.initial_sn,
            }),
        ))
    }

    pub fn start_read_task(&self) -> ZResult<()> {
        let inner = self.inner.clone();
        inner.running.store(true, Ordering::Release);
        let handle = std::thread::Builder::new()
            .name("zleaf-mrx".to_string())
            .spawn(move || read_task(inner))
            .map_err(|_| ZError::SystemTaskFailed)?;
        *zlock!(self.inner.read_handle) = Some(handle);
        Ok(())
    }

    pub fn start_lease_task(&self) -> ZResult<()> {
        let this = self.clone();
        let handle = std::thread::Builder::new()
            .name("zleaf-mlease".to_string())
            .spawn(move || lease_task(this))
            .map_err(|_| ZError::SystemTaskFailed)?;
        *zlock!(self.inner.lease_handle) = Some(handle);
        Ok(())
    }

    pub fn close(&self, reason: u8) -> ZResult<()> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            let _ = self.inner.tx.send_transport_message(&TransportMessage::make_close(
                Some(self.inner.config.zid),
                reason,
                false,
            ));
        }
        self.inner.running.store(false, Ordering::Release);
        self.inner.stop.set();
        let _ = self.inner.link.close();

        let read = zlock!(self.inner.read_handle).take();
        if let Some(handle) = read {
            let _ = handle.join();
        }
        let lease = zlock!(self.inner.lease_handle).take();
        if let Some(handle) = lease {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn read_task(inner: Arc<TransportMulticastInner>) {
    log::trace!("multicast read task started");
    while inner.running.load(Ordering::Acquire) {
        let (batch, addr) = match read_batch_from(&inner.link, &inner.pool) {
            Ok(out) => out,
            Err(ZError::TimedOut) => continue,
            Err(_) => {
                inner.running.store(false, Ordering::Release);
                if !inner.closed.swap(true, Ordering::AcqRel) {
                    inner.handler.closed(close_reason::GENERIC);
                }
                break;
            }
        };
        if let Err(e) = process_batch(&inner, batch, addr) {
            log::warn!("dropping malformed multicast batch: {e}");
        }
    }
    log::trace!("multicast read task terminated");
}

fn process_batch(inner: &Arc<TransportMulticastInner>, batch: ZSlice, addr: String) -> ZResult<()> {
    let mut zbuf = ZBuf::from(batch);
    while zbuf.can_read() {
        let msg = inner.codec.read_transport_message(&mut zbuf)?;
        match msg.body {
            TransportBody::Join(join) => handle_join(inner, join, &addr),
            TransportBody::Frame(frame) => {
                let (outcome, zid) = {
                    let mut peers = zlock!(inner.peers);
                    let peer = match peers.get_mut(&addr) {
                        Some(peer) => peer,
                        None => {
                            log::debug!("dropping frame from unknown peer {addr}");
                            continue;
                        }
                    };
                    peer.received = true;
                    let zid = peer.zid;
                    (
                        accept_frame(peer, inner.sn_resolution, frame, &inner.codec),
                        zid,
                    )
                };
                match outcome {
                    RxOutcome::Deliver(messages) => {
                        for m in messages {
                            inner.handler.handle_zenoh_message(m, &zid);
                        }
                    }
                    RxOutcome::Dropped => {}
                    RxOutcome::Faulted => {
                        // The leaf does not retransmit: evict the peer.
                        log::warn!("evicting faulty peer {zid}");
                        zlock!(inner.peers).remove(&addr);
                        inner.handler.peer_left(&zid);
                    }
                }
            }
            TransportBody::KeepAlive(_) => {
                if let Some(peer) = zlock!(inner.peers).get_mut(&addr) {
                    peer.received = true;
                }
            }
            TransportBody::Close(_) => {
                let removed = zlock!(inner.peers).remove(&addr);
                if let Some(peer) = removed {
                    log::debug!("peer {} left the group", peer.zid);
                    inner.handler.peer_left(&peer.zid);
                }
            }
            _ => bail!(ZError::MessageUnexpected),
        }
    }
    Ok(())
}

fn handle_join(inner: &Arc<TransportMulticastInner>, join: Join, addr: &str) {
    if join.zid == inner.config.zid {
        // Our own loopback.
        return;
    }
    // Peers advertising parameters other than ours cannot be decoded
    // consistently and are rejected.
    if join.sn_resolution != inner.sn_resolution || join.batch_size != inner.config.batch_size {
        log::warn!(
            "rejecting peer {}: mismatched parameters ({})",
            join.zid,
            ZError::TransportOpenSnResolution
        );
        return;
    }
    let mut peers = zlock!(inner.peers);
    let known = peers.contains_key(addr);
    let next_sn = join.next_sn.plain();
    let entry = peers.entry(addr.to_string()).or_insert_with(|| {
        PeerState::new(
            join.zid,
            join.whatami,
            addr.to_string(),
            join.lease_ms,
            inner.sn_resolution,
            next_sn.reliable,
            defaults::PATCH_CURRENT,
        )
    });
    entry.received = true;
    // A Join also restarts the best-effort channel.
    if !known {
        entry.sn_rx_best_effort =
            crate::seq_num::decrement(inner.sn_resolution, next_sn.best_effort);
        log::debug!("new peer {} joined via {addr}", join.zid);
        let (zid, whatami) = (entry.zid, entry.whatami);
        drop(peers);
        inner.handler.new_peer(&zid, whatami);
    }
}

fn lease_task(transport: TransportMulticast) {
    log::trace!("multicast lease task started");
    let inner = &transport.inner;
    let lease_ms = inner.config.lease_ms;
    let tick_ms = (lease_ms / defaults::LEASE_TICKS as u64).max(1);
    let tick = Duration::from_millis(tick_ms);
    let mut ticks: u32 = 0;
    loop {
        if inner.stop.wait_timeout(tick) || !inner.running.load(Ordering::Acquire) {
            break;
        }
        ticks = ticks.wrapping_add(1);

        let expired: Vec<(String, ZenohId)> = {
            let mut peers = zlock!(inner.peers);
            let mut expired = Vec::new();
            for (addr, peer) in peers.iter_mut() {
                if peer.received {
                    peer.received = false;
                    peer.next_lease_ms = peer.lease_ms as i64;
                } else {
                    peer.next_lease_ms -= tick_ms as i64;
                    if peer.next_lease_ms <= 0 {
                        expired.push((addr.clone(), peer.zid));
                    }
                }
            }
            for (addr, _) in &expired {
                peers.remove(addr);
            }
            expired
        };
        for (_, zid) in expired {
            log::warn!("lease expired for peer {zid}");
            inner.handler.peer_left(&zid);
        }

        // Periodically re-announce ourselves, and keep the group aware
        // of us when idle.
        if ticks % defaults::LEASE_TICKS == 0 {
            let _ = transport.send_join();
        } else if !inner.tx.take_transmitted() {
            let _ = inner
                .tx
                .send_transport_message(&TransportMessage::make_keep_alive());
        }
    }
    log::trace!("multicast lease task terminated");
}
