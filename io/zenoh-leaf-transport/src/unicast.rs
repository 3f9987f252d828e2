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
//! Unicast transport: Init/Open establishment, then one peer entry
//! served by the read and lease tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use zenoh_leaf_buffers::{ZBuf, ZSlice};
use zenoh_leaf_codec::LeafCodec;
use zenoh_leaf_collections::RecyclingBufferPool;
use zenoh_leaf_core::{bail, zlock, ZError, ZResult};
use zenoh_leaf_link::Link;
use zenoh_leaf_protocol::core::{close_reason, SnResolution, ZInt, ZenohId};
use zenoh_leaf_protocol::transport::{TransportBody, TransportMessage};
use zenoh_leaf_protocol::zenoh::ZenohMessage;
use zenoh_leaf_protocol::defaults;

use crate::common::{
    accept_frame, read_batch, PeerState, RxOutcome, StopSignal, TransportConfig,
    TransportEventHandler,
};
use crate::seq_num;
use crate::tx::TransportTx;

/// Parameters agreed during establishment.
struct EstablishParams {
    remote_zid: ZenohId,
    remote_whatami: ZInt,
    sn_resolution: SnResolution,
    batch_size: u16,
    patch: u8,
    lease_ms: u64,
    initial_sn_tx: ZInt,
    initial_sn_rx: ZInt,
}

struct TransportUnicastInner {
    config: TransportConfig,
    link: Link,
    codec: LeafCodec,
    sn_resolution: SnResolution,
    lease_ms: u64,
    tx: TransportTx,
    peer: Mutex<PeerState>,
    handler: Arc<dyn TransportEventHandler>,
    pool: RecyclingBufferPool,
    running: AtomicBool,
    closed: AtomicBool,
    stop: StopSignal,
    read_handle: Mutex<Option<JoinHandle<()>>>,
    lease_handle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct TransportUnicast {
    inner: Arc<TransportUnicastInner>,
}

/// Establish a session over `link` as the initiator.
pub fn open_client(
    link: Link,
    config: &TransportConfig,
    handler: Arc<dyn TransportEventHandler>,
) -> ZResult<TransportUnicast> {
    let params = handshake_client(&link, config)?;
    Ok(TransportUnicast::new(link, config.clone(), params, handler))
}

/// Establish a session over an accepted `link` as the listener.
pub fn accept(
    link: Link,
    config: &TransportConfig,
    handler: Arc<dyn TransportEventHandler>,
) -> ZResult<TransportUnicast> {
    let params = handshake_listener(&link, config)?;
    Ok(TransportUnicast::new(link, config.clone(), params, handler))
}

fn recv_transport_message(link: &Link, pool: &RecyclingBufferPool) -> ZResult<TransportMessage> {
    let batch = read_batch(link, pool)?;
    let mut zbuf = ZBuf::from(batch);
    LeafCodec::default().read_transport_message(&mut zbuf)
}

fn handshake_client(link: &Link, config: &TransportConfig) -> ZResult<EstablishParams> {
    let codec = LeafCodec::default();
    let pool = RecyclingBufferPool::new(1, config.batch_size as usize);

    let send = |msg: &TransportMessage| -> ZResult<()> {
        let mut w = zenoh_leaf_buffers::WBuf::new(config.batch_size as usize, false);
        codec
            .write_transport_message(&mut w, msg)
            .map_err(|_| ZError::MessageSerializationFailed)?;
        let bytes = w.to_vec();
        if link.is_streamed() {
            link.write_all(&(bytes.len() as u16).to_le_bytes())?;
        }
        link.write_all(&bytes)
    };

    log::debug!("sending Init(Syn)");
    send(&TransportMessage::make_init_syn(
        config.version,
        config.whatami,
        config.zid,
        config.sn_resolution,
        defaults::REQ_ID_RESOLUTION,
        config.batch_size,
        config.patch,
    ))?;

    let iam = match recv_transport_message(link, &pool)?.body {
        TransportBody::InitAck(iam) => iam,
        _ => bail!(ZError::MessageUnexpected),
    };
    log::debug!("received Init(Ack)");

    // Every parameter committed by the responder must be less than or
    // equal to the proposed one.
    if iam.sn_resolution > config.sn_resolution
        || iam.req_id_resolution > defaults::REQ_ID_RESOLUTION
        || iam.batch_size > config.batch_size
    {
        bail!(ZError::TransportOpenSnResolution);
    }
    if iam.patch > config.patch {
        bail!(ZError::TransportOpenFailed);
    }

    let sn_resolution = iam.sn_resolution;
    let initial_sn_tx = seq_num::rand(sn_resolution);

    log::debug!("sending Open(Syn)");
    send(&TransportMessage::make_open_syn(
        config.lease_ms,
        initial_sn_tx,
        iam.cookie,
    ))?;

    let oam = match recv_transport_message(link, &pool)?.body {
        TransportBody::OpenAck(oam) => oam,
        _ => bail!(ZError::MessageUnexpected),
    };
    log::debug!("received Open(Ack)");

    Ok(EstablishParams {
        remote_zid: iam.zid,
        remote_whatami: iam.whatami,
        sn_resolution,
        batch_size: iam.batch_size,
        patch: iam.patch,
        lease_ms: oam.lease_ms,
        initial_sn_tx,
        initial_sn_rx: oam.initial_sn,
    })
}

fn handshake_listener(link: &Link, config: &TransportConfig) -> ZResult<EstablishParams> {
    let codec = LeafCodec::default();
    let pool = RecyclingBufferPool::new(1, config.batch_size as usize);

    let send = |msg: &TransportMessage| -> ZResult<()> {
        let mut w = zenoh_leaf_buffers::WBuf::new(config.batch_size as usize, false);
        codec
            .write_transport_message(&mut w, msg)
            .map_err(|_| ZError::MessageSerializationFailed)?;
        let bytes = w.to_vec();
        if link.is_streamed() {
            link.write_all(&(bytes.len() as u16).to_le_bytes())?;
        }
        link.write_all(&bytes)
    };

    let ism = match recv_transport_message(link, &pool)?.body {
        TransportBody::InitSyn(ism) => ism,
        _ => bail!(ZError::MessageUnexpected),
    };
    log::debug!("received Init(Syn)");

    // Commit the smaller of each proposed parameter.
    let sn_resolution = if config.sn_resolution > ism.sn_resolution {
        ism.sn_resolution
    } else {
        config.sn_resolution
    };
    let req_id_resolution = if defaults::REQ_ID_RESOLUTION > ism.req_id_resolution {
        ism.req_id_resolution
    } else {
        defaults::REQ_ID_RESOLUTION
    };
    let batch_size = config.batch_size.min(ism.batch_size);
    let patch = config.patch.min(ism.patch);

    let cookie: Vec<u8> = {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        (0..16).map(|_| rng.gen()).collect()
    };

    log::debug!("sending Init(Ack)");
    send(&TransportMessage::make_init_ack(
        config.version,
        config.whatami,
        config.zid,
        sn_resolution,
        req_id_resolution,
        batch_size,
        patch,
        ZSlice::from(cookie.clone()),
    ))?;

    let osm = match recv_transport_message(link, &pool)?.body {
        TransportBody::OpenSyn(osm) => osm,
        _ => bail!(ZError::MessageUnexpected),
    };
    log::debug!("received Open(Syn)");
    if osm.cookie.as_slice() != cookie.as_slice() {
        bail!(ZError::TransportOpenFailed);
    }

    let initial_sn_tx = seq_num::rand(sn_resolution);
    log::debug!("sending Open(Ack)");
    send(&TransportMessage::make_open_ack(
        config.lease_ms,
        initial_sn_tx,
    ))?;

    Ok(EstablishParams {
        remote_zid: ism.zid,
        remote_whatami: ism.whatami,
        sn_resolution,
        batch_size,
        patch,
        lease_ms: osm.lease_ms,
        initial_sn_tx,
        initial_sn_rx: osm.initial_sn,
    })
}

impl TransportUnicast {
    fn new(
        link: Link,
        config: TransportConfig,
        params: EstablishParams,
        handler: Arc<dyn TransportEventHandler>,
    ) -> TransportUnicast {
        let peer = PeerState::new(
            params.remote_zid,
            params.remote_whatami,
            link.get_dst().address.clone(),
            params.lease_ms,
            params.sn_resolution,
            params.initial_sn_rx,
            params.patch,
        );
        let tx = TransportTx::new(
            link.clone(),
            params.sn_resolution,
            params.batch_size,
            params.initial_sn_tx,
        );
        let pool = RecyclingBufferPool::new(
            defaults::POOL_SIZE,
            (params.batch_size as usize).max(link.mtu() as usize),
        );
        TransportUnicast {
            inner: Arc::new(TransportUnicastInner {
                config,
                codec: LeafCodec::new(params.sn_resolution),
                sn_resolution: params.sn_resolution,
                lease_ms: params.lease_ms,
                link,
                tx,
                peer: Mutex::new(peer),
                handler,
                pool,
                running: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                stop: StopSignal::new(),
                read_handle: Mutex::new(None),
                lease_handle: Mutex::new(None),
            }),
        }
    }

    pub fn local_zid(&self) -> ZenohId {
        self.inner.config.zid
    }

    pub fn remote_zid(&self) -> ZenohId {
        zlock!(self.inner.peer).zid
    }

    pub fn remote_whatami(&self) -> ZInt {
        zlock!(self.inner.peer).whatami
    }

    pub fn sn_resolution(&self) -> SnResolution {
        self.inner.sn_resolution
    }

    pub fn lease_ms(&self) -> u64 {
        self.inner.lease_ms
    }

    pub fn is_open(&self) -> bool {
        self.inner.running.load(Ordering::Acquire) && !self.inner.closed.load(Ordering::Acquire)
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

    pub fn start_read_task(&self) -> ZResult<()> {
        let inner = self.inner.clone();
        inner.running.store(true, Ordering::Release);
        let handle = std::thread::Builder::new()
            .name("zleaf-rx".to_string())
            .spawn(move || read_task(inner))
            .map_err(|_| ZError::SystemTaskFailed)?;
        *zlock!(self.inner.read_handle) = Some(handle);
        Ok(())
    }

    pub fn start_lease_task(&self) -> ZResult<()> {
        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name("zleaf-lease".to_string())
            .spawn(move || lease_task(inner))
            .map_err(|_| ZError::SystemTaskFailed)?;
        *zlock!(self.inner.lease_handle) = Some(handle);
        Ok(())
    }

    /// Drive the session through its (single) close handshake and stop
    /// both tasks.
    pub fn close(&self, reason: u8) -> ZResult<()> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            log::debug!("closing transport with {}", self.remote_zid());
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

impl TransportUnicastInner {
    /// Notify the session once, unless the close was locally initiated.
    fn notify_closed(&self, reason: u8) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.handler.closed(reason);
        }
    }
}

fn read_task(inner: Arc<TransportUnicastInner>) {
    log::trace!("read task started");
    while inner.running.load(Ordering::Acquire) {
        let batch = match read_batch(&inner.link, &inner.pool) {
            Ok(batch) => batch,
            Err(ZError::TimedOut) => continue,
            Err(_) => {
                inner.running.store(false, Ordering::Release);
                inner.notify_closed(close_reason::GENERIC);
                break;
            }
        };
        if let Err(e) = process_batch(&inner, batch) {
            // A malformed peer takes the transport down.
            log::warn!("closing transport on receive error: {e}");
            inner.running.store(false, Ordering::Release);
            inner.notify_closed(close_reason::INVALID);
            let _ = inner.link.close();
            break;
        }
        if !inner.running.load(Ordering::Acquire) {
            break;
        }
    }
    log::trace!("read task terminated");
}

fn process_batch(inner: &Arc<TransportUnicastInner>, batch: ZSlice) -> ZResult<()> {
    let mut zbuf = ZBuf::from(batch);
    while zbuf.can_read() {
        let msg = inner.codec.read_transport_message(&mut zbuf)?;
        match msg.body {
            TransportBody::Frame(frame) => {
                let outcome = {
                    let mut peer = zlock!(inner.peer);
                    peer.received = true;
                    accept_frame(&mut peer, inner.sn_resolution, frame, &inner.codec)
                };
                match outcome {
                    RxOutcome::Deliver(messages) => {
                        let zid = zlock!(inner.peer).zid;
                        for m in messages {
                            inner.handler.handle_zenoh_message(m, &zid);
                        }
                    }
                    RxOutcome::Dropped => {}
                    RxOutcome::Faulted => bail!(ZError::MessageDeserializationFailed),
                }
            }
            TransportBody::KeepAlive(_) => {
                zlock!(inner.peer).received = true;
            }
            TransportBody::Close(close) => {
                log::debug!("received Close (reason {})", close.reason);
                inner.running.store(false, Ordering::Release);
                inner.notify_closed(close.reason);
                return Ok(());
            }
            _ => {
                // Handshake messages have no business on an open session.
                bail!(ZError::MessageUnexpected);
            }
        }
    }
    Ok(())
}

fn lease_task(inner: Arc<TransportUnicastInner>) {
    log::trace!("lease task started");
    let tick_ms = (inner.lease_ms / defaults::LEASE_TICKS as u64).max(1);
    let tick = Duration::from_millis(tick_ms);
    loop {
        if inner.stop.wait_timeout(tick) || !inner.running.load(Ordering::Acquire) {
            break;
        }
        let expired = {
            let mut peer = zlock!(inner.peer);
            if peer.received {
                peer.received = false;
                peer.next_lease_ms = peer.lease_ms as i64;
                false
            } else {
                peer.next_lease_ms -= tick_ms as i64;
                peer.next_lease_ms <= 0
            }
        };
        if expired {
            {
                let peer = zlock!(inner.peer);
                log::warn!("lease expired for {} ({})", peer.zid, peer.addr);
            }
            inner.running.store(false, Ordering::Release);
            inner.notify_closed(close_reason::EXPIRED);
            let _ = inner.link.close();
            break;
        }
        // Stay visible to the peer when idle.
        if !inner.tx.take_transmitted() {
            let _ = inner
                .tx
                .send_transport_message(&TransportMessage::make_keep_alive());
        }
    }
    log::trace!("lease task terminated");
}
