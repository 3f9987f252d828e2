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
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use zenoh_leaf_buffers::{WBuf, ZSlice};
use zenoh_leaf_codec::LeafCodec;
use zenoh_leaf_collections::{RecyclingBufferPool, SimpleRc};
use zenoh_leaf_core::{zlock, ZResult};
use zenoh_leaf_link::Link;
use zenoh_leaf_protocol::core::{Reliability, SnResolution, ZInt, ZenohId};
use zenoh_leaf_protocol::transport::{Frame, FramePayload};
use zenoh_leaf_protocol::zenoh::ZenohMessage;
use zenoh_leaf_protocol::{defaults, VERSION};

use crate::seq_num;

/// Local parameters proposed when establishing a transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub version: u8,
    pub zid: ZenohId,
    pub whatami: ZInt,
    pub lease_ms: u64,
    pub sn_resolution: SnResolution,
    pub batch_size: u16,
    pub patch: u8,
}

impl TransportConfig {
    pub fn new(zid: ZenohId, whatami: ZInt) -> TransportConfig {
        TransportConfig {
            version: VERSION,
            zid,
            whatami,
            lease_ms: defaults::LEASE_MS,
            sn_resolution: defaults::SN_RESOLUTION,
            batch_size: defaults::BATCH_SIZE,
            patch: defaults::PATCH_CURRENT,
        }
    }
}

/// Callbacks a transport raises towards its session.
pub trait TransportEventHandler: Send + Sync {
    fn handle_zenoh_message(&self, msg: ZenohMessage, peer: &ZenohId);
    fn new_peer(&self, _zid: &ZenohId, _whatami: ZInt) {}
    fn peer_left(&self, _zid: &ZenohId) {}
    /// The transport is gone: link error, lease expiry or remote close.
    fn closed(&self, reason: u8);
}

/// State kept for each remote peer observed on a transport.
pub(crate) struct PeerState {
    pub zid: ZenohId,
    pub whatami: ZInt,
    pub addr: String,
    pub lease_ms: u64,
    pub next_lease_ms: i64,
    pub received: bool,
    pub sn_rx_reliable: ZInt,
    pub sn_rx_best_effort: ZInt,
    pub patch: u8,
    defrag_reliable: Defrag,
    defrag_best_effort: Defrag,
}

impl PeerState {
    pub fn new(
        zid: ZenohId,
        whatami: ZInt,
        addr: String,
        lease_ms: u64,
        res: SnResolution,
        initial_sn_rx: ZInt,
        patch: u8,
    ) -> PeerState {
        // Start one behind so the announced initial SN is accepted.
        let last = seq_num::decrement(res, initial_sn_rx);
        PeerState {
            zid,
            whatami,
            addr,
            lease_ms,
            next_lease_ms: lease_ms as i64,
            received: false,
            sn_rx_reliable: last,
            sn_rx_best_effort: last,
            patch,
            defrag_reliable: Defrag::new(),
            defrag_best_effort: Defrag::new(),
        }
    }
}

struct Defrag {
    buf: Option<WBuf>,
    next_sn: ZInt,
}

impl Defrag {
    fn new() -> Defrag {
        Defrag {
            buf: None,
            next_sn: 0,
        }
    }
}

/// What to do with a received frame.
pub(crate) enum RxOutcome {
    Deliver(Vec<ZenohMessage>),
    Dropped,
    /// A gap on the reliable channel or an undecodable reassembly: the
    /// peer is faulty and the connection must go down.
    Faulted,
}

/// Validate a frame's SN against the peer state and defragment if
/// needed.
pub(crate) fn accept_frame(
    peer: &mut PeerState,
    res: SnResolution,
    frame: Frame,
    codec: &LeafCodec,
) -> RxOutcome {
    let reliable = frame.reliability == Reliability::Reliable;
    let last = if reliable {
        peer.sn_rx_reliable
    } else {
        peer.sn_rx_best_effort
    };

    if !seq_num::precedes(res, last, frame.sn) {
        log::debug!(
            "dropping frame from {}: stale sn {} (last {})",
            peer.zid,
            frame.sn,
            last
        );
        return RxOutcome::Dropped;
    }
    if reliable && frame.sn != seq_num::next(res, last) {
        // No retransmission at the leaf: a reliable gap is fatal.
        log::warn!(
            "sn gap on reliable channel from {}: got {} expected {}",
            peer.zid,
            frame.sn,
            seq_num::next(res, last)
        );
        return RxOutcome::Faulted;
    }
    if reliable {
        peer.sn_rx_reliable = frame.sn;
    } else {
        peer.sn_rx_best_effort = frame.sn;
    }

    match frame.payload {
        FramePayload::Messages(messages) => RxOutcome::Deliver(messages),
        FramePayload::Fragment { buffer, is_final } => {
            let defrag = if reliable {
                &mut peer.defrag_reliable
            } else {
                &mut peer.defrag_best_effort
            };
            if defrag.buf.is_some() && frame.sn != defrag.next_sn {
                log::debug!(
                    "resetting defragmentation buffer of {} (patch {})",
                    peer.zid,
                    peer.patch
                );
                defrag.buf = None;
            }
            let buf = defrag
                .buf
                .get_or_insert_with(|| WBuf::new(buffer.len().max(1), true));
            if buf.write_bytes(buffer.as_slice()).is_err() {
                defrag.buf = None;
                return RxOutcome::Dropped;
            }
            defrag.next_sn = seq_num::next(res, frame.sn);
            if !is_final {
                return RxOutcome::Dropped;
            }
            let assembled = match defrag.buf.take() {
                Some(w) => w.to_zbuf(),
                None => return RxOutcome::Dropped,
            };
            let mut zbuf = assembled;
            match codec.read_zenoh_message(&mut zbuf, frame.reliability) {
                Ok(msg) => RxOutcome::Deliver(vec![msg]),
                Err(e) => {
                    log::warn!("failed to decode reassembled message from {}: {e}", peer.zid);
                    if reliable {
                        RxOutcome::Faulted
                    } else {
                        RxOutcome::Dropped
                    }
                }
            }
        }
    }
}

/// Read one batch from the link: length-delimited on stream links, one
/// datagram otherwise. The returned slice aliases a pooled buffer.
pub(crate) fn read_batch(link: &Link, pool: &RecyclingBufferPool) -> ZResult<ZSlice> {
    let mut buf = pool.take();
    if link.is_streamed() {
        let mut len = [0u8; 2];
        link.read_exact(&mut len)?;
        let len = u16::from_le_bytes(len) as usize;
        buf.resize(len, 0);
        link.read_exact(&mut buf[..])?;
    } else {
        buf.resize(link.mtu() as usize, 0);
        let n = link.read(&mut buf[..])?;
        buf.truncate(n);
    }
    Ok(ZSlice::from_shared(SimpleRc::new(buf)))
}

/// Multicast variant of [`read_batch`], reporting the sender's address.
pub(crate) fn read_batch_from(
    link: &Link,
    pool: &RecyclingBufferPool,
) -> ZResult<(ZSlice, String)> {
    let mut buf = pool.take();
    buf.resize(link.mtu() as usize, 0);
    let (n, addr) = link.read_from(&mut buf[..])?;
    buf.truncate(n);
    Ok((ZSlice::from_shared(SimpleRc::new(buf)), addr))
}

/// A stop flag observable through a bounded wait, to make task shutdown
/// visible within one lease tick.
#[derive(Clone)]
pub(crate) struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> StopSignal {
        StopSignal {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn set(&self) {
        let (lock, cond) = &*self.inner;
        *zlock!(lock) = true;
        cond.notify_all();
    }

    /// Wait up to `timeout`; returns true if the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cond) = &*self.inner;
        let mut stopped = zlock!(lock);
        if !*stopped {
            stopped = match cond.wait_timeout(stopped, timeout) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zenoh_leaf_protocol::transport::TransportMessage;

    fn peer(res: SnResolution, initial_sn: ZInt) -> PeerState {
        PeerState::new(
            ZenohId::rand(),
            zenoh_leaf_protocol::core::whatami::ROUTER,
            String::new(),
            defaults::LEASE_MS,
            res,
            initial_sn,
            defaults::PATCH_CURRENT,
        )
    }

    fn data_frame(sn: ZInt, reliability: Reliability) -> Frame {
        Frame {
            reliability,
            sn,
            payload: FramePayload::Messages(vec![ZenohMessage::make_data(
                "demo/test".into(),
                None,
                ZSlice::from(vec![1u8, 2, 3]),
                reliability,
                false,
                None,
            )]),
        }
    }

    #[test]
    fn in_order_reliable_frames_are_delivered() {
        let res = SnResolution::U14;
        let codec = LeafCodec::new(res);
        let mut p = peer(res, 10);
        for sn in 10..14 {
            match accept_frame(&mut p, res, data_frame(sn, Reliability::Reliable), &codec) {
                RxOutcome::Deliver(msgs) => assert_eq!(msgs.len(), 1),
                _ => panic!("frame {sn} should be delivered"),
            }
        }
        assert_eq!(p.sn_rx_reliable, 13);
    }

    #[test]
    fn stale_frames_are_dropped() {
        let res = SnResolution::U14;
        let codec = LeafCodec::new(res);
        let mut p = peer(res, 10);
        assert!(matches!(
            accept_frame(&mut p, res, data_frame(10, Reliability::Reliable), &codec),
            RxOutcome::Deliver(_)
        ));
        // Same SN again: duplicate, dropped without fault.
        assert!(matches!(
            accept_frame(&mut p, res, data_frame(10, Reliability::Reliable), &codec),
            RxOutcome::Dropped
        ));
    }

    #[test]
    fn reliable_gap_faults_the_connection() {
        let res = SnResolution::U14;
        let codec = LeafCodec::new(res);
        let mut p = peer(res, 10);
        assert!(matches!(
            accept_frame(&mut p, res, data_frame(12, Reliability::Reliable), &codec),
            RxOutcome::Faulted
        ));
    }

    #[test]
    fn best_effort_tolerates_gaps_within_window() {
        let res = SnResolution::U14;
        let codec = LeafCodec::new(res);
        let mut p = peer(res, 10);
        assert!(matches!(
            accept_frame(&mut p, res, data_frame(12, Reliability::BestEffort), &codec),
            RxOutcome::Deliver(_)
        ));
        assert_eq!(p.sn_rx_best_effort, 12);
    }

    #[test]
    fn fragments_reassemble_on_final() {
        let res = SnResolution::U14;
        let codec = LeafCodec::new(res);
        let mut p = peer(res, 0);

        // Serialize one data message and split it into two fragments.
        let msg = ZenohMessage::make_data(
            "demo/frag".into(),
            None,
            ZSlice::from(vec![7u8; 100]),
            Reliability::Reliable,
            false,
            None,
        );
        let mut w = WBuf::new(256, true);
        codec.write_zenoh_message(&mut w, &msg).unwrap();
        let bytes = w.to_vec();
        let mid = bytes.len() / 2;

        let first = Frame {
            reliability: Reliability::Reliable,
            sn: 0,
            payload: FramePayload::Fragment {
                buffer: ZSlice::from(&bytes[..mid]),
                is_final: false,
            },
        };
        let second = Frame {
            reliability: Reliability::Reliable,
            sn: 1,
            payload: FramePayload::Fragment {
                buffer: ZSlice::from(&bytes[mid..]),
                is_final: true,
            },
        };
        assert!(matches!(
            accept_frame(&mut p, res, first, &codec),
            RxOutcome::Dropped
        ));
        match accept_frame(&mut p, res, second, &codec) {
            RxOutcome::Deliver(msgs) => assert_eq!(msgs, vec![msg]),
            _ => panic!("final fragment should deliver the reassembled message"),
        }
    }

    #[test]
    fn batch_roundtrip_over_mem_link() {
        let (a, b) = zenoh_leaf_link::mem::MemLink::pair("batch");
        let pool = RecyclingBufferPool::new(2, 1024);
        let codec = LeafCodec::default();

        let mut w = WBuf::new(1024, true);
        codec
            .write_transport_message(&mut w, &TransportMessage::make_keep_alive())
            .unwrap();
        a.write_all(&w.to_vec()).unwrap();

        let batch = read_batch(&b, &pool).unwrap();
        let mut zbuf = zenoh_leaf_buffers::ZBuf::from(batch);
        let msg = codec.read_transport_message(&mut zbuf).unwrap();
        assert_eq!(msg, TransportMessage::make_keep_alive());
    }
}
