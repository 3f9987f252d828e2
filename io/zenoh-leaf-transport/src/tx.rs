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
//! Outbound side of a transport: SN assignment, batching, fragmentation.
//!
//! A single mutex serializes every outbound frame on the transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use zenoh_leaf_buffers::{WBuf, ZSlice};
use zenoh_leaf_codec::LeafCodec;
use zenoh_leaf_core::{zlock, ZError, ZResult};
use zenoh_leaf_link::Link;
use zenoh_leaf_protocol::core::{Reliability, SnResolution, ZInt};
use zenoh_leaf_protocol::transport::{FramePayload, TransportMessage};
use zenoh_leaf_protocol::zenoh::ZenohMessage;

use crate::seq_num;

pub(crate) struct TransportTx {
    link: Link,
    codec: LeafCodec,
    res: SnResolution,
    batch_size: usize,
    /// Set on every flush; the lease task clears it to decide whether a
    /// keep-alive is due.
    transmitted: AtomicBool,
    state: Mutex<TxState>,
}

struct TxState {
    wbuf: WBuf,
    sn_reliable: ZInt,
    sn_best_effort: ZInt,
    batching: bool,
}

impl TransportTx {
    pub fn new(
        link: Link,
        res: SnResolution,
        batch_size: u16,
        initial_sn: ZInt,
    ) -> TransportTx {
        let batch_size = (batch_size as usize).min(link.mtu() as usize);
        TransportTx {
            link,
            codec: LeafCodec::new(res),
            res,
            batch_size,
            transmitted: AtomicBool::new(false),
            state: Mutex::new(TxState {
                wbuf: WBuf::new(batch_size, false),
                sn_reliable: initial_sn,
                sn_best_effort: initial_sn,
                batching: false,
            }),
        }
    }

    pub fn set_batching(&self, enabled: bool) -> ZResult<()> {
        let mut state = zlock!(self.state);
        state.batching = enabled;
        if !enabled {
            self.flush_locked(&mut state)?;
        }
        Ok(())
    }

    /// Whether anything was sent since the last call.
    pub fn take_transmitted(&self) -> bool {
        self.transmitted.swap(false, Ordering::AcqRel)
    }

    /// Send a transport message right away, flushing any pending batch
    /// first. Used for the handshake and the urgent messages (Close,
    /// KeepAlive).
    pub fn send_transport_message(&self, msg: &TransportMessage) -> ZResult<()> {
        let mut state = zlock!(self.state);
        self.flush_locked(&mut state)?;
        self.codec
            .write_transport_message(&mut state.wbuf, msg)
            .map_err(|_| ZError::MessageSerializationFailed)?;
        self.flush_locked(&mut state)
    }

    /// Frame a zenoh message on its reliability channel, fragmenting it
    /// when it exceeds the batch size.
    pub fn write_zenoh_message(&self, msg: ZenohMessage) -> ZResult<()> {
        let mut state = zlock!(self.state);
        let sn = Self::next_sn(&mut state, self.res, msg.reliability);
        let frame =
            TransportMessage::make_frame(msg.reliability, sn, FramePayload::Messages(vec![msg]));

        let mark = state.wbuf.mark();
        match self.codec.write_transport_message(&mut state.wbuf, &frame) {
            Ok(()) => {
                if !state.batching {
                    self.flush_locked(&mut state)?;
                }
                Ok(())
            }
            Err(_) => {
                state.wbuf.truncate(mark);
                // Ship what was batched and retry on an empty buffer.
                self.flush_locked(&mut state)?;
                let mark = state.wbuf.mark();
                match self.codec.write_transport_message(&mut state.wbuf, &frame) {
                    Ok(()) => {
                        if !state.batching {
                            self.flush_locked(&mut state)?;
                        }
                        Ok(())
                    }
                    Err(_) => {
                        state.wbuf.truncate(mark);
                        let msg = match frame.body {
                            zenoh_leaf_protocol::transport::TransportBody::Frame(f) => {
                                match f.payload {
                                    FramePayload::Messages(mut v) => match v.pop() {
                                        Some(m) => m,
                                        None => return Err(ZError::MessageSerializationFailed),
                                    },
                                    _ => return Err(ZError::MessageSerializationFailed),
                                }
                            }
                            _ => return Err(ZError::MessageSerializationFailed),
                        };
                        self.fragment(&mut state, msg, sn)
                    }
                }
            }
        }
    }

    /// Send any batched frames.
    pub fn flush(&self) -> ZResult<()> {
        let mut state = zlock!(self.state);
        self.flush_locked(&mut state)
    }

    fn next_sn(state: &mut TxState, res: SnResolution, reliability: Reliability) -> ZInt {
        match reliability {
            Reliability::Reliable => {
                let sn = state.sn_reliable;
                state.sn_reliable = seq_num::next(res, sn);
                sn
            }
            Reliability::BestEffort => {
                let sn = state.sn_best_effort;
                state.sn_best_effort = seq_num::next(res, sn);
                sn
            }
        }
    }

    /// Split an oversized message into fragment frames, one fresh SN
    /// each, the last one flagged final. Fragments bypass batching.
    fn fragment(&self, state: &mut TxState, msg: ZenohMessage, first_sn: ZInt) -> ZResult<()> {
        let reliability = msg.reliability;
        let mut big = WBuf::new(self.batch_size, true);
        self.codec
            .write_zenoh_message(&mut big, &msg)
            .map_err(|_| ZError::MessageSerializationFailed)?;
        let bytes = big.to_vec();

        let mut offset = 0;
        let mut sn = first_sn;
        while offset < bytes.len() {
            // Frame header, worst-case SN varint and room to breathe.
            let overhead = 1 + 10;
            let room = self.batch_size.saturating_sub(overhead);
            if room == 0 {
                return Err(ZError::TransportNoSpace);
            }
            let chunk = room.min(bytes.len() - offset);
            let is_final = offset + chunk == bytes.len();
            let frame = TransportMessage::make_frame(
                reliability,
                sn,
                FramePayload::Fragment {
                    buffer: ZSlice::from(&bytes[offset..offset + chunk]),
                    is_final,
                },
            );
            self.codec
                .write_transport_message(&mut state.wbuf, &frame)
                .map_err(|_| ZError::MessageSerializationFailed)?;
            self.flush_locked(state)?;
            offset += chunk;
            if !is_final {
                sn = Self::next_sn(state, self.res, reliability);
            }
        }
        Ok(())
    }

    fn flush_locked(&self, state: &mut TxState) -> ZResult<()> {
        if state.wbuf.is_empty() {
            return Ok(());
        }
        let bytes = state.wbuf.to_vec();
        state.wbuf.clear();
        if self.link.is_streamed() {
            let len = bytes.len() as u16;
            self.link.write_all(&len.to_le_bytes())?;
        }
        self.link.write_all(&bytes)?;
        self.transmitted.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zenoh_leaf_collections::RecyclingBufferPool;
    use zenoh_leaf_protocol::transport::TransportBody;

    fn recv_frames(link: &Link, pool: &RecyclingBufferPool, codec: &LeafCodec) -> Vec<TransportMessage> {
        let batch = crate::common::read_batch(link, pool).unwrap();
        let mut zbuf = zenoh_leaf_buffers::ZBuf::from(batch);
        let mut out = Vec::new();
        while zbuf.can_read() {
            out.push(codec.read_transport_message(&mut zbuf).unwrap());
        }
        out
    }

    #[test]
    fn small_messages_fit_one_frame() {
        let (a, b) = zenoh_leaf_link::mem::MemLink::pair("tx-small");
        let tx = TransportTx::new(a, SnResolution::U28, 4096, 5);
        let codec = LeafCodec::new(SnResolution::U28);
        let pool = RecyclingBufferPool::new(2, 4096);

        tx.write_zenoh_message(ZenohMessage::make_data(
            "demo/tx".into(),
            None,
            ZSlice::from(vec![1u8, 2, 3]),
            Reliability::Reliable,
            false,
            None,
        ))
        .unwrap();

        let msgs = recv_frames(&b, &pool, &codec);
        assert_eq!(msgs.len(), 1);
        match &msgs[0].body {
            TransportBody::Frame(f) => {
                assert_eq!(f.sn, 5);
                assert!(matches!(&f.payload, FramePayload::Messages(m) if m.len() == 1));
            }
            _ => panic!("expected a frame"),
        }
        assert!(tx.take_transmitted());
        assert!(!tx.take_transmitted());
    }

    #[test]
    fn oversized_messages_are_fragmented_with_increasing_sns() {
        let (a, b) = zenoh_leaf_link::mem::MemLink::pair("tx-frag");
        let tx = TransportTx::new(a, SnResolution::U28, 128, 0);
        let codec = LeafCodec::new(SnResolution::U28);
        let pool = RecyclingBufferPool::new(2, 4096);

        tx.write_zenoh_message(ZenohMessage::make_data(
            "demo/frag".into(),
            None,
            ZSlice::from(vec![0x5au8; 1000]),
            Reliability::Reliable,
            false,
            None,
        ))
        .unwrap();

        let mut sn = 0;
        let mut reassembled = Vec::new();
        let mut done = false;
        while !done {
            for msg in recv_frames(&b, &pool, &codec) {
                match msg.body {
                    TransportBody::Frame(f) => {
                        assert_eq!(f.sn, sn);
                        sn += 1;
                        match f.payload {
                            FramePayload::Fragment { buffer, is_final } => {
                                reassembled.extend_from_slice(buffer.as_slice());
                                done = is_final;
                            }
                            _ => panic!("expected fragments"),
                        }
                    }
                    _ => panic!("expected frames"),
                }
            }
        }
        assert!(sn > 1, "payload should span several fragments");

        let mut zbuf = zenoh_leaf_buffers::ZBuf::from(reassembled);
        let msg = codec.read_zenoh_message(&mut zbuf, Reliability::Reliable).unwrap();
        match msg.body {
            zenoh_leaf_protocol::zenoh::ZenohBody::Data { payload, .. } => {
                assert_eq!(payload.len(), 1000)
            }
            _ => panic!("expected data"),
        }
    }

    #[test]
    fn batching_defers_the_send() {
        let (a, b) = zenoh_leaf_link::mem::MemLink::pair("tx-batch");
        let tx = TransportTx::new(a, SnResolution::U28, 4096, 0);
        let codec = LeafCodec::new(SnResolution::U28);
        let pool = RecyclingBufferPool::new(2, 4096);

        tx.set_batching(true).unwrap();
        for i in 0..3u8 {
            tx.write_zenoh_message(ZenohMessage::make_data(
                "demo/batch".into(),
                None,
                ZSlice::from(vec![i]),
                Reliability::Reliable,
                false,
                None,
            ))
            .unwrap();
        }
        assert!(!tx.take_transmitted());
        tx.flush().unwrap();
        assert!(tx.take_transmitted());

        let msgs = recv_frames(&b, &pool, &codec);
        assert_eq!(msgs.len(), 3);
    }
}
