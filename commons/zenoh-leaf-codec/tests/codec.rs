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
use rand::Rng;
use zenoh_leaf_buffers::{WBuf, ZSlice};
use zenoh_leaf_codec::LeafCodec;
use zenoh_leaf_protocol::core::{Reliability, SnResolution, ZenohId};
use zenoh_leaf_protocol::transport::{FramePayload, TransportBody, TransportMessage};
use zenoh_leaf_protocol::zenoh::{ReplyContext, ZenohMessage};
use zenoh_leaf_protocol::{defaults, VERSION};

const RUNS: usize = 100;

fn transport_roundtrip(codec: &LeafCodec, msg: &TransportMessage) -> TransportMessage {
    let mut w = WBuf::new(1024, true);
    codec.write_transport_message(&mut w, msg).unwrap();
    let mut r = w.to_zbuf();
    let out = codec.read_transport_message(&mut r).unwrap();
    assert!(!r.can_read(), "trailing bytes after {msg:?}");
    out
}

#[test]
fn transport_messages_roundtrip() {
    let codec = LeafCodec::default();
    for _ in 0..RUNS {
        let msg = TransportMessage::rand();
        assert_eq!(transport_roundtrip(&codec, &msg), msg);
    }
}

#[test]
fn zenoh_messages_roundtrip() {
    let codec = LeafCodec::default();
    for _ in 0..RUNS {
        let msg = ZenohMessage::rand();
        let mut w = WBuf::new(1024, true);
        codec.write_zenoh_message(&mut w, &msg).unwrap();
        let mut r = w.to_zbuf();
        let out = codec.read_zenoh_message(&mut r, msg.reliability).unwrap();
        assert_eq!(out, msg);
    }
}

#[test]
fn frame_roundtrip_with_random_payload() {
    let mut rng = rand::thread_rng();
    let codec = LeafCodec::new(SnResolution::U28);
    for _ in 0..RUNS {
        let len = rng.gen_range(0..2048usize);
        let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        let sn = rng.gen_range(0..1u64 << 28);
        for reliability in [Reliability::Reliable, Reliability::BestEffort] {
            let data = ZenohMessage::make_data(
                "test/frame".into(),
                None,
                ZSlice::from(payload.clone()),
                reliability,
                false,
                None,
            );
            let frame = TransportMessage::make_frame(
                reliability,
                sn,
                FramePayload::Messages(vec![data]),
            );
            assert_eq!(transport_roundtrip(&codec, &frame), frame);
        }
    }
}

#[test]
fn fragment_frames_roundtrip() {
    let codec = LeafCodec::default();
    for is_final in [false, true] {
        let frame = TransportMessage::make_frame(
            Reliability::Reliable,
            17,
            FramePayload::Fragment {
                buffer: ZSlice::from(vec![0xa5u8; 333]),
                is_final,
            },
        );
        assert_eq!(transport_roundtrip(&codec, &frame), frame);
    }
}

#[test]
fn sn_wider_than_resolution_is_rejected() {
    let wide = LeafCodec::new(SnResolution::U28);
    let narrow = LeafCodec::new(SnResolution::U8);
    let frame = TransportMessage::make_frame(
        Reliability::Reliable,
        1 << 20,
        FramePayload::Messages(vec![]),
    );
    let mut w = WBuf::new(64, true);
    wide.write_transport_message(&mut w, &frame).unwrap();
    let mut r = w.to_zbuf();
    assert!(narrow.read_transport_message(&mut r).is_err());
}

#[test]
fn handshake_exchange_roundtrip() {
    let codec = LeafCodec::default();
    let z1 = ZenohId::rand();
    let z2 = ZenohId::rand();
    let cookie = ZSlice::from(vec![0xab, 0xcd]);

    let init_syn = TransportMessage::make_init_syn(
        VERSION,
        zenoh_leaf_protocol::core::whatami::CLIENT,
        z1,
        SnResolution::U28,
        defaults::REQ_ID_RESOLUTION,
        u16::MAX,
        defaults::PATCH_CURRENT,
    );
    let init_ack = TransportMessage::make_init_ack(
        VERSION,
        zenoh_leaf_protocol::core::whatami::ROUTER,
        z2,
        SnResolution::U14,
        SnResolution::U14,
        4096,
        defaults::PATCH_CURRENT,
        cookie.clone(),
    );
    let open_syn = TransportMessage::make_open_syn(10_000, 42, cookie);
    let open_ack = TransportMessage::make_open_ack(10_000, 7);

    for msg in [init_syn, init_ack, open_syn, open_ack] {
        assert_eq!(transport_roundtrip(&codec, &msg), msg);
    }
}

#[test]
fn reply_context_decorates_data() {
    let codec = LeafCodec::default();
    let reply = ZenohMessage::make_data(
        "x/a".into(),
        None,
        ZSlice::from(vec![1u8, 2, 3]),
        Reliability::Reliable,
        false,
        Some(ReplyContext {
            qid: 9,
            replier_kind: zenoh_leaf_protocol::core::queryable::STORAGE,
            replier_id: Some(ZenohId::rand()),
            is_final: false,
        }),
    );
    let fin = ZenohMessage::make_reply_final(9);
    for msg in [reply, fin] {
        let mut w = WBuf::new(256, true);
        codec.write_zenoh_message(&mut w, &msg).unwrap();
        let mut r = w.to_zbuf();
        let out = codec.read_zenoh_message(&mut r, Reliability::Reliable).unwrap();
        assert_eq!(out, msg);
    }
}

#[test]
fn batched_messages_decode_in_order() {
    let codec = LeafCodec::default();
    let frame = TransportMessage::make_frame(
        Reliability::Reliable,
        3,
        FramePayload::Messages(vec![
            ZenohMessage::make_data(
                "demo/one".into(),
                None,
                ZSlice::from(vec![1u8]),
                Reliability::Reliable,
                false,
                None,
            ),
            ZenohMessage::make_unit(Reliability::Reliable, false, None),
        ]),
    );
    let keep_alive = TransportMessage::make_keep_alive();

    let mut w = WBuf::new(1024, true);
    codec.write_transport_message(&mut w, &frame).unwrap();
    codec.write_transport_message(&mut w, &keep_alive).unwrap();

    let mut r = w.to_zbuf();
    let first = codec.read_transport_message(&mut r).unwrap();
    match first.body {
        TransportBody::Frame(f) => match f.payload {
            FramePayload::Messages(msgs) => assert_eq!(msgs.len(), 2),
            _ => panic!("expected messages"),
        },
        _ => panic!("expected frame"),
    }
    let second = codec.read_transport_message(&mut r).unwrap();
    assert!(matches!(second.body, TransportBody::KeepAlive(_)));
    assert!(!r.can_read());
}
