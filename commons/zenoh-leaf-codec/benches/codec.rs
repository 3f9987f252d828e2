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
use criterion::{criterion_group, criterion_main, Criterion};

use zenoh_leaf_buffers::{WBuf, ZSlice};
use zenoh_leaf_codec::LeafCodec;
use zenoh_leaf_protocol::core::Reliability;
use zenoh_leaf_protocol::transport::{FramePayload, TransportMessage};
use zenoh_leaf_protocol::zenoh::ZenohMessage;

fn criterion_benchmark(c: &mut Criterion) {
    let codec = LeafCodec::default();

    for payload in [8usize, 64, 1024] {
        let frame = TransportMessage::make_frame(
            Reliability::Reliable,
            42,
            FramePayload::Messages(vec![ZenohMessage::make_data(
                "demo/example/bench".into(),
                None,
                ZSlice::from(vec![0u8; payload]),
                Reliability::Reliable,
                false,
                None,
            )]),
        );

        c.bench_function(&format!("encode data frame {payload}"), |b| {
            let mut w = WBuf::new(2048, true);
            b.iter(|| {
                w.clear();
                codec.write_transport_message(&mut w, &frame).unwrap();
            })
        });

        let mut w = WBuf::new(2048, true);
        codec.write_transport_message(&mut w, &frame).unwrap();
        let encoded = w.to_vec();

        c.bench_function(&format!("decode data frame {payload}"), |b| {
            b.iter(|| {
                let mut r = zenoh_leaf_buffers::ZBuf::from(encoded.clone());
                codec.read_transport_message(&mut r).unwrap()
            })
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
