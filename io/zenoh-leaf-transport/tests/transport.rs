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
use std::sync::Arc;
use std::time::Duration;

use zenoh_leaf_buffers::ZSlice;
use zenoh_leaf_link::mem::MemLink;
use zenoh_leaf_protocol::core::{close_reason, whatami, Reliability, SnResolution, ZenohId};
use zenoh_leaf_protocol::zenoh::{ZenohBody, ZenohMessage};
use zenoh_leaf_transport::{unicast, TransportConfig, TransportEventHandler};

struct Collector {
    msgs: flume::Sender<(ZenohMessage, ZenohId)>,
    closed: flume::Sender<u8>,
}

impl Collector {
    fn new() -> (
        Arc<Collector>,
        flume::Receiver<(ZenohMessage, ZenohId)>,
        flume::Receiver<u8>,
    ) {
        let (mtx, mrx) = flume::unbounded();
        let (ctx, crx) = flume::unbounded();
        (
            Arc::new(Collector {
                msgs: mtx,
                closed: ctx,
            }),
            mrx,
            crx,
        )
    }
}

impl TransportEventHandler for Collector {
    fn handle_zenoh_message(&self, msg: ZenohMessage, peer: &ZenohId) {
        let _ = self.msgs.send((msg, *peer));
    }

    fn closed(&self, reason: u8) {
        let _ = self.closed.send(reason);
    }
}

fn data(key: &str, payload: &[u8], reliability: Reliability) -> ZenohMessage {
    ZenohMessage::make_data(
        key.into(),
        None,
        ZSlice::from(payload.to_vec()),
        reliability,
        false,
        None,
    )
}

struct Pair {
    client: unicast::TransportUnicast,
    router: unicast::TransportUnicast,
    client_rx: flume::Receiver<(ZenohMessage, ZenohId)>,
    client_closed: flume::Receiver<u8>,
    router_rx: flume::Receiver<(ZenohMessage, ZenohId)>,
    router_closed: flume::Receiver<u8>,
}

fn establish(name: &str, client_cfg: TransportConfig, router_cfg: TransportConfig) -> Pair {
    let (link_a, link_b) = MemLink::pair(name);

    let (router_handler, router_rx, router_closed) = Collector::new();
    let acceptor =
        std::thread::spawn(move || unicast::accept(link_b, &router_cfg, router_handler).unwrap());

    let (client_handler, client_rx, client_closed) = Collector::new();
    let client = unicast::open_client(link_a, &client_cfg, client_handler).unwrap();
    let router = acceptor.join().unwrap();

    client.start_read_task().unwrap();
    client.start_lease_task().unwrap();
    router.start_read_task().unwrap();
    router.start_lease_task().unwrap();

    Pair {
        client,
        router,
        client_rx,
        client_closed,
        router_rx,
        router_closed,
    }
}

#[test]
fn handshake_negotiates_the_smaller_parameters() {
    let _ = env_logger::try_init();
    let client_zid = ZenohId::rand();
    let router_zid = ZenohId::rand();

    let mut client_cfg = TransportConfig::new(client_zid, whatami::CLIENT);
    client_cfg.sn_resolution = SnResolution::U28;
    client_cfg.batch_size = u16::MAX;

    let mut router_cfg = TransportConfig::new(router_zid, whatami::ROUTER);
    router_cfg.sn_resolution = SnResolution::U14;
    router_cfg.batch_size = 4096;

    let pair = establish("hs", client_cfg, router_cfg);
    assert_eq!(pair.client.sn_resolution(), SnResolution::U14);
    assert_eq!(pair.router.sn_resolution(), SnResolution::U14);
    assert_eq!(pair.client.remote_zid(), router_zid);
    assert_eq!(pair.router.remote_zid(), client_zid);
    assert_eq!(pair.client.remote_whatami(), whatami::ROUTER);

    pair.client.close(close_reason::GENERIC).unwrap();
    pair.router.close(close_reason::GENERIC).unwrap();
}

#[test]
fn frames_flow_both_ways_in_order() {
    let _ = env_logger::try_init();
    let pair = establish(
        "flow",
        TransportConfig::new(ZenohId::rand(), whatami::CLIENT),
        TransportConfig::new(ZenohId::rand(), whatami::ROUTER),
    );

    for i in 0..10u8 {
        pair.client
            .write_zenoh_message(data("demo/up", &[i], Reliability::Reliable))
            .unwrap();
    }
    for i in 0..10u8 {
        let (msg, peer) = pair
            .router_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(peer, pair.client.local_zid());
        match msg.body {
            ZenohBody::Data { payload, .. } => assert_eq!(payload.as_slice(), [i]),
            _ => panic!("expected data"),
        }
    }

    pair.router
        .write_zenoh_message(data("demo/down", b"pong", Reliability::BestEffort))
        .unwrap();
    let (msg, _) = pair
        .client_rx
        .recv_timeout(Duration::from_secs(5))
        .unwrap();
    assert!(matches!(msg.body, ZenohBody::Data { .. }));

    pair.client.close(close_reason::GENERIC).unwrap();
    pair.router.close(close_reason::GENERIC).unwrap();
}

#[test]
fn oversized_payloads_cross_fragmented() {
    let _ = env_logger::try_init();
    let mut client_cfg = TransportConfig::new(ZenohId::rand(), whatami::CLIENT);
    client_cfg.batch_size = 256;
    let mut router_cfg = TransportConfig::new(ZenohId::rand(), whatami::ROUTER);
    router_cfg.batch_size = 256;

    let pair = establish("frag", client_cfg, router_cfg);

    let big = vec![0xc3u8; 10_000];
    pair.client
        .write_zenoh_message(data("demo/big", &big, Reliability::Reliable))
        .unwrap();

    let (msg, _) = pair
        .router_rx
        .recv_timeout(Duration::from_secs(5))
        .unwrap();
    match msg.body {
        ZenohBody::Data { payload, .. } => assert_eq!(payload.as_slice(), big.as_slice()),
        _ => panic!("expected data"),
    }

    pair.client.close(close_reason::GENERIC).unwrap();
    pair.router.close(close_reason::GENERIC).unwrap();
}

#[test]
fn close_reaches_the_remote_side() {
    let _ = env_logger::try_init();
    let pair = establish(
        "close",
        TransportConfig::new(ZenohId::rand(), whatami::CLIENT),
        TransportConfig::new(ZenohId::rand(), whatami::ROUTER),
    );

    pair.client.close(close_reason::GENERIC).unwrap();
    let reason = pair
        .router_closed
        .recv_timeout(Duration::from_secs(5))
        .unwrap();
    assert_eq!(reason, close_reason::GENERIC);
    pair.router.close(close_reason::GENERIC).unwrap();
    // The locally closed side never notifies itself.
    assert!(pair.client_closed.try_recv().is_err());
}

#[test]
fn keep_alives_hold_an_idle_session_open() {
    let _ = env_logger::try_init();
    let mut client_cfg = TransportConfig::new(ZenohId::rand(), whatami::CLIENT);
    client_cfg.lease_ms = 300;
    let mut router_cfg = TransportConfig::new(ZenohId::rand(), whatami::ROUTER);
    router_cfg.lease_ms = 300;

    let pair = establish("ka", client_cfg, router_cfg);

    // Several leases worth of silence: keep-alives do the work.
    std::thread::sleep(Duration::from_millis(1200));
    assert!(pair.client.is_open());
    assert!(pair.router.is_open());
    assert!(pair.client_closed.try_recv().is_err());
    assert!(pair.router_closed.try_recv().is_err());

    pair.client.close(close_reason::GENERIC).unwrap();
    pair.router.close(close_reason::GENERIC).unwrap();
}

#[test]
fn a_silent_peer_expires() {
    let _ = env_logger::try_init();
    let mut client_cfg = TransportConfig::new(ZenohId::rand(), whatami::CLIENT);
    client_cfg.lease_ms = 200;
    let mut router_cfg = TransportConfig::new(ZenohId::rand(), whatami::ROUTER);
    router_cfg.lease_ms = 200;

    let (link_a, link_b) = MemLink::pair("expiry");
    let (router_handler, _router_rx, _router_closed) = Collector::new();
    let acceptor =
        std::thread::spawn(move || unicast::accept(link_b, &router_cfg, router_handler).unwrap());
    let (client_handler, _client_rx, client_closed) = Collector::new();
    let client = unicast::open_client(link_a, &client_cfg, client_handler).unwrap();
    let router = acceptor.join().unwrap();

    // Only the client runs its tasks: the router stays silent and the
    // client's lease task must declare it expired.
    client.start_read_task().unwrap();
    client.start_lease_task().unwrap();

    let reason = client_closed.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(reason, close_reason::EXPIRED);
    assert!(!client.is_open());

    client.close(close_reason::GENERIC).unwrap();
    router.close(close_reason::GENERIC).unwrap();
}

mod multicast {
    use super::*;
    use zenoh_leaf_transport::multicast;

    #[test]
    fn peers_meet_and_exchange_data() {
        let _ = env_logger::try_init();
        let (link_a, link_b) = MemLink::pair("mcast");
        let zid_a = ZenohId::rand();
        let zid_b = ZenohId::rand();

        let (ha, rx_a, _ca) = Collector::new();
        let (hb, rx_b, _cb) = Collector::new();

        let ta = multicast::open_peer(link_a, &TransportConfig::new(zid_a, whatami::PEER), ha)
            .unwrap();
        let tb = multicast::open_peer(link_b, &TransportConfig::new(zid_b, whatami::PEER), hb)
            .unwrap();
        ta.start_read_task().unwrap();
        ta.start_lease_task().unwrap();
        tb.start_read_task().unwrap();
        tb.start_lease_task().unwrap();

        // Joins cross and each side learns the other.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if ta.peers().iter().any(|(z, _)| *z == zid_b)
                && tb.peers().iter().any(|(z, _)| *z == zid_a)
            {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(ta.peers().iter().any(|(z, _)| *z == zid_b));
        assert!(tb.peers().iter().any(|(z, _)| *z == zid_a));

        ta.write_zenoh_message(data("group/msg", b"hello group", Reliability::BestEffort))
            .unwrap();
        let (msg, peer) = rx_b.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(peer, zid_a);
        assert!(matches!(msg.body, ZenohBody::Data { .. }));

        tb.write_zenoh_message(data("group/back", b"hi", Reliability::BestEffort))
            .unwrap();
        let (_, peer) = rx_a.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(peer, zid_b);

        ta.close(close_reason::GENERIC).unwrap();
        tb.close(close_reason::GENERIC).unwrap();
    }
}
