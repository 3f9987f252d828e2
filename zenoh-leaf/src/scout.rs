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
//! Scouting: solicit Hello messages over UDP multicast.

use std::time::{Duration, Instant};

use crate::config::Config;
use zenoh_leaf_buffers::{WBuf, ZBuf};
use zenoh_leaf_codec::LeafCodec;
use zenoh_leaf_core::{ZError, ZResult};
use zenoh_leaf_protocol::core::ZInt;
use zenoh_leaf_protocol::transport::{Hello, TransportBody, TransportMessage};

const SCOUT_POLL: Duration = Duration::from_millis(100);

/// Broadcast a Scout on the configured multicast group and collect the
/// Hello messages received until `timeout` elapses.
pub fn scout(what: Option<ZInt>, config: &Config, timeout: Duration) -> ZResult<Vec<Hello>> {
    let locator = config.multicast_locator()?;
    log::debug!("scouting on {locator}");
    let link = zenoh_leaf_link::udp::connect_timeout(&locator, SCOUT_POLL)?;
    let codec = LeafCodec::default();

    let mut wbuf = WBuf::new(512, true);
    codec
        .write_transport_message(&mut wbuf, &TransportMessage::make_scout(what, true))
        .map_err(|_| ZError::MessageSerializationFailed)?;
    link.write_all(&wbuf.to_vec())?;

    let mut hellos: Vec<Hello> = Vec::new();
    let mut buf = vec![0u8; link.mtu() as usize];
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let n = match link.read(&mut buf) {
            Ok(n) => n,
            Err(ZError::TimedOut) => continue,
            Err(e) => {
                let _ = link.close();
                return Err(e);
            }
        };
        let mut zbuf = ZBuf::from(buf[..n].to_vec());
        while zbuf.can_read() {
            match codec.read_transport_message(&mut zbuf) {
                Ok(msg) => {
                    if let TransportBody::Hello(hello) = msg.body {
                        log::debug!("received {hello:?}");
                        let duplicate = hello.zid.is_some()
                            && hellos.iter().any(|h| h.zid == hello.zid);
                        if !duplicate {
                            hellos.push(hello);
                        }
                    }
                }
                Err(e) => {
                    log::debug!("dropping malformed scouting datagram: {e}");
                    break;
                }
            }
        }
    }
    let _ = link.close();
    Ok(hellos)
}
