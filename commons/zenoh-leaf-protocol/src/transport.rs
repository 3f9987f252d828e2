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
//! Transport-level session messages.
//!
//! Every message starts with a one-byte header: the message id in the
//! low 5 bits, message-specific flags in the high 3 bits.

use crate::core::{Locator, Reliability, SnResolution, ZInt, ZenohId};
use crate::zenoh::ZenohMessage;
use zenoh_leaf_buffers::ZSlice;

pub mod tmsg {
    pub mod id {
        pub const SCOUT: u8 = 0x01;
        pub const HELLO: u8 = 0x02;
        pub const INIT: u8 = 0x03;
        pub const OPEN: u8 = 0x04;
        pub const CLOSE: u8 = 0x05;
        pub const JOIN: u8 = 0x06;
        pub const KEEP_ALIVE: u8 = 0x08;
        pub const FRAME: u8 = 0x0a;
    }

    pub mod flag {
        /// Ack: the message confirms a Syn.
        pub const A: u8 = 0x20;
        /// PeerID: a ZenohId is present or requested.
        pub const I: u8 = 0x20;
        /// Reliable: the frame travels on the reliable channel.
        pub const R: u8 = 0x20;
        /// CloseLink: close only the link, not the whole session.
        pub const K: u8 = 0x40;
        /// Fragment: the frame carries a payload fragment.
        pub const F: u8 = 0x40;
        /// SN/size parameters are present.
        pub const S: u8 = 0x40;
        /// TimeRes: the lease is expressed in seconds.
        pub const T: u8 = 0x40;
        /// WhatAmI is present.
        pub const W: u8 = 0x40;
        /// End: last fragment of a fragmented payload.
        pub const E: u8 = 0x80;
        /// Locators are present.
        pub const L: u8 = 0x80;
        /// QoS-split next-SN descriptor in a Join.
        pub const Q: u8 = 0x80;
    }

    pub const MID_MASK: u8 = 0x1f;
    pub const FLAGS_MASK: u8 = 0xe0;

    #[inline]
    pub fn mid(header: u8) -> u8 {
        header & MID_MASK
    }

    #[inline]
    pub fn has_flag(header: u8, flag: u8) -> bool {
        header & flag != 0
    }
}

/// Solicit Hello messages from reachable entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scout {
    /// Roles the scouter is interested in; absent means any.
    pub what: Option<ZInt>,
    /// Whether responders should include their ZenohId.
    pub zid_request: bool,
}

/// Advertise presence, role and locators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub zid: Option<ZenohId>,
    pub whatami: Option<ZInt>,
    pub locators: Vec<Locator>,
}

/// First step of the unicast handshake: propose the session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSyn {
    pub version: u8,
    pub whatami: ZInt,
    pub zid: ZenohId,
    pub sn_resolution: SnResolution,
    pub req_id_resolution: SnResolution,
    pub batch_size: u16,
    pub patch: u8,
}

/// Acknowledge an InitSyn with the committed parameters and a cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitAck {
    pub version: u8,
    pub whatami: ZInt,
    pub zid: ZenohId,
    pub sn_resolution: SnResolution,
    pub req_id_resolution: SnResolution,
    pub batch_size: u16,
    pub patch: u8,
    pub cookie: ZSlice,
}

/// Second step: commit lease and initial SN, echoing the cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSyn {
    pub lease_ms: ZInt,
    pub initial_sn: ZInt,
    pub cookie: ZSlice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAck {
    pub lease_ms: ZInt,
    pub initial_sn: ZInt,
}

/// Per-channel next sequence numbers announced in a Join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrioritySn {
    pub reliable: ZInt,
    pub best_effort: ZInt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextSn {
    Plain(PrioritySn),
    QoS(Box<[PrioritySn; 8]>),
}

impl NextSn {
    /// The SN pair effective for a non-QoS channel.
    pub fn plain(&self) -> PrioritySn {
        match self {
            NextSn::Plain(sn) => *sn,
            NextSn::QoS(sns) => sns[0],
        }
    }
}

/// Multicast equivalent of Init+Open, periodically broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub version: u8,
    pub whatami: ZInt,
    pub zid: ZenohId,
    pub lease_ms: ZInt,
    pub sn_resolution: SnResolution,
    pub batch_size: u16,
    pub next_sn: NextSn,
}

/// Signal teardown of the session, or of a single link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close {
    pub zid: Option<ZenohId>,
    pub reason: u8,
    pub link_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAlive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// One or more zenoh messages sharing the frame SN.
    Messages(Vec<ZenohMessage>),
    /// A fragment of a serialized zenoh message.
    Fragment { buffer: ZSlice, is_final: bool },
}

/// The envelope carrying zenoh messages with a sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub reliability: Reliability,
    pub sn: ZInt,
    pub payload: FramePayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportBody {
    Scout(Scout),
    Hello(Hello),
    InitSyn(InitSyn),
    InitAck(InitAck),
    OpenSyn(OpenSyn),
    OpenAck(OpenAck),
    Join(Join),
    Close(Close),
    KeepAlive(KeepAlive),
    Frame(Frame),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub body: TransportBody,
}

impl TransportMessage {
    pub fn make_scout(what: Option<ZInt>, zid_request: bool) -> TransportMessage {
        TransportMessage {
            body: TransportBody::Scout(Scout { what, zid_request }),
        }
    }

    pub fn make_hello(
        zid: Option<ZenohId>,
        whatami: Option<ZInt>,
        locators: Vec<Locator>,
    ) -> TransportMessage {
        TransportMessage {
            body: TransportBody::Hello(Hello {
                zid,
                whatami,
                locators,
            }),
        }
    }

    pub fn make_init_syn(
        version: u8,
        whatami: ZInt,
        zid: ZenohId,
        sn_resolution: SnResolution,
        req_id_resolution: SnResolution,
        batch_size: u16,
        patch: u8,
    ) -> TransportMessage {
        TransportMessage {
            body: TransportBody::InitSyn(InitSyn {
                version,
                whatami,
                zid,
                sn_resolution,
                req_id_resolution,
                batch_size,
                patch,
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn make_init_ack(
        version: u8,
        whatami: ZInt,
        zid: ZenohId,
        sn_resolution: SnResolution,
        req_id_resolution: SnResolution,
        batch_size: u16,
        patch: u8,
        cookie: ZSlice,
    ) -> TransportMessage {
        TransportMessage {
            body: TransportBody::InitAck(InitAck {
                version,
                whatami,
                zid,
                sn_resolution,
                req_id_resolution,
                batch_size,
                patch,
                cookie,
            }),
        }
    }

    pub fn make_open_syn(lease_ms: ZInt, initial_sn: ZInt, cookie: ZSlice) -> TransportMessage {
        TransportMessage {
            body: TransportBody::OpenSyn(OpenSyn {
                lease_ms,
                initial_sn,
                cookie,
            }),
        }
    }

    pub fn make_open_ack(lease_ms: ZInt, initial_sn: ZInt) -> TransportMessage {
        TransportMessage {
            body: TransportBody::OpenAck(OpenAck {
                lease_ms,
                initial_sn,
            }),
        }
    }

    pub fn make_join(
        version: u8,
        whatami: ZInt,
        zid: ZenohId,
        lease_ms: ZInt,
        sn_resolution: SnResolution,
        batch_size: u16,
        next_sn: NextSn,
    ) -> TransportMessage {
        TransportMessage {
            body: TransportBody::Join(Join {
                version,
                whatami,
                zid,
                lease_ms,
                sn_resolution,
                batch_size,
                next_sn,
            }),
        }
    }

    pub fn make_close(zid: Option<ZenohId>, reason: u8, link_only: bool) -> TransportMessage {
        TransportMessage {
            body: TransportBody::Close(Close {
                zid,
                reason,
                link_only,
            }),
        }
    }

    pub fn make_keep_alive() -> TransportMessage {
        TransportMessage {
            body: TransportBody::KeepAlive(KeepAlive),
        }
    }

    pub fn make_frame(
        reliability: Reliability,
        sn: ZInt,
        payload: FramePayload,
    ) -> TransportMessage {
        TransportMessage {
            body: TransportBody::Frame(Frame {
                reliability,
                sn,
                payload,
            }),
        }
    }
}

#[cfg(feature = "test")]
pub mod test {
    use super::*;
    use crate::core::whatami;
    use crate::defaults;
    use rand::Rng;

    impl TransportMessage {
        /// A random message of a random variant, for codec tests.
        pub fn rand() -> TransportMessage {
            let mut rng = rand::thread_rng();
            let zid = ZenohId::rand();
            match rng.gen_range(0..8u8) {
                0 => TransportMessage::make_scout(
                    rng.gen_bool(0.5).then_some(whatami::ROUTER),
                    rng.gen_bool(0.5),
                ),
                1 => TransportMessage::make_hello(
                    rng.gen_bool(0.5).then_some(zid),
                    Some(whatami::PEER),
                    vec![Locator::new("tcp", "127.0.0.1:7447")],
                ),
                2 => TransportMessage::make_init_syn(
                    crate::VERSION,
                    whatami::CLIENT,
                    zid,
                    defaults::SN_RESOLUTION,
                    defaults::REQ_ID_RESOLUTION,
                    defaults::BATCH_SIZE,
                    defaults::PATCH_CURRENT,
                ),
                3 => TransportMessage::make_init_ack(
                    crate::VERSION,
                    whatami::ROUTER,
                    zid,
                    SnResolution::U14,
                    SnResolution::U14,
                    4096,
                    defaults::PATCH_CURRENT,
                    ZSlice::from(vec![0xab, 0xcd]),
                ),
                4 => TransportMessage::make_open_syn(
                    rng.gen_range(1..60_000),
                    rng.gen_range(0..1 << 14),
                    ZSlice::from(vec![0xab, 0xcd]),
                ),
                5 => TransportMessage::make_open_ack(
                    rng.gen_range(1..60_000),
                    rng.gen_range(0..1 << 14),
                ),
                6 => TransportMessage::make_close(
                    rng.gen_bool(0.5).then_some(zid),
                    rng.gen_range(0..6),
                    rng.gen_bool(0.5),
                ),
                _ => TransportMessage::make_keep_alive(),
            }
        }
    }
}
