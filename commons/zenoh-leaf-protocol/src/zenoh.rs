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
//! Zenoh-level messages, carried inside frames.

use crate::core::{
    ConsolidationMode, DataInfo, QueryTarget, Reliability, ResKey, ResourceId, SubInfo, ZInt,
    ZenohId,
};
use zenoh_leaf_buffers::ZSlice;

pub mod zmsg {
    pub mod id {
        pub const DECLARE: u8 = 0x0b;
        pub const DATA: u8 = 0x0c;
        pub const QUERY: u8 = 0x0d;
        pub const PULL: u8 = 0x0e;
        pub const UNIT: u8 = 0x0f;
        // Decorator, precedes the message it applies to.
        pub const REPLY_CONTEXT: u8 = 0x1e;
    }

    pub mod flag {
        /// Dropping: the message may be dropped under congestion.
        pub const D: u8 = 0x20;
        /// Final: last message of a sequence (ReplyContext, Pull).
        pub const F: u8 = 0x20;
        /// QueryTarget is present.
        pub const T: u8 = 0x20;
        /// DataInfo is present.
        pub const I: u8 = 0x40;
        /// MaxSamples is present.
        pub const N: u8 = 0x40;
        /// SubMode is present.
        pub const S: u8 = 0x40;
        /// ResourceKey: only the numerical id is on the wire.
        pub const K: u8 = 0x80;
    }

    pub mod declaration {
        pub mod id {
            pub const RESOURCE: u8 = 0x01;
            pub const PUBLISHER: u8 = 0x02;
            pub const SUBSCRIBER: u8 = 0x03;
            pub const QUERYABLE: u8 = 0x04;
            pub const TOKEN: u8 = 0x05;
            pub const FORGET_RESOURCE: u8 = 0x11;
            pub const FORGET_PUBLISHER: u8 = 0x12;
            pub const FORGET_SUBSCRIBER: u8 = 0x13;
            pub const FORGET_QUERYABLE: u8 = 0x14;
            pub const FORGET_TOKEN: u8 = 0x15;
        }

        pub mod flag {
            /// Reliable subscription.
            pub const R: u8 = 0x20;
            /// SubMode present.
            pub const S: u8 = 0x40;
            /// Queryable kind present.
            pub const Q: u8 = 0x40;
            /// ResourceKey: only the numerical id is on the wire.
            pub const K: u8 = 0x80;
        }

        pub const MID_MASK: u8 = 0x1f;
    }

    pub mod data_info_flag {
        use crate::core::ZInt;

        pub const SRC_ID: ZInt = 0x01;
        pub const SRC_SN: ZInt = 0x02;
        pub const TSTAMP: ZInt = 0x10;
        pub const KIND: ZInt = 0x20;
        pub const ENC: ZInt = 0x40;
    }

    pub const MID_MASK: u8 = 0x1f;

    #[inline]
    pub fn mid(header: u8) -> u8 {
        header & MID_MASK
    }

    #[inline]
    pub fn has_flag(header: u8, flag: u8) -> bool {
        header & flag != 0
    }
}

/// A single declaration carried by a Declare message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Resource { rid: ResourceId, key: ResKey },
    ForgetResource { rid: ResourceId },
    Publisher { key: ResKey },
    ForgetPublisher { key: ResKey },
    Subscriber { key: ResKey, info: SubInfo },
    ForgetSubscriber { key: ResKey },
    Queryable { key: ResKey, kind: ZInt },
    ForgetQueryable { key: ResKey },
    Token { key: ResKey },
    ForgetToken { key: ResKey },
}

/// Links a reply to its query; decorates a Data (partial reply) or stands
/// alone with the final flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyContext {
    pub qid: ZInt,
    pub replier_kind: ZInt,
    pub replier_id: Option<ZenohId>,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZenohBody {
    Declare {
        declarations: Vec<Declaration>,
    },
    Data {
        key: ResKey,
        data_info: Option<DataInfo>,
        payload: ZSlice,
    },
    Unit {},
    Pull {
        key: ResKey,
        pull_id: ZInt,
        max_samples: Option<ZInt>,
        is_final: bool,
    },
    Query {
        key: ResKey,
        predicate: String,
        qid: ZInt,
        target: QueryTarget,
        consolidation: ConsolidationMode,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZenohMessage {
    pub body: ZenohBody,
    pub reliability: Reliability,
    pub droppable: bool,
    pub reply_context: Option<ReplyContext>,
}

impl ZenohMessage {
    pub fn make_declare(declarations: Vec<Declaration>) -> ZenohMessage {
        ZenohMessage {
            body: ZenohBody::Declare { declarations },
            reliability: Reliability::Reliable,
            droppable: false,
            reply_context: None,
        }
    }

    pub fn make_data(
        key: ResKey,
        data_info: Option<DataInfo>,
        payload: ZSlice,
        reliability: Reliability,
        droppable: bool,
        reply_context: Option<ReplyContext>,
    ) -> ZenohMessage {
        ZenohMessage {
            body: ZenohBody::Data {
                key,
                data_info,
                payload,
            },
            reliability,
            droppable,
            reply_context,
        }
    }

    pub fn make_unit(
        reliability: Reliability,
        droppable: bool,
        reply_context: Option<ReplyContext>,
    ) -> ZenohMessage {
        ZenohMessage {
            body: ZenohBody::Unit {},
            reliability,
            droppable,
            reply_context,
        }
    }

    pub fn make_pull(
        key: ResKey,
        pull_id: ZInt,
        max_samples: Option<ZInt>,
        is_final: bool,
    ) -> ZenohMessage {
        ZenohMessage {
            body: ZenohBody::Pull {
                key,
                pull_id,
                max_samples,
                is_final,
            },
            reliability: Reliability::Reliable,
            droppable: false,
            reply_context: None,
        }
    }

    pub fn make_query(
        key: ResKey,
        predicate: String,
        qid: ZInt,
        target: QueryTarget,
        consolidation: ConsolidationMode,
    ) -> ZenohMessage {
        ZenohMessage {
            body: ZenohBody::Query {
                key,
                predicate,
                qid,
                target,
                consolidation,
            },
            reliability: Reliability::Reliable,
            droppable: false,
            reply_context: None,
        }
    }

    /// A stand-alone final reply.
    pub fn make_reply_final(qid: ZInt) -> ZenohMessage {
        ZenohMessage {
            body: ZenohBody::Unit {},
            reliability: Reliability::Reliable,
            droppable: false,
            reply_context: Some(ReplyContext {
                qid,
                replier_kind: 0,
                replier_id: None,
                is_final: true,
            }),
        }
    }

    #[inline]
    pub fn is_reliable(&self) -> bool {
        self.reliability == Reliability::Reliable
    }
}

#[cfg(feature = "test")]
pub mod test {
    use super::*;
    use crate::core::{queryable, SubMode, Target};
    use rand::Rng;

    fn rand_key(rng: &mut impl Rng) -> ResKey {
        match rng.gen_range(0..3u8) {
            0 => ResKey::RName("demo/example/random".to_string()),
            1 => ResKey::RId(rng.gen_range(1..128)),
            _ => ResKey::RIdWithSuffix(rng.gen_range(1..128), "suffix".to_string()),
        }
    }

    impl ZenohMessage {
        /// A random message of a random variant, for codec tests.
        pub fn rand() -> ZenohMessage {
            let mut rng = rand::thread_rng();
            match rng.gen_range(0..5u8) {
                0 => ZenohMessage::make_declare(vec![
                    Declaration::Resource {
                        rid: rng.gen_range(1..128),
                        key: rand_key(&mut rng),
                    },
                    Declaration::Subscriber {
                        key: rand_key(&mut rng),
                        info: SubInfo {
                            reliability: Reliability::Reliable,
                            mode: SubMode::Push,
                            period: None,
                        },
                    },
                ]),
                1 => ZenohMessage::make_data(
                    rand_key(&mut rng),
                    None,
                    ZSlice::from(vec![0u8; rng.gen_range(0..64)]),
                    Reliability::Reliable,
                    rng.gen_bool(0.5),
                    None,
                ),
                2 => ZenohMessage::make_unit(Reliability::BestEffort, true, None),
                3 => ZenohMessage::make_pull(
                    rand_key(&mut rng),
                    rng.gen_range(0..128),
                    rng.gen_bool(0.5).then(|| rng.gen_range(1..32)),
                    rng.gen_bool(0.5),
                ),
                _ => ZenohMessage::make_query(
                    rand_key(&mut rng),
                    "predicate".to_string(),
                    rng.gen_range(0..u32::MAX as u64),
                    QueryTarget {
                        kind: queryable::ALL_KINDS,
                        target: Target::BestMatching,
                    },
                    ConsolidationMode::Monotonic,
                ),
            }
        }
    }
}
