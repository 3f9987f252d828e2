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
use std::fmt;

use crate::session::SessionInner;
use zenoh_leaf_buffers::ZSlice;
use zenoh_leaf_collections::ZWeak;
use zenoh_leaf_core::{ZError, ZResult};
pub use zenoh_leaf_protocol::core::{DataInfo, ResKey, Timestamp, ZenohId};

/// A read-only bytes buffer.
pub use zenoh_leaf_buffers::ZBuf;

/// A numerical Id mapped to a resource name with
/// [declare_resource](crate::Session::declare_resource).
pub use zenoh_leaf_protocol::core::ResourceId;

/// Informations to configure a subscription.
pub use zenoh_leaf_protocol::core::SubInfo;

/// A time period.
pub use zenoh_leaf_protocol::core::Period;

/// The [Queryable]s that should be target of a [query](crate::Session::query).
pub use zenoh_leaf_protocol::core::{QueryTarget, Target};

/// The kind of consolidation that should be applied on replies.
pub use zenoh_leaf_protocol::core::ConsolidationMode;

/// The kind of reliability.
pub use zenoh_leaf_protocol::core::Reliability;

/// The subscription mode.
pub use zenoh_leaf_protocol::core::SubMode;

/// A zenoh integer.
pub use zenoh_leaf_protocol::core::ZInt;

pub use zenoh_leaf_protocol::core::{data_kind, encoding, queryable, whatami};

/// A zenoh Hello message.
pub use zenoh_leaf_protocol::transport::Hello;

pub(crate) type Id = usize;

/// A zenoh value with its resolved resource name and metadata.
#[derive(Debug, Clone)]
pub struct Sample {
    pub res_name: String,
    pub payload: ZSlice,
    pub data_info: Option<DataInfo>,
}

impl Sample {
    pub fn kind(&self) -> ZInt {
        self.data_info
            .as_ref()
            .and_then(|i| i.kind)
            .unwrap_or(data_kind::PUT)
    }

    pub fn timestamp(&self) -> Option<&Timestamp> {
        self.data_info.as_ref().and_then(|i| i.timestamp.as_ref())
    }
}

/// A reply to a [query](crate::Session::query).
#[derive(Debug, Clone)]
pub enum Reply {
    Data(ReplyData),
    /// No more replies will come for this query.
    Final,
}

#[derive(Debug, Clone)]
pub struct ReplyData {
    pub data: Sample,
    pub replier_kind: ZInt,
    pub replier_id: Option<ZenohId>,
}

pub(crate) type DataHandler = dyn FnMut(Sample) + Send;
pub(crate) type QueryHandler = dyn FnMut(Query) + Send;
pub(crate) type ReplyHandler = dyn FnMut(Reply) + Send;

/// A query received by a [Queryable]. Replies go back through
/// [reply](Query::reply), closed by [reply_final](Query::reply_final).
pub struct Query {
    pub res_name: String,
    pub predicate: String,
    pub(crate) session: ZWeak<SessionInner>,
    pub(crate) qid: ZInt,
    pub(crate) replier_kind: ZInt,
}

impl Query {
    /// Send one reply sample for this query.
    pub fn reply(&self, key: &str, payload: ZSlice) -> ZResult<()> {
        match self.session.upgrade() {
            Some(session) => session.send_reply(self.qid, self.replier_kind, key, payload),
            None => Err(ZError::TransportNotAvailable),
        }
    }

    /// Signal that no more replies will be produced.
    pub fn reply_final(&self) -> ZResult<()> {
        match self.session.upgrade() {
            Some(session) => session.send_reply_final(self.qid),
            None => Err(ZError::TransportNotAvailable),
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Query{{ res_name: {}, predicate: {} }}",
            self.res_name, self.predicate
        )
    }
}

/// A declared publisher.
#[derive(Debug)]
pub struct Publisher {
    pub(crate) id: Id,
    pub(crate) reskey: ResKey,
}

/// A declared subscriber delivering samples to its callback.
#[derive(Debug)]
pub struct Subscriber {
    pub(crate) id: Id,
    pub(crate) reskey: ResKey,
}

/// An entity able to reply to queries.
#[derive(Debug)]
pub struct Queryable {
    pub(crate) id: Id,
    pub(crate) reskey: ResKey,
}

/// A liveliness token asserting presence on a key expression.
#[derive(Debug)]
pub struct LivelinessToken {
    pub(crate) id: Id,
}

/// A subscriber to liveliness changes.
#[derive(Debug)]
pub struct LivelinessSubscriber {
    pub(crate) id: Id,
}
