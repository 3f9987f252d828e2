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
//! The session: declaration tables, pending queries and dispatch of
//! inbound traffic to user callbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::{
    Config, Properties, ZN_INFO_PEER_PID_KEY, ZN_INFO_PID_KEY, ZN_INFO_ROUTER_PID_KEY,
};
use crate::types::*;
use zenoh_leaf_buffers::ZSlice;
use zenoh_leaf_collections::{ZRc, ZWeak};
use zenoh_leaf_core::{bail, zlock, zread, zwrite, ZError, ZResult};
use zenoh_leaf_keyexpr as keyexpr;
use zenoh_leaf_protocol::core::{
    close_reason, data_kind, encoding, queryable, whatami, ConsolidationMode, DataInfo, QueryTarget,
    ResKey, ResourceId, SubInfo, Timestamp, ZInt, ZenohId, NO_RESOURCE_ID,
};
use zenoh_leaf_protocol::zenoh::{Declaration, ReplyContext, ZenohBody, ZenohMessage};
use zenoh_leaf_sync::{CancellationToken, OnCancelHandler};
use zenoh_leaf_transport::{Transport, TransportEventHandler};

pub(crate) struct SubscriberState {
    pub(crate) reskey: ResKey,
    pub(crate) resname: String,
    pub(crate) info: SubInfo,
    pub(crate) handler: Arc<Mutex<Box<DataHandler>>>,
}

pub(crate) struct QueryableState {
    pub(crate) reskey: ResKey,
    pub(crate) resname: String,
    pub(crate) kind: ZInt,
    pub(crate) handler: Arc<Mutex<Box<QueryHandler>>>,
}

pub(crate) struct PublisherState {
    pub(crate) reskey: ResKey,
}

pub(crate) struct TokenState {
    pub(crate) reskey: ResKey,
}

pub(crate) struct LivelinessSubState {
    pub(crate) resname: String,
    pub(crate) handler: Arc<Mutex<Box<DataHandler>>>,
}

pub(crate) struct PendingReply {
    pub(crate) res_name: String,
    pub(crate) timestamp: Option<Timestamp>,
    pub(crate) replier_kind: ZInt,
    pub(crate) replier_id: Option<ZenohId>,
    /// Buffered payload; populated only under full consolidation.
    pub(crate) sample: Option<Sample>,
}

pub(crate) struct PendingQuery {
    pub(crate) target: QueryTarget,
    pub(crate) consolidation: ConsolidationMode,
    pub(crate) callback: Arc<Mutex<Box<ReplyHandler>>>,
    pub(crate) pending_replies: Vec<PendingReply>,
}

pub(crate) struct SessionState {
    rid_counter: ResourceId,
    decl_id_counter: Id,
    qid_counter: u32,
    pull_id_counter: ZInt,
    pub(crate) local_resources: HashMap<ResourceId, String>,
    pub(crate) remote_resources: HashMap<(ZenohId, ResourceId), String>,
    pub(crate) publishers: HashMap<Id, PublisherState>,
    pub(crate) subscribers: HashMap<Id, Arc<SubscriberState>>,
    pub(crate) queryables: HashMap<Id, Arc<QueryableState>>,
    pub(crate) tokens: HashMap<Id, TokenState>,
    pub(crate) liveliness_subscribers: HashMap<Id, Arc<LivelinessSubState>>,
    /// Liveliness tokens currently asserted by remote peers.
    pub(crate) remote_tokens: HashMap<(ZenohId, String), usize>,
    pub(crate) pending_queries: HashMap<ZInt, PendingQuery>,
    pub(crate) pending_liveliness_queries: HashMap<ZInt, PendingQuery>,
}

impl SessionState {
    fn new() -> SessionState {
        SessionState {
            // 0 is reserved for "no resource".
            rid_counter: 1,
            decl_id_counter: 0,
            qid_counter: 0,
            pull_id_counter: 0,
            local_resources: HashMap::new(),
            remote_resources: HashMap::new(),
            publishers: HashMap::new(),
            subscribers: HashMap::new(),
            queryables: HashMap::new(),
            tokens: HashMap::new(),
            liveliness_subscribers: HashMap::new(),
            remote_tokens: HashMap::new(),
            pending_queries: HashMap::new(),
            pending_liveliness_queries: HashMap::new(),
        }
    }

    pub(crate) fn next_decl_id(&mut self) -> Id {
        let id = self.decl_id_counter;
        self.decl_id_counter += 1;
        id
    }

    pub(crate) fn next_qid(&mut self) -> ZInt {
        let qid = self.qid_counter;
        self.qid_counter = self.qid_counter.wrapping_add(1);
        qid as ZInt
    }

    fn localid_to_resname(&self, rid: ResourceId) -> ZResult<String> {
        match self.local_resources.get(&rid) {
            Some(name) => Ok(name.clone()),
            None => {
                log::error!("unknown local resource id {rid}");
                Err(ZError::ParseReskey)
            }
        }
    }

    pub(crate) fn localkey_to_resname(&self, reskey: &ResKey) -> ZResult<String> {
        match reskey {
            ResKey::RName(name) => Ok(name.clone()),
            ResKey::RId(rid) => self.localid_to_resname(*rid),
            ResKey::RIdWithSuffix(rid, suffix) => Ok(self.localid_to_resname(*rid)? + suffix),
        }
    }

    pub(crate) fn remotekey_to_resname(&self, peer: &ZenohId, reskey: &ResKey) -> ZResult<String> {
        let remote = |rid: ResourceId| -> ZResult<String> {
            match self.remote_resources.get(&(*peer, rid)) {
                Some(name) => Ok(name.clone()),
                // A peer may refer to a resource we declared ourselves.
                None => self.localid_to_resname(rid),
            }
        };
        match reskey {
            ResKey::RName(name) => Ok(name.clone()),
            ResKey::RId(rid) => remote(*rid),
            ResKey::RIdWithSuffix(rid, suffix) => Ok(remote(*rid)? + suffix),
        }
    }

    /// Substitute a declared numerical prefix into a textual key, if any.
    fn optimize_resname(&self, name: &str) -> ResKey {
        let mut best: Option<(ResourceId, usize)> = None;
        for (rid, expr) in self.local_resources.iter() {
            if expr == name {
                return ResKey::RId(*rid);
            }
            if name.starts_with(expr.as_str())
                && name.as_bytes().get(expr.len()) == Some(&b'/')
                && best.map(|(_, len)| expr.len() > len).unwrap_or(true)
            {
                best = Some((*rid, expr.len()));
            }
        }
        match best {
            Some((rid, len)) => ResKey::RIdWithSuffix(rid, name[len..].to_string()),
            None => ResKey::RName(name.to_string()),
        }
    }
}

/// Routes transport events into the session once it is wired up.
pub(crate) struct SessionDispatcher {
    session: RwLock<Option<ZWeak<SessionInner>>>,
}

impl SessionDispatcher {
    pub(crate) fn new() -> SessionDispatcher {
        SessionDispatcher {
            session: RwLock::new(None),
        }
    }

    pub(crate) fn set(&self, weak: ZWeak<SessionInner>) {
        *zwrite!(self.session) = Some(weak);
    }

    fn upgrade(&self) -> Option<ZRc<SessionInner>> {
        zread!(self.session).as_ref().and_then(|weak| weak.upgrade())
    }
}

impl TransportEventHandler for SessionDispatcher {
    fn handle_zenoh_message(&self, msg: ZenohMessage, peer: &ZenohId) {
        if let Some(session) = self.upgrade() {
            session.handle_message(msg, peer);
        }
    }

    fn closed(&self, reason: u8) {
        if let Some(session) = self.upgrade() {
            session.on_transport_closed(reason);
        }
    }
}

pub struct SessionInner {
    pub(crate) zid: ZenohId,
    pub(crate) mode: ZInt,
    pub(crate) transport: Transport,
    pub(crate) state: RwLock<SessionState>,
    pub(crate) cancellation: CancellationToken,
    pub(crate) hlc: Option<uhlc::HLC>,
    closed: AtomicBool,
    self_weak: Mutex<Option<ZWeak<SessionInner>>>,
}

/// A zenoh-leaf session.
pub struct Session {
    pub(crate) inner: ZRc<SessionInner>,
}

impl Session {
    /// Initialize a Session over an already-open link. Used by the tests
    /// to run against in-process endpoints.
    #[doc(hidden)]
    pub fn init(config: &Config, link: zenoh_leaf_link::Link) -> ZResult<Session> {
        let mode = config.mode()?;
        let zid = ZenohId::rand();
        let tconfig = zenoh_leaf_transport::TransportConfig::new(zid, mode);
        let dispatcher = Arc::new(SessionDispatcher::new());
        let transport = Transport::Unicast(zenoh_leaf_transport::unicast::open_client(
            link,
            &tconfig,
            dispatcher.clone(),
        )?);
        Session::wire(config, zid, mode, transport, dispatcher)
    }

    pub(crate) fn wire(
        config: &Config,
        zid: ZenohId,
        mode: ZInt,
        transport: Transport,
        dispatcher: Arc<SessionDispatcher>,
    ) -> ZResult<Session> {
        let hlc = if config.add_timestamp() {
            let id = uhlc::ID::try_from(zid.as_slice()).map_err(|_| ZError::Invalid)?;
            Some(uhlc::HLCBuilder::new().with_id(id).build())
        } else {
            None
        };
        let inner = ZRc::new(SessionInner {
            zid,
            mode,
            transport,
            state: RwLock::new(SessionState::new()),
            cancellation: CancellationToken::new(),
            hlc,
            closed: AtomicBool::new(false),
            self_weak: Mutex::new(None),
        });
        *zlock!(inner.self_weak) = Some(inner.downgrade()?);
        dispatcher.set(inner.downgrade()?);
        inner.transport.start_tasks()?;
        Ok(Session { inner })
    }

    /// The local entity id of this session.
    pub fn zid(&self) -> ZenohId {
        self.inner.zid
    }

    /// The role this session plays (client or peer).
    pub fn mode(&self) -> ZInt {
        self.inner.mode
    }

    /// Close the session: pending queries receive their final reply, the
    /// close handshake is run once, and no callback fires after return.
    pub fn close(&self) -> ZResult<()> {
        self.inner.close_impl()
    }

    /// Informations about the session.
    pub fn info(&self) -> Properties {
        log::trace!("info()");
        let mut info = Properties::new();
        info.push((ZN_INFO_PID_KEY, self.inner.zid.to_string()));
        match &self.inner.transport {
            Transport::Unicast(t) => {
                let key = if t.remote_whatami() == whatami::ROUTER {
                    ZN_INFO_ROUTER_PID_KEY
                } else {
                    ZN_INFO_PEER_PID_KEY
                };
                info.push((key, t.remote_zid().to_string()));
            }
            Transport::Multicast(t) => {
                for (zid, what) in t.peers() {
                    let key = if what == whatami::ROUTER {
                        ZN_INFO_ROUTER_PID_KEY
                    } else {
                        ZN_INFO_PEER_PID_KEY
                    };
                    info.push((key, zid.to_string()));
                }
            }
        }
        info
    }

    /// Start deferring outbound messages into batches.
    pub fn batch_start(&self) -> ZResult<()> {
        self.inner.transport.set_batching(true)
    }

    /// Stop batching and flush what was deferred.
    pub fn batch_stop(&self) -> ZResult<()> {
        self.inner.transport.set_batching(false)
    }

    /// Associate a numerical id with the given resource key. Declaring
    /// the same expression twice returns the same id.
    pub fn declare_resource(&self, resource: &ResKey) -> ZResult<ResourceId> {
        log::trace!("declare_resource({resource:?})");
        self.inner.check_open()?;
        let (rid, declare) = {
            let mut state = zwrite!(self.inner.state);
            let resname = canonical(state.localkey_to_resname(resource)?)?;
            if let Some((rid, _)) = state
                .local_resources
                .iter()
                .find(|(_, name)| name.as_str() == resname)
            {
                return Ok(*rid);
            }
            let rid = state.rid_counter;
            state.rid_counter += 1;
            state.local_resources.insert(rid, resname.clone());
            (rid, ResKey::RName(resname))
        };
        self.inner
            .send_declare(vec![Declaration::Resource { rid, key: declare }])?;
        Ok(rid)
    }

    /// Undeclare a resource id. Fails while any declared entity still
    /// refers to it.
    pub fn undeclare_resource(&self, rid: ResourceId) -> ZResult<()> {
        log::trace!("undeclare_resource({rid})");
        self.inner.check_open()?;
        {
            let mut state = zwrite!(self.inner.state);
            let in_use = state.publishers.values().any(|p| p.reskey.rid() == rid)
                || state.subscribers.values().any(|s| s.reskey.rid() == rid)
                || state.queryables.values().any(|q| q.reskey.rid() == rid)
                || state.tokens.values().any(|t| t.reskey.rid() == rid);
            if in_use {
                bail!(ZError::Invalid);
            }
            if state.local_resources.remove(&rid).is_none() {
                bail!(ZError::Invalid);
            }
        }
        self.inner
            .send_declare(vec![Declaration::ForgetResource { rid }])
    }

    /// Declare a [Publisher] for the given resource key, enabling
    /// wire-level key optimization for matching writes.
    pub fn declare_publisher(&self, resource: &ResKey) -> ZResult<Publisher> {
        log::trace!("declare_publisher({resource:?})");
        self.inner.check_open()?;
        let id = {
            let mut state = zwrite!(self.inner.state);
            state.localkey_to_resname(resource)?;
            let id = state.next_decl_id();
            state.publishers.insert(
                id,
                PublisherState {
                    reskey: resource.clone(),
                },
            );
            id
        };
        self.inner.send_declare(vec![Declaration::Publisher {
            key: resource.clone(),
        }])?;
        Ok(Publisher {
            id,
            reskey: resource.clone(),
        })
    }

    pub fn undeclare_publisher(&self, publisher: Publisher) -> ZResult<()> {
        log::trace!("undeclare_publisher({publisher:?})");
        self.inner.check_open()?;
        let forget = {
            let mut state = zwrite!(self.inner.state);
            state.publishers.remove(&publisher.id);
            // There might be several publishers on the same reskey.
            !state
                .publishers
                .values()
                .any(|p| p.reskey == publisher.reskey)
        };
        if forget {
            self.inner.send_declare(vec![Declaration::ForgetPublisher {
                key: publisher.reskey,
            }])?;
        }
        Ok(())
    }

    /// Declare a [Subscriber] calling `data_handler` for every sample
    /// whose key intersects `resource`.
    pub fn declare_subscriber<Handler>(
        &self,
        resource: &ResKey,
        info: &SubInfo,
        data_handler: Handler,
    ) -> ZResult<Subscriber>
    where
        Handler: FnMut(Sample) + Send + 'static,
    {
        log::trace!("declare_subscriber({resource:?})");
        self.inner.check_open()?;
        let id = {
            let mut state = zwrite!(self.inner.state);
            let resname = canonical(state.localkey_to_resname(resource)?)?;
            let id = state.next_decl_id();
            state.subscribers.insert(
                id,
                Arc::new(SubscriberState {
                    reskey: resource.clone(),
                    resname,
                    info: *info,
                    handler: Arc::new(Mutex::new(Box::new(data_handler))),
                }),
            );
            id
        };
        self.inner.send_declare(vec![Declaration::Subscriber {
            key: resource.clone(),
            info: *info,
        }])?;
        Ok(Subscriber {
            id,
            reskey: resource.clone(),
        })
    }

    /// Undeclare a [Subscriber]; returns once any in-flight callback has
    /// completed.
    pub fn undeclare_subscriber(&self, subscriber: Subscriber) -> ZResult<()> {
        log::trace!("undeclare_subscriber({subscriber:?})");
        self.inner.check_open()?;
        let (removed, forget) = {
            let mut state = zwrite!(self.inner.state);
            let removed = state.subscribers.remove(&subscriber.id);
            let forget = !state
                .subscribers
                .values()
                .any(|s| s.reskey == subscriber.reskey);
            (removed, forget)
        };
        if let Some(sub) = removed {
            // Drain: a callback running on the read task finishes first.
            drop(zlock!(sub.handler));
        }
        if forget {
            self.inner
                .send_declare(vec![Declaration::ForgetSubscriber {
                    key: subscriber.reskey,
                }])?;
        }
        Ok(())
    }

    /// Ask pull-mode subscribers' data from the network.
    pub fn pull(&self, subscriber: &Subscriber) -> ZResult<()> {
        log::trace!("pull({subscriber:?})");
        self.inner.check_open()?;
        let pull_id = {
            let mut state = zwrite!(self.inner.state);
            match state.subscribers.get(&subscriber.id) {
                Some(sub) if sub.info.mode == SubMode::Pull => {}
                Some(_) => log::warn!("pull on a push-mode subscriber"),
                None => bail!(ZError::Invalid),
            }
            state.pull_id_counter += 1;
            state.pull_id_counter
        };
        self.inner
            .transport
            .write_zenoh_message(ZenohMessage::make_pull(
                subscriber.reskey.clone(),
                pull_id,
                None,
                true,
            ))
    }

    /// Declare a [Queryable] answering queries with kinds in `kind`.
    pub fn declare_queryable<Handler>(
        &self,
        resource: &ResKey,
        kind: ZInt,
        query_handler: Handler,
    ) -> ZResult<Queryable>
    where
        Handler: FnMut(Query) + Send + 'static,
    {
        log::trace!("declare_queryable({resource:?}, {kind})");
        self.inner.check_open()?;
        let id = {
            let mut state = zwrite!(self.inner.state);
            let resname = canonical(state.localkey_to_resname(resource)?)?;
            let id = state.next_decl_id();
            state.queryables.insert(
                id,
                Arc::new(QueryableState {
                    reskey: resource.clone(),
                    resname,
                    kind,
                    handler: Arc::new(Mutex::new(Box::new(query_handler))),
                }),
            );
            id
        };
        self.inner.send_declare(vec![Declaration::Queryable {
            key: resource.clone(),
            kind,
        }])?;
        Ok(Queryable {
            id,
            reskey: resource.clone(),
        })
    }

    pub fn undeclare_queryable(&self, queryable: Queryable) -> ZResult<()> {
        log::trace!("undeclare_queryable({queryable:?})");
        self.inner.check_open()?;
        let (removed, forget) = {
            let mut state = zwrite!(self.inner.state);
            let removed = state.queryables.remove(&queryable.id);
            let forget = !state
                .queryables
                .values()
                .any(|q| q.reskey == queryable.reskey);
            (removed, forget)
        };
        if let Some(qable) = removed {
            drop(zlock!(qable.handler));
        }
        if forget {
            self.inner.send_declare(vec![Declaration::ForgetQueryable {
                key: queryable.reskey,
            }])?;
        }
        Ok(())
    }

    /// Write data with default encoding and kind.
    pub fn write(&self, resource: &ResKey, payload: ZSlice) -> ZResult<()> {
        self.write_ext(resource, payload, encoding::DEFAULT, data_kind::PUT)
    }

    /// Write data with explicit encoding and kind.
    pub fn write_ext(
        &self,
        resource: &ResKey,
        payload: ZSlice,
        encoding: ZInt,
        kind: ZInt,
    ) -> ZResult<()> {
        log::trace!("write_ext({resource:?}, [...])");
        self.inner.check_open()?;
        let (key, resname) = {
            let state = zread!(self.inner.state);
            let resname = state.localkey_to_resname(resource)?;
            let key = match resource {
                ResKey::RName(name) => state.optimize_resname(name),
                _ => resource.clone(),
            };
            (key, resname)
        };
        let info = DataInfo {
            source_id: None,
            source_sn: None,
            timestamp: self.inner.hlc.as_ref().map(|hlc| hlc.new_timestamp()),
            kind: (kind != data_kind::PUT).then_some(kind),
            encoding: (encoding != zenoh_leaf_protocol::core::encoding::DEFAULT)
                .then_some(encoding),
        };
        let info = (!info.is_empty()).then_some(info);
        self.inner
            .transport
            .write_zenoh_message(ZenohMessage::make_data(
                key,
                info.clone(),
                payload.clone(),
                Reliability::Reliable,
                false,
                None,
            ))?;
        // Matching local subscribers observe the write as well.
        self.inner.dispatch_data(resname, info, payload);
        Ok(())
    }

    /// Query the network, delivering replies to `callback`, closed by a
    /// [Reply::Final].
    pub fn query<Handler>(
        &self,
        resource: &ResKey,
        predicate: &str,
        target: QueryTarget,
        consolidation: ConsolidationMode,
        callback: Handler,
    ) -> ZResult<()>
    where
        Handler: FnMut(Reply) + Send + 'static,
    {
        log::trace!("query({resource:?}, {predicate:?})");
        self.inner.check_open()?;
        let qid = {
            let mut state = zwrite!(self.inner.state);
            state.localkey_to_resname(resource)?;
            let qid = state.next_qid();
            state.pending_queries.insert(
                qid,
                PendingQuery {
                    target,
                    consolidation,
                    callback: Arc::new(Mutex::new(Box::new(callback))),
                    pending_replies: Vec::new(),
                },
            );
            qid
        };

        // Tie the pending entry to the session lifetime.
        let weak = self.inner.weak();
        self.inner
            .cancellation
            .add_handler(OnCancelHandler::new(Box::new(move || {
                if let Some(session) = weak.upgrade() {
                    session.unregister_pending_query(qid, true);
                }
                Ok(())
            })))?;

        if let Err(e) = self
            .inner
            .transport
            .write_zenoh_message(ZenohMessage::make_query(
                resource.clone(),
                predicate.to_string(),
                qid,
                target,
                consolidation,
            ))
        {
            self.inner.unregister_pending_query(qid, false);
            return Err(e);
        }
        Ok(())
    }

    /// Issue a query and block until its final reply, collecting the
    /// samples. Session close unblocks the call.
    pub fn query_collect(
        &self,
        resource: &ResKey,
        predicate: &str,
        target: QueryTarget,
        consolidation: ConsolidationMode,
    ) -> ZResult<Vec<ReplyData>> {
        let (tx, rx) = flume::unbounded();
        self.query(resource, predicate, target, consolidation, move |reply| {
            let _ = tx.send(reply);
        })?;
        let mut out = Vec::new();
        loop {
            match rx.recv() {
                Ok(Reply::Data(data)) => out.push(data),
                Ok(Reply::Final) | Err(_) => break,
            }
        }
        Ok(out)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.inner.strong_count() == 1 {
            let _ = self.inner.close_impl();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Session{{ zid: {} }}", self.inner.zid)
    }
}

pub(crate) fn canonical(mut name: String) -> ZResult<String> {
    match keyexpr::canonize(&mut name) {
        keyexpr::CanonStatus::Success => Ok(name),
        status => {
            log::error!("invalid key expression {name:?}: {status:?}");
            Err(ZError::Invalid)
        }
    }
}

impl SessionInner {
    pub(crate) fn weak(&self) -> ZWeak<SessionInner> {
        match zlock!(self.self_weak).as_ref() {
            Some(weak) => weak.clone(),
            // Set at construction, before any caller can reach us.
            None => unreachable!("session weak reference not wired"),
        }
    }

    pub(crate) fn check_open(&self) -> ZResult<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!(ZError::TransportNotAvailable);
        }
        Ok(())
    }

    pub(crate) fn send_declare(&self, declarations: Vec<Declaration>) -> ZResult<()> {
        self.transport
            .write_zenoh_message(ZenohMessage::make_declare(declarations))
    }

    pub(crate) fn send_reply(
        &self,
        qid: ZInt,
        replier_kind: ZInt,
        key: &str,
        payload: ZSlice,
    ) -> ZResult<()> {
        self.transport.write_zenoh_message(ZenohMessage::make_data(
            ResKey::RName(key.to_string()),
            None,
            payload,
            Reliability::Reliable,
            false,
            Some(ReplyContext {
                qid,
                replier_kind,
                replier_id: Some(self.zid),
                is_final: false,
            }),
        ))
    }

    pub(crate) fn send_reply_final(&self, qid: ZInt) -> ZResult<()> {
        self.transport
            .write_zenoh_message(ZenohMessage::make_reply_final(qid))
    }

    fn close_impl(&self) -> ZResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log::debug!("closing session {}", self.zid);
        // Every pending query observes its final reply before the
        // transport goes down; no callback fires after this returns.
        let _ = self.cancellation.cancel();
        self.transport.close(close_reason::GENERIC)
    }

    fn on_transport_closed(&self, reason: u8) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::warn!("session {} closed by transport (reason {reason})", self.zid);
        let _ = self.cancellation.cancel();
    }

    /// Remove a pending query; with `notify` its callback receives the
    /// final sentinel.
    pub(crate) fn unregister_pending_query(&self, qid: ZInt, notify: bool) {
        let removed = zwrite!(self.state).pending_queries.remove(&qid);
        if let Some(pq) = removed {
            if notify {
                let mut callback = zlock!(pq.callback);
                (callback)(Reply::Final);
            }
        }
    }

    pub(crate) fn unregister_pending_liveliness_query(&self, qid: ZInt, notify: bool) {
        let removed = zwrite!(self.state).pending_liveliness_queries.remove(&qid);
        if let Some(pq) = removed {
            if notify {
                let mut callback = zlock!(pq.callback);
                (callback)(Reply::Final);
            }
        }
    }

    /// Entry point of the read task: route one zenoh message.
    fn handle_message(&self, msg: ZenohMessage, peer: &ZenohId) {
        match msg.body {
            ZenohBody::Declare { declarations } => {
                for declaration in declarations {
                    self.handle_declaration(declaration, peer);
                }
            }
            ZenohBody::Data {
                key,
                data_info,
                payload,
            } => match msg.reply_context {
                Some(context) => self.trigger_reply_partial(context, key, data_info, payload, peer),
                None => {
                    let resname = {
                        let state = zread!(self.state);
                        state.remotekey_to_resname(peer, &key)
                    };
                    match resname {
                        Ok(resname) => self.dispatch_data(resname, data_info, payload),
                        Err(_) => log::error!("received data for unknown reskey {key}"),
                    }
                }
            },
            ZenohBody::Unit {} => {
                if let Some(context) = msg.reply_context {
                    if context.is_final {
                        self.trigger_reply_final(context);
                    }
                }
            }
            ZenohBody::Query {
                key,
                predicate,
                qid,
                target,
                ..
            } => self.handle_query(key, predicate, qid, target, peer),
            ZenohBody::Pull { .. } => {
                // A leaf has no samples to serve on pull.
                log::trace!("ignoring pull from {peer}");
            }
        }
    }

    fn handle_declaration(&self, declaration: Declaration, peer: &ZenohId) {
        match declaration {
            Declaration::Resource { rid, key } => {
                let mut state = zwrite!(self.state);
                match state.remotekey_to_resname(peer, &key) {
                    Ok(name) => {
                        state.remote_resources.insert((*peer, rid), name);
                    }
                    Err(_) => log::error!("received resource declaration for unknown key {key}"),
                }
            }
            Declaration::ForgetResource { rid } => {
                zwrite!(self.state).remote_resources.remove(&(*peer, rid));
            }
            Declaration::Token { key } => {
                let resname = {
                    let state = zread!(self.state);
                    state.remotekey_to_resname(peer, &key)
                };
                match resname {
                    Ok(name) => self.handle_token(peer, name, true),
                    Err(_) => log::error!("received token for unknown key {key}"),
                }
            }
            Declaration::ForgetToken { key } => {
                let resname = {
                    let state = zread!(self.state);
                    state.remotekey_to_resname(peer, &key)
                };
                match resname {
                    Ok(name) => self.handle_token(peer, name, false),
                    Err(_) => log::error!("received token forget for unknown key {key}"),
                }
            }
            // A leaf does not route: remote subscriptions and queryables
            // only matter to the router.
            Declaration::Publisher { .. }
            | Declaration::ForgetPublisher { .. }
            | Declaration::Subscriber { .. }
            | Declaration::ForgetSubscriber { .. }
            | Declaration::Queryable { .. }
            | Declaration::ForgetQueryable { .. } => {
                log::trace!("ignoring routing declaration from {peer}");
            }
        }
    }

    /// Deliver a sample to every matching local subscriber.
    pub(crate) fn dispatch_data(
        &self,
        resname: String,
        data_info: Option<DataInfo>,
        payload: ZSlice,
    ) {
        let targets: Vec<Arc<SubscriberState>> = {
            let state = zread!(self.state);
            state
                .subscribers
                .values()
                .filter(|sub| keyexpr::intersects(&sub.resname, &resname))
                .cloned()
                .collect()
        };
        for sub in targets {
            let sample = Sample {
                res_name: resname.clone(),
                payload: payload.clone(),
                data_info: data_info.clone(),
            };
            let mut handler = zlock!(sub.handler);
            (handler)(sample);
        }
    }

    fn handle_query(
        &self,
        key: ResKey,
        predicate: String,
        qid: ZInt,
        target: QueryTarget,
        peer: &ZenohId,
    ) {
        let resname = {
            let state = zread!(self.state);
            match state.remotekey_to_resname(peer, &key) {
                Ok(name) => name,
                Err(_) => {
                    log::error!("received query for unknown reskey {key}");
                    return;
                }
            }
        };
        let targets: Vec<Arc<QueryableState>> = {
            let state = zread!(self.state);
            state
                .queryables
                .values()
                .filter(|qable| {
                    (qable.kind == queryable::ALL_KINDS
                        || target.kind == queryable::ALL_KINDS
                        || qable.kind & target.kind != 0)
                        && keyexpr::intersects(&qable.resname, &resname)
                })
                .cloned()
                .collect()
        };
        for qable in targets {
            let query = Query {
                res_name: resname.clone(),
                predicate: predicate.clone(),
                session: self.weak(),
                qid,
                replier_kind: qable.kind,
            };
            let mut handler = zlock!(qable.handler);
            (handler)(query);
        }
    }

    fn trigger_reply_partial(
        &self,
        context: ReplyContext,
        key: ResKey,
        data_info: Option<DataInfo>,
        payload: ZSlice,
        peer: &ZenohId,
    ) {
        if context.is_final {
            log::debug!("partial reply received with the final flag set");
            return;
        }
        let mut state = zwrite!(self.state);
        let resname = match state.remotekey_to_resname(peer, &key) {
            Ok(name) => name,
            Err(_) => {
                log::error!("received reply for unknown reskey {key}");
                return;
            }
        };
        let liveliness = !state.pending_queries.contains_key(&context.qid);
        let pq = if liveliness {
            state.pending_liveliness_queries.get_mut(&context.qid)
        } else {
            state.pending_queries.get_mut(&context.qid)
        };
        let pq = match pq {
            Some(pq) => pq,
            None => {
                log::debug!("received reply for unknown query {}", context.qid);
                return;
            }
        };
        if pq.target.kind != queryable::ALL_KINDS
            && pq.target.kind & context.replier_kind == 0
        {
            log::debug!(
                "received reply from an unexpected replier kind {}",
                context.replier_kind
            );
            return;
        }

        let timestamp = data_info.as_ref().and_then(|i| i.timestamp);
        let sample = Sample {
            res_name: resname.clone(),
            payload,
            data_info,
        };
        let reply = Reply::Data(ReplyData {
            data: sample.clone(),
            replier_kind: context.replier_kind,
            replier_id: context.replier_id,
        });

        let callback = match pq.consolidation {
            ConsolidationMode::None => Some(pq.callback.clone()),
            ConsolidationMode::Monotonic => {
                match pq
                    .pending_replies
                    .iter_mut()
                    .find(|r| r.res_name == resname)
                {
                    Some(stored) => {
                        if timestamp <= stored.timestamp {
                            log::debug!("reply dropped by monotonic consolidation");
                            None
                        } else {
                            stored.timestamp = timestamp;
                            Some(pq.callback.clone())
                        }
                    }
                    None => {
                        pq.pending_replies.push(PendingReply {
                            res_name: resname,
                            timestamp,
                            replier_kind: context.replier_kind,
                            replier_id: context.replier_id,
                            sample: None,
                        });
                        Some(pq.callback.clone())
                    }
                }
            }
            ConsolidationMode::Latest => {
                match pq
                    .pending_replies
                    .iter_mut()
                    .find(|r| r.res_name == resname)
                {
                    Some(stored) => {
                        if timestamp > stored.timestamp {
                            stored.timestamp = timestamp;
                            stored.replier_kind = context.replier_kind;
                            stored.replier_id = context.replier_id;
                            stored.sample = Some(sample);
                        } else {
                            log::debug!("reply dropped by latest consolidation");
                        }
                    }
                    None => pq.pending_replies.push(PendingReply {
                        res_name: resname,
                        timestamp,
                        replier_kind: context.replier_kind,
                        replier_id: context.replier_id,
                        sample: Some(sample),
                    }),
                }
                None
            }
        };

        drop(state);
        if let Some(callback) = callback {
            let mut callback = zlock!(callback);
            (callback)(reply);
        }
    }

    fn trigger_reply_final(&self, context: ReplyContext) {
        let pq = {
            let mut state = zwrite!(self.state);
            match state.pending_queries.remove(&context.qid) {
                Some(pq) => pq,
                None => match state.pending_liveliness_queries.remove(&context.qid) {
                    Some(pq) => pq,
                    None => {
                        log::debug!("received final reply for unknown query {}", context.qid);
                        return;
                    }
                },
            }
        };
        let mut callback = zlock!(pq.callback);
        if pq.consolidation == ConsolidationMode::Latest {
            // Flush the consolidated replies in arrival order.
            for stored in pq.pending_replies.into_iter() {
                if let Some(sample) = stored.sample {
                    (callback)(Reply::Data(ReplyData {
                        data: sample,
                        replier_kind: stored.replier_kind,
                        replier_id: stored.replier_id,
                    }));
                }
            }
        }
        (callback)(Reply::Final);
    }

    fn handle_token(&self, peer: &ZenohId, resname: String, alive: bool) {
        let (changed, targets) = {
            let mut state = zwrite!(self.state);
            let entry = (*peer, resname.clone());
            let changed = if alive {
                let count = state.remote_tokens.entry(entry).or_insert(0);
                *count += 1;
                *count == 1
            } else {
                match state.remote_tokens.get_mut(&entry) {
                    Some(count) if *count > 1 => {
                        *count -= 1;
                        false
                    }
                    Some(_) => {
                        state.remote_tokens.remove(&entry);
                        true
                    }
                    None => false,
                }
            };
            let targets: Vec<Arc<LivelinessSubState>> = state
                .liveliness_subscribers
                .values()
                .filter(|sub| keyexpr::intersects(&sub.resname, &resname))
                .cloned()
                .collect();
            (changed, targets)
        };
        if !changed {
            return;
        }
        let kind = if alive {
            data_kind::PUT
        } else {
            data_kind::DELETE
        };
        for sub in targets {
            let sample = Sample {
                res_name: resname.clone(),
                payload: ZSlice::empty(),
                data_info: Some(DataInfo {
                    kind: Some(kind),
                    ..DataInfo::default()
                }),
            };
            let mut handler = zlock!(sub.handler);
            (handler)(sample);
        }
    }

}

impl Drop for SessionInner {
    fn drop(&mut self) {
        // Handlers hold weak references only, so the strong count does
        // reach zero; cancelling here upholds "no callback after close".
        let _ = self.cancellation.cancel();
        let _ = self.transport.close(close_reason::GENERIC);
    }
}

// Resource ids live in the local table; `NO_RESOURCE_ID` never does.
const _: () = assert!(NO_RESOURCE_ID == 0);
