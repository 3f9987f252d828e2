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
//! Liveliness: tokens asserting presence, subscribers observing them,
//! and queries over the currently alive tokens.
//!
//! Tokens ride the declaration machinery; liveliness queries share the
//! session query-id space but live in their own pending table with their
//! own cancellation hook.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::session::{
    canonical, LivelinessSubState, PendingQuery, Session, TokenState,
};
use crate::types::*;
use zenoh_leaf_core::{zlock, zwrite, ZResult};
use zenoh_leaf_keyexpr as keyexpr;
use zenoh_leaf_protocol::core::{
    data_kind, queryable, ConsolidationMode, DataInfo, QueryTarget, ResKey, Target,
};
use zenoh_leaf_protocol::zenoh::Declaration;
use zenoh_leaf_sync::OnCancelHandler;
use zenoh_leaf_buffers::ZSlice;

impl Session {
    /// Assert a liveliness token on the given key expression. The token
    /// stays alive until undeclared or the session closes.
    pub fn liveliness_declare_token(&self, resource: &ResKey) -> ZResult<LivelinessToken> {
        log::trace!("liveliness_declare_token({resource:?})");
        let id = {
            let mut state = zwrite!(self.inner.state);
            canonical(state.localkey_to_resname(resource)?)?;
            let id = state.next_decl_id();
            state.tokens.insert(
                id,
                TokenState {
                    reskey: resource.clone(),
                },
            );
            id
        };
        self.inner.send_declare(vec![Declaration::Token {
            key: resource.clone(),
        }])?;
        Ok(LivelinessToken { id })
    }

    /// Drop a liveliness token, letting observers see it expire.
    pub fn liveliness_undeclare_token(&self, token: LivelinessToken) -> ZResult<()> {
        log::trace!("liveliness_undeclare_token({token:?})");
        let reskey = {
            let mut state = zwrite!(self.inner.state);
            match state.tokens.remove(&token.id) {
                Some(state) => state.reskey,
                None => return Ok(()),
            }
        };
        self.inner
            .send_declare(vec![Declaration::ForgetToken { key: reskey }])
    }

    /// Observe liveliness changes on keys intersecting `resource`: a PUT
    /// sample when a token appears, a DELETE sample when it goes. With
    /// `history`, currently alive tokens are replayed on declaration.
    pub fn liveliness_declare_subscriber<Handler>(
        &self,
        resource: &ResKey,
        history: bool,
        data_handler: Handler,
    ) -> ZResult<LivelinessSubscriber>
    where
        Handler: FnMut(Sample) + Send + 'static,
    {
        log::trace!("liveliness_declare_subscriber({resource:?})");
        let (id, sub, replay) = {
            let mut state = zwrite!(self.inner.state);
            let resname = canonical(state.localkey_to_resname(resource)?)?;
            let id = state.next_decl_id();
            let sub = Arc::new(LivelinessSubState {
                resname: resname.clone(),
                handler: Arc::new(Mutex::new(Box::new(data_handler))),
            });
            state.liveliness_subscribers.insert(id, sub.clone());
            let replay: Vec<String> = if history {
                state
                    .remote_tokens
                    .keys()
                    .filter(|(_, token)| keyexpr::intersects(&resname, token))
                    .map(|(_, token)| token.clone())
                    .collect()
            } else {
                Vec::new()
            };
            (id, sub, replay)
        };
        for token in replay {
            let sample = Sample {
                res_name: token,
                payload: ZSlice::empty(),
                data_info: Some(DataInfo {
                    kind: Some(data_kind::PUT),
                    ..DataInfo::default()
                }),
            };
            let mut handler = zlock!(sub.handler);
            (handler)(sample);
        }
        Ok(LivelinessSubscriber { id })
    }

    pub fn liveliness_undeclare_subscriber(
        &self,
        subscriber: LivelinessSubscriber,
    ) -> ZResult<()> {
        log::trace!("liveliness_undeclare_subscriber({subscriber:?})");
        let removed = zwrite!(self.inner.state)
            .liveliness_subscribers
            .remove(&subscriber.id);
        if let Some(sub) = removed {
            drop(zlock!(sub.handler));
        }
        Ok(())
    }

    /// Query the liveliness tokens currently alive on keys intersecting
    /// `resource`. Replies are delivered to `callback` until a final
    /// sentinel, at the latest when `timeout` elapses.
    pub fn liveliness_get<Handler>(
        &self,
        resource: &ResKey,
        timeout: Duration,
        callback: Handler,
    ) -> ZResult<()>
    where
        Handler: FnMut(Reply) + Send + 'static,
    {
        log::trace!("liveliness_get({resource:?})");
        self.inner.check_open()?;
        let target = QueryTarget {
            kind: queryable::LIVELINESS,
            target: Target::All,
        };
        let qid = {
            let mut state = zwrite!(self.inner.state);
            state.localkey_to_resname(resource)?;
            let qid = state.next_qid();
            state.pending_liveliness_queries.insert(
                qid,
                PendingQuery {
                    target,
                    consolidation: ConsolidationMode::None,
                    callback: Arc::new(Mutex::new(Box::new(callback))),
                    pending_replies: Vec::new(),
                },
            );
            qid
        };

        let weak = self.inner.weak();
        self.inner
            .cancellation
            .add_handler(OnCancelHandler::new(Box::new(move || {
                if let Some(session) = weak.upgrade() {
                    session.unregister_pending_liveliness_query(qid, true);
                }
                Ok(())
            })))?;

        if let Err(e) = self
            .inner
            .transport
            .write_zenoh_message(zenoh_leaf_protocol::zenoh::ZenohMessage::make_query(
                resource.clone(),
                String::new(),
                qid,
                target,
                ConsolidationMode::None,
            ))
        {
            self.inner.unregister_pending_liveliness_query(qid, false);
            return Err(e);
        }

        // Bound the wait: a silent network still produces the final.
        let weak = self.inner.weak();
        std::thread::Builder::new()
            .name("zleaf-lget".to_string())
            .spawn(move || {
                std::thread::sleep(timeout);
                if let Some(session) = weak.upgrade() {
                    session.unregister_pending_liveliness_query(qid, true);
                }
            })
            .map_err(|_| zenoh_leaf_core::ZError::SystemTaskFailed)?;
        Ok(())
    }

    /// Blocking variant of [liveliness_get](Session::liveliness_get).
    pub fn liveliness_get_collect(
        &self,
        resource: &ResKey,
        timeout: Duration,
    ) -> ZResult<Vec<ReplyData>> {
        let (tx, rx) = flume::unbounded();
        self.liveliness_get(resource, timeout, move |reply| {
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
