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
use crate::primitives::*;
use crate::LeafCodec;
use zenoh_leaf_buffers::{WBuf, ZBuf};
use zenoh_leaf_core::{bail, ZError, ZResult};
use zenoh_leaf_protocol::core::{
    ConsolidationMode, DataInfo, Period, QueryTarget, Reliability, SubInfo, SubMode, Target, ZInt,
};
use zenoh_leaf_protocol::zenoh::zmsg::{self, declaration, flag, has_flag, id};
use zenoh_leaf_protocol::zenoh::*;

const SUBMODE_PULL: u8 = 0x01;
const SUBMODE_PERIOD: u8 = 0x80;

impl LeafCodec {
    pub fn write_zenoh_message(&self, w: &mut WBuf, msg: &ZenohMessage) -> ZResult<()> {
        if let Some(context) = &msg.reply_context {
            self.write_reply_context(w, context)?;
            if context.is_final {
                return Ok(());
            }
        }
        match &msg.body {
            ZenohBody::Declare { declarations } => {
                w.write_byte(id::DECLARE)?;
                write_zint(w, declarations.len() as ZInt)?;
                for declaration in declarations {
                    self.write_declaration(w, declaration)?;
                }
                Ok(())
            }
            ZenohBody::Data {
                key,
                data_info,
                payload,
            } => {
                let mut header = id::DATA;
                if msg.droppable {
                    header |= flag::D;
                }
                if data_info.is_some() {
                    header |= flag::I;
                }
                if reskey_is_numerical(key) {
                    header |= flag::K;
                }
                w.write_byte(header)?;
                write_reskey(w, key)?;
                if let Some(info) = data_info {
                    self.write_data_info(w, info)?;
                }
                write_slice(w, payload.as_slice())
            }
            ZenohBody::Unit {} => {
                let mut header = id::UNIT;
                if msg.droppable {
                    header |= flag::D;
                }
                w.write_byte(header)
            }
            ZenohBody::Pull {
                key,
                pull_id,
                max_samples,
                is_final,
            } => {
                let mut header = id::PULL;
                if *is_final {
                    header |= flag::F;
                }
                if max_samples.is_some() {
                    header |= flag::N;
                }
                if reskey_is_numerical(key) {
                    header |= flag::K;
                }
                w.write_byte(header)?;
                write_reskey(w, key)?;
                write_zint(w, *pull_id)?;
                if let Some(n) = max_samples {
                    write_zint(w, *n)?;
                }
                Ok(())
            }
            ZenohBody::Query {
                key,
                predicate,
                qid,
                target,
                consolidation,
            } => {
                let mut header = id::QUERY;
                if *target != QueryTarget::default() {
                    header |= flag::T;
                }
                if reskey_is_numerical(key) {
                    header |= flag::K;
                }
                w.write_byte(header)?;
                write_reskey(w, key)?;
                write_string(w, predicate)?;
                write_zint(w, *qid)?;
                if *target != QueryTarget::default() {
                    self.write_query_target(w, target)?;
                }
                self.write_consolidation(w, consolidation)
            }
        }
    }

    /// Read one zenoh message, resolving a leading ReplyContext decorator.
    pub fn read_zenoh_message(
        &self,
        r: &mut ZBuf,
        reliability: Reliability,
    ) -> ZResult<ZenohMessage> {
        let header = r.read_u8()?;
        if zmsg::mid(header) == id::REPLY_CONTEXT {
            let context = self.read_reply_context(r, header)?;
            if context.is_final {
                return Ok(ZenohMessage::make_unit(reliability, false, Some(context)));
            }
            let mut msg = self.read_zenoh_body(r, reliability)?;
            msg.reply_context = Some(context);
            return Ok(msg);
        }
        self.read_zenoh_body_with_header(r, header, reliability)
    }

    fn read_zenoh_body(&self, r: &mut ZBuf, reliability: Reliability) -> ZResult<ZenohMessage> {
        let header = r.read_u8()?;
        self.read_zenoh_body_with_header(r, header, reliability)
    }

    fn read_zenoh_body_with_header(
        &self,
        r: &mut ZBuf,
        header: u8,
        reliability: Reliability,
    ) -> ZResult<ZenohMessage> {
        let droppable = has_flag(header, flag::D);
        let body = match zmsg::mid(header) {
            id::DECLARE => {
                let n = read_zint(r)? as usize;
                let mut declarations = Vec::with_capacity(n);
                for _ in 0..n {
                    declarations.push(self.read_declaration(r)?);
                }
                ZenohBody::Declare { declarations }
            }
            id::DATA => {
                let key = read_reskey(r, has_flag(header, flag::K))?;
                let data_info = if has_flag(header, flag::I) {
                    Some(self.read_data_info(r)?)
                } else {
                    None
                };
                let payload = read_slice(r)?;
                ZenohBody::Data {
                    key,
                    data_info,
                    payload,
                }
            }
            id::UNIT => ZenohBody::Unit {},
            id::PULL => {
                let key = read_reskey(r, has_flag(header, flag::K))?;
                let pull_id = read_zint(r)?;
                let max_samples = if has_flag(header, flag::N) {
                    Some(read_zint(r)?)
                } else {
                    None
                };
                ZenohBody::Pull {
                    key,
                    pull_id,
                    max_samples,
                    is_final: has_flag(header, flag::F),
                }
            }
            id::QUERY => {
                let key = read_reskey(r, has_flag(header, flag::K))?;
                let predicate = read_string(r)?;
                let qid = read_zint(r)?;
                let target = if has_flag(header, flag::T) {
                    self.read_query_target(r)?
                } else {
                    QueryTarget::default()
                };
                let consolidation = self.read_consolidation(r)?;
                ZenohBody::Query {
                    key,
                    predicate,
                    qid,
                    target,
                    consolidation,
                }
            }
            _ => bail!(ZError::MessageDeserializationFailed),
        };
        Ok(ZenohMessage {
            body,
            reliability,
            droppable,
            reply_context: None,
        })
    }

    fn write_declaration(&self, w: &mut WBuf, d: &Declaration) -> ZResult<()> {
        use declaration::id as did;
        match d {
            Declaration::Resource { rid, key } => {
                let mut header = did::RESOURCE;
                if reskey_is_numerical(key) {
                    header |= declaration::flag::K;
                }
                w.write_byte(header)?;
                write_zint(w, *rid)?;
                write_reskey(w, key)
            }
            Declaration::ForgetResource { rid } => {
                w.write_byte(did::FORGET_RESOURCE)?;
                write_zint(w, *rid)
            }
            Declaration::Publisher { key } => self.write_key_declaration(w, did::PUBLISHER, key),
            Declaration::ForgetPublisher { key } => {
                self.write_key_declaration(w, did::FORGET_PUBLISHER, key)
            }
            Declaration::Subscriber { key, info } => {
                let mut header = did::SUBSCRIBER;
                if reskey_is_numerical(key) {
                    header |= declaration::flag::K;
                }
                if info.reliability == Reliability::Reliable {
                    header |= declaration::flag::R;
                }
                let default_info = info.mode == SubMode::Push && info.period.is_none();
                if !default_info {
                    header |= declaration::flag::S;
                }
                w.write_byte(header)?;
                write_reskey(w, key)?;
                if !default_info {
                    let mut mode = match info.mode {
                        SubMode::Push => 0x00,
                        SubMode::Pull => SUBMODE_PULL,
                    };
                    if info.period.is_some() {
                        mode |= SUBMODE_PERIOD;
                    }
                    w.write_byte(mode)?;
                    if let Some(period) = &info.period {
                        write_zint(w, period.origin)?;
                        write_zint(w, period.period)?;
                        write_zint(w, period.duration)?;
                    }
                }
                Ok(())
            }
            Declaration::ForgetSubscriber { key } => {
                self.write_key_declaration(w, did::FORGET_SUBSCRIBER, key)
            }
            Declaration::Queryable { key, kind } => {
                let mut header = did::QUERYABLE | declaration::flag::Q;
                if reskey_is_numerical(key) {
                    header |= declaration::flag::K;
                }
                w.write_byte(header)?;
                write_reskey(w, key)?;
                write_zint(w, *kind)
            }
            Declaration::ForgetQueryable { key } => {
                self.write_key_declaration(w, did::FORGET_QUERYABLE, key)
            }
            Declaration::Token { key } => self.write_key_declaration(w, did::TOKEN, key),
            Declaration::ForgetToken { key } => {
                self.write_key_declaration(w, did::FORGET_TOKEN, key)
            }
        }
    }

    fn write_key_declaration(
        &self,
        w: &mut WBuf,
        declaration_id: u8,
        key: &zenoh_leaf_protocol::core::ResKey,
    ) -> ZResult<()> {
        let mut header = declaration_id;
        if reskey_is_numerical(key) {
            header |= declaration::flag::K;
        }
        w.write_byte(header)?;
        write_reskey(w, key)
    }

    fn read_declaration(&self, r: &mut ZBuf) -> ZResult<Declaration> {
        use declaration::id as did;
        let header = r.read_u8().map_err(|_| ZError::ParseDeclaration)?;
        let numerical = has_flag(header, declaration::flag::K);
        let d = match header & declaration::MID_MASK {
            did::RESOURCE => Declaration::Resource {
                rid: read_zint(r)?,
                key: read_reskey(r, numerical)?,
            },
            did::FORGET_RESOURCE => Declaration::ForgetResource {
                rid: read_zint(r)?,
            },
            did::PUBLISHER => Declaration::Publisher {
                key: read_reskey(r, numerical)?,
            },
            did::FORGET_PUBLISHER => Declaration::ForgetPublisher {
                key: read_reskey(r, numerical)?,
            },
            did::SUBSCRIBER => {
                let key = read_reskey(r, numerical)?;
                let reliability = if has_flag(header, declaration::flag::R) {
                    Reliability::Reliable
                } else {
                    Reliability::BestEffort
                };
                let (mode, period) = if has_flag(header, declaration::flag::S) {
                    let mode_byte = r.read_u8().map_err(|_| ZError::ParseSubMode)?;
                    let mode = match mode_byte & !SUBMODE_PERIOD {
                        0x00 => SubMode::Push,
                        SUBMODE_PULL => SubMode::Pull,
                        _ => bail!(ZError::ParseSubMode),
                    };
                    let period = if mode_byte & SUBMODE_PERIOD != 0 {
                        Some(Period {
                            origin: read_zint(r).map_err(|_| ZError::ParsePeriod)?,
                            period: read_zint(r).map_err(|_| ZError::ParsePeriod)?,
                            duration: read_zint(r).map_err(|_| ZError::ParsePeriod)?,
                        })
                    } else {
                        None
                    };
                    (mode, period)
                } else {
                    (SubMode::Push, None)
                };
                Declaration::Subscriber {
                    key,
                    info: SubInfo {
                        reliability,
                        mode,
                        period,
                    },
                }
            }
            did::FORGET_SUBSCRIBER => Declaration::ForgetSubscriber {
                key: read_reskey(r, numerical)?,
            },
            did::QUERYABLE => {
                let key = read_reskey(r, numerical)?;
                let kind = if has_flag(header, declaration::flag::Q) {
                    read_zint(r)?
                } else {
                    zenoh_leaf_protocol::core::queryable::ALL_KINDS
                };
                Declaration::Queryable { key, kind }
            }
            did::FORGET_QUERYABLE => Declaration::ForgetQueryable {
                key: read_reskey(r, numerical)?,
            },
            did::TOKEN => Declaration::Token {
                key: read_reskey(r, numerical)?,
            },
            did::FORGET_TOKEN => Declaration::ForgetToken {
                key: read_reskey(r, numerical)?,
            },
            _ => bail!(ZError::ParseDeclaration),
        };
        Ok(d)
    }

    fn write_data_info(&self, w: &mut WBuf, info: &DataInfo) -> ZResult<()> {
        use zmsg::data_info_flag as dif;
        let mut flags: ZInt = 0;
        if info.source_id.is_some() {
            flags |= dif::SRC_ID;
        }
        if info.source_sn.is_some() {
            flags |= dif::SRC_SN;
        }
        if info.timestamp.is_some() {
            flags |= dif::TSTAMP;
        }
        if info.kind.is_some() {
            flags |= dif::KIND;
        }
        if info.encoding.is_some() {
            flags |= dif::ENC;
        }
        write_zint(w, flags)?;
        if let Some(zid) = &info.source_id {
            write_zid(w, zid)?;
        }
        if let Some(sn) = info.source_sn {
            write_zint(w, sn)?;
        }
        if let Some(ts) = &info.timestamp {
            write_timestamp(w, ts)?;
        }
        if let Some(kind) = info.kind {
            write_zint(w, kind)?;
        }
        if let Some(encoding) = info.encoding {
            write_zint(w, encoding)?;
        }
        Ok(())
    }

    fn read_data_info(&self, r: &mut ZBuf) -> ZResult<DataInfo> {
        use zmsg::data_info_flag as dif;
        let flags = read_zint(r).map_err(|_| ZError::ParseDataInfo)?;
        let source_id = if flags & dif::SRC_ID != 0 {
            Some(read_zid(r).map_err(|_| ZError::ParseDataInfo)?)
        } else {
            None
        };
        let source_sn = if flags & dif::SRC_SN != 0 {
            Some(read_zint(r).map_err(|_| ZError::ParseDataInfo)?)
        } else {
            None
        };
        let timestamp = if flags & dif::TSTAMP != 0 {
            Some(read_timestamp(r)?)
        } else {
            None
        };
        let kind = if flags & dif::KIND != 0 {
            Some(read_zint(r).map_err(|_| ZError::ParseDataInfo)?)
        } else {
            None
        };
        let encoding = if flags & dif::ENC != 0 {
            Some(read_zint(r).map_err(|_| ZError::ParseDataInfo)?)
        } else {
            None
        };
        Ok(DataInfo {
            source_id,
            source_sn,
            timestamp,
            kind,
            encoding,
        })
    }

    fn write_reply_context(&self, w: &mut WBuf, context: &ReplyContext) -> ZResult<()> {
        let mut header = id::REPLY_CONTEXT;
        if context.is_final {
            header |= flag::F;
        }
        w.write_byte(header)?;
        write_zint(w, context.qid)?;
        if !context.is_final {
            write_zint(w, context.replier_kind)?;
            match &context.replier_id {
                Some(zid) => write_slice(w, zid.as_slice())?,
                None => write_slice(w, &[])?,
            }
        }
        Ok(())
    }

    fn read_reply_context(&self, r: &mut ZBuf, header: u8) -> ZResult<ReplyContext> {
        let is_final = has_flag(header, flag::F);
        let qid = read_zint(r)?;
        let (replier_kind, replier_id) = if is_final {
            (0, None)
        } else {
            let kind = read_zint(r)?;
            let slice = read_slice(r)?;
            let zid = if slice.is_empty() {
                None
            } else {
                Some(
                    zenoh_leaf_protocol::core::ZenohId::new(slice.as_slice())
                        .map_err(|_| ZError::ParseBytes)?,
                )
            };
            (kind, zid)
        };
        Ok(ReplyContext {
            qid,
            replier_kind,
            replier_id,
            is_final,
        })
    }

    fn write_query_target(&self, w: &mut WBuf, target: &QueryTarget) -> ZResult<()> {
        write_zint(w, target.kind)?;
        match target.target {
            Target::BestMatching => write_zint(w, 0),
            Target::All => write_zint(w, 1),
            Target::Complete(n) => {
                write_zint(w, 2)?;
                write_zint(w, n)
            }
        }
    }

    fn read_query_target(&self, r: &mut ZBuf) -> ZResult<QueryTarget> {
        let kind = read_zint(r)?;
        let target = match read_zint(r)? {
            0 => Target::BestMatching,
            1 => Target::All,
            2 => Target::Complete(read_zint(r)?),
            _ => bail!(ZError::MessageDeserializationFailed),
        };
        Ok(QueryTarget { kind, target })
    }

    fn write_consolidation(&self, w: &mut WBuf, mode: &ConsolidationMode) -> ZResult<()> {
        write_zint(
            w,
            match mode {
                ConsolidationMode::None => 0,
                ConsolidationMode::Monotonic => 1,
                ConsolidationMode::Latest => 2,
            },
        )
    }

    fn read_consolidation(&self, r: &mut ZBuf) -> ZResult<ConsolidationMode> {
        match read_zint(r).map_err(|_| ZError::ParseConsolidation)? {
            0 => Ok(ConsolidationMode::None),
            1 => Ok(ConsolidationMode::Monotonic),
            2 => Ok(ConsolidationMode::Latest),
            _ => Err(ZError::ParseConsolidation),
        }
    }
}
