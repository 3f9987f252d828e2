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
use zenoh_leaf_protocol::core::{Locator, Reliability, SnResolution, ZInt};
use zenoh_leaf_protocol::transport::tmsg::{flag, has_flag, id, mid};
use zenoh_leaf_protocol::transport::*;
use zenoh_leaf_protocol::zenoh::zmsg;

impl LeafCodec {
    pub fn write_transport_message(&self, w: &mut WBuf, msg: &TransportMessage) -> ZResult<()> {
        match &msg.body {
            TransportBody::Scout(m) => self.write_scout(w, m),
            TransportBody::Hello(m) => self.write_hello(w, m),
            TransportBody::InitSyn(m) => self.write_init_syn(w, m),
            TransportBody::InitAck(m) => self.write_init_ack(w, m),
            TransportBody::OpenSyn(m) => self.write_open_syn(w, m),
            TransportBody::OpenAck(m) => self.write_open_ack(w, m),
            TransportBody::Join(m) => self.write_join(w, m),
            TransportBody::Close(m) => self.write_close(w, m),
            TransportBody::KeepAlive(_) => w.write_byte(id::KEEP_ALIVE),
            TransportBody::Frame(m) => self.write_frame(w, m),
        }
    }

    pub fn read_transport_message(&self, r: &mut ZBuf) -> ZResult<TransportMessage> {
        let header = r.read_u8().map_err(|_| ZError::DidNotRead)?;
        let body = match mid(header) {
            id::SCOUT => TransportBody::Scout(self.read_scout(r, header)?),
            id::HELLO => TransportBody::Hello(self.read_hello(r, header)?),
            id::INIT if !has_flag(header, flag::A) => {
                TransportBody::InitSyn(self.read_init_syn(r, header)?)
            }
            id::INIT => TransportBody::InitAck(self.read_init_ack(r, header)?),
            id::OPEN if !has_flag(header, flag::A) => {
                TransportBody::OpenSyn(self.read_open_syn(r, header)?)
            }
            id::OPEN => TransportBody::OpenAck(self.read_open_ack(r, header)?),
            id::JOIN => TransportBody::Join(self.read_join(r, header)?),
            id::CLOSE => TransportBody::Close(self.read_close(r, header)?),
            id::KEEP_ALIVE => TransportBody::KeepAlive(KeepAlive),
            id::FRAME => TransportBody::Frame(self.read_frame(r, header)?),
            _ => bail!(ZError::MessageTransportUnknown),
        };
        Ok(TransportMessage { body })
    }

    fn write_scout(&self, w: &mut WBuf, m: &Scout) -> ZResult<()> {
        let mut header = id::SCOUT;
        if m.what.is_some() {
            header |= flag::W;
        }
        if m.zid_request {
            header |= flag::I;
        }
        w.write_byte(header)?;
        if let Some(what) = m.what {
            write_zint(w, what)?;
        }
        Ok(())
    }

    fn read_scout(&self, r: &mut ZBuf, header: u8) -> ZResult<Scout> {
        let what = if has_flag(header, flag::W) {
            Some(read_zint(r)?)
        } else {
            None
        };
        Ok(Scout {
            what,
            zid_request: has_flag(header, flag::I),
        })
    }

    fn write_hello(&self, w: &mut WBuf, m: &Hello) -> ZResult<()> {
        let mut header = id::HELLO;
        if m.zid.is_some() {
            header |= flag::I;
        }
        if m.whatami.is_some() {
            header |= flag::W;
        }
        if !m.locators.is_empty() {
            header |= flag::L;
        }
        w.write_byte(header)?;
        if let Some(zid) = &m.zid {
            write_zid(w, zid)?;
        }
        if let Some(whatami) = m.whatami {
            write_zint(w, whatami)?;
        }
        if !m.locators.is_empty() {
            write_zint(w, m.locators.len() as ZInt)?;
            for locator in &m.locators {
                write_string(w, &locator.to_string())?;
            }
        }
        Ok(())
    }

    fn read_hello(&self, r: &mut ZBuf, header: u8) -> ZResult<Hello> {
        let zid = if has_flag(header, flag::I) {
            Some(read_zid(r)?)
        } else {
            None
        };
        let whatami = if has_flag(header, flag::W) {
            Some(read_zint(r)?)
        } else {
            None
        };
        let mut locators = Vec::new();
        if has_flag(header, flag::L) {
            let n = read_zint(r)? as usize;
            for _ in 0..n {
                let s = read_string(r)?;
                locators.push(s.parse::<Locator>().map_err(|_| ZError::ParseString)?);
            }
        }
        Ok(Hello {
            zid,
            whatami,
            locators,
        })
    }

    fn write_init_syn(&self, w: &mut WBuf, m: &InitSyn) -> ZResult<()> {
        w.write_byte(id::INIT | flag::S)?;
        w.write_byte(m.version)?;
        write_zint(w, m.whatami)?;
        write_zid(w, &m.zid)?;
        w.write_byte(m.sn_resolution.exponent())?;
        w.write_byte(m.req_id_resolution.exponent())?;
        write_u16le(w, m.batch_size)?;
        w.write_byte(m.patch)
    }

    fn read_init_syn(&self, r: &mut ZBuf, header: u8) -> ZResult<InitSyn> {
        let version = r.read_u8()?;
        let whatami = read_zint(r)?;
        let zid = read_zid(r)?;
        let (sn_resolution, req_id_resolution, batch_size, patch) =
            self.read_init_params(r, header)?;
        Ok(InitSyn {
            version,
            whatami,
            zid,
            sn_resolution,
            req_id_resolution,
            batch_size,
            patch,
        })
    }

    fn write_init_ack(&self, w: &mut WBuf, m: &InitAck) -> ZResult<()> {
        w.write_byte(id::INIT | flag::A | flag::S)?;
        w.write_byte(m.version)?;
        write_zint(w, m.whatami)?;
        write_zid(w, &m.zid)?;
        w.write_byte(m.sn_resolution.exponent())?;
        w.write_byte(m.req_id_resolution.exponent())?;
        write_u16le(w, m.batch_size)?;
        w.write_byte(m.patch)?;
        write_slice(w, m.cookie.as_slice())
    }

    fn read_init_ack(&self, r: &mut ZBuf, header: u8) -> ZResult<InitAck> {
        let version = r.read_u8()?;
        let whatami = read_zint(r)?;
        let zid = read_zid(r)?;
        let (sn_resolution, req_id_resolution, batch_size, patch) =
            self.read_init_params(r, header)?;
        let cookie = read_slice(r)?;
        Ok(InitAck {
            version,
            whatami,
            zid,
            sn_resolution,
            req_id_resolution,
            batch_size,
            patch,
            cookie,
        })
    }

    fn read_init_params(
        &self,
        r: &mut ZBuf,
        header: u8,
    ) -> ZResult<(SnResolution, SnResolution, u16, u8)> {
        if !has_flag(header, flag::S) {
            return Ok((
                zenoh_leaf_protocol::defaults::SN_RESOLUTION,
                zenoh_leaf_protocol::defaults::REQ_ID_RESOLUTION,
                zenoh_leaf_protocol::defaults::BATCH_SIZE,
                zenoh_leaf_protocol::defaults::PATCH_CURRENT,
            ));
        }
        let sn = SnResolution::from_exponent(r.read_u8()?).ok_or(ZError::ParseZint)?;
        let req = SnResolution::from_exponent(r.read_u8()?).ok_or(ZError::ParseZint)?;
        let batch = read_u16le(r)?;
        let patch = r.read_u8()?;
        Ok((sn, req, batch, patch))
    }

    fn write_open_syn(&self, w: &mut WBuf, m: &OpenSyn) -> ZResult<()> {
        let mut header = id::OPEN;
        let seconds = m.lease_ms % 1_000 == 0;
        if seconds {
            header |= flag::T;
        }
        w.write_byte(header)?;
        write_zint(w, if seconds { m.lease_ms / 1_000 } else { m.lease_ms })?;
        write_zint(w, m.initial_sn)?;
        write_slice(w, m.cookie.as_slice())
    }

    fn read_open_syn(&self, r: &mut ZBuf, header: u8) -> ZResult<OpenSyn> {
        let lease = read_zint(r)?;
        let lease_ms = if has_flag(header, flag::T) {
            lease * 1_000
        } else {
            lease
        };
        let initial_sn = read_zint(r)?;
        let cookie = read_slice(r)?;
        Ok(OpenSyn {
            lease_ms,
            initial_sn,
            cookie,
        })
    }

    fn write_open_ack(&self, w: &mut WBuf, m: &OpenAck) -> ZResult<()> {
        let mut header = id::OPEN | flag::A;
        let seconds = m.lease_ms % 1_000 == 0;
        if seconds {
            header |= flag::T;
        }
        w.write_byte(header)?;
        write_zint(w, if seconds { m.lease_ms / 1_000 } else { m.lease_ms })?;
        write_zint(w, m.initial_sn)
    }

    fn read_open_ack(&self, r: &mut ZBuf, header: u8) -> ZResult<OpenAck> {
        let lease = read_zint(r)?;
        let lease_ms = if has_flag(header, flag::T) {
            lease * 1_000
        } else {
            lease
        };
        let initial_sn = read_zint(r)?;
        Ok(OpenAck {
            lease_ms,
            initial_sn,
        })
    }

    fn write_join(&self, w: &mut WBuf, m: &Join) -> ZResult<()> {
        let mut header = id::JOIN | flag::S;
        let seconds = m.lease_ms % 1_000 == 0;
        if seconds {
            header |= flag::T;
        }
        if matches!(m.next_sn, NextSn::QoS(_)) {
            header |= flag::Q;
        }
        w.write_byte(header)?;
        w.write_byte(m.version)?;
        write_zint(w, m.whatami)?;
        write_zid(w, &m.zid)?;
        w.write_byte(m.sn_resolution.exponent())?;
        write_u16le(w, m.batch_size)?;
        write_zint(w, if seconds { m.lease_ms / 1_000 } else { m.lease_ms })?;
        match &m.next_sn {
            NextSn::Plain(sn) => {
                write_zint(w, sn.reliable)?;
                write_zint(w, sn.best_effort)?;
            }
            NextSn::QoS(sns) => {
                for sn in sns.iter() {
                    write_zint(w, sn.reliable)?;
                    write_zint(w, sn.best_effort)?;
                }
            }
        }
        Ok(())
    }

    fn read_join(&self, r: &mut ZBuf, header: u8) -> ZResult<Join> {
        let version = r.read_u8()?;
        let whatami = read_zint(r)?;
        let zid = read_zid(r)?;
        let (sn_resolution, batch_size) = if has_flag(header, flag::S) {
            let sn = SnResolution::from_exponent(r.read_u8()?).ok_or(ZError::ParseZint)?;
            let batch = read_u16le(r)?;
            (sn, batch)
        } else {
            (
                zenoh_leaf_protocol::defaults::SN_RESOLUTION,
                zenoh_leaf_protocol::defaults::BATCH_SIZE,
            )
        };
        let lease = read_zint(r)?;
        let lease_ms = if has_flag(header, flag::T) {
            lease * 1_000
        } else {
            lease
        };
        let next_sn = if has_flag(header, flag::Q) {
            let mut sns = [PrioritySn::default(); 8];
            for sn in sns.iter_mut() {
                sn.reliable = read_zint(r)?;
                sn.best_effort = read_zint(r)?;
            }
            NextSn::QoS(Box::new(sns))
        } else {
            NextSn::Plain(PrioritySn {
                reliable: read_zint(r)?,
                best_effort: read_zint(r)?,
            })
        };
        Ok(Join {
            version,
            whatami,
            zid,
            lease_ms,
            sn_resolution,
            batch_size,
            next_sn,
        })
    }

    fn write_close(&self, w: &mut WBuf, m: &Close) -> ZResult<()> {
        let mut header = id::CLOSE;
        if m.zid.is_some() {
            header |= flag::I;
        }
        if m.link_only {
            header |= flag::K;
        }
        w.write_byte(header)?;
        if let Some(zid) = &m.zid {
            write_zid(w, zid)?;
        }
        w.write_byte(m.reason)
    }

    fn read_close(&self, r: &mut ZBuf, header: u8) -> ZResult<Close> {
        let zid = if has_flag(header, flag::I) {
            Some(read_zid(r)?)
        } else {
            None
        };
        let reason = r.read_u8()?;
        Ok(Close {
            zid,
            reason,
            link_only: has_flag(header, flag::K),
        })
    }

    fn write_frame(&self, w: &mut WBuf, m: &Frame) -> ZResult<()> {
        let mut header = id::FRAME;
        if m.reliability == Reliability::Reliable {
            header |= flag::R;
        }
        if let FramePayload::Fragment { is_final, .. } = &m.payload {
            header |= flag::F;
            if *is_final {
                header |= flag::E;
            }
        }
        w.write_byte(header)?;
        write_zint(w, m.sn)?;
        match &m.payload {
            FramePayload::Fragment { buffer, .. } => w.write_bytes(buffer.as_slice()),
            FramePayload::Messages(messages) => {
                for msg in messages {
                    self.write_zenoh_message(w, msg)?;
                }
                Ok(())
            }
        }
    }

    fn read_frame(&self, r: &mut ZBuf, header: u8) -> ZResult<Frame> {
        let reliability = if has_flag(header, flag::R) {
            Reliability::Reliable
        } else {
            Reliability::BestEffort
        };
        let sn = read_zint_bounded(r, self.sn_resolution.varint_len())?;
        let payload = if has_flag(header, flag::F) {
            FramePayload::Fragment {
                buffer: r.read_all(),
                is_final: has_flag(header, flag::E),
            }
        } else {
            // Zenoh messages fill the rest of the batch; their mid space
            // is disjoint from the transport one.
            let mut messages = Vec::new();
            while r.can_read() {
                let peeked = r.peek(1)?.as_slice()[0];
                match zmsg::mid(peeked) {
                    zmsg::id::DECLARE
                    | zmsg::id::DATA
                    | zmsg::id::QUERY
                    | zmsg::id::PULL
                    | zmsg::id::UNIT
                    | zmsg::id::REPLY_CONTEXT => {
                        messages.push(self.read_zenoh_message(r, reliability)?)
                    }
                    _ => break,
                }
            }
            FramePayload::Messages(messages)
        };
        Ok(Frame {
            reliability,
            sn,
            payload,
        })
    }
}
