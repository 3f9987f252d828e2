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
use zenoh_leaf_buffers::{WBuf, ZBuf, ZSlice};
use zenoh_leaf_core::{bail, ZError, ZResult};
use zenoh_leaf_protocol::core::{ResKey, Timestamp, TimestampId, ZInt, ZenohId, NTP64};

/// Longest LEB128 encoding of a u64.
pub const ZINT_MAX_LEN: usize = 10;

pub fn write_zint(w: &mut WBuf, mut v: ZInt) -> ZResult<()> {
    loop {
        let b = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            return w.write_byte(b);
        }
        w.write_byte(b | 0x80)?;
    }
}

/// Bytes `v` occupies once varint-encoded.
pub fn zint_len(mut v: ZInt) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

pub fn read_zint(r: &mut ZBuf) -> ZResult<ZInt> {
    read_zint_bounded(r, ZINT_MAX_LEN)
}

/// Read a varint refusing encodings longer than `max_len` bytes.
pub fn read_zint_bounded(r: &mut ZBuf, max_len: usize) -> ZResult<ZInt> {
    let mut v: ZInt = 0;
    let mut shift = 0u32;
    for i in 0..max_len.min(ZINT_MAX_LEN) {
        let b = r.read_u8().map_err(|_| ZError::ParseZint)?;
        if i == ZINT_MAX_LEN - 1 && b > 0x01 {
            // The 10th byte may only carry the top bit of a u64.
            bail!(ZError::ParseZint);
        }
        v |= ((b & 0x7f) as ZInt) << shift;
        if b & 0x80 == 0 {
            return Ok(v);
        }
        shift += 7;
    }
    Err(ZError::ParseZint)
}

pub fn write_u16le(w: &mut WBuf, v: u16) -> ZResult<()> {
    let bytes = v.to_le_bytes();
    w.write_bytes(&bytes)
}

pub fn read_u16le(r: &mut ZBuf) -> ZResult<u16> {
    let mut bytes = [0u8; 2];
    r.read_bytes(&mut bytes).map_err(|_| ZError::ParseBytes)?;
    Ok(u16::from_le_bytes(bytes))
}

pub fn write_slice(w: &mut WBuf, s: &[u8]) -> ZResult<()> {
    write_zint(w, s.len() as ZInt)?;
    w.write_bytes(s)
}

pub fn read_slice(r: &mut ZBuf) -> ZResult<ZSlice> {
    let len = read_zint(r)? as usize;
    r.read(len).map_err(|_| ZError::ParseBytes)
}

pub fn write_string(w: &mut WBuf, s: &str) -> ZResult<()> {
    write_slice(w, s.as_bytes())
}

pub fn read_string(r: &mut ZBuf) -> ZResult<String> {
    let slice = read_slice(r)?;
    String::from_utf8(slice.to_vec()).map_err(|_| ZError::ParseString)
}

pub fn write_zid(w: &mut WBuf, zid: &ZenohId) -> ZResult<()> {
    write_slice(w, zid.as_slice())
}

pub fn read_zid(r: &mut ZBuf) -> ZResult<ZenohId> {
    let slice = read_slice(r)?;
    ZenohId::new(slice.as_slice()).map_err(|_| ZError::ParseBytes)
}

pub fn write_timestamp(w: &mut WBuf, ts: &Timestamp) -> ZResult<()> {
    write_zint(w, ts.get_time().as_u64())?;
    let id = ts.get_id();
    write_slice(w, id.as_slice())
}

pub fn read_timestamp(r: &mut ZBuf) -> ZResult<Timestamp> {
    let time = read_zint(r).map_err(|_| ZError::ParseTimestamp)?;
    let slice = read_slice(r).map_err(|_| ZError::ParseTimestamp)?;
    let id = TimestampId::try_from(slice.as_slice()).map_err(|_| ZError::ParseTimestamp)?;
    Ok(Timestamp::new(NTP64(time), id))
}

/// Whether the `K` flag must be set in the header of the message carrying
/// this reskey: the key is on the wire as a bare numerical id.
#[inline]
pub fn reskey_is_numerical(key: &ResKey) -> bool {
    key.is_numerical()
}

pub fn write_reskey(w: &mut WBuf, key: &ResKey) -> ZResult<()> {
    match key {
        ResKey::RName(name) => {
            write_zint(w, zenoh_leaf_protocol::core::NO_RESOURCE_ID)?;
            write_string(w, name)
        }
        ResKey::RId(rid) => write_zint(w, *rid),
        ResKey::RIdWithSuffix(rid, suffix) => {
            write_zint(w, *rid)?;
            write_string(w, suffix)
        }
    }
}

pub fn read_reskey(r: &mut ZBuf, numerical: bool) -> ZResult<ResKey> {
    let rid = read_zint(r).map_err(|_| ZError::ParseReskey)?;
    if numerical {
        return Ok(ResKey::RId(rid));
    }
    let suffix = read_string(r).map_err(|_| ZError::ParseReskey)?;
    if rid == zenoh_leaf_protocol::core::NO_RESOURCE_ID {
        Ok(ResKey::RName(suffix))
    } else {
        Ok(ResKey::RIdWithSuffix(rid, suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_zint(v: ZInt) {
        let mut w = WBuf::new(16, true);
        write_zint(&mut w, v).unwrap();
        assert_eq!(w.len(), zint_len(v));
        let mut r = w.to_zbuf();
        assert_eq!(read_zint(&mut r).unwrap(), v);
        assert!(!r.can_read());
    }

    #[test]
    fn zint_roundtrip() {
        for v in [0, 1, 0x7f, 0x80, 0x3fff, 0x4000, u32::MAX as u64, u64::MAX] {
            roundtrip_zint(v);
        }
    }

    #[test]
    fn zint_rejects_overlong() {
        // 11 continuation bytes.
        let mut r = ZBuf::from(vec![0x80u8; 11]);
        assert_eq!(read_zint(&mut r), Err(ZError::ParseZint));
        // Bounded read refuses a wider encoding.
        let mut w = WBuf::new(16, true);
        write_zint(&mut w, 1 << 21).unwrap();
        let mut r = w.to_zbuf();
        assert_eq!(read_zint_bounded(&mut r, 2), Err(ZError::ParseZint));
    }

    #[test]
    fn reskey_forms() {
        for key in [
            ResKey::RName("demo/example".to_string()),
            ResKey::RId(7),
            ResKey::RIdWithSuffix(7, "foo".to_string()),
        ] {
            let mut w = WBuf::new(64, true);
            write_reskey(&mut w, &key).unwrap();
            let mut r = w.to_zbuf();
            let out = read_reskey(&mut r, reskey_is_numerical(&key)).unwrap();
            assert_eq!(out, key);
        }
    }

    #[test]
    fn timestamp_roundtrip() {
        let id = TimestampId::try_from([1u8; 8].as_slice()).unwrap();
        let ts = Timestamp::new(NTP64(42), id);
        let mut w = WBuf::new(64, true);
        write_timestamp(&mut w, &ts).unwrap();
        let mut r = w.to_zbuf();
        assert_eq!(read_timestamp(&mut r).unwrap(), ts);
    }
}
