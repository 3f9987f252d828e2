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
//! Core wire-level types shared by the whole stack.

use std::fmt;
use std::str::FromStr;

use zenoh_leaf_core::{bail, ZError, ZResult};

/// A zenoh integer, varint-encoded on the wire.
pub type ZInt = u64;

/// A numerical resource id declared on a session.
pub type ResourceId = ZInt;

/// The id reserved for "no resource": the reskey is purely textual.
pub const NO_RESOURCE_ID: ResourceId = 0;

pub use uhlc::{Timestamp, ID as TimestampId, NTP64};

/// The role of a zenoh entity.
pub mod whatami {
    use super::ZInt;

    pub const ROUTER: ZInt = 0x01;
    pub const PEER: ZInt = 0x02;
    pub const CLIENT: ZInt = 0x04;

    pub fn to_str(w: ZInt) -> &'static str {
        match w {
            ROUTER => "router",
            PEER => "peer",
            CLIENT => "client",
            _ => "unknown",
        }
    }
}

/// Kinds of queryables and of query targets.
pub mod queryable {
    use super::ZInt;

    pub const ALL_KINDS: ZInt = 0x01;
    pub const STORAGE: ZInt = 0x02;
    pub const EVAL: ZInt = 0x04;
    pub const LIVELINESS: ZInt = 0x08;
}

/// Kinds of data samples.
pub mod data_kind {
    use super::ZInt;

    pub const PUT: ZInt = 0;
    pub const PATCH: ZInt = 1;
    pub const DELETE: ZInt = 2;
}

/// A few well-known encodings.
pub mod encoding {
    use super::ZInt;

    pub const APP_OCTET_STREAM: ZInt = 0;
    pub const TEXT_PLAIN: ZInt = 4;
    pub const APP_JSON: ZInt = 6;

    pub const DEFAULT: ZInt = APP_OCTET_STREAM;
}

/// Reasons carried by a Close message.
pub mod close_reason {
    pub const GENERIC: u8 = 0x00;
    pub const UNSUPPORTED: u8 = 0x01;
    pub const INVALID: u8 = 0x02;
    pub const MAX_SESSIONS: u8 = 0x03;
    pub const MAX_LINKS: u8 = 0x04;
    pub const EXPIRED: u8 = 0x05;
}

/// The global unique id of a zenoh entity: 1 to 16 opaque bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZenohId {
    size: u8,
    id: [u8; ZenohId::MAX_SIZE],
}

impl ZenohId {
    pub const MAX_SIZE: usize = 16;

    pub fn new(slice: &[u8]) -> ZResult<ZenohId> {
        if slice.is_empty() || slice.len() > Self::MAX_SIZE {
            bail!(ZError::Invalid);
        }
        let mut id = [0u8; Self::MAX_SIZE];
        id[..slice.len()].copy_from_slice(slice);
        Ok(ZenohId {
            size: slice.len() as u8,
            id,
        })
    }

    pub fn rand() -> ZenohId {
        let bytes = *uuid::Uuid::new_v4().as_bytes();
        ZenohId {
            size: Self::MAX_SIZE as u8,
            id: bytes,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.id[..self.size as usize]
    }
}

impl fmt::Display for ZenohId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.as_slice()))
    }
}

impl fmt::Debug for ZenohId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for ZenohId {
    type Err = ZError;

    fn from_str(s: &str) -> ZResult<Self> {
        let bytes = hex::decode(s).map_err(|_| ZError::ParseString)?;
        ZenohId::new(&bytes)
    }
}

/// Reliability channel of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reliability {
    BestEffort,
    Reliable,
}

impl Default for Reliability {
    fn default() -> Self {
        Reliability::BestEffort
    }
}

/// The negotiated sequence-number resolution: SN live in `[0, 2^bits)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnResolution {
    U8,
    U14,
    U21,
    U28,
    U56,
}

impl SnResolution {
    pub const fn bits(self) -> u32 {
        match self {
            SnResolution::U8 => 8,
            SnResolution::U14 => 14,
            SnResolution::U21 => 21,
            SnResolution::U28 => 28,
            SnResolution::U56 => 56,
        }
    }

    /// `2^bits - 1`: every valid SN fits in the mask.
    pub const fn mask(self) -> ZInt {
        (1u64 << self.bits()) - 1
    }

    /// Bytes a varint of this resolution may occupy at most.
    pub const fn varint_len(self) -> usize {
        match self {
            SnResolution::U8 => 2,
            SnResolution::U14 => 2,
            SnResolution::U21 => 3,
            SnResolution::U28 => 4,
            SnResolution::U56 => 8,
        }
    }

    pub const fn exponent(self) -> u8 {
        match self {
            SnResolution::U8 => 0,
            SnResolution::U14 => 1,
            SnResolution::U21 => 2,
            SnResolution::U28 => 3,
            SnResolution::U56 => 4,
        }
    }

    pub const fn from_exponent(e: u8) -> Option<SnResolution> {
        match e {
            0 => Some(SnResolution::U8),
            1 => Some(SnResolution::U14),
            2 => Some(SnResolution::U21),
            3 => Some(SnResolution::U28),
            4 => Some(SnResolution::U56),
            _ => None,
        }
    }
}

impl PartialOrd for SnResolution {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.bits().cmp(&other.bits()))
    }
}

/// A wire-level resource key: numeric, textual, or a declared prefix plus
/// a textual suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResKey {
    RName(String),
    RId(ResourceId),
    RIdWithSuffix(ResourceId, String),
}

impl ResKey {
    #[inline]
    pub fn rid(&self) -> ResourceId {
        match self {
            ResKey::RName(_) => NO_RESOURCE_ID,
            ResKey::RId(rid) | ResKey::RIdWithSuffix(rid, _) => *rid,
        }
    }

    #[inline]
    pub fn is_numerical(&self) -> bool {
        matches!(self, ResKey::RId(_))
    }
}

impl fmt::Display for ResKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResKey::RName(name) => write!(f, "{name}"),
            ResKey::RId(rid) => write!(f, "#{rid}"),
            ResKey::RIdWithSuffix(rid, suffix) => write!(f, "#{rid}/{suffix}"),
        }
    }
}

impl From<&str> for ResKey {
    fn from(name: &str) -> ResKey {
        ResKey::RName(name.to_string())
    }
}

impl From<String> for ResKey {
    fn from(name: String) -> ResKey {
        ResKey::RName(name)
    }
}

impl From<ResourceId> for ResKey {
    fn from(rid: ResourceId) -> ResKey {
        ResKey::RId(rid)
    }
}

/// A time period, expressed in the unit of the emitting clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Period {
    pub origin: ZInt,
    pub period: ZInt,
    pub duration: ZInt,
}

/// Push or pull subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubMode {
    Push,
    Pull,
}

impl Default for SubMode {
    fn default() -> Self {
        SubMode::Push
    }
}

/// Configuration of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubInfo {
    pub reliability: Reliability,
    pub mode: SubMode,
    pub period: Option<Period>,
}

/// Which queryables a query should reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    BestMatching,
    All,
    Complete(ZInt),
}

impl Default for Target {
    fn default() -> Self {
        Target::BestMatching
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTarget {
    pub kind: ZInt,
    pub target: Target,
}

impl Default for QueryTarget {
    fn default() -> Self {
        QueryTarget {
            kind: queryable::ALL_KINDS,
            target: Target::default(),
        }
    }
}

/// Reply deduplication policy applied at reception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidationMode {
    /// Deliver every reply as it arrives.
    None,
    /// Deliver immediately, keeping only the newest reply per key.
    Monotonic,
    /// Buffer and deliver only the newest reply per key at final time.
    Latest,
}

impl Default for ConsolidationMode {
    fn default() -> Self {
        ConsolidationMode::Monotonic
    }
}

/// Metadata attached to a data payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataInfo {
    pub source_id: Option<ZenohId>,
    pub source_sn: Option<ZInt>,
    pub timestamp: Option<Timestamp>,
    pub kind: Option<ZInt>,
    pub encoding: Option<ZInt>,
}

impl DataInfo {
    pub fn is_empty(&self) -> bool {
        self.source_id.is_none()
            && self.source_sn.is_none()
            && self.timestamp.is_none()
            && self.kind.is_none()
            && self.encoding.is_none()
    }
}

/// A parsed locator: `protocol/address[?param=value[;...]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub protocol: String,
    pub address: String,
    pub params: Vec<(String, String)>,
}

impl Locator {
    pub fn new(protocol: &str, address: &str) -> Locator {
        Locator {
            protocol: protocol.to_string(),
            address: address.to_string(),
            params: Vec::new(),
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl FromStr for Locator {
    type Err = ZError;

    fn from_str(s: &str) -> ZResult<Self> {
        let (proto, rest) = s.split_once('/').ok_or(ZError::ParseString)?;
        if proto.is_empty() || rest.is_empty() {
            bail!(ZError::ParseString);
        }
        let (addr, params) = match rest.split_once('?') {
            Some((addr, meta)) => {
                let mut params = Vec::new();
                for kv in meta.split(';').filter(|kv| !kv.is_empty()) {
                    match kv.split_once('=') {
                        Some((k, v)) => params.push((k.to_string(), v.to_string())),
                        None => params.push((kv.to_string(), String::new())),
                    }
                }
                (addr, params)
            }
            None => (rest, Vec::new()),
        };
        if addr.is_empty() {
            bail!(ZError::ParseString);
        }
        Ok(Locator {
            protocol: proto.to_string(),
            address: addr.to_string(),
            params,
        })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.address)?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            write!(f, "{}{}={}", if i == 0 { "?" } else { ";" }, k, v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zenoh_id_bounds() {
        assert!(ZenohId::new(&[]).is_err());
        assert!(ZenohId::new(&[0u8; 17]).is_err());
        let zid = ZenohId::new(&[0xab, 0xcd]).unwrap();
        assert_eq!(zid.size(), 2);
        assert_eq!(zid.to_string(), "abcd");
        assert_eq!("abcd".parse::<ZenohId>().unwrap(), zid);
        assert_eq!(ZenohId::rand().size(), 16);
    }

    #[test]
    fn sn_resolution_ordering() {
        assert!(SnResolution::U14 <= SnResolution::U28);
        assert_eq!(SnResolution::U14.mask(), (1 << 14) - 1);
        assert_eq!(SnResolution::from_exponent(3), Some(SnResolution::U28));
        assert_eq!(SnResolution::from_exponent(7), None);
    }

    #[test]
    fn locator_parsing() {
        let l: Locator = "udp/224.0.0.224:7446?iface=lo;ttl=1".parse().unwrap();
        assert_eq!(l.protocol, "udp");
        assert_eq!(l.address, "224.0.0.224:7446");
        assert_eq!(l.param("iface"), Some("lo"));
        assert_eq!(l.param("ttl"), Some("1"));
        assert_eq!(
            l.to_string(),
            "udp/224.0.0.224:7446?iface=lo;ttl=1"
        );
        assert!("tcp".parse::<Locator>().is_err());
        assert!("/127.0.0.1:7447".parse::<Locator>().is_err());
    }
}
