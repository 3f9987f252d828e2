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
//! Wire codec: little-endian, LEB128-style varints, one-byte headers
//! with the message id in the low 5 bits and flags in the high 3.

mod primitives;
mod transport;
mod zenoh;

pub use primitives::*;

use zenoh_leaf_protocol::core::SnResolution;

/// The codec, parameterized by the negotiated SN resolution which bounds
/// the width of sequence-number varints on the wire.
#[derive(Debug, Clone, Copy)]
pub struct LeafCodec {
    pub sn_resolution: SnResolution,
}

impl LeafCodec {
    pub fn new(sn_resolution: SnResolution) -> Self {
        LeafCodec { sn_resolution }
    }
}

impl Default for LeafCodec {
    fn default() -> Self {
        LeafCodec::new(zenoh_leaf_protocol::defaults::SN_RESOLUTION)
    }
}
