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
//! Session transports: framing, sequence numbers, fragmentation,
//! batching, peer liveness.
//!
//! A transport owns one link and two cooperative tasks: the read task,
//! blocked on the link and dispatching inbound zenoh messages to the
//! [`TransportEventHandler`], and the lease task, ticking at a fraction
//! of the lease to detect silent peers and emit keep-alives.

pub mod common;
pub mod multicast;
pub mod seq_num;
pub mod tx;
pub mod unicast;

pub use common::{TransportConfig, TransportEventHandler};
pub use multicast::TransportMulticast;
pub use unicast::TransportUnicast;

use zenoh_leaf_protocol::core::ZenohId;

/// The transport of a session: exactly one peer for unicast, a peer set
/// for multicast.
#[derive(Clone)]
pub enum Transport {
    Unicast(TransportUnicast),
    Multicast(TransportMulticast),
}

impl Transport {
    pub fn write_zenoh_message(
        &self,
        msg: zenoh_leaf_protocol::zenoh::ZenohMessage,
    ) -> zenoh_leaf_core::ZResult<()> {
        match self {
            Transport::Unicast(t) => t.write_zenoh_message(msg),
            Transport::Multicast(t) => t.write_zenoh_message(msg),
        }
    }

    pub fn set_batching(&self, enabled: bool) -> zenoh_leaf_core::ZResult<()> {
        match self {
            Transport::Unicast(t) => t.set_batching(enabled),
            Transport::Multicast(t) => t.set_batching(enabled),
        }
    }

    pub fn close(&self, reason: u8) -> zenoh_leaf_core::ZResult<()> {
        match self {
            Transport::Unicast(t) => t.close(reason),
            Transport::Multicast(t) => t.close(reason),
        }
    }

    pub fn local_zid(&self) -> ZenohId {
        match self {
            Transport::Unicast(t) => t.local_zid(),
            Transport::Multicast(t) => t.local_zid(),
        }
    }

    pub fn start_tasks(&self) -> zenoh_leaf_core::ZResult<()> {
        match self {
            Transport::Unicast(t) => {
                t.start_read_task()?;
                t.start_lease_task()
            }
            Transport::Multicast(t) => {
                t.start_read_task()?;
                t.start_lease_task()
            }
        }
    }
}
