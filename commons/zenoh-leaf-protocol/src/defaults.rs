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
//! Protocol defaults proposed at negotiation time.

use crate::core::SnResolution;

/// SN resolution proposed in Init/Join.
pub const SN_RESOLUTION: SnResolution = SnResolution::U28;

/// Request-id resolution proposed in Init.
pub const REQ_ID_RESOLUTION: SnResolution = SnResolution::U28;

/// Batch size proposed in Init/Join, bytes.
pub const BATCH_SIZE: u16 = u16::MAX;

/// Session lease, milliseconds.
pub const LEASE_MS: u64 = 10_000;

/// Lease ticks per lease period.
pub const LEASE_TICKS: u32 = 4;

/// Fragmentation framing patch level spoken by this stack.
pub const PATCH_CURRENT: u8 = 0x01;

/// Default scouting address and timeout.
pub const SCOUT_ADDRESS: &str = "udp/224.0.0.224:7446";
pub const SCOUT_TIMEOUT_MS: u64 = 1_000;

/// Size of the per-transport buffer and message pools; a soft bound.
pub const POOL_SIZE: usize = 4;
