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
//! Modular sequence-number arithmetic over the negotiated resolution.

use zenoh_leaf_protocol::core::{SnResolution, ZInt};

/// Next SN after `sn`.
#[inline]
pub fn next(res: SnResolution, sn: ZInt) -> ZInt {
    sn.wrapping_add(1) & res.mask()
}

/// SN preceding `sn`.
#[inline]
pub fn decrement(res: SnResolution, sn: ZInt) -> ZInt {
    sn.wrapping_sub(1) & res.mask()
}

/// Half-modulus ordering: `a` precedes `b` iff `(b - a) mod 2^bits` lies
/// in `(0, 2^(bits-1)]`.
#[inline]
pub fn precedes(res: SnResolution, a: ZInt, b: ZInt) -> bool {
    let gap = b.wrapping_sub(a) & res.mask();
    gap != 0 && gap <= 1 << (res.bits() - 1)
}

/// A random SN masked to the resolution.
pub fn rand(res: SnResolution) -> ZInt {
    use rand::Rng;
    rand::thread_rng().gen::<u64>() & res.mask()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_wraps_at_resolution() {
        let res = SnResolution::U14;
        assert_eq!(next(res, 0), 1);
        assert_eq!(next(res, res.mask()), 0);
        assert_eq!(decrement(res, 0), res.mask());
        assert_eq!(decrement(res, 7), 6);
    }

    #[test]
    fn half_modulus_ordering() {
        for res in [
            SnResolution::U8,
            SnResolution::U14,
            SnResolution::U21,
            SnResolution::U28,
            SnResolution::U56,
        ] {
            let modulus = res.mask() + 1;
            let half = modulus / 2;
            for a in [0u64, 1, 5, half - 1, half, modulus - 1] {
                // Every distance within the half-window is "ahead".
                for d in [1u64, 2, half - 1, half] {
                    let b = a.wrapping_add(d) & res.mask();
                    assert!(precedes(res, a, b), "{a} should precede {b} ({res:?})");
                }
                // One past the half-window is behind.
                let b = a.wrapping_add(half + 1) & res.mask();
                assert!(!precedes(res, a, b), "{a} should not precede {b} ({res:?})");
                // Nothing precedes itself.
                assert!(!precedes(res, a, a));
            }
        }
    }

    #[test]
    fn random_sn_is_masked() {
        for _ in 0..64 {
            assert!(rand(SnResolution::U8) <= SnResolution::U8.mask());
        }
    }
}
