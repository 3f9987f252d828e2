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
use crate::ZSlice;
use zenoh_leaf_core::{bail, ZError, ZResult};

/// A contiguous read buffer with a read cursor.
///
/// Reads of byte ranges come back as [`ZSlice`]s aliasing the underlying
/// storage, so decoding a batch never copies payloads.
#[derive(Clone, Debug)]
pub struct ZBuf {
    buf: ZSlice,
    rpos: usize,
}

impl ZBuf {
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.rpos
    }

    #[inline]
    pub fn can_read(&self) -> bool {
        self.remaining() > 0
    }

    #[inline]
    pub fn rpos(&self) -> usize {
        self.rpos
    }

    pub fn set_rpos(&mut self, pos: usize) -> ZResult<()> {
        if pos > self.buf.len() {
            bail!(ZError::Invalid);
        }
        self.rpos = pos;
        Ok(())
    }

    pub fn read_u8(&mut self) -> ZResult<u8> {
        match self.buf.as_slice().get(self.rpos) {
            Some(b) => {
                self.rpos += 1;
                Ok(*b)
            }
            None => Err(ZError::DidNotRead),
        }
    }

    pub fn read_bytes(&mut self, out: &mut [u8]) -> ZResult<()> {
        if self.remaining() < out.len() {
            bail!(ZError::DidNotRead);
        }
        out.copy_from_slice(&self.buf.as_slice()[self.rpos..self.rpos + out.len()]);
        self.rpos += out.len();
        Ok(())
    }

    /// Consume the next `n` bytes as an aliasing slice.
    pub fn read(&mut self, n: usize) -> ZResult<ZSlice> {
        if self.remaining() < n {
            bail!(ZError::DidNotRead);
        }
        let out = self.buf.subslice(self.rpos, self.rpos + n)?;
        self.rpos += n;
        Ok(out)
    }

    /// Look at the next `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> ZResult<ZSlice> {
        if self.remaining() < n {
            bail!(ZError::DidNotRead);
        }
        self.buf.subslice(self.rpos, self.rpos + n)
    }

    /// A non-consuming child buffer covering the next `n` bytes.
    pub fn view(&self, n: usize) -> ZResult<ZBuf> {
        Ok(ZBuf {
            buf: self.peek(n)?,
            rpos: 0,
        })
    }

    pub fn skip(&mut self, n: usize) -> ZResult<()> {
        if self.remaining() < n {
            bail!(ZError::DidNotRead);
        }
        self.rpos += n;
        Ok(())
    }

    /// Consume everything that is left.
    pub fn read_all(&mut self) -> ZSlice {
        let n = self.remaining();
        match self.read(n) {
            Ok(s) => s,
            Err(_) => ZSlice::empty(),
        }
    }

    /// Drop the consumed prefix so the unread bytes start at position 0.
    pub fn compact(&mut self) {
        if self.rpos == 0 {
            return;
        }
        let len = self.buf.len();
        self.buf = match self.buf.subslice(self.rpos, len) {
            Ok(s) => s,
            Err(_) => ZSlice::empty(),
        };
        self.rpos = 0;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf.as_slice()[self.rpos..]
    }
}

impl From<ZSlice> for ZBuf {
    fn from(buf: ZSlice) -> Self {
        ZBuf { buf, rpos: 0 }
    }
}

impl From<Vec<u8>> for ZBuf {
    fn from(v: Vec<u8>) -> Self {
        ZBuf::from(ZSlice::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_advance_the_cursor() {
        let mut z = ZBuf::from(vec![1u8, 2, 3, 4, 5]);
        assert_eq!(z.read_u8().unwrap(), 1);
        let s = z.read(2).unwrap();
        assert_eq!(s.as_slice(), [2, 3]);
        assert_eq!(z.remaining(), 2);
        assert!(z.read(3).is_err());
    }

    #[test]
    fn peek_and_view_do_not_consume() {
        let z = ZBuf::from(vec![9u8, 8, 7]);
        assert_eq!(z.peek(2).unwrap().as_slice(), [9, 8]);
        let mut v = z.view(2).unwrap();
        assert_eq!(v.read_u8().unwrap(), 9);
        assert_eq!(z.rpos(), 0);
    }

    #[test]
    fn compact_drops_the_consumed_prefix() {
        let mut z = ZBuf::from(vec![1u8, 2, 3, 4]);
        z.skip(2).unwrap();
        z.compact();
        assert_eq!(z.rpos(), 0);
        assert_eq!(z.as_slice(), [3, 4]);
    }
}
