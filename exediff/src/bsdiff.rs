// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

//! A suffix-array binary diff engine.
//!
//! Format-agnostic: works on arbitrary byte strings, including empty ones,
//! and is applied independently to each encoded-program stream pair by the
//! ensemble layer. Matching follows the classic bsdiff scheme: a suffix array
//! over `old` drives a greedy scan of `new` that alternates near-matching
//! "copy" runs (stored as byte-wise subtractions, so only the differences are
//! non-zero) with literal "extra" runs and seek deltas within `old`.
//!
//! Patch wire format: magic, CRC-32 of `old`, then a three-stream set of
//! control varints (add length, copy length, signed seek per triple),
//! subtracted diff bytes, and literal extra bytes.

use log::debug;
use sufsort::SuffixArray;

use crate::{
    error::BsdiffError,
    stream::{SinkStream, SinkStreamSet, SourceStream, SourceStreamSet},
};

const PATCH_MAGIC: u32 = 0x30_44_53_42; // "BSD0"

const STREAM_CONTROL: usize = 0;
const STREAM_DIFF: usize = 1;
const STREAM_EXTRA: usize = 2;
const STREAM_COUNT: usize = 3;

/// How far a candidate match may fall behind the extrapolated previous match
/// before the scan commits to it anyway.
const NON_MATCHING_BYTES_THRESHOLD: usize = 8;

#[derive(Clone, Copy)]
struct Match {
    add_old_pos: usize,
    add_new_pos: usize,
    add_len: usize,
    copy_end: usize,
}

impl Match {
    fn copy_pos(&self) -> usize {
        self.add_new_pos + self.add_len
    }
}

/// Greedy scanner yielding one [`Match`] per control triple.
struct MatchMaker<'a> {
    scan: usize,
    len: usize,
    pos: usize,
    last_scan: usize,
    last_pos: usize,
    last_offset: isize,
    old: &'a [u8],
    new: &'a [u8],
    old_index: SuffixArray<'a>,
}

impl<'a> MatchMaker<'a> {
    fn new(old: &'a [u8], new: &'a [u8]) -> Self {
        Self {
            scan: 0,
            len: 0,
            pos: 0,
            last_scan: 0,
            last_pos: 0,
            last_offset: 0,
            old,
            new,
            old_index: SuffixArray::new(old),
        }
    }
}

impl Iterator for MatchMaker<'_> {
    type Item = Match;

    fn next(&mut self) -> Option<Self::Item> {
        while self.scan < self.new.len() {
            let mut old_score = 0;
            self.scan += self.len;
            let mut scsc = self.scan;
            while self.scan < self.new.len() {
                (self.pos, self.len) = self
                    .old_index
                    .longest_match(&self.new[self.scan..])
                    .map(|m| (m.position(), m.len()))
                    .unwrap_or((0, 0));

                while scsc < self.scan + self.len {
                    if ((scsc as isize + self.last_offset) as usize) < self.old.len()
                        && self.old[(scsc as isize + self.last_offset) as usize] == self.new[scsc]
                    {
                        old_score += 1;
                    }
                    scsc += 1;
                }

                if (self.len == old_score && self.len != 0)
                    || self.len > old_score + NON_MATCHING_BYTES_THRESHOLD
                {
                    break;
                }

                if ((self.scan as isize + self.last_offset) as usize) < self.old.len()
                    && self.old[(self.scan as isize + self.last_offset) as usize]
                        == self.new[self.scan]
                {
                    old_score -= 1;
                }

                self.scan += 1;
            }

            if self.len != old_score || self.scan == self.new.len() {
                // Extend the previous match forward while more than half the
                // bytes still agree.
                let mut s = 0;
                let mut s_f = 0;
                let mut len_forward: usize = 0;
                let mut i = 0;
                while self.last_scan + i < self.scan && self.last_pos + i < self.old.len() {
                    if self.old[self.last_pos + i] == self.new[self.last_scan + i] {
                        s += 1;
                    }
                    i += 1;
                    if s * 2 - i as isize > s_f * 2 - len_forward as isize {
                        s_f = s;
                        len_forward = i;
                    }
                }

                // And the new match backward, symmetrically.
                let mut len_back = 0;
                if self.scan < self.new.len() && !self.old.is_empty() {
                    let mut s = 0;
                    let mut s_b = 0;
                    let mut i = 0;
                    while self.scan >= self.last_scan + i && self.pos >= i {
                        if self.old[self.pos - i] == self.new[self.scan - i] {
                            s += 1;
                        }
                        if s * 2 - i as isize > s_b * 2 - len_back as isize {
                            s_b = s;
                            len_back = i;
                        }

                        i += 1;
                    }
                }

                // The extensions may overlap; split the overlap where the
                // combined agreement is best.
                if self.last_scan + len_forward > self.scan - len_back {
                    let overlap = (self.last_scan + len_forward) - (self.scan - len_back);
                    let mut s = 0;
                    let mut s_s = 0;
                    let mut lens = 0;
                    let mut i = 0;
                    while i < overlap {
                        if self.new[self.last_scan + len_forward - overlap + i]
                            == self.old[self.last_pos + len_forward - overlap + i]
                        {
                            s += 1;
                        }
                        if self.new[self.scan - len_back + i] == self.old[self.pos - len_back + i] {
                            s -= 1;
                        }
                        if s > s_s {
                            s_s = s;
                            lens = i + 1;
                        }

                        i += 1;
                    }

                    len_forward += lens;
                    len_forward -= overlap;
                    len_back -= lens;
                }

                let found = Match {
                    add_old_pos: self.last_pos,
                    add_new_pos: self.last_scan,
                    add_len: len_forward,
                    copy_end: self.scan - len_back,
                };

                self.last_scan = self.scan - len_back;
                self.last_pos = self.pos - len_back;
                self.last_offset = self.pos as isize - self.scan as isize;

                return Some(found);
            }
        }

        None
    }
}

fn truncated(_: crate::error::Error) -> BsdiffError {
    BsdiffError::FormatError("truncated patch")
}

/// Creates a patch that transforms `old` into `new`.
///
/// Works for all byte strings, including empty ones.
///
/// # Errors
///
/// Fails with [`BsdiffError::UnexpectedError`] only on inputs too large for
/// the control fields to represent.
pub fn create_binary_patch(old: &[u8], new: &[u8]) -> Result<Vec<u8>, BsdiffError> {
    let mut set = SinkStreamSet::with_streams(STREAM_COUNT);

    let matches: Vec<Match> = MatchMaker::new(old, new).collect();
    for (ix, m) in matches.iter().enumerate() {
        let add_len = u32::try_from(m.add_len)
            .map_err(|_| BsdiffError::UnexpectedError("add run too long"))?;
        let copy_len = u32::try_from(m.copy_end - m.copy_pos())
            .map_err(|_| BsdiffError::UnexpectedError("copy run too long"))?;
        let seek = matches.get(ix + 1).map_or(0, |next| {
            next.add_old_pos as i64 - (m.add_old_pos + m.add_len) as i64
        });

        let control = set.stream(STREAM_CONTROL);
        control.write_varint32(add_len);
        control.write_varint32(copy_len);
        control.write_varint64_signed(seek);

        let diff = set.stream(STREAM_DIFF);
        for i in 0..m.add_len {
            diff.write_u8(new[m.add_new_pos + i].wrapping_sub(old[m.add_old_pos + i]));
        }

        set.stream(STREAM_EXTRA).write(&new[m.copy_pos()..m.copy_end]);
    }

    let mut patch = SinkStream::new();
    patch.write_u32_le(PATCH_MAGIC);
    patch.write_u32_le(crc32fast::hash(old));
    set.copy_to(&mut patch)
        .map_err(|_| BsdiffError::UnexpectedError("stream too long"))?;

    debug!(
        "bsdiff: {} -> {} bytes, {} controls, {} byte patch",
        old.len(),
        new.len(),
        matches.len(),
        patch.len(),
    );

    Ok(patch.into_vec())
}

/// Applies a patch produced by [`create_binary_patch`] to `old`.
///
/// # Errors
///
/// Fails with [`BsdiffError::CrcError`] when `old` is not the input the patch
/// was generated from, [`BsdiffError::FormatError`] on a truncated or
/// malformed patch, and [`BsdiffError::UnexpectedError`] when a control triple
/// walks outside `old`. Never produces silently truncated output.
pub fn apply_binary_patch(old: &[u8], patch: &[u8]) -> Result<Vec<u8>, BsdiffError> {
    let mut header = SourceStream::new(patch);
    let magic = header.read_u32_le().map_err(truncated)?;
    if magic != PATCH_MAGIC {
        return Err(BsdiffError::FormatError("bad patch magic"));
    }
    let old_crc = header.read_u32_le().map_err(truncated)?;
    if old_crc != crc32fast::hash(old) {
        return Err(BsdiffError::CrcError);
    }

    let body = header.read_rest();
    let mut set = SourceStreamSet::parse(body).map_err(truncated)?;
    if set.stream_count() != STREAM_COUNT {
        return Err(BsdiffError::FormatError("wrong stream count"));
    }

    let mut control = *set.stream(STREAM_CONTROL).map_err(truncated)?;
    let mut diff = *set.stream(STREAM_DIFF).map_err(truncated)?;
    let mut extra = *set.stream(STREAM_EXTRA).map_err(truncated)?;

    let mut new = Vec::new();
    let mut old_pos = 0i64;
    while !control.is_empty() {
        let add_len = control.read_varint32().map_err(truncated)? as usize;
        let copy_len = control.read_varint32().map_err(truncated)? as usize;
        let seek = control.read_varint64_signed().map_err(truncated)?;

        let add_start = usize::try_from(old_pos)
            .map_err(|_| BsdiffError::UnexpectedError("seek before start of old"))?;
        let add_old = old
            .get(add_start..add_start + add_len)
            .ok_or(BsdiffError::UnexpectedError("add run outside old"))?;
        let add_diff = diff.read(add_len).map_err(truncated)?;
        new.extend(
            add_old
                .iter()
                .zip(add_diff)
                .map(|(&o, &d)| o.wrapping_add(d)),
        );

        new.extend_from_slice(extra.read(copy_len).map_err(truncated)?);

        old_pos = old_pos
            .checked_add(add_len as i64)
            .and_then(|p| p.checked_add(seek))
            .ok_or(BsdiffError::FormatError("seek out of range"))?;
    }
    if !diff.is_empty() || !extra.is_empty() {
        return Err(BsdiffError::FormatError("trailing patch data"));
    }

    Ok(new)
}
