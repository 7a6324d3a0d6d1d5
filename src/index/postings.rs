//! Posting block codec. One block holds one track's anchor times for one
//! key, delta-encoded and serialized as unsigned LEB128 varints:
//!
//! ```text
//! track_id : varint
//! n        : varint (> 0)
//! t0       : varint
//! dt_i     : varint, i in [1, n), each = t_i - t_{i-1} (> 0)
//! ```
//!
//! A key's stored value is the concatenation of one or more blocks; the
//! parser is a streaming iterator tolerant of concatenation.

use crate::error::{LandmarkError, Result};

/// Append an unsigned LEB128 varint (7-bit groups, MSB continuation).
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Decode an unsigned LEB128 varint at `*pos`, advancing it.
pub fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = *buf.get(*pos).ok_or_else(|| {
            LandmarkError::Integrity(format!("truncated varint at offset {}", pos))
        })?;
        *pos += 1;
        if shift >= 64 || (shift == 63 && byte & 0x7E != 0) {
            return Err(LandmarkError::Integrity(
                "varint exceeds 64 bits".to_string(),
            ));
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Encode one `(track, sorted-unique times)` posting block.
pub fn encode_posting_block(track_id: u32, times_sorted: &[u32]) -> Result<Vec<u8>> {
    if times_sorted.is_empty() {
        return Err(LandmarkError::InvalidArgument(
            "posting block needs at least one anchor".into(),
        ));
    }
    for w in times_sorted.windows(2) {
        if w[1] <= w[0] {
            return Err(LandmarkError::InvalidArgument(format!(
                "anchor times must strictly increase ({} then {})",
                w[0], w[1]
            )));
        }
    }

    let mut buf = Vec::with_capacity(2 + times_sorted.len() * 2);
    write_varint(&mut buf, track_id as u64);
    write_varint(&mut buf, times_sorted.len() as u64);
    write_varint(&mut buf, times_sorted[0] as u64);
    for w in times_sorted.windows(2) {
        write_varint(&mut buf, (w[1] - w[0]) as u64);
    }
    Ok(buf)
}

/// One anchor yielded by the postings parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingAnchor {
    pub track_id: u32,
    pub t_anchor: u32,
}

/// Streaming parser over concatenated posting blocks. Yields anchors in
/// stored order; a malformed or truncated block surfaces as an
/// `IntegrityError` item, after which iteration ends.
pub struct PostingIter<'a> {
    buf: &'a [u8],
    pos: usize,
    /// (track_id, remaining anchors, last absolute time)
    block: Option<(u32, u64, u32)>,
    failed: bool,
}

impl<'a> PostingIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            block: None,
            failed: false,
        }
    }

    fn fits_u32(value: u64, what: &str) -> Result<u32> {
        u32::try_from(value)
            .map_err(|_| LandmarkError::Integrity(format!("{} {} exceeds u32", what, value)))
    }

    fn next_inner(&mut self) -> Result<Option<PostingAnchor>> {
        if let Some((track_id, remaining, last_t)) = self.block.take() {
            let delta = read_varint(self.buf, &mut self.pos)?;
            if delta == 0 {
                return Err(LandmarkError::Integrity(
                    "non-positive anchor delta".to_string(),
                ));
            }
            let t = last_t
                .checked_add(Self::fits_u32(delta, "anchor delta")?)
                .ok_or_else(|| {
                    LandmarkError::Integrity("anchor time overflows u32".to_string())
                })?;
            if remaining > 1 {
                self.block = Some((track_id, remaining - 1, t));
            }
            return Ok(Some(PostingAnchor {
                track_id,
                t_anchor: t,
            }));
        }

        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let track_id = Self::fits_u32(read_varint(self.buf, &mut self.pos)?, "track")?;
        let n = read_varint(self.buf, &mut self.pos)?;
        if n == 0 {
            return Err(LandmarkError::Integrity(
                "posting block with zero anchors".to_string(),
            ));
        }
        let t0 = Self::fits_u32(read_varint(self.buf, &mut self.pos)?, "t0")?;
        if n > 1 {
            self.block = Some((track_id, n - 1, t0));
        }
        Ok(Some(PostingAnchor {
            track_id,
            t_anchor: t0,
        }))
    }
}

impl<'a> Iterator for PostingIter<'a> {
    type Item = Result<PostingAnchor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_inner() {
            Ok(Some(anchor)) => Some(Ok(anchor)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Collect all anchors from concatenated blocks, failing on the first
/// integrity violation.
pub fn parse_posting_blocks(buf: &[u8]) -> Result<Vec<PostingAnchor>> {
    PostingIter::new(buf).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trip() {
        let mut buf = Vec::new();
        let values = [0u64, 1, 127, 128, 300, 16_383, 16_384, u32::MAX as u64, u64::MAX];
        for &v in &values {
            write_varint(&mut buf, v);
        }
        let mut pos = 0;
        for &v in &values {
            assert_eq!(read_varint(&buf, &mut pos).unwrap(), v);
        }
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn varint_single_byte_boundary() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 127);
        assert_eq!(buf, [0x7F]);
        buf.clear();
        write_varint(&mut buf, 128);
        assert_eq!(buf, [0x80, 0x01]);
    }

    #[test]
    fn truncated_varint_is_integrity_error() {
        let buf = [0x80u8, 0x80];
        let mut pos = 0;
        assert!(matches!(
            read_varint(&buf, &mut pos),
            Err(LandmarkError::Integrity(_))
        ));
    }

    #[test]
    fn block_round_trip() {
        let times = vec![3, 9, 10, 500, 501];
        let block = encode_posting_block(42, &times).unwrap();
        let anchors = parse_posting_blocks(&block).unwrap();
        assert_eq!(anchors.len(), times.len());
        for (anchor, &t) in anchors.iter().zip(times.iter()) {
            assert_eq!(anchor.track_id, 42);
            assert_eq!(anchor.t_anchor, t);
        }
    }

    #[test]
    fn encode_rejects_unsorted_and_empty() {
        assert!(matches!(
            encode_posting_block(1, &[]),
            Err(LandmarkError::InvalidArgument(_))
        ));
        assert!(matches!(
            encode_posting_block(1, &[5, 5]),
            Err(LandmarkError::InvalidArgument(_))
        ));
        assert!(matches!(
            encode_posting_block(1, &[9, 3]),
            Err(LandmarkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn concatenated_blocks_parse_in_order() {
        let mut buf = encode_posting_block(1, &[10, 20]).unwrap();
        buf.extend(encode_posting_block(7, &[5]).unwrap());
        let anchors = parse_posting_blocks(&buf).unwrap();
        assert_eq!(
            anchors,
            vec![
                PostingAnchor { track_id: 1, t_anchor: 10 },
                PostingAnchor { track_id: 1, t_anchor: 20 },
                PostingAnchor { track_id: 7, t_anchor: 5 },
            ]
        );
    }

    #[test]
    fn zero_delta_is_rejected() {
        // track 1, n=2, t0=10, delta=0
        let mut buf = Vec::new();
        for v in [1u64, 2, 10, 0] {
            write_varint(&mut buf, v);
        }
        assert!(matches!(
            parse_posting_blocks(&buf),
            Err(LandmarkError::Integrity(_))
        ));
    }

    #[test]
    fn zero_count_is_rejected() {
        let mut buf = Vec::new();
        for v in [1u64, 0] {
            write_varint(&mut buf, v);
        }
        assert!(matches!(
            parse_posting_blocks(&buf),
            Err(LandmarkError::Integrity(_))
        ));
    }

    #[test]
    fn truncated_block_yields_prefix_then_error() {
        let mut buf = encode_posting_block(1, &[10, 20]).unwrap();
        buf.extend(encode_posting_block(7, &[5, 6, 7]).unwrap());
        buf.truncate(buf.len() - 1);

        let mut iter = PostingIter::new(&buf);
        let mut good = Vec::new();
        let mut saw_error = false;
        for item in &mut iter {
            match item {
                Ok(a) => good.push(a),
                Err(e) => {
                    assert!(matches!(e, LandmarkError::Integrity(_)));
                    saw_error = true;
                }
            }
        }
        assert!(saw_error);
        // The first block survives intact.
        assert!(good.len() >= 2);
        assert_eq!(good[0].t_anchor, 10);
        assert_eq!(good[1].t_anchor, 20);
    }
}
