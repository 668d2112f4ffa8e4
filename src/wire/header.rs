//! Resumable decoder for the one-time header envelope.
//!
//! Wire layout: `varint32 format_version`, `varint32 header_length`,
//! `header_length` bytes of serialized [`RecordingHeader`], `varint32
//! adler32` computed over the raw bytes of the three preceding fields in
//! order. Fields fill in order across calls; the running checksum only ever
//! absorbs bytes that were fully consumed, so an `Incomplete` sub-step can
//! rewind and re-offer the same bytes without double-counting.

use adler32::RollingAdler32;
use prost::Message;

use super::cursor::ChunkCursor;
use super::framed::{read_framed, read_varint32, FrameError, Step};
use super::proto::RecordingHeader;

/// Incremental decoder for the header envelope.
pub struct HeaderDecoder {
    max_frame_bytes: usize,
    format_version: Option<u32>,
    header: Option<RecordingHeader>,
    parsed: bool,
    checksum: RollingAdler32,
}

impl HeaderDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            format_version: None,
            header: None,
            parsed: false,
            checksum: RollingAdler32::new(),
        }
    }

    /// True once every field has been read and the checksum validated.
    pub fn is_parsed(&self) -> bool {
        self.parsed
    }

    /// The protocol format version, once read.
    pub fn format_version(&self) -> Option<u32> {
        self.format_version
    }

    /// The decoded header, once [`is_parsed`](Self::is_parsed) is true.
    pub fn header(&self) -> Option<&RecordingHeader> {
        if self.parsed {
            self.header.as_ref()
        } else {
            None
        }
    }

    /// Advances the decoder with whatever bytes the cursor holds.
    ///
    /// Returns `Ready(())` once the full envelope has been validated,
    /// `Incomplete` when more chunks are needed, and an error on corruption.
    pub fn decode(&mut self, cursor: &mut ChunkCursor) -> Result<Step<()>, FrameError> {
        if self.parsed {
            return Ok(Step::Ready(()));
        }

        if self.format_version.is_none() {
            cursor.mark();
            match read_varint32(cursor)? {
                Step::Incomplete => {
                    cursor.rewind();
                    return Ok(Step::Incomplete);
                }
                Step::Ready(version) => {
                    self.checksum.update_buffer(cursor.bytes_since_mark());
                    self.format_version = Some(version);
                }
            }
        }

        if self.header.is_none() {
            cursor.mark();
            match read_framed(cursor, self.max_frame_bytes, true)? {
                Step::Incomplete => {
                    cursor.rewind();
                    return Ok(Step::Incomplete);
                }
                Step::Ready(body) => {
                    let header = RecordingHeader::decode(body.as_slice())?;
                    // Length prefix and body checksummed together, in order.
                    self.checksum.update_buffer(cursor.bytes_since_mark());
                    self.header = Some(header);
                }
            }
        }

        cursor.mark();
        match read_varint32(cursor)? {
            Step::Incomplete => {
                cursor.rewind();
                Ok(Step::Incomplete)
            }
            Step::Ready(declared) => {
                let computed = self.checksum.hash();
                if declared != computed {
                    return Err(FrameError::ChecksumMismatch { declared, computed });
                }
                self.parsed = true;
                Ok(Step::Ready(()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::proto::WorkAssignment;
    use super::*;

    fn encode_varint32(value: u32) -> Vec<u8> {
        let mut out = Vec::new();
        let mut v = value;
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                return out;
            }
            out.push(byte | 0x80);
        }
    }

    fn sample_header() -> RecordingHeader {
        RecordingHeader {
            recorder_version: 1,
            controller_version: 2,
            controller_id: 3,
            work_assignment: Some(WorkAssignment {
                work_id: 42,
                issue_time: "2020-01-01T00:00:00Z".to_string(),
                delay_secs: 0,
                duration_secs: 60,
            }),
            work_description: "test".to_string(),
        }
    }

    fn header_envelope(header: &RecordingHeader, format_version: u32) -> Vec<u8> {
        let body = header.encode_to_vec();
        let mut out = encode_varint32(format_version);
        out.extend_from_slice(&encode_varint32(body.len() as u32));
        out.extend_from_slice(&body);

        let mut checksum = RollingAdler32::new();
        checksum.update_buffer(&out);
        out.extend_from_slice(&encode_varint32(checksum.hash()));
        out
    }

    #[test]
    fn test_decode_one_shot() {
        let envelope = header_envelope(&sample_header(), 1);
        let mut cur = ChunkCursor::new();
        cur.push_chunk(&envelope);

        let mut dec = HeaderDecoder::new(1024);
        assert_eq!(dec.decode(&mut cur).unwrap(), Step::Ready(()));
        assert!(dec.is_parsed());
        assert_eq!(dec.format_version(), Some(1));
        let header = dec.header().expect("header parsed");
        assert_eq!(
            header.work_assignment.as_ref().map(|w| w.work_id),
            Some(42)
        );
        assert_eq!(cur.available(), 0);
    }

    #[test]
    fn test_decode_byte_by_byte() {
        let envelope = header_envelope(&sample_header(), 1);
        let mut cur = ChunkCursor::new();
        let mut dec = HeaderDecoder::new(1024);

        for (i, byte) in envelope.iter().enumerate() {
            cur.push_chunk(&[*byte]);
            let step = dec.decode(&mut cur).unwrap();
            if i < envelope.len() - 1 {
                assert!(step.is_incomplete(), "byte {} should not complete", i);
            } else {
                assert_eq!(step, Step::Ready(()));
            }
        }
        assert!(dec.is_parsed());
    }

    #[test]
    fn test_header_not_exposed_before_parse() {
        let envelope = header_envelope(&sample_header(), 1);
        let mut cur = ChunkCursor::new();
        // Everything except the trailing checksum varint.
        cur.push_chunk(&envelope[..envelope.len() - 4]);

        let mut dec = HeaderDecoder::new(1024);
        assert!(dec.decode(&mut cur).unwrap().is_incomplete());
        assert!(!dec.is_parsed());
        assert!(dec.header().is_none());
    }

    #[test]
    fn test_checksum_mismatch_is_corrupt() {
        let mut envelope = header_envelope(&sample_header(), 1);
        // Flip a bit in the header body.
        let mid = envelope.len() / 2;
        envelope[mid] ^= 0x01;

        let mut cur = ChunkCursor::new();
        cur.push_chunk(&envelope);
        let mut dec = HeaderDecoder::new(1024);

        let err = loop {
            match dec.decode(&mut cur) {
                Err(err) => break err,
                Ok(Step::Ready(())) => panic!("corrupt header should not parse"),
                Ok(Step::Incomplete) => panic!("all bytes were provided"),
            }
        };
        assert!(matches!(
            err,
            FrameError::ChecksumMismatch { .. } | FrameError::Malformed(_)
        ));
    }

    #[test]
    fn test_oversized_header_is_corrupt() {
        let envelope = header_envelope(&sample_header(), 1);
        let mut cur = ChunkCursor::new();
        cur.push_chunk(&envelope);

        let mut dec = HeaderDecoder::new(4);
        assert!(matches!(
            dec.decode(&mut cur),
            Err(FrameError::Oversized { .. })
        ));
    }

    #[test]
    fn test_checksum_not_double_counted_across_retries() {
        let envelope = header_envelope(&sample_header(), 1);
        let mut cur = ChunkCursor::new();
        let mut dec = HeaderDecoder::new(1024);

        // Offer the first half repeatedly before delivering the rest; the
        // rewound bytes must not be folded into the checksum twice.
        cur.push_chunk(&envelope[..envelope.len() / 2]);
        for _ in 0..3 {
            assert!(dec.decode(&mut cur).unwrap().is_incomplete());
        }
        cur.push_chunk(&envelope[envelope.len() / 2..]);
        assert_eq!(dec.decode(&mut cur).unwrap(), Step::Ready(()));
    }
}
