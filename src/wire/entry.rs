//! Resumable decoder for work-status-entry envelopes.
//!
//! Wire layout per envelope: `varint32 payload_length`, `payload_length`
//! bytes of serialized [`WorkStatusEntry`], `varint32 adler32` computed over
//! exactly the payload bytes. The stream carries no explicit terminator:
//! clean end-of-input where a payload-length varint would begin is the
//! logical "no more entries" marker, which the session detects at close time
//! via [`EntryDecoder::at_envelope_boundary`].

use adler32::RollingAdler32;
use prost::Message;

use super::cursor::ChunkCursor;
use super::framed::{read_framed, read_varint32, FrameError, Step};
use super::proto::WorkStatusEntry;

/// Incremental decoder for one entry envelope at a time.
pub struct EntryDecoder {
    max_frame_bytes: usize,
    entry: Option<WorkStatusEntry>,
    parsed: bool,
    checksum: RollingAdler32,
}

impl EntryDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            entry: None,
            parsed: false,
            checksum: RollingAdler32::new(),
        }
    }

    /// True once the current envelope has been read and checksum-validated.
    pub fn is_parsed(&self) -> bool {
        self.parsed
    }

    /// True when the decoder sits between envelopes: nothing of a payload or
    /// trailing checksum has been consumed. Combined with an exhausted
    /// cursor, this is the clean end-of-stream position.
    pub fn at_envelope_boundary(&self) -> bool {
        self.entry.is_none() && !self.parsed
    }

    /// Moves the decoded entry out, leaving the decoder awaiting
    /// [`reset`](Self::reset).
    pub fn take(&mut self) -> Option<WorkStatusEntry> {
        if self.parsed {
            self.entry.take()
        } else {
            None
        }
    }

    /// Clears all decoded state so the next envelope can be read.
    pub fn reset(&mut self) {
        self.entry = None;
        self.parsed = false;
        self.checksum = RollingAdler32::new();
    }

    /// Advances the decoder with whatever bytes the cursor holds.
    pub fn decode(&mut self, cursor: &mut ChunkCursor) -> Result<Step<()>, FrameError> {
        if self.parsed {
            return Ok(Step::Ready(()));
        }

        if self.entry.is_none() {
            cursor.mark();
            match read_framed(cursor, self.max_frame_bytes, false)? {
                Step::Incomplete => {
                    cursor.rewind();
                    return Ok(Step::Incomplete);
                }
                Step::Ready(payload) => {
                    let entry = WorkStatusEntry::decode(payload.as_slice())?;
                    // Checksum covers exactly the payload bytes, not the
                    // length prefix.
                    self.checksum.update_buffer(&payload);
                    self.entry = Some(entry);
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
    use super::super::proto::{IndexedData, MethodRecord, WorkKind};
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

    fn sample_entry() -> WorkStatusEntry {
        WorkStatusEntry {
            work_kind: WorkKind::CpuSample as i32,
            indexed_data: Some(IndexedData {
                method_records: vec![MethodRecord {
                    method_id: 1,
                    class_fqdn: "com.example.Main".to_string(),
                    method_name: "run".to_string(),
                    signature: "()V".to_string(),
                }],
                trace_records: Vec::new(),
            }),
            cpu_sample_entry: None,
        }
    }

    fn entry_envelope(entry: &WorkStatusEntry) -> Vec<u8> {
        let payload = entry.encode_to_vec();
        let mut out = encode_varint32(payload.len() as u32);
        out.extend_from_slice(&payload);

        let mut checksum = RollingAdler32::new();
        checksum.update_buffer(&payload);
        out.extend_from_slice(&encode_varint32(checksum.hash()));
        out
    }

    #[test]
    fn test_decode_one_shot() {
        let envelope = entry_envelope(&sample_entry());
        let mut cur = ChunkCursor::new();
        cur.push_chunk(&envelope);

        let mut dec = EntryDecoder::new(4096);
        assert_eq!(dec.decode(&mut cur).unwrap(), Step::Ready(()));
        assert!(dec.is_parsed());
        assert_eq!(dec.take(), Some(sample_entry()));
    }

    #[test]
    fn test_decode_byte_by_byte() {
        let envelope = entry_envelope(&sample_entry());
        let mut cur = ChunkCursor::new();
        let mut dec = EntryDecoder::new(4096);

        for (i, byte) in envelope.iter().enumerate() {
            cur.push_chunk(&[*byte]);
            let step = dec.decode(&mut cur).unwrap();
            if i < envelope.len() - 1 {
                assert!(step.is_incomplete(), "byte {} should not complete", i);
            } else {
                assert_eq!(step, Step::Ready(()));
            }
        }
        assert_eq!(dec.take(), Some(sample_entry()));
    }

    #[test]
    fn test_reset_allows_next_envelope() {
        let first = sample_entry();
        let mut second = sample_entry();
        second.work_kind = WorkKind::ThreadSample as i32;

        let mut stream = entry_envelope(&first);
        stream.extend_from_slice(&entry_envelope(&second));

        let mut cur = ChunkCursor::new();
        cur.push_chunk(&stream);
        let mut dec = EntryDecoder::new(4096);

        assert_eq!(dec.decode(&mut cur).unwrap(), Step::Ready(()));
        assert_eq!(dec.take(), Some(first));
        dec.reset();

        assert_eq!(dec.decode(&mut cur).unwrap(), Step::Ready(()));
        assert_eq!(dec.take(), Some(second));
        assert_eq!(cur.available(), 0);
    }

    #[test]
    fn test_checksum_mismatch_is_corrupt() {
        let entry = sample_entry();
        let payload = entry.encode_to_vec();
        let mut envelope = encode_varint32(payload.len() as u32);
        envelope.extend_from_slice(&payload);

        let mut checksum = RollingAdler32::new();
        checksum.update_buffer(&payload);
        // Off-by-one declared checksum.
        envelope.extend_from_slice(&encode_varint32(checksum.hash() ^ 1));

        let mut cur = ChunkCursor::new();
        cur.push_chunk(&envelope);
        let mut dec = EntryDecoder::new(4096);

        assert!(matches!(
            dec.decode(&mut cur),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_zero_length_envelope_is_corrupt() {
        let mut cur = ChunkCursor::new();
        cur.push_chunk(&encode_varint32(0));

        let mut dec = EntryDecoder::new(4096);
        assert!(matches!(dec.decode(&mut cur), Err(FrameError::EmptyFrame)));
    }

    #[test]
    fn test_oversized_envelope_is_corrupt() {
        let envelope = entry_envelope(&sample_entry());
        let mut cur = ChunkCursor::new();
        cur.push_chunk(&envelope);

        let mut dec = EntryDecoder::new(2);
        assert!(matches!(
            dec.decode(&mut cur),
            Err(FrameError::Oversized { .. })
        ));
    }

    #[test]
    fn test_boundary_tracking() {
        let envelope = entry_envelope(&sample_entry());
        let mut cur = ChunkCursor::new();
        let mut dec = EntryDecoder::new(4096);

        // Fresh decoder sits at a boundary.
        assert!(dec.at_envelope_boundary());

        // A partially delivered payload is not a boundary.
        cur.push_chunk(&envelope[..envelope.len() - 1]);
        assert!(dec.decode(&mut cur).unwrap().is_incomplete());
        assert!(!dec.at_envelope_boundary());

        // After the full envelope and a reset, the boundary returns.
        cur.push_chunk(&envelope[envelope.len() - 1..]);
        assert_eq!(dec.decode(&mut cur).unwrap(), Step::Ready(()));
        dec.take();
        dec.reset();
        assert!(dec.at_envelope_boundary());
    }

    #[test]
    fn test_take_before_parse_is_none() {
        let mut dec = EntryDecoder::new(4096);
        assert_eq!(dec.take(), None);
    }
}
