/// Incremental lossy UTF-8 decoder for a byte stream read in arbitrary chunks.
///
/// Invalid sequences become U+FFFD. A multi-byte sequence cut off at the end of a
/// chunk is held back until the next chunk completes it, so the concatenated output
/// equals `String::from_utf8_lossy` over the whole stream.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    /// Decode as much of `pending + chunk` as is unambiguous.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    // valid_up_to() guarantees this slice is valid UTF-8
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_in_chunks(bytes: &[u8], size: usize) -> String {
        let mut decoder = Utf8StreamDecoder::default();
        let mut out = String::new();
        for chunk in bytes.chunks(size) {
            out.push_str(&decoder.push(chunk));
        }
        out.push_str(&decoder.finish());
        out
    }

    #[test]
    fn split_multibyte_sequence_is_reassembled() {
        let text = "tick €100 — ✓ done\n";
        for size in 1..=5 {
            assert_eq!(decode_in_chunks(text.as_bytes(), size), text);
        }
    }

    #[test]
    fn invalid_bytes_match_lossy_decoding() {
        let bytes = b"ok \xff\xfe mid \xe2\x82 tail \xf0\x9f\x98";
        let expected = String::from_utf8_lossy(bytes).into_owned();
        for size in 1..=bytes.len() {
            assert_eq!(decode_in_chunks(bytes, size), expected, "chunk size {size}");
        }
    }

    #[test]
    fn pending_bytes_are_held_until_complete() {
        let mut decoder = Utf8StreamDecoder::default();
        assert_eq!(decoder.push(&[0xe2, 0x82]), "");
        assert_eq!(decoder.push(&[0xac, b'!']), "€!");
        assert_eq!(decoder.finish(), "");
    }
}
