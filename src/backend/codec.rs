//! Order-preserving key encoding
//!
//! Strings are written with `0x00` escaped as `0x00 0xFF` and terminated by
//! `0x00 0x01`, integers big-endian. Byte-wise comparison of encoded keys
//! then matches comparison of the decoded tuples, which is what lets the
//! sorted backends answer floor/ceiling lookups with a single range scan.

use super::errors::{StorageError, StorageResult};

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

/// Appends the encoding of `value`
pub fn encode_str(buf: &mut Vec<u8>, value: &str) {
    for &b in value.as_bytes() {
        if b == ESCAPE {
            buf.push(ESCAPE);
            buf.push(ESCAPED_ZERO);
        } else {
            buf.push(b);
        }
    }
    buf.push(ESCAPE);
    buf.push(TERMINATOR);
}

/// Appends a single tag byte
pub fn encode_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

/// Appends `value` big-endian
pub fn encode_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Returns the smallest byte string greater than every string starting with
/// `prefix`, or `None` if no such bound exists (prefix is all `0xFF`).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Sequential decoder for encoded keys
pub struct KeyReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> KeyReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn read_str(&mut self) -> StorageResult<String> {
        let mut out = Vec::new();
        loop {
            let b = self.next_byte()?;
            if b != ESCAPE {
                out.push(b);
                continue;
            }
            match self.next_byte()? {
                ESCAPED_ZERO => out.push(0x00),
                TERMINATOR => break,
                other => {
                    return Err(StorageError::data_corruption(format!(
                        "invalid escape byte 0x{:02x} in encoded key",
                        other
                    )))
                }
            }
        }
        String::from_utf8(out)
            .map_err(|e| StorageError::data_corruption(format!("invalid UTF-8 in key: {}", e)))
    }

    pub fn read_u64(&mut self) -> StorageResult<u64> {
        let end = self.position + 8;
        if end > self.data.len() {
            return Err(StorageError::data_corruption("encoded key truncated"));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[self.position..end]);
        self.position = end;
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn read_u8(&mut self) -> StorageResult<u8> {
        self.next_byte()
    }

    /// Remaining undecoded bytes
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.data.len()
    }

    fn next_byte(&mut self) -> StorageResult<u8> {
        let b = *self
            .data
            .get(self.position)
            .ok_or_else(|| StorageError::data_corruption("encoded key truncated"))?;
        self.position += 1;
        Ok(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(parts: &[&str], ts: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        for p in parts {
            encode_str(&mut buf, p);
        }
        encode_u64(&mut buf, ts);
        buf
    }

    #[test]
    fn test_order_matches_tuple_order() {
        let cases = vec![
            enc(&["a"], 5),
            enc(&["a"], 6),
            enc(&["a\0"], 0),
            enc(&["ab"], 0),
            enc(&["b"], 0),
        ];
        for pair in cases.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_decode_with_embedded_zero() {
        let buf = enc(&["x\0y", "key"], 42);
        let mut reader = KeyReader::new(&buf);
        assert_eq!(reader.read_str().unwrap(), "x\0y");
        assert_eq!(reader.read_str().unwrap(), "key");
        assert_eq!(reader.read_u64().unwrap(), 42);
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_truncated_key_is_corruption() {
        let buf = enc(&["abc"], 1);
        let mut reader = KeyReader::new(&buf[..buf.len() - 3]);
        reader.read_str().unwrap();
        assert!(reader.read_u64().is_err());
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(&[1, 2]), Some(vec![1, 3]));
        assert_eq!(prefix_successor(&[1, 0xFF]), Some(vec![2]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
    }
}
