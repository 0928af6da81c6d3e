//! Decoder for the CPython 3.11 `co_exceptiontable` format.
//!
//! Entries are sequences of 6-bit varints. The first byte of an entry has
//! bit 7 set; bit 6 of any byte marks a continuation. Offsets and lengths
//! are in instruction words.

/// One decoded handler range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    /// First instruction covered, inclusive.
    pub start: u32,
    /// One past the last instruction covered.
    pub end: u32,
    /// Handler address, in instruction words.
    pub target: u32,
    /// Value-stack depth to restore before entering the handler.
    pub depth: u32,
    /// Whether the offset of the raising instruction is pushed below the
    /// exception.
    pub push_lasti: bool,
}

impl ExceptionTableEntry {
    #[inline]
    pub const fn covers(&self, instruction: u32) -> bool {
        self.start <= instruction && instruction < self.end
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExceptionTableError {
    #[error("exception table entry does not begin with a start marker")]
    MissingStartMarker,
    #[error("truncated exception table varint")]
    Truncated,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn next_byte(&mut self) -> Result<u8, ExceptionTableError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(ExceptionTableError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_varint(&mut self, first: u8) -> Result<u32, ExceptionTableError> {
        let mut value = u32::from(first & 0x3f);
        let mut byte = first;
        while byte & 0x40 != 0 {
            byte = self.next_byte()?;
            value = (value << 6) | u32::from(byte & 0x3f);
        }
        Ok(value)
    }
}

/// Decode a full exception table. An empty byte string yields no entries.
pub fn parse_exception_table(
    bytes: &[u8],
) -> Result<Vec<ExceptionTableEntry>, ExceptionTableError> {
    let mut reader = Reader { bytes, pos: 0 };
    let mut entries = Vec::new();
    while reader.pos < bytes.len() {
        let first = reader.next_byte()?;
        if first & 0x80 == 0 {
            return Err(ExceptionTableError::MissingStartMarker);
        }
        let start = reader.read_varint(first & 0x7f)?;
        let size = {
            let b = reader.next_byte()?;
            reader.read_varint(b)?
        };
        let target = {
            let b = reader.next_byte()?;
            reader.read_varint(b)?
        };
        let dl = {
            let b = reader.next_byte()?;
            reader.read_varint(b)?
        };
        entries.push(ExceptionTableEntry {
            start,
            end: start + size,
            target,
            depth: dl >> 1,
            push_lasti: dl & 1 != 0,
        });
    }
    Ok(entries)
}

/// Find the innermost handler covering `instruction`. Later entries are
/// nested inside earlier ones, so the last covering entry wins.
pub fn find_handler(
    entries: &[ExceptionTableEntry],
    instruction: u32,
) -> Option<&ExceptionTableEntry> {
    entries.iter().rev().find(|e| e.covers(instruction))
}

#[cfg(test)]
mod tests {
    use super::*;

    // encode one varint with the given top-bit flag on its first byte
    fn encode(value: u32, start_marker: bool) -> Vec<u8> {
        let mut chunks = Vec::new();
        let mut v = value;
        loop {
            chunks.push((v & 0x3f) as u8);
            v >>= 6;
            if v == 0 {
                break;
            }
        }
        chunks.reverse();
        let n = chunks.len();
        let mut out = Vec::with_capacity(n);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut byte = chunk;
            if i == 0 && start_marker {
                byte |= 0x80;
            }
            if i + 1 < n {
                byte |= 0x40;
            }
            out.push(byte);
        }
        out
    }

    fn encode_entry(start: u32, size: u32, target: u32, depth: u32, lasti: bool) -> Vec<u8> {
        let mut out = encode(start, true);
        out.extend(encode(size, false));
        out.extend(encode(target, false));
        out.extend(encode((depth << 1) | lasti as u32, false));
        out
    }

    #[test]
    fn roundtrip_single_entry() {
        let bytes = encode_entry(2, 5, 100, 3, true);
        let entries = parse_exception_table(&bytes).unwrap();
        assert_eq!(
            entries,
            vec![ExceptionTableEntry {
                start: 2,
                end: 7,
                target: 100,
                depth: 3,
                push_lasti: true,
            }]
        );
    }

    #[test]
    fn innermost_entry_wins() {
        let mut bytes = encode_entry(0, 10, 50, 0, false);
        bytes.extend(encode_entry(2, 3, 60, 1, false));
        let entries = parse_exception_table(&bytes).unwrap();
        assert_eq!(find_handler(&entries, 3).unwrap().target, 60);
        assert_eq!(find_handler(&entries, 8).unwrap().target, 50);
        assert!(find_handler(&entries, 12).is_none());
    }

    #[test]
    fn empty_table_is_empty() {
        assert_eq!(parse_exception_table(&[]).unwrap(), vec![]);
    }

    #[test]
    fn missing_marker_is_an_error() {
        assert_eq!(
            parse_exception_table(&[0x01]).unwrap_err(),
            ExceptionTableError::MissingStartMarker
        );
    }
}
