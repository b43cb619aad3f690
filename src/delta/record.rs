//! Delta-log record encoding: a fixed header followed by a type-specific
//! payload, written once and never mutated in place.

use crate::core::error::{Error, LayoutError, Result};
use crate::ids::{Ino, Timestamp};

/// Size of the fixed record header.
pub const HEADER_SIZE: usize = 24;

/// Record type tag, stored as the first byte of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Overwrite (or extend) a byte range of an existing file.
    Write = 0,
    /// Create a new regular file.
    Create = 1,
    /// Remove a directory entry (and, if this was its last reference, the
    /// inode it names).
    Delete = 2,
    /// Change a file's size.
    Truncate = 3,
    /// Create a new directory.
    Mkdir = 4,
    /// Move/rename a directory entry, optionally across directories.
    Rename = 5,
    /// Change owner/mode/size metadata without touching file content.
    SetAttr = 6,
}

impl RecordType {
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::Write,
            1 => Self::Create,
            2 => Self::Delete,
            3 => Self::Truncate,
            4 => Self::Mkdir,
            5 => Self::Rename,
            6 => Self::SetAttr,
            other => {
                return Err(Error::Layout(LayoutError::Corruption(format!(
                    "bad record type byte: {other}"
                ))))
            }
        })
    }
}

/// The fixed 24-byte header every record starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Record type tag.
    pub record_type: RecordType,
    /// Total size of this record (header + body), in bytes. A record whose
    /// stored `total_size` is 0 marks the unwritten tail of a branch's
    /// sub-range and ends a forward scan.
    pub total_size: u32,
    /// Primary inode this record concerns (the file being written/created/
    /// truncated/set-attred, or the inode being unlinked).
    pub ino: Ino,
    /// Nanosecond timestamp this record was appended.
    pub timestamp: Timestamp,
}

impl RecordHeader {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.record_type as u8;
        buf[4..8].copy_from_slice(&self.total_size.to_le_bytes());
        buf[8..16].copy_from_slice(&self.ino.to_le_bytes());
        buf[16..24].copy_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Layout(LayoutError::OutOfBounds {
                offset: 0,
                len: HEADER_SIZE as u64,
                region_size: bytes.len() as u64,
            }));
        }
        Ok(Self {
            record_type: RecordType::from_u8(bytes[0])?,
            total_size: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            ino: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            timestamp: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
        })
    }
}

/// Which fields a SETATTR record actually changes, as a bitmask over
/// `MODE`/`UID`/`GID`/`SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrMask(u32);

impl AttrMask {
    /// `mode` is valid.
    pub const MODE: AttrMask = AttrMask(0b0001);
    /// `uid` is valid.
    pub const UID: AttrMask = AttrMask(0b0010);
    /// `gid` is valid.
    pub const GID: AttrMask = AttrMask(0b0100);
    /// `size` is valid.
    pub const SIZE: AttrMask = AttrMask(0b1000);
    /// No fields valid.
    pub const NONE: AttrMask = AttrMask(0);

    /// Raw bits, for encoding.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Reconstruct from raw bits, ignoring any unknown bits set.
    pub fn from_bits_truncate(bits: u32) -> Self {
        AttrMask(bits & 0b1111)
    }

    /// True if every bit set in `other` is also set in `self`.
    pub fn contains(self, other: AttrMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Bitwise-or two masks together.
    pub fn union(self, other: AttrMask) -> Self {
        AttrMask(self.0 | other.0)
    }
}

impl std::ops::BitOr for AttrMask {
    type Output = AttrMask;
    fn bitor(self, rhs: AttrMask) -> AttrMask {
        self.union(rhs)
    }
}

/// Decoded record body, paired with a [`RecordHeader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    /// `WRITE`: overwrite `data.len()` bytes at `offset` of `header.ino`.
    Write { offset: u64, data: Vec<u8> },
    /// `CREATE`/`MKDIR`: add `name` under `parent_ino` naming `header.ino`.
    Create { parent_ino: Ino, mode: u32, name: String },
    /// `DELETE`: remove `name` from `parent_ino`; `header.ino` is the
    /// inode the entry named before removal.
    Delete { parent_ino: Ino, name: String },
    /// `TRUNCATE`: set `header.ino`'s size to `new_size`.
    Truncate { new_size: u64 },
    /// `RENAME`: move `header.ino` from `(old_parent, old_name)` to
    /// `(new_parent, new_name)`.
    Rename {
        old_parent: Ino,
        new_parent: Ino,
        old_name: String,
        new_name: String,
        no_replace: bool,
    },
    /// `SETATTR`: apply the fields named by `mask` to `header.ino`.
    SetAttr {
        mask: AttrMask,
        mode: u32,
        uid: u32,
        gid: u32,
        size: u64,
    },
}

/// A fully decoded record: header plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The fixed header.
    pub header: RecordHeader,
    /// The type-specific body.
    pub body: RecordBody,
}

fn put_name(buf: &mut Vec<u8>, name: &str) {
    buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
    buf.extend_from_slice(name.as_bytes());
}

fn get_name(bytes: &[u8], cursor: &mut usize) -> Result<String> {
    let len = read_u32(bytes, cursor)? as usize;
    let end = *cursor + len;
    let s = std::str::from_utf8(&bytes[*cursor..end])
        .map_err(|e| Error::Layout(LayoutError::Corruption(e.to_string())))?
        .to_string();
    *cursor = end;
    Ok(s)
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let v = u32::from_le_bytes(bytes[*cursor..*cursor + 4].try_into().unwrap());
    *cursor += 4;
    Ok(v)
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64> {
    let v = u64::from_le_bytes(bytes[*cursor..*cursor + 8].try_into().unwrap());
    *cursor += 8;
    Ok(v)
}

impl Record {
    /// Construct a new record, filling in the header's `total_size` once
    /// the body is encoded.
    pub fn new(record_type: RecordType, ino: Ino, timestamp: Timestamp, body: RecordBody) -> Self {
        Self {
            header: RecordHeader {
                record_type,
                total_size: 0,
                ino,
                timestamp,
            },
            body,
        }
    }

    /// Encode the full record (header + body), filling in `total_size`.
    pub fn encode(&self) -> Vec<u8> {
        let mut body_buf = Vec::new();
        match &self.body {
            RecordBody::Write { offset, data } => {
                body_buf.extend_from_slice(&offset.to_le_bytes());
                body_buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
                body_buf.extend_from_slice(data);
            }
            RecordBody::Create { parent_ino, mode, name } => {
                body_buf.extend_from_slice(&parent_ino.to_le_bytes());
                body_buf.extend_from_slice(&mode.to_le_bytes());
                put_name(&mut body_buf, name);
            }
            RecordBody::Delete { parent_ino, name } => {
                body_buf.extend_from_slice(&parent_ino.to_le_bytes());
                put_name(&mut body_buf, name);
            }
            RecordBody::Truncate { new_size } => {
                body_buf.extend_from_slice(&new_size.to_le_bytes());
            }
            RecordBody::Rename {
                old_parent,
                new_parent,
                old_name,
                new_name,
                no_replace,
            } => {
                body_buf.extend_from_slice(&old_parent.to_le_bytes());
                body_buf.extend_from_slice(&new_parent.to_le_bytes());
                body_buf.push(*no_replace as u8);
                body_buf.extend_from_slice(&[0u8; 3]);
                put_name(&mut body_buf, old_name);
                put_name(&mut body_buf, new_name);
            }
            RecordBody::SetAttr { mask, mode, uid, gid, size } => {
                body_buf.extend_from_slice(&mask.bits().to_le_bytes());
                body_buf.extend_from_slice(&mode.to_le_bytes());
                body_buf.extend_from_slice(&uid.to_le_bytes());
                body_buf.extend_from_slice(&gid.to_le_bytes());
                body_buf.extend_from_slice(&size.to_le_bytes());
            }
        }

        let total_size = (HEADER_SIZE + body_buf.len()) as u32;
        let header = RecordHeader { total_size, ..self.header };

        let mut out = Vec::with_capacity(total_size as usize);
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&body_buf);
        out
    }

    /// Decode a record starting at the front of `bytes`. Returns the
    /// record and its encoded length. Returns `Ok(None)` if the header's
    /// `total_size` is 0, meaning the scan has reached the unwritten tail.
    pub fn decode(bytes: &[u8]) -> Result<Option<(Record, usize)>> {
        if bytes.len() < HEADER_SIZE {
            return Ok(None);
        }
        let header = RecordHeader::decode(bytes)?;
        if header.total_size == 0 {
            return Ok(None);
        }
        let total_size = header.total_size as usize;
        if bytes.len() < total_size {
            return Err(Error::Layout(LayoutError::Corruption(
                "record truncated at end of sub-range".into(),
            )));
        }
        let body_bytes = &bytes[HEADER_SIZE..total_size];
        let mut cursor = 0usize;

        let body = match header.record_type {
            RecordType::Write => {
                let offset = read_u64(body_bytes, &mut cursor)?;
                let len = read_u32(body_bytes, &mut cursor)? as usize;
                let data = body_bytes[cursor..cursor + len].to_vec();
                RecordBody::Write { offset, data }
            }
            RecordType::Create | RecordType::Mkdir => {
                let parent_ino = read_u64(body_bytes, &mut cursor)?;
                let mode = read_u32(body_bytes, &mut cursor)?;
                let name = get_name(body_bytes, &mut cursor)?;
                RecordBody::Create { parent_ino, mode, name }
            }
            RecordType::Delete => {
                let parent_ino = read_u64(body_bytes, &mut cursor)?;
                let name = get_name(body_bytes, &mut cursor)?;
                RecordBody::Delete { parent_ino, name }
            }
            RecordType::Truncate => {
                let new_size = read_u64(body_bytes, &mut cursor)?;
                RecordBody::Truncate { new_size }
            }
            RecordType::Rename => {
                let old_parent = read_u64(body_bytes, &mut cursor)?;
                let new_parent = read_u64(body_bytes, &mut cursor)?;
                let no_replace = body_bytes[cursor] != 0;
                cursor += 4;
                let old_name = get_name(body_bytes, &mut cursor)?;
                let new_name = get_name(body_bytes, &mut cursor)?;
                RecordBody::Rename {
                    old_parent,
                    new_parent,
                    old_name,
                    new_name,
                    no_replace,
                }
            }
            RecordType::SetAttr => {
                let mask = AttrMask::from_bits_truncate(read_u32(body_bytes, &mut cursor)?);
                let mode = read_u32(body_bytes, &mut cursor)?;
                let uid = read_u32(body_bytes, &mut cursor)?;
                let gid = read_u32(body_bytes, &mut cursor)?;
                let size = read_u64(body_bytes, &mut cursor)?;
                RecordBody::SetAttr { mask, mode, uid, gid, size }
            }
        };

        Ok(Some((Record { header, body }, total_size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_record_round_trips() {
        let rec = Record::new(
            RecordType::Write,
            7,
            1000,
            RecordBody::Write { offset: 64, data: vec![1, 2, 3, 4] },
        );
        let bytes = rec.encode();
        let (decoded, len) = Record::decode(&bytes).unwrap().unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(decoded.header.ino, 7);
        assert_eq!(decoded.body, rec.body);
    }

    #[test]
    fn create_record_round_trips() {
        let rec = Record::new(
            RecordType::Create,
            42,
            1,
            RecordBody::Create { parent_ino: 1, mode: 0o100644, name: "hello.txt".into() },
        );
        let bytes = rec.encode();
        let (decoded, _) = Record::decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded.body, rec.body);
    }

    #[test]
    fn rename_record_round_trips() {
        let rec = Record::new(
            RecordType::Rename,
            9,
            1,
            RecordBody::Rename {
                old_parent: 1,
                new_parent: 2,
                old_name: "a".into(),
                new_name: "b".into(),
                no_replace: true,
            },
        );
        let bytes = rec.encode();
        let (decoded, _) = Record::decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded.body, rec.body);
    }

    #[test]
    fn zeroed_tail_signals_end_of_scan() {
        let zeros = [0u8; HEADER_SIZE];
        assert!(Record::decode(&zeros).unwrap().is_none());
    }
}
