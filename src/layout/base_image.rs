//! The optional read-only base image: a small header, a flat inode table,
//! a string table for names, and a data area, in that order.

use crate::core::error::{Error, LayoutError, Result};
use crate::ids::{Ino, BASE_ROOT_INO};

/// Encoded size of the base-image header.
pub const HEADER_SIZE: usize = 64;
/// Encoded size of a single inode record.
pub const INODE_SIZE: usize = 64;

/// Header describing the layout of the base image region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImageHeader {
    /// Number of inode records in the inode table (including the root).
    pub inode_count: u64,
    /// Offset of the inode table, relative to the start of the base image.
    pub inode_table_offset: u64,
    /// Offset of the string table, relative to the start of the base image.
    pub string_table_offset: u64,
    /// Size of the string table, in bytes.
    pub string_table_size: u64,
    /// Offset of the data area, relative to the start of the base image.
    pub data_area_offset: u64,
    /// Timestamp stamped on every base-image inode's mtime/ctime, since the
    /// base image itself carries no per-inode timestamps.
    pub created_at: u64,
}

impl BaseImageHeader {
    /// Encode into a [`HEADER_SIZE`]-byte buffer.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.inode_count.to_le_bytes());
        buf[8..16].copy_from_slice(&self.inode_table_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.string_table_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.string_table_size.to_le_bytes());
        buf[32..40].copy_from_slice(&self.data_area_offset.to_le_bytes());
        buf[40..48].copy_from_slice(&self.created_at.to_le_bytes());
        buf
    }

    /// Decode from a [`HEADER_SIZE`]-byte slice.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Layout(LayoutError::OutOfBounds {
                offset: 0,
                len: HEADER_SIZE as u64,
                region_size: bytes.len() as u64,
            }));
        }
        Ok(Self {
            inode_count: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            inode_table_offset: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            string_table_offset: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            string_table_size: u64::from_le_bytes(bytes[24..32].try_into().unwrap()),
            data_area_offset: u64::from_le_bytes(bytes[32..40].try_into().unwrap()),
            created_at: u64::from_le_bytes(bytes[40..48].try_into().unwrap()),
        })
    }
}

/// A single base-image inode record. Directories are represented by a
/// sibling-linked child list (`first_child` / `next_sibling`) rather than a
/// separate directory block, matching the append-free, read-only nature of
/// the base image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseInode {
    /// Inode number. `BASE_ROOT_INO` for the root directory.
    pub ino: Ino,
    /// Parent inode number. 0 for the root.
    pub parent_ino: Ino,
    /// First child inode, if this is a directory with children. 0 if none.
    pub first_child: Ino,
    /// Next sibling inode sharing this inode's parent. 0 if this is the
    /// last child.
    pub next_sibling: Ino,
    /// Offset of this file's bytes within the data area. Meaningless for
    /// directories.
    pub data_offset: u64,
    /// File size in bytes. 0 for directories.
    pub size: u64,
    /// Mode bits (type + permissions).
    pub mode: u32,
    /// Byte offset of this inode's name within the string table.
    pub name_offset: u32,
    /// Owning uid.
    pub uid: u16,
    /// Owning gid.
    pub gid: u16,
    /// Hard link count. Always 1 in a base image (the format has no
    /// hard-link support).
    pub nlink: u16,
    /// Length in bytes of this inode's name within the string table.
    pub name_len: u16,
}

impl BaseInode {
    /// Construct the synthetic root directory inode.
    pub fn root(first_child: Ino, created_at_ignored: u64) -> Self {
        let _ = created_at_ignored;
        Self {
            ino: BASE_ROOT_INO,
            parent_ino: 0,
            first_child,
            next_sibling: 0,
            data_offset: 0,
            size: 0,
            mode: 0o40755,
            name_offset: 0,
            uid: 0,
            gid: 0,
            nlink: 1,
            name_len: 0,
        }
    }

    /// True if this inode is a directory, per the standard S_IFDIR bit.
    pub fn is_dir(&self) -> bool {
        self.mode & 0o170000 == 0o040000
    }

    /// Encode into an [`INODE_SIZE`]-byte buffer.
    pub fn encode(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        buf[0..8].copy_from_slice(&self.ino.to_le_bytes());
        buf[8..16].copy_from_slice(&self.parent_ino.to_le_bytes());
        buf[16..24].copy_from_slice(&self.first_child.to_le_bytes());
        buf[24..32].copy_from_slice(&self.next_sibling.to_le_bytes());
        buf[32..40].copy_from_slice(&self.data_offset.to_le_bytes());
        buf[40..48].copy_from_slice(&self.size.to_le_bytes());
        buf[48..52].copy_from_slice(&self.mode.to_le_bytes());
        buf[52..56].copy_from_slice(&self.name_offset.to_le_bytes());
        buf[56..58].copy_from_slice(&self.uid.to_le_bytes());
        buf[58..60].copy_from_slice(&self.gid.to_le_bytes());
        buf[60..62].copy_from_slice(&self.nlink.to_le_bytes());
        buf[62..64].copy_from_slice(&self.name_len.to_le_bytes());
        buf
    }

    /// Decode from an [`INODE_SIZE`]-byte slice.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INODE_SIZE {
            return Err(Error::Layout(LayoutError::OutOfBounds {
                offset: 0,
                len: INODE_SIZE as u64,
                region_size: bytes.len() as u64,
            }));
        }
        Ok(Self {
            ino: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            parent_ino: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            first_child: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            next_sibling: u64::from_le_bytes(bytes[24..32].try_into().unwrap()),
            data_offset: u64::from_le_bytes(bytes[32..40].try_into().unwrap()),
            size: u64::from_le_bytes(bytes[40..48].try_into().unwrap()),
            mode: u32::from_le_bytes(bytes[48..52].try_into().unwrap()),
            name_offset: u32::from_le_bytes(bytes[52..56].try_into().unwrap()),
            uid: u16::from_le_bytes(bytes[56..58].try_into().unwrap()),
            gid: u16::from_le_bytes(bytes[58..60].try_into().unwrap()),
            nlink: u16::from_le_bytes(bytes[60..62].try_into().unwrap()),
            name_len: u16::from_le_bytes(bytes[62..64].try_into().unwrap()),
        })
    }
}

/// Read-side access to an embedded base image: decodes the header once at
/// open time, then serves inode lookups, name resolution, sibling-linked
/// child enumeration, and data reads directly off the mapped window.
pub struct BaseImageReader {
    window: std::sync::Arc<crate::storage::window::StorageWindow>,
    base_offset: u64,
    header: BaseImageHeader,
}

impl BaseImageReader {
    /// Open a base image whose header starts at `base_offset` in `window`.
    pub fn open(window: std::sync::Arc<crate::storage::window::StorageWindow>, base_offset: u64) -> Result<Self> {
        let bytes = window.read(base_offset, HEADER_SIZE as u64)?;
        let header = BaseImageHeader::decode(bytes)?;
        Ok(Self { window, base_offset, header })
    }

    /// The base image's root directory inode (always [`BASE_ROOT_INO`]).
    pub fn root_ino(&self) -> Ino {
        BASE_ROOT_INO
    }

    /// Number of inodes in the base image's inode table.
    pub fn inode_count(&self) -> u64 {
        self.header.inode_count
    }

    /// The timestamp stamped on every base-image inode's reported mtime.
    pub fn created_at(&self) -> u64 {
        self.header.created_at
    }

    /// Decode the inode numbered `ino`, or `None` if out of range.
    pub fn inode(&self, ino: Ino) -> Result<Option<BaseInode>> {
        if ino == 0 || ino > self.header.inode_count {
            return Ok(None);
        }
        let slot = (ino - 1) * INODE_SIZE as u64;
        let offset = self.base_offset + self.header.inode_table_offset + slot;
        let bytes = self.window.read(offset, INODE_SIZE as u64)?;
        Ok(Some(BaseInode::decode(bytes)?))
    }

    /// Resolve an inode's name out of the string table.
    pub fn name(&self, inode: &BaseInode) -> Result<String> {
        if inode.name_len == 0 {
            return Ok(String::new());
        }
        let offset = self.base_offset + self.header.string_table_offset + inode.name_offset as u64;
        let bytes = self.window.read(offset, inode.name_len as u64)?;
        std::str::from_utf8(bytes)
            .map(|s| s.to_string())
            .map_err(|e| Error::Layout(LayoutError::Corruption(e.to_string())))
    }

    /// Every child of `parent`, walking the `first_child`/`next_sibling`
    /// linked list. Empty if `parent` doesn't exist or isn't a directory.
    pub fn children(&self, parent: Ino) -> Result<Vec<Ino>> {
        let Some(p) = self.inode(parent)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        let mut cur = p.first_child;
        while cur != 0 {
            out.push(cur);
            let Some(c) = self.inode(cur)? else { break };
            cur = c.next_sibling;
        }
        Ok(out)
    }

    /// Find `name` among `parent`'s children, by linear scan (matching the
    /// sibling-linked-list directory representation; base directories are
    /// read-only and not expected to be large enough for this to matter).
    pub fn lookup_child(&self, parent: Ino, name: &str) -> Result<Option<Ino>> {
        for child_ino in self.children(parent)? {
            if let Some(c) = self.inode(child_ino)? {
                if self.name(&c)? == name {
                    return Ok(Some(child_ino));
                }
            }
        }
        Ok(None)
    }

    /// Read up to `len` bytes of `inode`'s data starting at `pos`, clamped
    /// to the file's size. Returns `(bytes, avail)`.
    pub fn data(&self, inode: &BaseInode, pos: u64, len: u64) -> Result<(&[u8], u64)> {
        if pos >= inode.size {
            return Ok((&[], 0));
        }
        let avail = (inode.size - pos).min(len);
        let offset = self.base_offset + self.header.data_area_offset + inode.data_offset + pos;
        Ok((self.window.read(offset, avail)?, avail))
    }
}

/// In-memory builder for a base image: fills an inode table, string table,
/// and data area, then serializes them into one contiguous buffer ready to
/// be written into the reserved base-image region of a fresh storage
/// window. Stands in for the external base-image writer tool (§1 lists it
/// as an out-of-scope collaborator) so this crate's own tests and `mkfs`
/// flow have a way to produce one.
pub struct BaseImageBuilder {
    inodes: Vec<BaseInode>,
    names: Vec<u8>,
    data: Vec<u8>,
}

impl BaseImageBuilder {
    /// Start a builder with just the root directory (inode 1).
    pub fn new() -> Self {
        Self {
            inodes: vec![BaseInode::root(0, 0)],
            names: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Add a directory named `name` under `parent`, returning its inode
    /// number.
    pub fn add_dir(&mut self, parent: Ino, name: &str) -> Ino {
        let ino = self.push_inode(parent, name, 0o040755, 0, 0);
        self.link_child(parent, ino);
        ino
    }

    /// Add a regular file named `name` under `parent` with `contents`,
    /// returning its inode number.
    pub fn add_file(&mut self, parent: Ino, name: &str, mode: u32, contents: &[u8]) -> Ino {
        let data_offset = self.data.len() as u64;
        self.data.extend_from_slice(contents);
        let ino = self.push_inode(parent, name, mode, data_offset, contents.len() as u64);
        self.link_child(parent, ino);
        ino
    }

    fn push_inode(&mut self, parent_ino: Ino, name: &str, mode: u32, data_offset: u64, size: u64) -> Ino {
        let ino = (self.inodes.len() + 1) as Ino;
        let name_offset = self.names.len() as u32;
        self.names.extend_from_slice(name.as_bytes());
        self.inodes.push(BaseInode {
            ino,
            parent_ino,
            first_child: 0,
            next_sibling: 0,
            data_offset,
            size,
            mode,
            name_offset,
            uid: 0,
            gid: 0,
            nlink: 1,
            name_len: name.len() as u16,
        });
        ino
    }

    fn link_child(&mut self, parent: Ino, new_ino: Ino) {
        let parent_slot = (parent - 1) as usize;
        let old_first = self.inodes[parent_slot].first_child;
        self.inodes[(new_ino - 1) as usize].next_sibling = old_first;
        self.inodes[parent_slot].first_child = new_ino;
    }

    /// Serialize into `(header, bytes)`; `bytes` is the full base-image
    /// region (header + inode table + string table + data area), ready to
    /// be written verbatim at the base image's offset in the storage
    /// window.
    pub fn build(self, created_at: u64) -> (BaseImageHeader, Vec<u8>) {
        let inode_table_offset = HEADER_SIZE as u64;
        let inode_table_size = self.inodes.len() as u64 * INODE_SIZE as u64;
        let string_table_offset = inode_table_offset + inode_table_size;
        let string_table_size = self.names.len() as u64;
        let data_area_offset = string_table_offset + string_table_size;

        let header = BaseImageHeader {
            inode_count: self.inodes.len() as u64,
            inode_table_offset,
            string_table_offset,
            string_table_size,
            data_area_offset,
            created_at,
        };

        let mut buf = header.encode().to_vec();
        for inode in &self.inodes {
            buf.extend_from_slice(&inode.encode());
        }
        buf.extend_from_slice(&self.names);
        buf.extend_from_slice(&self.data);
        (header, buf)
    }
}

impl Default for BaseImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = BaseImageHeader {
            inode_count: 10,
            inode_table_offset: 64,
            string_table_offset: 704,
            string_table_size: 256,
            data_area_offset: 960,
            created_at: 123456789,
        };
        assert_eq!(h, BaseImageHeader::decode(&h.encode()).unwrap());
    }

    #[test]
    fn inode_round_trips() {
        let inode = BaseInode {
            ino: 5,
            parent_ino: 1,
            first_child: 0,
            next_sibling: 6,
            data_offset: 4096,
            size: 42,
            mode: 0o100644,
            name_offset: 10,
            uid: 1000,
            gid: 1000,
            nlink: 1,
            name_len: 7,
        };
        assert_eq!(inode, BaseInode::decode(&inode.encode()).unwrap());
    }

    #[test]
    fn root_is_a_directory() {
        assert!(BaseInode::root(2, 0).is_dir());
    }

    #[test]
    fn builder_then_reader_finds_files_and_data() {
        use crate::storage::window::StorageWindow;
        use std::sync::Arc;
        use tempfile::tempdir;

        let mut b = BaseImageBuilder::new();
        let subdir = b.add_dir(BASE_ROOT_INO, "subdir");
        let hello = b.add_file(BASE_ROOT_INO, "hello.txt", 0o100644, b"Hello from base image");
        let nested = b.add_file(subdir, "nested.txt", 0o100644, b"nested contents");
        let (_header, bytes) = b.build(1_700_000_000);

        let dir = tempdir().unwrap();
        let path = dir.path().join("base.img");
        let window = Arc::new(StorageWindow::open(&path, bytes.len() as u64).unwrap());
        window.write(0, &bytes).unwrap();

        let reader = BaseImageReader::open(window, 0).unwrap();
        let found = reader.lookup_child(BASE_ROOT_INO, "hello.txt").unwrap().unwrap();
        assert_eq!(found, hello);
        let inode = reader.inode(hello).unwrap().unwrap();
        let (data, avail) = reader.data(&inode, 0, 64).unwrap();
        assert_eq!(avail, 21);
        assert_eq!(data, b"Hello from base image");

        let nested_found = reader.lookup_child(subdir, "nested.txt").unwrap().unwrap();
        assert_eq!(nested_found, nested);
    }
}
