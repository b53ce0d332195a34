//! On-disk metatile bundle codec (spec §4.C). A bundle packs an `N x N`
//! block of adjacent tiles behind one small index table so a single
//! filesystem write/read covers many tiles at once.

use bytes::{Buf, BufMut, BytesMut};

/// Side length of a metatile block. A power of two; every tile in the
/// block shares the same bundle on disk.
pub const METATILE: usize = 8;

pub const META_MAGIC: &[u8; 4] = b"META";
pub const META_MAGIC_COMPRESSED: &[u8; 4] = b"METZ";

const ENTRY_SIZE: usize = 8; // offset:i32 + size:i32
const HEADER_FIXED_SIZE: usize = 4 + 4 + 4 + 4 + 4; // magic + count + x + y + z

/// One slot in the bundle's index table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct Entry {
    pub offset: i32,
    pub size: i32,
}

/// A decoded bundle: header fields plus each sub-tile's raw bytes, indexed
/// by [`xyz_to_meta_offset`].
#[derive(Clone, Debug)]
pub struct MetaTile {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    compressed: bool,
    tiles: Vec<Option<Vec<u8>>>,
}

#[derive(Debug)]
pub enum MetatileError {
    TooShort,
    BadMagic,
    BadCount(i32),
    IndexOutOfRange { offset: i32, size: i32, file_len: usize },
}

impl std::fmt::Display for MetatileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetatileError::TooShort => write!(f, "metatile buffer shorter than its fixed header"),
            MetatileError::BadMagic => write!(f, "metatile magic is neither META nor METZ"),
            MetatileError::BadCount(c) => write!(f, "metatile count {c} does not match N*N"),
            MetatileError::IndexOutOfRange { offset, size, file_len } => write!(
                f,
                "metatile index entry (offset={offset}, size={size}) exceeds buffer length {file_len}"
            ),
        }
    }
}

impl std::error::Error for MetatileError {}

/// Offset of tile `(x, y)` within its metatile's index table, row-major by
/// `(x mod N) * N + (y mod N)` (spec §4.C).
pub fn xyz_to_meta_offset(x: i32, y: i32) -> usize {
    let mask = (METATILE - 1) as i32;
    ((x & mask) * METATILE as i32 + (y & mask)) as usize
}

impl MetaTile {
    /// Starts an empty bundle anchored at metatile origin `(x, y, z)`.
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        MetaTile {
            x,
            y,
            z,
            compressed: false,
            tiles: vec![None; METATILE * METATILE],
        }
    }

    /// Stores the raw bytes for sub-tile `(x, y)`, absent until set.
    pub fn set(&mut self, x: i32, y: i32, data: Vec<u8>) {
        self.tiles[xyz_to_meta_offset(x, y)] = Some(data);
    }

    /// Sub-tile bytes for `(x, y)`, or `None` if intentionally absent
    /// (`size == 0` on disk; a partial bundle).
    pub fn get(&self, x: i32, y: i32) -> Option<&[u8]> {
        self.tiles[xyz_to_meta_offset(x, y)].as_deref()
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Serializes the bundle: fixed header, index table, then the
    /// concatenated payload in index order. Absent sub-tiles get a
    /// zero-size entry and contribute no payload bytes.
    pub fn encode(&self) -> Vec<u8> {
        let count = METATILE * METATILE;
        let mut offsets = vec![Entry::default(); count];

        let header_size = HEADER_FIXED_SIZE + count * ENTRY_SIZE;
        let mut offset = header_size as i32;
        for slot in 0..count {
            let size = self.tiles[slot].as_ref().map_or(0, |d| d.len() as i32);
            offsets[slot] = Entry { offset, size };
            offset += size;
        }

        let mut buf = BytesMut::with_capacity(offset as usize);
        let magic = if self.compressed {
            META_MAGIC_COMPRESSED
        } else {
            META_MAGIC
        };
        buf.put_slice(magic);
        buf.put_i32_ne(count as i32);
        buf.put_i32_ne(self.x);
        buf.put_i32_ne(self.y);
        buf.put_i32_ne(self.z);
        for e in &offsets {
            buf.put_i32_ne(e.offset);
            buf.put_i32_ne(e.size);
        }
        for slot in 0..count {
            if let Some(data) = &self.tiles[slot] {
                buf.put_slice(data);
            }
        }

        buf.to_vec()
    }

    /// Parses a bundle previously produced by [`MetaTile::encode`],
    /// validating the magic, the index count, and every index entry's
    /// bounds against the buffer length (spec §4.C).
    pub fn decode(raw: &[u8]) -> Result<Self, MetatileError> {
        if raw.len() < HEADER_FIXED_SIZE {
            return Err(MetatileError::TooShort);
        }

        let mut buf = raw;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[..4]);
        buf.advance(4);

        let compressed = if &magic == META_MAGIC {
            false
        } else if &magic == META_MAGIC_COMPRESSED {
            true
        } else {
            return Err(MetatileError::BadMagic);
        };

        let count = buf.get_i32_ne();
        let expected = (METATILE * METATILE) as i32;
        if count != expected {
            return Err(MetatileError::BadCount(count));
        }
        let x = buf.get_i32_ne();
        let y = buf.get_i32_ne();
        let z = buf.get_i32_ne();

        let index_bytes = count as usize * ENTRY_SIZE;
        if raw.len() < HEADER_FIXED_SIZE + index_bytes {
            return Err(MetatileError::TooShort);
        }

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let offset = buf.get_i32_ne();
            let size = buf.get_i32_ne();
            entries.push(Entry { offset, size });
        }

        let mut tiles = vec![None; count as usize];
        for (slot, e) in entries.iter().enumerate() {
            if e.size == 0 {
                continue;
            }
            let start = e.offset as usize;
            let end = start + e.size as usize;
            if e.offset < 0 || e.size < 0 || end > raw.len() {
                return Err(MetatileError::IndexOutOfRange {
                    offset: e.offset,
                    size: e.size,
                    file_len: raw.len(),
                });
            }
            tiles[slot] = Some(raw[start..end].to_vec());
        }

        Ok(MetaTile {
            x,
            y,
            z,
            compressed,
            tiles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xyz_to_meta_offset_wraps_within_block() {
        assert_eq!(xyz_to_meta_offset(0, 0), 0);
        assert_eq!(xyz_to_meta_offset(8, 0), 0);
        assert_eq!(xyz_to_meta_offset(9, 1), 9);
        assert_eq!(xyz_to_meta_offset(15, 15), 63);
    }

    #[test]
    fn round_trips_full_bundle() {
        let mut mt = MetaTile::new(8, 16, 5);
        for ox in 0..METATILE as i32 {
            for oy in 0..METATILE as i32 {
                let data = format!("tile-{ox}-{oy}").into_bytes();
                mt.set(8 + ox, 16 + oy, data);
            }
        }
        let bytes = mt.encode();
        let decoded = MetaTile::decode(&bytes).unwrap();
        assert_eq!((decoded.x, decoded.y, decoded.z), (8, 16, 5));
        assert_eq!(decoded.get(9, 17), Some(&b"tile-1-1"[..]));
    }

    #[test]
    fn partial_bundle_leaves_absent_tiles_as_none() {
        let mut mt = MetaTile::new(0, 0, 3);
        mt.set(0, 0, b"only-one".to_vec());
        let bytes = mt.encode();
        let decoded = MetaTile::decode(&bytes).unwrap();
        assert_eq!(decoded.get(0, 0), Some(&b"only-one"[..]));
        assert_eq!(decoded.get(1, 1), None);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut mt = MetaTile::new(0, 0, 0).encode();
        mt[0] = b'X';
        assert!(matches!(MetaTile::decode(&mt), Err(MetatileError::BadMagic)));
    }

    #[test]
    fn rejects_truncated_buffer() {
        let mt = MetaTile::new(0, 0, 0).encode();
        let truncated = &mt[..mt.len() - 10];
        assert!(MetaTile::decode(truncated).is_err());
    }

    #[test]
    fn rejects_out_of_range_index_entry() {
        let mut bytes = MetaTile::new(0, 0, 0).encode();
        let entry_start = HEADER_FIXED_SIZE;
        bytes[entry_start..entry_start + 4].copy_from_slice(&(i32::MAX).to_ne_bytes());
        bytes[entry_start + 4..entry_start + 8].copy_from_slice(&1i32.to_ne_bytes());
        assert!(matches!(
            MetaTile::decode(&bytes),
            Err(MetatileError::IndexOutOfRange { .. })
        ));
    }
}
