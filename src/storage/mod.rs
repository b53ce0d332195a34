//! Storage backend abstraction (spec §4.D). The only backend shipped here
//! is the filesystem one; `storage_id()` returns a scheme-qualified string
//! (`file://...`) the way every backend is expected to.

pub mod file;

pub use file::FileBackend;

/// Metadata a worker consults to decide whether a stored metatile is stale.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StatInfo {
    pub size: i64,
    pub mtime: i64,
    pub atime: i64,
    pub ctime: i64,
    pub expired: bool,
}

impl StatInfo {
    /// The sentinel a backend returns for a metatile that doesn't exist.
    pub fn missing() -> Self {
        StatInfo {
            size: -1,
            mtime: 0,
            atime: 0,
            ctime: 0,
            expired: false,
        }
    }
}

#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    NotFound,
    Corrupt(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "storage i/o error: {e}"),
            StorageError::NotFound => write!(f, "metatile not found"),
            StorageError::Corrupt(msg) => write!(f, "corrupt metatile: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        StorageError::Io(value)
    }
}

/// Every backend is a style-scoped handle over `(x, y, z)` sub-tile reads
/// and metatile-granular writes. `style`/`options` identify which bundle a
/// call addresses; `x, y, z` are individual tile coordinates, not the
/// metatile origin, except on the `*_metatile` calls which take the
/// already-rounded `(mx, my)`.
pub trait StorageBackend: Send {
    /// Reads the single sub-tile `(x, y, z)` out of its bundle, returning
    /// the raw bytes and whether the bundle is `METZ`-compressed.
    fn read(
        &self,
        style: &str,
        options: &str,
        x: i32,
        y: i32,
        z: i32,
    ) -> Result<(Vec<u8>, bool), StorageError>;

    fn stat(&self, style: &str, options: &str, x: i32, y: i32, z: i32) -> StatInfo;

    /// Writes an already-encoded bundle (see [`crate::metatile::MetaTile`])
    /// atomically, returning the number of bytes written.
    fn write_metatile(
        &self,
        style: &str,
        options: &str,
        mx: i32,
        my: i32,
        z: i32,
        bytes: &[u8],
    ) -> Result<usize, StorageError>;

    fn delete_metatile(&self, style: &str, mx: i32, my: i32, z: i32) -> Result<(), StorageError>;

    /// Leaves the payload in place but backdates its mtime so `stat` marks
    /// it expired without losing the bundle for forensic purposes.
    fn expire_metatile(&self, style: &str, mx: i32, my: i32, z: i32) -> Result<(), StorageError>;

    fn storage_id(&self, style: &str, options: &str, x: i32, y: i32, z: i32) -> String;

    fn close(&self) {}
}
