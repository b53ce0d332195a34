//! Filesystem storage backend: the only backend mandatory for this core
//! (spec §4.D). Metatiles are bucketed five directory levels deep so no
//! directory accumulates more than 256 entries.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use filetime::FileTime;

use super::{StatInfo, StorageBackend, StorageError};
use crate::metatile::{MetaTile, METATILE};

const PLANET_TIMESTAMP_NAME: &str = "planet-import-complete";
/// Seconds in 20 (Julian) years; used to backdate an expired metatile's
/// mtime while keeping its original value recoverable (`tm_year -= 20` in
/// the original daemon).
const TWENTY_YEARS_SECS: i64 = 20 * 365 * 24 * 60 * 60 + 5 * 24 * 60 * 60;
/// Tiles with an mtime before this were already marked expired by a
/// previous run (`tm_year > 105`, i.e. after 2005) and are left alone.
const EPOCH_2005: i64 = 1_104_537_600;

static TMP_SUFFIX: AtomicU64 = AtomicU64::new(0);

pub struct FileBackend {
    tile_dir: PathBuf,
}

impl FileBackend {
    pub fn new(tile_dir: impl Into<PathBuf>) -> Self {
        FileBackend {
            tile_dir: tile_dir.into(),
        }
    }

    fn style_dir(&self, style: &str, options: &str) -> PathBuf {
        let name = if options.is_empty() {
            style.to_string()
        } else {
            format!("{style}.{options}")
        };
        self.tile_dir.join(name)
    }

    /// `<tile_dir>/<style>[.<options>]/<z>/<h4>/<h3>/<h2>/<h1>/<h0>.meta`
    fn meta_path(&self, style: &str, options: &str, x: i32, y: i32, z: i32) -> PathBuf {
        let mut hash = [0u8; 5];
        let (mut hx, mut hy) = (x as u32, y as u32);
        for h in hash.iter_mut() {
            *h = (((hx & 0xf) << 4) | (hy & 0xf)) as u8;
            hx >>= 4;
            hy >>= 4;
        }

        self.style_dir(style, options)
            .join(z.to_string())
            .join(hash[4].to_string())
            .join(hash[3].to_string())
            .join(hash[2].to_string())
            .join(hash[1].to_string())
            .join(format!("{}.meta", hash[0]))
    }

    fn planet_time(&self, style: &str) -> i64 {
        let per_style = self.tile_dir.join(style).join(PLANET_TIMESTAMP_NAME);
        let global = self.tile_dir.join(PLANET_TIMESTAMP_NAME);

        for candidate in [per_style, global] {
            if let Ok(meta) = fs::metadata(&candidate) {
                if let Ok(mtime) = meta.modified() {
                    return to_unix_secs(mtime);
                }
            }
        }

        // No planet timestamp on disk anywhere: behave as if the import
        // finished three days ago, same fallback as the original daemon.
        to_unix_secs(SystemTime::now()) - 3 * 24 * 60 * 60
    }

    fn read_header(path: &Path) -> Result<(MetaTile, bool), StorageError> {
        let bytes = fs::read(path)?;
        let mt = MetaTile::decode(&bytes).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let compressed = mt.is_compressed();
        Ok((mt, compressed))
    }
}

fn to_unix_secs(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

impl StorageBackend for FileBackend {
    fn read(
        &self,
        style: &str,
        options: &str,
        x: i32,
        y: i32,
        z: i32,
    ) -> Result<(Vec<u8>, bool), StorageError> {
        let path = self.meta_path(style, options, x, y, z);
        if !path.exists() {
            return Err(StorageError::NotFound);
        }
        let (mt, compressed) = Self::read_header(&path)?;
        let data = mt.get(x, y).ok_or(StorageError::NotFound)?.to_vec();
        Ok((data, compressed))
    }

    fn stat(&self, style: &str, options: &str, x: i32, y: i32, z: i32) -> StatInfo {
        let path = self.meta_path(style, options, x, y, z);
        let mut info = match fs::metadata(&path) {
            Ok(meta) => StatInfo {
                size: meta.len() as i64,
                mtime: meta
                    .modified()
                    .map(to_unix_secs)
                    .unwrap_or(0),
                atime: meta
                    .accessed()
                    .map(to_unix_secs)
                    .unwrap_or(0),
                ctime: meta
                    .modified()
                    .map(to_unix_secs)
                    .unwrap_or(0),
                expired: false,
            },
            Err(_) => StatInfo::missing(),
        };
        info.expired = info.mtime < self.planet_time(style);
        info
    }

    fn write_metatile(
        &self,
        style: &str,
        options: &str,
        mx: i32,
        my: i32,
        z: i32,
        bytes: &[u8],
    ) -> Result<usize, StorageError> {
        let path = self.meta_path(style, options, mx, my, z);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let suffix = TMP_SUFFIX.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = path.file_name().unwrap().to_os_string();
        tmp_name.push(format!(".{}.{}", std::process::id(), suffix));
        let tmp = path.with_file_name(tmp_name);

        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        drop(f);

        fs::rename(&tmp, &path)?;
        Ok(bytes.len())
    }

    fn delete_metatile(&self, style: &str, mx: i32, my: i32, z: i32) -> Result<(), StorageError> {
        let path = self.meta_path(style, "", mx, my, z);
        fs::remove_file(path)?;
        Ok(())
    }

    fn expire_metatile(&self, style: &str, mx: i32, my: i32, z: i32) -> Result<(), StorageError> {
        let path = self.meta_path(style, "", mx, my, z);
        let meta = fs::metadata(&path)?;
        let mtime = meta.modified().map(to_unix_secs).unwrap_or(0);
        let atime = meta.accessed().map(to_unix_secs).unwrap_or(mtime);

        let new_mtime = if mtime > EPOCH_2005 {
            mtime - TWENTY_YEARS_SECS
        } else {
            mtime
        };

        filetime::set_file_times(
            &path,
            FileTime::from_unix_time(atime, 0),
            FileTime::from_unix_time(new_mtime, 0),
        )?;
        Ok(())
    }

    fn storage_id(&self, style: &str, options: &str, x: i32, y: i32, z: i32) -> String {
        format!("file://{}", self.meta_path(style, options, x, y, z).display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_bundle(x: i32, y: i32, z: i32) -> Vec<u8> {
        let mut mt = MetaTile::new(x, y, z);
        for ox in 0..METATILE as i32 {
            for oy in 0..METATILE as i32 {
                mt.set(x + ox, y + oy, format!("t{ox}{oy}").into_bytes());
            }
        }
        mt.encode()
    }

    #[test]
    fn meta_path_is_five_levels_of_hash_bytes() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let path = backend.meta_path("osm", "", 17, 34, 10);
        let comps: Vec<_> = path
            .strip_prefix(dir.path())
            .unwrap()
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        assert_eq!(comps[0], "osm");
        assert_eq!(comps[1], "10");
        assert!(path.to_string_lossy().ends_with(".meta"));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let bundle = sample_bundle(8, 8, 4);
        backend.write_metatile("osm", "", 8, 8, 4, &bundle).unwrap();

        let (data, compressed) = backend.read("osm", "", 9, 9, 4).unwrap();
        assert!(!compressed);
        assert_eq!(data, b"t11");
    }

    #[test]
    fn stat_on_missing_metatile_reports_negative_size() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let info = backend.stat("osm", "", 0, 0, 0);
        assert_eq!(info.size, -1);
    }

    #[test]
    fn expire_backdates_mtime_and_stat_reports_expired() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let bundle = sample_bundle(0, 0, 0);
        backend.write_metatile("osm", "", 0, 0, 0, &bundle).unwrap();

        fs::create_dir_all(dir.path().join("osm")).unwrap();
        fs::write(dir.path().join("osm").join(PLANET_TIMESTAMP_NAME), b"x").unwrap();

        backend.expire_metatile("osm", 0, 0, 0).unwrap();
        let info = backend.stat("osm", "", 0, 0, 0);
        assert_eq!(info.size, bundle.len() as i64);
        assert!(info.expired);
    }

    #[test]
    fn delete_removes_the_bundle() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let bundle = sample_bundle(0, 0, 0);
        backend.write_metatile("osm", "", 0, 0, 0, &bundle).unwrap();
        backend.delete_metatile("osm", 0, 0, 0).unwrap();
        assert_eq!(backend.stat("osm", "", 0, 0, 0).size, -1);
    }
}
