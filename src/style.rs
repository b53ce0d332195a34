//! Per-style configuration and runtime context (mirrors `xmlmapconfig` /
//! `get_projection` in the original daemon, spec §4.G).

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::projection::Projection;
use crate::storage::{FileBackend, StorageBackend};

/// A style's parsed configuration, loaded once from its INI section
/// (spec §6.2).
#[derive(Clone, Debug)]
pub struct StyleConfig {
    pub name: String,
    pub uri: String,
    pub xml: String,
    pub host: String,
    pub htcphost: Option<String>,
    pub tile_dir: String,
    pub tile_size: u32,
    pub scale: f64,
    pub minzoom: i32,
    pub maxzoom: i32,
    pub parameterize_style: Option<String>,
    /// `type = <ext> <mime> <format>`, e.g. `png image/png png256`.
    pub ext: String,
    pub mime_type: String,
    pub format: String,
}

impl Default for StyleConfig {
    fn default() -> Self {
        StyleConfig {
            name: String::new(),
            uri: String::new(),
            xml: String::new(),
            host: String::new(),
            htcphost: None,
            tile_dir: String::new(),
            tile_size: 256,
            scale: 1.0,
            minzoom: 0,
            maxzoom: 20,
            parameterize_style: None,
            ext: "png".to_string(),
            mime_type: "image/png".to_string(),
            format: "png256".to_string(),
        }
    }
}

/// Live state for a configured style: its backend handle, resolved
/// projection, optional HTCP purge socket, and whether it loaded cleanly.
/// A style with `ok == false` responds `NotDone` to every request that
/// targets it (spec §4.G).
pub struct StyleContext {
    pub config: StyleConfig,
    pub projection: Projection,
    pub store: Box<dyn StorageBackend>,
    htcp_socket: Option<UdpSocket>,
    ok: AtomicBool,
}

impl StyleContext {
    /// `default_tile_dir` is the active `[renderd]` section's `tile_dir`,
    /// used when the style's own `tiledir` key is absent - spec §6.2
    /// documents the style key as an "(override)" of the renderd-wide
    /// setting, not an independent default.
    pub fn load(mut config: StyleConfig, srs: &str, default_tile_dir: &str) -> Self {
        if config.tile_dir.is_empty() {
            config.tile_dir = default_tile_dir.to_string();
        }

        let (projection, known_srs) = Projection::for_srs(srs);
        if !known_srs {
            tracing::warn!(style = %config.name, srs, "unknown projection string, falling back to web mercator");
        }

        let htcp_socket = config.htcphost.as_ref().and_then(|_| {
            UdpSocket::bind("0.0.0.0:0")
                .map_err(|e| tracing::warn!(style = %config.name, error = %e, "failed to open HTCP socket"))
                .ok()
        });

        let store: Box<dyn StorageBackend> = Box::new(FileBackend::new(config.tile_dir.clone()));

        StyleContext {
            config,
            projection,
            store,
            htcp_socket,
            ok: AtomicBool::new(true),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok.load(Ordering::Relaxed)
    }

    pub fn mark_failed(&self) {
        self.ok.store(false, Ordering::Relaxed);
    }

    pub fn htcp_socket(&self) -> Option<&UdpSocket> {
        self.htcp_socket.as_ref()
    }

    pub fn in_bounds(&self, x: i32, y: i32, z: i32) -> bool {
        self.projection
            .in_bounds(x, y, z, self.config.minzoom, self.config.maxzoom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_with_unknown_htcp_host_still_loads() {
        let cfg = StyleConfig {
            name: "osm".into(),
            tile_dir: std::env::temp_dir().to_string_lossy().into_owned(),
            ..Default::default()
        };
        let ctx = StyleContext::load(cfg, "+proj=merc +a=6378137 +b=6378137", "");
        assert!(ctx.is_ok());
        assert!(ctx.in_bounds(0, 0, 0));
    }

    #[test]
    fn mark_failed_flips_ok_flag() {
        let cfg = StyleConfig {
            tile_dir: std::env::temp_dir().to_string_lossy().into_owned(),
            ..Default::default()
        };
        let ctx = StyleContext::load(cfg, "+proj=merc +a=6378137 +b=6378137", "");
        ctx.mark_failed();
        assert!(!ctx.is_ok());
    }
}
