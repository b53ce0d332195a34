//! The rasterizer seam: everything Mapnik actually does (loading a style's
//! XML, projecting, drawing vector data, encoding pixels) is out of scope
//! here and stands behind this trait (spec §1 "out of scope collaborators").

use crate::projection::PrjBounds;
use crate::style::StyleConfig;

#[derive(Debug)]
pub struct RenderError(pub String);

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rasterization failed: {}", self.0)
    }
}

impl std::error::Error for RenderError {}

/// One worker's handle to the rasterization engine for a single style.
/// A real implementation owns a parsed Mapnik `Map` object; tests use a
/// stand-in that returns canned bytes.
pub trait Rasterizer: Send + Sync {
    /// Called once at worker startup with the total render thread count,
    /// mirroring `parameterize_map_max_connections`'s datasource
    /// connection-pool sizing hint. Default no-op for rasterizers that
    /// don't pool connections.
    fn prepare(&self, _thread_count: usize) {}

    /// Renders the `tiles_x x tiles_y` block covering `bbox`, returning
    /// one already tile-encoded (e.g. PNG) byte buffer per sub-tile, in
    /// `(ox * tiles_y + oy)` row-major order matching
    /// [`crate::metatile::xyz_to_meta_offset`].
    fn render_metatile(
        &self,
        style: &StyleConfig,
        bbox: PrjBounds,
        tiles_x: i32,
        tiles_y: i32,
    ) -> Result<Vec<Vec<u8>>, RenderError>;
}

/// Stands in for a real Mapnik-backed rasterizer, which this crate does
/// not link against (spec §1 out-of-scope collaborators). Fails every
/// render so a binary that forgot to wire one up fails loudly instead of
/// writing out empty metatiles.
pub struct UnimplementedRasterizer;

impl Rasterizer for UnimplementedRasterizer {
    fn render_metatile(
        &self,
        _style: &StyleConfig,
        _bbox: PrjBounds,
        _tiles_x: i32,
        _tiles_y: i32,
    ) -> Result<Vec<Vec<u8>>, RenderError> {
        Err(RenderError(
            "no rasterization backend linked into this binary".to_string(),
        ))
    }
}
