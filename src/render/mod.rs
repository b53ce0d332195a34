//! The render worker pool: rasterization seam, cache-purge notifications,
//! and the per-worker pop/render/respond loop (spec §4.G).

pub mod htcp;
pub mod rasterizer;
pub mod worker;

pub use rasterizer::{RenderError, Rasterizer, UnimplementedRasterizer};
