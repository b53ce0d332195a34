//! Projection bounds lookup and tile/metatile bbox math (spec §4.B).
//!
//! Three SRS strings are recognized by exact (or, for web mercator,
//! substring) match; anything else falls back to web mercator with a
//! warning, mirroring `get_projection` in the original daemon.

use crate::metatile::METATILE;

/// Bounding box and tile-grid aspect ratio for one configured style's SRS.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Projection {
    pub bound_x0: f64,
    pub bound_y0: f64,
    pub bound_x1: f64,
    pub bound_y1: f64,
    pub aspect_x: i32,
    pub aspect_y: i32,
}

const WEB_MERCATOR: Projection = Projection {
    bound_x0: -20037508.3428,
    bound_y0: -20037508.3428,
    bound_x1: 20037508.3428,
    bound_y1: 20037508.3428,
    aspect_x: 1,
    aspect_y: 1,
};

const PLATE_CARREE: Projection = Projection {
    bound_x0: -20037508.3428,
    bound_y0: -10018754.1714,
    bound_x1: 20037508.3428,
    bound_y1: 10018754.1714,
    aspect_x: 2,
    aspect_y: 1,
};

const BRITISH_NATIONAL_GRID: Projection = Projection {
    bound_x0: 0.0,
    bound_y0: 0.0,
    bound_x1: 700000.0,
    bound_y1: 1400000.0,
    aspect_x: 1,
    aspect_y: 2,
};

/// Inclusive projected bounds of an `M x M` tile block, `M = min(N, aspect *
/// 2^z)` (spec §4.B).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PrjBounds {
    pub p0x: f64,
    pub p0y: f64,
    pub p1x: f64,
    pub p1y: f64,
    pub render_size_x: i32,
    pub render_size_y: i32,
}

impl Projection {
    /// Resolves an SRS proj4 string to one of the three recognized
    /// projections. Unknown strings fall back to web mercator; the caller
    /// is expected to log a warning in that case (the return doesn't carry
    /// one since this is a pure lookup).
    pub fn for_srs(srs: &str) -> (Self, bool) {
        if srs.contains("+proj=merc +a=6378137 +b=6378137") {
            (WEB_MERCATOR, true)
        } else if srs == "+proj=eqc +lat_ts=0 +lat_0=0 +lon_0=0 +x_0=0 +y_0=0 +ellps=WGS84 +datum=WGS84 +units=m +no_defs" {
            (PLATE_CARREE, true)
        } else if srs == "+proj=tmerc +lat_0=49 +lon_0=-2 +k=0.9996012717 +x_0=400000 +y_0=-100000 +ellps=airy +datum=OSGB36 +units=m +no_defs" {
            (BRITISH_NATIONAL_GRID, true)
        } else {
            (WEB_MERCATOR, false)
        }
    }

    /// True when `(x, y)` lies within this projection's tile grid at zoom
    /// `z`, applying the aspect ratio to both axes so a non-square
    /// projection (plate carree, BNG) is bounded consistently on read and
    /// write paths.
    pub fn in_bounds(&self, x: i32, y: i32, z: i32, minzoom: i32, maxzoom: i32) -> bool {
        if z < minzoom || z > maxzoom {
            return false;
        }
        let limit = 1i64 << z;
        let max_x = limit * self.aspect_x as i64 - 1;
        let max_y = limit * self.aspect_y as i64 - 1;
        x >= 0 && (x as i64) <= max_x && y >= 0 && (y as i64) <= max_y
    }

    /// Projected bounds of the metatile block anchored at `(x, y, z)`,
    /// matching `tile2prjbounds`.
    pub fn metatile_bbox(&self, x: i32, y: i32, z: i32) -> PrjBounds {
        let scale = self.aspect_x as i64 * (1i64 << z);
        let scale_y = self.aspect_y as i64 * (1i64 << z);
        let render_size_x = (METATILE as i64).min(self.aspect_x as i64 * (1i64 << z)) as i32;
        let render_size_y = (METATILE as i64).min(self.aspect_y as i64 * (1i64 << z)) as i32;

        let p0x = self.bound_x0 + (self.bound_x1 - self.bound_x0) * (x as f64 / scale as f64);
        let p1x = self.bound_x0
            + (self.bound_x1 - self.bound_x0) * ((x + render_size_x) as f64 / scale as f64);
        let p0y = self.bound_y1
            - (self.bound_y1 - self.bound_y0) * ((y + render_size_y) as f64 / scale_y as f64);
        let p1y = self.bound_y1 - (self.bound_y1 - self.bound_y0) * (y as f64 / scale_y as f64);

        PrjBounds {
            p0x,
            p0y,
            p1x,
            p1y,
            render_size_x,
            render_size_y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_srs_falls_back_to_web_mercator() {
        let (prj, known) = Projection::for_srs("+proj=bogus");
        assert!(!known);
        assert_eq!(prj, WEB_MERCATOR);
    }

    #[test]
    fn web_mercator_matches_by_prefix() {
        let (prj, known) =
            Projection::for_srs("+proj=merc +a=6378137 +b=6378137 +lat_ts=0.0 +lon_0=0.0");
        assert!(known);
        assert_eq!(prj, WEB_MERCATOR);
    }

    #[test]
    fn zoom_zero_whole_world_bbox() {
        let bbox = WEB_MERCATOR.metatile_bbox(0, 0, 0);
        assert!((bbox.p0x - (-20037508.3428)).abs() < 1e-3);
        assert!((bbox.p1x - 20037508.3428).abs() < 1e-3);
        assert_eq!(bbox.render_size_x, 1);
        assert_eq!(bbox.render_size_y, 1);
    }

    #[test]
    fn top_left_metatile_at_z10_spans_8_tiles() {
        let bbox = WEB_MERCATOR.metatile_bbox(0, 0, 10);
        assert_eq!(bbox.render_size_x, METATILE as i32);
        assert_eq!(bbox.render_size_y, METATILE as i32);
        let full_width = WEB_MERCATOR.bound_x1 - WEB_MERCATOR.bound_x0;
        let expected = full_width * (METATILE as f64) / (1i64 << 10) as f64;
        assert!((((bbox.p1x - bbox.p0x) - expected).abs()) < 1e-3);
    }

    #[test]
    fn aspect_is_applied_consistently_to_bounds_check() {
        let bng = BRITISH_NATIONAL_GRID;
        // aspect_y = 2, so at z=0 valid y is 0 or 1, not just 0.
        assert!(bng.in_bounds(0, 1, 0, 0, 20));
        assert!(!bng.in_bounds(0, 2, 0, 0, 20));
        assert!(!bng.in_bounds(1, 0, 0, 0, 20));
    }

    #[test]
    fn out_of_zoom_range_is_rejected() {
        assert!(!WEB_MERCATOR.in_bounds(0, 0, 5, 0, 4));
        assert!(!WEB_MERCATOR.in_bounds(0, 0, -1, 0, 4));
    }
}
