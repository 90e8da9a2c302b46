//! Slippy-map tile math and geodesy helpers shared by the tile cache and
//! the field distance tool.

use serde::{Deserialize, Serialize};

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

/// Survey region bounds for the Assam beel programme.
pub const ASSAM_BOUNDS: RegionBounds = RegionBounds {
    north: 28.2,
    south: 24.1,
    east: 96.1,
    west: 89.7,
};

/// A single map tile address in the standard slippy-map scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileId {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    /// Cache key, also used as the manifest map key.
    pub fn key(&self) -> String {
        format!("{}_{}_{}", self.zoom, self.x, self.y)
    }

    /// File name of the cached tile on disk.
    pub fn filename(&self) -> String {
        format!("{}_{}_{}.png", self.zoom, self.x, self.y)
    }
}

/// Convert a geographic coordinate to its tile address at the given zoom.
///
/// This formula defines the cache key namespace, so the floor/truncation
/// behavior must stay exactly as written. Coordinates outside the valid
/// Mercator range clamp to the edge tiles.
pub fn tile_for(lat_deg: f64, lon_deg: f64, zoom: u8) -> TileId {
    let n = 2f64.powi(zoom as i32);
    let lat_rad = lat_deg.to_radians();
    let x = ((lon_deg + 180.0) / 360.0 * n).floor();
    let y = ((1.0 - lat_rad.tan().asinh() / std::f64::consts::PI) / 2.0 * n).floor();
    TileId {
        zoom,
        x: x.clamp(0.0, n - 1.0) as u32,
        y: y.clamp(0.0, n - 1.0) as u32,
    }
}

/// Enumerate every tile covering `bounds` for each zoom level in range
/// (inclusive rectangle per level, no overlap across levels).
pub fn tile_index(bounds: RegionBounds, min_zoom: u8, max_zoom: u8) -> Vec<TileId> {
    let mut tiles = Vec::new();
    for zoom in min_zoom..=max_zoom {
        let top_left = tile_for(bounds.north, bounds.west, zoom);
        let bottom_right = tile_for(bounds.south, bounds.east, zoom);
        for x in top_left.x..=bottom_right.x {
            for y in top_left.y..=bottom_right.y {
                tiles.push(TileId { zoom, x, y });
            }
        }
    }
    tiles
}

/// Great-circle distance in kilometers between two (lat, lon) points.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (lat1, lon1) = a;
    let (lat2, lon2) = b;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Human-readable byte size, two-decimal rounding with trailing zeros
/// trimmed ("1536" -> "1.5 KB").
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let exponent = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let mut rendered = format!("{value:.2}");
    if rendered.contains('.') {
        while rendered.ends_with('0') {
            rendered.pop();
        }
        if rendered.ends_with('.') {
            rendered.pop();
        }
    }
    format!("{} {}", rendered, UNITS[exponent])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_conversion_matches_slippy_map_scheme() {
        // Kolkata at zoom 10
        let tile = tile_for(22.5726, 88.3639, 10);
        assert_eq!(tile.x, 763);
        assert_eq!(tile.y, 446);
        assert_eq!(tile.key(), "10_763_446");
        assert_eq!(tile.filename(), "10_763_446.png");
    }

    #[test]
    fn tile_conversion_clamps_polar_latitudes() {
        let tile = tile_for(89.9, 0.0, 4);
        assert_eq!(tile.y, 0);
        let tile = tile_for(-89.9, 0.0, 4);
        assert_eq!(tile.y, 15);
    }

    #[test]
    fn tile_coordinates_non_decreasing_with_zoom() {
        for zoom in 1..=14u8 {
            let coarse = tile_for(26.0, 92.0, zoom - 1);
            let fine = tile_for(26.0, 92.0, zoom);
            assert!(fine.x >= coarse.x);
            assert!(fine.y >= coarse.y);
        }
    }

    #[test]
    fn tile_index_count_is_rows_times_columns_per_zoom() {
        let bounds = ASSAM_BOUNDS;
        let tiles = tile_index(bounds, 8, 10);
        let mut expected = 0usize;
        for zoom in 8..=10u8 {
            let top_left = tile_for(bounds.north, bounds.west, zoom);
            let bottom_right = tile_for(bounds.south, bounds.east, zoom);
            let cols = (bottom_right.x - top_left.x + 1) as usize;
            let rows = (bottom_right.y - top_left.y + 1) as usize;
            expected += cols * rows;
        }
        assert_eq!(tiles.len(), expected);

        // addresses are unique across the whole index
        let distinct: std::collections::HashSet<_> = tiles.iter().collect();
        assert_eq!(distinct.len(), tiles.len());
    }

    #[test]
    fn tile_index_empty_when_zoom_range_is_inverted() {
        assert!(tile_index(ASSAM_BOUNDS, 10, 8).is_empty());
    }

    #[test]
    fn haversine_zero_for_identical_points() {
        let p = (22.5726, 88.3639);
        assert!(haversine_km(p, p).abs() < 1e-9);
    }

    #[test]
    fn haversine_one_degree_longitude_at_equator() {
        let d = haversine_km((0.0, 0.0), (0.0, 1.0));
        assert!((d - 111.19).abs() < 0.5, "got {d}");
    }

    #[test]
    fn format_size_display() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1127), "1.1 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5 MB");
    }
}
