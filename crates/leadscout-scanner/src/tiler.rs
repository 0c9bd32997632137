//! Geographic tiling.
//!
//! Splits a bounding region into a deterministic row-major grid so that
//! resumed jobs see the same tiles, in the same order, under the same ids.

use crate::error::{Result, ScanError};
use leadscout_core::{Query, Region, Tile, TileId, TilingConfig};

// Tolerance for floating-point spans that are an exact multiple of the tile size.
const EPSILON: f64 = 1e-9;

/// Split `region` into tiles of `tile_size` degrees, row-major from the south-west corner.
///
/// Each tile is grown by `overlap` degrees on every side and clamped to the
/// region. Fails when the grid would exceed `max_tiles`.
pub fn split(region: &Region, tile_size: f64, overlap: f64, max_tiles: usize) -> Result<Vec<Tile>> {
    region
        .validate()
        .map_err(|e| ScanError::InvalidQuery(e.to_string()))?;
    if !(tile_size.is_finite() && tile_size > 0.0) {
        return Err(ScanError::InvalidQuery(format!(
            "tile size must be positive, got {tile_size}"
        )));
    }
    let overlap = if overlap.is_finite() { overlap.max(0.0) } else { 0.0 };

    let rows = steps(region.max_lat - region.min_lat, tile_size);
    let cols = steps(region.max_lon - region.min_lon, tile_size);
    let count = rows.saturating_mul(cols);
    if count > max_tiles {
        return Err(ScanError::InvalidQuery(format!(
            "region needs {count} tiles of {tile_size}°, more than the limit of {max_tiles}"
        )));
    }

    let mut tiles = Vec::with_capacity(count);
    for row in 0..rows {
        let south = region.min_lat + offset(row, tile_size);
        let north = (south + tile_size).min(region.max_lat);
        for col in 0..cols {
            let west = region.min_lon + offset(col, tile_size);
            let east = (west + tile_size).min(region.max_lon);
            tiles.push(Tile {
                id: TileId::grid(row, col),
                min_lat: (south - overlap).max(region.min_lat),
                min_lon: (west - overlap).max(region.min_lon),
                max_lat: (north + overlap).min(region.max_lat),
                max_lon: (east + overlap).min(region.max_lon),
            });
        }
    }
    Ok(tiles)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn steps(span: f64, size: f64) -> usize {
    ((span / size) - EPSILON).ceil().max(1.0) as usize
}

#[allow(clippy::cast_precision_loss)]
fn offset(index: usize, size: f64) -> f64 {
    index as f64 * size
}

/// Decides how a query's search area is covered.
#[derive(Debug, Clone)]
pub struct Tiler {
    config: TilingConfig,
}

impl Tiler {
    /// Create a tiler from configuration.
    #[must_use]
    pub fn new(config: TilingConfig) -> Self {
        Self { config }
    }

    /// Tile size in degrees.
    #[must_use]
    pub fn tile_size(&self) -> f64 {
        self.config.tile_size
    }

    /// Tiles for a query.
    ///
    /// - no region: one city-wide tile
    /// - region no larger than the single-fetch area (or tiling disabled): one tile covering it
    /// - otherwise: the grid from [`split`]
    pub fn plan(&self, query: &Query) -> Result<Vec<Tile>> {
        let Some(region) = &query.region else {
            return Ok(vec![Tile::city_wide()]);
        };
        region
            .validate()
            .map_err(|e| ScanError::InvalidQuery(e.to_string()))?;

        if !self.config.enabled || region.area() <= self.config.max_single_fetch_area {
            return Ok(vec![Tile::from_region(TileId::grid(0, 0), region)]);
        }

        let tiles = split(
            region,
            self.config.tile_size,
            self.config.tile_overlap,
            self.config.max_tiles,
        )?;
        tracing::debug!(tiles = tiles.len(), tile_size = self.config.tile_size, "region tiled");
        Ok(tiles)
    }
}
