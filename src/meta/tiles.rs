
//! Tile, mip map and rip map geometry.
//! All functions are pure and derive the layout of a tiled part
//! from its data window and tile description.

// calculations inspired by
// https://github.com/AcademySoftwareFoundation/openexr/blob/master/OpenEXR/IlmImf/ImfTiledMisc.cpp

use crate::error::*;
use crate::math::*;
use crate::meta::attribute::{IntegerBounds, LevelMode, TileDescription};


/// Locates a tile within the levels of a tiled part.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub struct TileCoordinates {

    /// Index of the tile within its level, not a pixel position.
    pub tile_index: Vec2<usize>,

    /// Index of the mip or rip level.
    pub level_index: Vec2<usize>,
}

/// Compute the number of tiles required to contain all values.
pub fn compute_block_count(full_res: u64, block_size: u64) -> u64 {
    // round up, because if the image is not evenly divisible by the tiles,
    // we add another tile at the end (which is only partially used)
    RoundingMode::Up.divide(full_res, block_size)
}

/// Calculate number of mip levels in a given resolution.
pub fn compute_level_count(round: RoundingMode, full_res: u64) -> usize {
    round.log2(full_res) as usize + 1
}

/// Calculate the size of a single mip level by index. Never smaller than one.
pub fn compute_level_size(round: RoundingMode, full_res: u64, level_index: usize) -> u64 {
    if level_index >= 64 { return 1 }
    round.divide(full_res, 1 << level_index).max(1)
}

/// The number of levels on each axis.
/// Mip maps share one count across both axes.
pub fn level_count(tiles: TileDescription, data_size: Vec2<u64>) -> Vec2<usize> {
    let round = tiles.rounding_mode;

    match tiles.level_mode {
        LevelMode::Singular => Vec2(1, 1),

        LevelMode::MipMap => {
            let count = compute_level_count(round, data_size.width().max(data_size.height()));
            Vec2(count, count)
        },

        LevelMode::RipMap => Vec2(
            compute_level_count(round, data_size.width()),
            compute_level_count(round, data_size.height()),
        ),
    }
}


/// The precomputed tile layout of a tiled part.
/// The per-level arrays contain the x levels followed by the y levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLayout {
    description: TileDescription,
    data_window: IntegerBounds,
    level_count: Vec2<usize>,

    level_sizes: Vec<usize>,
    tile_counts: Vec<usize>,

    /// The first chunk index of each level, in canonical chunk order.
    level_chunk_offsets: Vec<usize>,
    chunk_count: usize,
}

impl TileLayout {

    /// Compute the layout. Fails for degenerate windows or tile sizes.
    pub fn new(description: TileDescription, data_window: IntegerBounds) -> Result<Self> {
        let size = data_window.size();
        if size.width() < 1 || size.height() < 1 {
            return Err(Error::invalid_attribute("degenerate data window"));
        }

        if description.tile_size.width() == 0 || description.tile_size.height() == 0 {
            return Err(Error::invalid_attribute("tile size must be positive"));
        }

        let size = size.map(|value| value as u64);
        let level_count = self::level_count(description, size);
        let tile_size = description.tile_size.map(u64::from);

        let mut level_sizes = Vec::with_capacity(level_count.x() + level_count.y());
        let mut tile_counts = Vec::with_capacity(level_count.x() + level_count.y());

        for (levels, full_res, tile) in [
            (level_count.x(), size.width(), tile_size.width()),
            (level_count.y(), size.height(), tile_size.height()),
        ] {
            for level in 0 .. levels {
                let level_size = compute_level_size(description.rounding_mode, full_res, level);
                level_sizes.push(u64_to_usize(level_size, "level size")?);
                tile_counts.push(u64_to_usize(compute_block_count(level_size, tile), "tile count")?);
            }
        }

        let mut layout = TileLayout {
            description, data_window, level_count,
            level_sizes, tile_counts,
            level_chunk_offsets: Vec::new(),
            chunk_count: 0,
        };

        let mut chunk_count: usize = 0;
        let levels: Vec<Vec2<usize>> = layout.levels().collect();
        layout.level_chunk_offsets.reserve(levels.len());

        for level in levels {
            layout.level_chunk_offsets.push(chunk_count);

            let Vec2(tiles_x, tiles_y) = layout.tile_count(level)?;
            chunk_count = tiles_x.checked_mul(tiles_y)
                .and_then(|tiles| tiles.checked_add(chunk_count))
                .ok_or_else(|| Error::invalid_attribute("tile count overflows"))?;
        }

        layout.chunk_count = chunk_count;
        Ok(layout)
    }

    /// The tile description this layout was computed from.
    pub fn description(&self) -> TileDescription { self.description }

    /// Number of levels on each axis.
    pub fn level_count(&self) -> Vec2<usize> { self.level_count }

    /// Total number of tiles in all levels.
    pub fn chunk_count(&self) -> usize { self.chunk_count }

    /// Iterate all valid level indices in canonical chunk order.
    /// Rip map levels iterate y in the outer loop.
    pub fn levels(&self) -> impl Iterator<Item = Vec2<usize>> {
        let Vec2(count_x, count_y) = self.level_count;
        let mode = self.description.level_mode;

        let (outer, inner) = match mode {
            LevelMode::RipMap => (count_y, count_x),
            LevelMode::MipMap => (count_x, 1),
            LevelMode::Singular => (1, 1),
        };

        (0 .. outer).flat_map(move |outer_index| {
            (0 .. inner).map(move |inner_index| match mode {
                LevelMode::RipMap => Vec2(inner_index, outer_index),
                _ => Vec2(outer_index, outer_index),
            })
        })
    }

    fn validate_level(&self, level: Vec2<usize>) -> UnitResult {
        let valid = level.x() < self.level_count.x() && level.y() < self.level_count.y()
            && (self.description.level_mode == LevelMode::RipMap || level.x() == level.y());

        if valid { Ok(()) }
        else { Err(Error::out_of_range(format!("level index ({}, {})", level.x(), level.y()))) }
    }

    /// The size of a level in pixels.
    pub fn level_size(&self, level: Vec2<usize>) -> Result<Vec2<usize>> {
        self.validate_level(level)?;
        Ok(Vec2(self.level_sizes[level.x()], self.level_sizes[self.level_count.x() + level.y()]))
    }

    /// The number of tiles in a level.
    pub fn tile_count(&self, level: Vec2<usize>) -> Result<Vec2<usize>> {
        self.validate_level(level)?;
        Ok(Vec2(self.tile_counts[level.x()], self.tile_counts[self.level_count.x() + level.y()]))
    }

    fn level_ordinal(&self, level: Vec2<usize>) -> usize {
        match self.description.level_mode {
            LevelMode::Singular => 0,
            LevelMode::MipMap => level.x(),
            LevelMode::RipMap => level.y() * self.level_count.x() + level.x(),
        }
    }

    /// The position of a tile in the chunk offset table.
    pub fn chunk_index(&self, tile: TileCoordinates) -> Result<usize> {
        let Vec2(tiles_x, tiles_y) = self.tile_count(tile.level_index)?;

        if tile.tile_index.x() >= tiles_x || tile.tile_index.y() >= tiles_y {
            return Err(Error::out_of_range(format!(
                "tile index ({}, {})", tile.tile_index.x(), tile.tile_index.y()
            )));
        }

        let level_start = self.level_chunk_offsets[self.level_ordinal(tile.level_index)];
        Ok(level_start + tile.tile_index.y() * tiles_x + tile.tile_index.x())
    }

    /// The tile that is stored at a position in the chunk offset table.
    pub fn tile_coordinates(&self, chunk_index: usize) -> Result<TileCoordinates> {
        if chunk_index >= self.chunk_count {
            return Err(Error::out_of_range("chunk index"));
        }

        // the last level that starts before or at this index
        let ordinal = self.level_chunk_offsets.partition_point(|&start| start <= chunk_index) - 1;
        let level_index = self.levels().nth(ordinal)
            .ok_or_else(|| Error::out_of_range("chunk index"))?;

        let Vec2(tiles_x, _) = self.tile_count(level_index)?;
        let within_level = chunk_index - self.level_chunk_offsets[ordinal];

        Ok(TileCoordinates {
            tile_index: Vec2(within_level % tiles_x, within_level / tiles_x),
            level_index,
        })
    }

    /// The pixel rectangle of a tile, clipped to the data window of its level.
    /// Coordinates are absolute, starting at the data window origin.
    pub fn tile_data_window(&self, tile: TileCoordinates) -> Result<IntegerBounds> {
        self.chunk_index(tile)?; // validate indices

        let level_size = self.level_size(tile.level_index)?;
        let tile_size = self.description.tile_size.map(|size| size as i64);
        let origin = self.data_window.min.map(i64::from);

        let start = Vec2(
            origin.x() + tile.tile_index.x() as i64 * tile_size.x(),
            origin.y() + tile.tile_index.y() as i64 * tile_size.y(),
        );

        let level_end = Vec2(
            origin.x() + level_size.x() as i64 - 1,
            origin.y() + level_size.y() as i64 - 1,
        );

        let end = Vec2(
            (start.x() + tile_size.x() - 1).min(level_end.x()),
            (start.y() + tile_size.y() - 1).min(level_end.y()),
        );

        let to_i32 = |value: i64| i32::try_from(value)
            .map_err(|_| Error::out_of_range("tile coordinate exceeds integer range"));

        Ok(IntegerBounds {
            min: Vec2(to_i32(start.x())?, to_i32(start.y())?),
            max: Vec2(to_i32(end.x())?, to_i32(end.y())?),
        })
    }
}
