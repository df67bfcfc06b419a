
//! The fixed prefix of each chunk record in the file,
//! and the pixel rectangle that a chunk covers.

use smallvec::SmallVec;
use crate::io::*;
use crate::error::*;
use crate::math::*;
use crate::meta::attribute::*;
use crate::meta::part::Part;
use crate::meta::tiles::TileCoordinates;


/// Where a chunk is stored and which pixels it contains.
/// Obtained from a read context for a scan line or a tile,
/// or from a write context before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {

    /// The part that this chunk belongs to.
    pub part_index: usize,

    /// The position of this chunk in the chunk offset table of its part.
    pub chunk_index: usize,

    /// Whether the chunk contains a sample count table.
    pub deep: bool,

    /// How the chunk data is compressed.
    pub compression: Compression,

    /// The absolute pixel position of the first pixel in this chunk.
    pub start: Vec2<i32>,

    /// The number of pixels covered by this chunk, clamped to the data window.
    pub size: Vec2<usize>,

    /// The tile coordinates for tiled parts.
    pub tile: Option<TileCoordinates>,

    /// File position of the first byte of the compressed pixel data.
    pub data_offset: u64,

    /// Byte count of the compressed pixel data.
    pub packed_size: u64,

    /// Byte count of the pixel data after decompression.
    pub unpacked_size: u64,

    /// File position of the compressed sample count table of deep chunks.
    pub sample_table_offset: u64,

    /// Byte count of the compressed sample count table of deep chunks.
    pub sample_table_size: u64,
}

impl ChunkInfo {

    /// The byte count of the sample count table after decompression.
    pub fn unpacked_sample_table_size(&self) -> u64 {
        if self.deep { self.size.area() as u64 * i32::BYTE_SIZE as u64 } else { 0 }
    }

    /// Whether the pixel data is stored without compression.
    pub fn is_stored_raw(&self) -> bool {
        self.packed_size == self.unpacked_size
    }
}


/// The samples of one channel within one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLayout {

    /// The channel name.
    pub name: Text,

    /// The type of the samples in the file.
    pub sample_type: SampleType,

    /// The subsampling of this channel.
    pub sampling: Vec2<i32>,

    /// The number of samples in one line of this channel within the chunk.
    pub width: usize,

    /// The number of lines of this channel within the chunk.
    pub height: usize,
}

impl ChannelLayout {

    /// The byte count of one sample in the file.
    pub fn bytes_per_element(&self) -> usize {
        self.sample_type.bytes_per_sample()
    }

    /// The byte count of all flat samples of this channel within the chunk.
    pub fn byte_size(&self) -> usize {
        self.width * self.height * self.bytes_per_element()
    }

    /// Whether this channel has samples in the specified absolute line.
    pub fn has_line(&self, y: i32) -> bool {
        y.rem_euclid(self.sampling.y()) == 0
    }
}

/// All channel layouts of a chunk, in the order of the channel list.
pub type ChannelLayouts = SmallVec<[ChannelLayout; 4]>;


/// The number of multiples of `sampling` in `start .. start + size`.
pub fn sample_count(start: i32, size: usize, sampling: i32) -> usize {
    if size == 0 { return 0 }

    let sampling = sampling.max(1) as i64;
    let first = (start as i64).div_euclid(sampling) + i64::from((start as i64).rem_euclid(sampling) != 0);
    let last = (start as i64 + size as i64 - 1).div_euclid(sampling);
    (last - first + 1).max(0) as usize
}

/// Compute the samples of each channel within a chunk.
pub fn channel_layouts(channels: &ChannelList, start: Vec2<i32>, size: Vec2<usize>) -> ChannelLayouts {
    channels.list.iter()
        .map(|channel| ChannelLayout {
            name: channel.name.clone(),
            sample_type: channel.sample_type,
            sampling: channel.sampling,
            width: sample_count(start.x(), size.width(), channel.sampling.x()),
            height: sample_count(start.y(), size.height(), channel.sampling.y()),
        })
        .collect()
}

/// The pixel rectangle of a chunk, and its tile coordinates for tiled parts.
pub fn chunk_geometry(part: &Part, chunk_index: usize) -> Result<(Vec2<i32>, Vec2<usize>, Option<TileCoordinates>)> {
    if part.storage().is_tiled() {
        let layout = part.tile_layout_checked()?;
        let tile = layout.tile_coordinates(chunk_index)?;
        let window = layout.tile_data_window(tile)?;
        Ok((window.min, window.size_usize()?, Some(tile)))
    }
    else {
        let (start_y, height) = part.scan_line_chunk_rows(chunk_index)?;
        let data_window = part.data_window();
        Ok((Vec2(data_window.min.x(), start_y), Vec2(data_window.size_usize()?.width(), height), None))
    }
}

/// Chunk information as far as it is known without reading the chunk record.
/// Offsets and packed sizes are zero.
pub fn chunk_info_from_geometry(part: &Part, part_index: usize, chunk_index: usize) -> Result<ChunkInfo> {
    let (start, size, tile) = chunk_geometry(part, chunk_index)?;
    let deep = part.storage().is_deep();

    let unpacked_size = if deep { 0 } else {
        channel_layouts(part.channels()?, start, size).iter()
            .map(|channel| channel.byte_size() as u64).sum()
    };

    Ok(ChunkInfo {
        part_index, chunk_index, deep, tile, start, size, unpacked_size,
        compression: part.compression(),
        data_offset: 0, packed_size: 0,
        sample_table_offset: 0, sample_table_size: 0,
    })
}


/// Offsets must point behind the chunk tables and into the file.
pub fn validate_chunk_offset(offset: u64, chunk_tables_end: u64, file_size: u64) -> Result<u64> {
    if offset < chunk_tables_end || offset >= file_size {
        Err(Error::bad_chunk(format!(
            "chunk offset {} outside of {} .. {}", offset, chunk_tables_end, file_size
        )))
    }
    else {
        Ok(offset)
    }
}

fn map_end_of_file(error: Error) -> Error {
    if error.is_unexpected_end() { Error::bad_chunk("chunk record exceeds the file") }
    else { error }
}

/// Read and validate the record prefix of a chunk at the specified file position.
pub fn read_chunk_info(
    source: &dyn ReadAt, file_size: u64, multipart: bool,
    part: &Part, part_index: usize, chunk_index: usize, offset: u64
) -> Result<ChunkInfo>
{
    let mut info = chunk_info_from_geometry(part, part_index, chunk_index)?;
    let mut read = Tracking::new(SourceReader::new(source, offset));
    read_prefix(&mut read, multipart, &mut info).map_err(map_end_of_file)?;

    let prefix_end = offset + read.byte_position();

    if info.deep {
        info.sample_table_offset = prefix_end;
        info.data_offset = prefix_end + info.sample_table_size;
    }
    else {
        info.data_offset = prefix_end;
    }

    let end = info.data_offset.checked_add(info.packed_size)
        .ok_or_else(|| Error::bad_chunk("chunk size overflows"))?;

    if end > file_size {
        return Err(Error::bad_chunk(format!(
            "chunk {} of part {} ends at byte {} after the end of the file", chunk_index, part_index, end
        )));
    }

    Ok(info)
}

fn read_prefix(read: &mut impl Read, multipart: bool, info: &mut ChunkInfo) -> UnitResult {
    if multipart {
        let stored_part = i32::read(read)?;
        if stored_part as i64 != info.part_index as i64 {
            return Err(Error::bad_chunk(format!("chunk belongs to part {}, not {}", stored_part, info.part_index)));
        }
    }

    match info.tile {
        Some(tile) => {
            let stored = read_tile_coordinates(read)?;
            if stored != Some(tile) {
                return Err(Error::bad_chunk("tile coordinates of chunk do not match its table position"));
            }
        },

        None => {
            let y = i32::read(read)?;
            if y != info.start.y() {
                return Err(Error::bad_chunk(format!("chunk starts at line {}, expected {}", y, info.start.y())));
            }
        },
    }

    if info.deep {
        let table_size = read_size(i64::read(read)?)?;
        let packed_size = read_size(i64::read(read)?)?;
        let unpacked_size = read_size(i64::read(read)?)?;

        if table_size > info.unpacked_sample_table_size() || packed_size > unpacked_size {
            return Err(Error::bad_chunk("deep chunk sizes are inconsistent"));
        }

        info.sample_table_size = table_size;
        info.packed_size = packed_size;
        info.unpacked_size = unpacked_size;
    }
    else {
        let packed_size = read_size(i32::read(read)?.into())?;
        if packed_size > info.unpacked_size {
            return Err(Error::bad_chunk(format!(
                "chunk has {} bytes, but at most {} are expected", packed_size, info.unpacked_size
            )));
        }

        info.packed_size = packed_size;
    }

    Ok(())
}

fn read_size(size: i64) -> Result<u64> {
    u64::try_from(size).map_err(|_| Error::bad_chunk("negative chunk size"))
}

fn read_tile_coordinates(read: &mut impl Read) -> Result<Option<TileCoordinates>> {
    let mut values = [0_i32; 4];
    i32::read_slice(read, &mut values)?;

    if values.iter().any(|&value| value < 0) {
        return Ok(None);
    }

    Ok(Some(TileCoordinates {
        tile_index: Vec2(values[0] as usize, values[1] as usize),
        level_index: Vec2(values[2] as usize, values[3] as usize),
    }))
}

/// Read only the coordinates of a chunk record of a single-part file
/// and compute the chunk index they belong to.
pub fn read_chunk_index(source: &dyn ReadAt, part: &Part, offset: u64) -> Result<usize> {
    let mut read = SourceReader::new(source, offset);

    if part.storage().is_tiled() {
        let tile = read_tile_coordinates(&mut read).map_err(map_end_of_file)?
            .ok_or_else(|| Error::bad_chunk("negative tile coordinates"))?;

        part.tile_chunk_index(tile)
    }
    else {
        let y = i32::read(&mut read).map_err(map_end_of_file)?;
        part.scan_line_chunk_index(y)
    }
}

/// Write the record prefix of a chunk, using the sizes stored in the info.
pub fn write_prefix(write: &mut impl Write, multipart: bool, info: &ChunkInfo) -> UnitResult {
    if multipart {
        usize_to_i32(info.part_index, "part index")?.write(write)?;
    }

    match info.tile {
        Some(tile) => {
            for value in [ tile.tile_index.x(), tile.tile_index.y(), tile.level_index.x(), tile.level_index.y() ] {
                usize_to_i32(value, "tile coordinate")?.write(write)?;
            }
        },

        None => info.start.y().write(write)?,
    }

    if info.deep {
        for size in [ info.sample_table_size, info.packed_size, info.unpacked_size ] {
            i64::try_from(size).map_err(|_| Error::out_of_range("deep chunk size"))?.write(write)?;
        }
    }
    else {
        i32::try_from(info.packed_size).map_err(|_| Error::out_of_range("chunk size"))?.write(write)?;
    }

    Ok(())
}
