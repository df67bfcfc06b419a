
//! A single part of a file: its attributes,
//! shortcuts to the required attributes, and the chunk geometry derived from them.

use std::sync::OnceLock;
use crate::error::*;
use crate::io::Data;
use crate::math::*;
use crate::meta::attribute::*;
use crate::meta::attribute_list::AttributeList;
use crate::meta::opaque::OpaqueRegistry;
use crate::meta::tiles::{TileLayout, TileCoordinates};


/// How the pixels of a part are stored.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Storage {

    /// Flat pixels, stored in blocks of lines.
    ScanLine,

    /// Flat pixels, stored in tiles, optionally with mip or rip levels.
    Tiled,

    /// A variable number of samples per pixel, stored in blocks of lines.
    DeepScanLine,

    /// A variable number of samples per pixel, stored in tiles.
    DeepTiled,
}

impl Storage {

    /// The value of the `type` attribute for this storage.
    pub fn type_name(self) -> &'static [u8] {
        match self {
            Storage::ScanLine => b"scanlineimage",
            Storage::Tiled => b"tiledimage",
            Storage::DeepScanLine => b"deepscanline",
            Storage::DeepTiled => b"deeptile",
        }
    }

    /// Parse the value of a `type` attribute.
    pub fn from_type_name(text: &TextSlice) -> Option<Self> {
        [ Storage::ScanLine, Storage::Tiled, Storage::DeepScanLine, Storage::DeepTiled ]
            .into_iter().find(|storage| storage.type_name() == text)
    }

    /// Whether chunks are tiles.
    pub fn is_tiled(self) -> bool {
        matches!(self, Storage::Tiled | Storage::DeepTiled)
    }

    /// Whether pixels have a variable number of samples.
    pub fn is_deep(self) -> bool {
        matches!(self, Storage::DeepScanLine | Storage::DeepTiled)
    }
}


/// The attributes that are looked up by the library itself.
/// Each has a mandated type.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum Required {
    Channels,
    Compression,
    DataWindow,
    DisplayWindow,
    LineOrder,
    PixelAspectRatio,
    ScreenWindowCenter,
    ScreenWindowWidth,
    Tiles,
    Name,
    Type,
    Version,
    ChunkCount,
}

impl Required {

    /// All required attributes, in slot order.
    pub const ALL: [Required; 13] = [
        Required::Channels, Required::Compression, Required::DataWindow, Required::DisplayWindow,
        Required::LineOrder, Required::PixelAspectRatio, Required::ScreenWindowCenter,
        Required::ScreenWindowWidth, Required::Tiles, Required::Name, Required::Type,
        Required::Version, Required::ChunkCount,
    ];

    /// The attribute name.
    pub fn name(self) -> &'static [u8] {
        match self {
            Required::Channels => b"channels",
            Required::Compression => b"compression",
            Required::DataWindow => b"dataWindow",
            Required::DisplayWindow => b"displayWindow",
            Required::LineOrder => b"lineOrder",
            Required::PixelAspectRatio => b"pixelAspectRatio",
            Required::ScreenWindowCenter => b"screenWindowCenter",
            Required::ScreenWindowWidth => b"screenWindowWidth",
            Required::Tiles => b"tiles",
            Required::Name => b"name",
            Required::Type => b"type",
            Required::Version => b"version",
            Required::ChunkCount => b"chunkCount",
        }
    }

    /// The type name that the attribute must have.
    pub fn type_name(self) -> &'static [u8] {
        use crate::meta::attribute::type_names as ty;

        match self {
            Required::Channels => ty::CHANNEL_LIST,
            Required::Compression => ty::COMPRESSION,
            Required::DataWindow | Required::DisplayWindow => ty::I32BOX2,
            Required::LineOrder => ty::LINE_ORDER,
            Required::PixelAspectRatio | Required::ScreenWindowWidth => ty::F32,
            Required::ScreenWindowCenter => ty::F32VEC2,
            Required::Tiles => ty::TILES,
            Required::Name | Required::Type => ty::TEXT,
            Required::Version | Required::ChunkCount => ty::I32,
        }
    }

    /// The required attribute with the specified name, if any.
    pub fn from_name(name: &TextSlice) -> Option<Self> {
        Self::ALL.into_iter().find(|required| required.name() == name)
    }

    /// Returns a `TypeMismatch` error if the type name is not the mandated one.
    pub fn check_type(self, type_name: &TextSlice) -> UnitResult {
        if type_name == self.type_name() { Ok(()) }
        else {
            Err(Error::type_mismatch(format!(
                "attribute `{}` must have type `{}`, not `{}`",
                String::from_utf8_lossy(self.name()),
                String::from_utf8_lossy(self.type_name()),
                String::from_utf8_lossy(type_name),
            )))
        }
    }

    fn missing(self) -> Error {
        Error::missing_attribute(String::from_utf8_lossy(self.name()).into_owned())
    }
}


/// One part of a file.
/// Mutating the attributes invalidates the derived geometry
/// until [`Part::compute_geometry`] is called again.
#[derive(Debug, Clone)]
pub struct Part {
    storage: Storage,
    attributes: AttributeList,

    /// Creation index of each required attribute.
    slots: [Option<usize>; 13],

    data_window: IntegerBounds,
    compression: Compression,
    line_order: LineOrder,
    tile_layout: Option<TileLayout>,
    lines_per_chunk: usize,
    unpacked_size_per_chunk: u64,

    /// Minus one while unknown.
    chunk_count: i64,

    pub(crate) chunk_table_offset: u64,
    pub(crate) chunk_table: OnceLock<Box<[u64]>>,
}

impl Part {

    /// An empty part without any attributes.
    pub fn new(storage: Storage) -> Self {
        Self::from_attributes(storage, AttributeList::default())
    }

    /// A part with the attributes that every part requires.
    /// The display window equals the data window.
    pub fn with_required(storage: Storage, channels: ChannelList, data_window: IntegerBounds, compression: Compression) -> Result<Self> {
        let mut part = Part::new(storage);
        part.set_attribute("channels", AttributeValue::ChannelList(channels))?;
        part.set_attribute("compression", AttributeValue::Compression(compression))?;
        part.set_attribute("dataWindow", AttributeValue::IntegerBounds(data_window))?;
        part.set_attribute("displayWindow", AttributeValue::IntegerBounds(data_window))?;
        part.set_attribute("lineOrder", AttributeValue::LineOrder(LineOrder::Increasing))?;
        part.set_attribute("pixelAspectRatio", AttributeValue::F32(1.0))?;
        part.set_attribute("screenWindowCenter", AttributeValue::FloatVec2(Vec2(0.0, 0.0)))?;
        part.set_attribute("screenWindowWidth", AttributeValue::F32(1.0))?;
        Ok(part)
    }

    pub(crate) fn from_attributes(storage: Storage, attributes: AttributeList) -> Self {
        let mut part = Part {
            storage, attributes,
            slots: [None; 13],
            data_window: IntegerBounds::default(),
            compression: Compression::Uncompressed,
            line_order: LineOrder::Increasing,
            tile_layout: None,
            lines_per_chunk: 0,
            unpacked_size_per_chunk: 0,
            chunk_count: -1,
            chunk_table_offset: 0,
            chunk_table: OnceLock::new(),
        };

        part.refresh();
        part
    }

    /// How the pixels of this part are stored.
    pub fn storage(&self) -> Storage { self.storage }

    pub(crate) fn set_storage(&mut self, storage: Storage) {
        self.storage = storage;
        self.invalidate();
    }

    /// All attributes, including the required ones.
    pub fn attributes(&self) -> &AttributeList { &self.attributes }

    /// Look up any attribute by name.
    pub fn find(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.find_by_name(name.as_bytes()).map(|attribute| &attribute.value)
    }

    /// The value of a required attribute, if present.
    pub fn required(&self, required: Required) -> Option<&AttributeValue> {
        self.slots[required as usize]
            .and_then(|index| self.attributes.get(index))
            .map(|attribute| &attribute.value)
    }

    fn require(&self, required: Required) -> Result<&AttributeValue> {
        self.required(required).ok_or_else(|| required.missing())
    }

    /// Insert or replace an attribute.
    /// Required attributes must have their mandated type.
    pub fn set_attribute(&mut self, name: impl Into<Text>, value: AttributeValue) -> UnitResult {
        let name = name.into();

        if let Some(required) = Required::from_name(name.as_slice()) {
            required.check_type(value.kind_name())?;
        }

        self.attributes.insert(name, value)?;
        self.refresh();
        Ok(())
    }

    /// Add a default valued attribute by type name, or do nothing if it already exists with that type.
    pub fn add_attribute_by_type(&mut self, name: &str, type_name: &str, extra_bytes: usize) -> Result<&Attribute> {
        if let Some(required) = Required::from_name(name.as_bytes()) {
            required.check_type(type_name.as_bytes())?;
        }

        self.attributes.add_by_type(name.as_bytes(), type_name.as_bytes(), extra_bytes)?;
        self.refresh();

        self.attributes.find_by_name(name.as_bytes())
            .ok_or_else(|| Error::Unknown("inserted attribute not found".into()))
    }

    /// Remove an attribute, returning it if it existed.
    pub fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
        let removed = self.attributes.remove(name.as_bytes());
        if removed.is_some() { self.refresh(); }
        removed
    }

    /// Modify an attribute without changing its type. Used by the validator.
    pub(crate) fn replace_text(&mut self, required: Required, text: Text) -> UnitResult {
        let attribute = self.attributes.find_by_name_mut(required.name())
            .ok_or_else(|| required.missing())?;

        attribute.value = AttributeValue::Text(text);
        Ok(())
    }

    /// Serialize the unpacked values of custom attribute types.
    pub(crate) fn pack_opaque_attributes(&mut self, registry: &OpaqueRegistry) -> UnitResult {
        for value in self.attributes.values_mut() {
            if let AttributeValue::Opaque(opaque) = value {
                registry.pack(opaque)?;
            }
        }

        Ok(())
    }

    /// The maximum name length of the attribute list.
    pub fn max_name_length(&self) -> usize { self.attributes.max_name_length() }

    fn refresh(&mut self) {
        for required in Required::ALL {
            self.slots[required as usize] = self.attributes.index_of(required.name());
        }

        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.chunk_count = -1;
        self.tile_layout = None;
        self.chunk_table = OnceLock::new();
    }


    /// The channels of this part.
    pub fn channels(&self) -> Result<&ChannelList> {
        self.require(Required::Channels)?.to_channel_list()
    }

    /// The display window, which may differ from the data window.
    pub fn display_window(&self) -> Result<IntegerBounds> {
        self.require(Required::DisplayWindow)?.to_integer_bounds()
    }

    /// The aspect ratio of each pixel.
    pub fn pixel_aspect_ratio(&self) -> Result<f32> {
        self.require(Required::PixelAspectRatio)?.to_f32()
    }

    /// Part of the perspective projection.
    pub fn screen_window_center(&self) -> Result<Vec2<f32>> {
        self.require(Required::ScreenWindowCenter)?.to_float_vec2()
    }

    /// Part of the perspective projection.
    pub fn screen_window_width(&self) -> Result<f32> {
        self.require(Required::ScreenWindowWidth)?.to_f32()
    }

    /// The tile description, present for tiled parts.
    pub fn tile_description(&self) -> Option<TileDescription> {
        self.required(Required::Tiles).and_then(|value| value.to_tile_description().ok())
    }

    /// The name of this part, required for multi-part and deep files.
    pub fn name(&self) -> Option<&Text> {
        self.required(Required::Name).and_then(|value| value.to_text().ok())
    }

    /// The value of the `type` attribute.
    pub fn type_attribute(&self) -> Option<&Text> {
        self.required(Required::Type).and_then(|value| value.to_text().ok())
    }

    /// The deep data version.
    pub fn version(&self) -> Option<i32> {
        self.required(Required::Version).and_then(|value| value.to_i32().ok())
    }

    /// The chunk count stored in the file, which may disagree with the computed one.
    pub fn declared_chunk_count(&self) -> Option<i32> {
        self.required(Required::ChunkCount).and_then(|value| value.to_i32().ok())
    }


    /// Compute the chunk layout from the required attributes.
    pub fn compute_geometry(&mut self) -> UnitResult {
        self.invalidate();

        let data_window = self.require(Required::DataWindow)?.to_integer_bounds()?;
        let compression = self.require(Required::Compression)?.to_compression()?;
        let line_order = self.require(Required::LineOrder)?.to_line_order()?;
        let size = data_window.size_usize()?;

        let mut bytes_per_line = Vec::new();
        for channel in &self.channels()?.list {
            if channel.sampling.x() < 1 || channel.sampling.y() < 1 {
                return Err(Error::invalid_attribute(format!("channel `{}` has invalid sampling", channel.name)));
            }

            bytes_per_line.push((channel.sample_type.bytes_per_sample() as u64, channel.sampling.map(|s| s as u64)));
        }

        let (tile_layout, lines_per_chunk, chunk_count, unpacked_size_per_chunk) = if self.storage.is_tiled() {
            let description = self.tile_description()
                .ok_or_else(|| Required::Tiles.missing())?;

            let layout = TileLayout::new(description, data_window)?;
            let tile_size = description.tile_size.map(u64::from);

            let unpacked = bytes_per_line.iter()
                .map(|&(bytes, _)| bytes * tile_size.area())
                .sum::<u64>();

            let chunk_count = layout.chunk_count();
            (Some(layout), tile_size.height() as usize, chunk_count, unpacked)
        }
        else {
            let lines_per_chunk = if self.storage.is_deep() { 1 } else { compression.scan_lines_per_block() };
            let chunk_count = RoundingMode::Up.divide(size.height() as u64, lines_per_chunk as u64);
            let lines = lines_per_chunk as u64;

            let unpacked = bytes_per_line.iter()
                .map(|&(bytes, sampling)| {
                    let samples_x = RoundingMode::Up.divide(size.width() as u64, sampling.x());
                    let samples_y = if sampling.y() > 1 { RoundingMode::Up.divide(lines, sampling.y()) } else { lines };
                    bytes * samples_x * samples_y
                })
                .sum::<u64>();

            (None, lines_per_chunk, u64_to_usize(chunk_count, "chunk count")?, unpacked)
        };

        self.data_window = data_window;
        self.compression = compression;
        self.line_order = line_order;
        self.tile_layout = tile_layout;
        self.lines_per_chunk = lines_per_chunk;
        self.unpacked_size_per_chunk = unpacked_size_per_chunk;
        self.chunk_count = i64::try_from(chunk_count).map_err(|_| Error::invalid_attribute("too many chunks"))?;
        Ok(())
    }

    fn geometry_known(&self) -> Result<usize> {
        usize::try_from(self.chunk_count)
            .map_err(|_| Error::invalid_argument("chunk layout has not been computed"))
    }

    /// The number of chunks, or minus one if unknown.
    pub fn chunk_count(&self) -> i64 { self.chunk_count }

    /// The data window as of the last geometry computation.
    pub fn data_window(&self) -> IntegerBounds { self.data_window }

    /// The compression as of the last geometry computation.
    pub fn compression(&self) -> Compression { self.compression }

    /// The line order as of the last geometry computation.
    pub fn line_order(&self) -> LineOrder { self.line_order }

    /// The number of lines in a full chunk. For tiles, the tile height.
    pub fn lines_per_chunk(&self) -> usize { self.lines_per_chunk }

    /// The upper bound for the unpacked byte count of any chunk.
    pub fn unpacked_size_per_chunk(&self) -> u64 { self.unpacked_size_per_chunk }

    /// The tile layout of a tiled part.
    pub fn tile_layout(&self) -> Option<&TileLayout> { self.tile_layout.as_ref() }

    /// The file position of the chunk offset table of this part.
    pub fn chunk_table_offset(&self) -> u64 { self.chunk_table_offset }


    /// The index of the scan line chunk that contains the line.
    /// Decreasing line order mirrors the index.
    pub fn scan_line_chunk_index(&self, y: i32) -> Result<usize> {
        if self.storage.is_tiled() { return Err(Error::ScanlineApiOnTiledFile) }
        let chunk_count = self.geometry_known()?;

        if y < self.data_window.min.y() || y > self.data_window.max.y() {
            return Err(Error::out_of_range(format!("line {} outside of data window", y)));
        }

        let forward = (y as i64 - self.data_window.min.y() as i64) as usize / self.lines_per_chunk;

        Ok(match self.line_order {
            LineOrder::Decreasing => chunk_count - 1 - forward,
            _ => forward,
        })
    }

    /// The first line and the line count of a scan line chunk, clamped to the data window.
    pub fn scan_line_chunk_rows(&self, chunk_index: usize) -> Result<(i32, usize)> {
        if self.storage.is_tiled() { return Err(Error::ScanlineApiOnTiledFile) }
        let chunk_count = self.geometry_known()?;

        if chunk_index >= chunk_count {
            return Err(Error::out_of_range(format!("chunk index {}", chunk_index)));
        }

        let forward = match self.line_order {
            LineOrder::Decreasing => chunk_count - 1 - chunk_index,
            _ => chunk_index,
        };

        let start = self.data_window.min.y() as i64 + (forward * self.lines_per_chunk) as i64;
        let end = (start + self.lines_per_chunk as i64 - 1).min(self.data_window.max.y() as i64);
        let start = i32::try_from(start).map_err(|_| Error::out_of_range("line index"))?;
        Ok((start, (end - start as i64 + 1) as usize))
    }

    /// The index of a tile in the chunk offset table.
    pub fn tile_chunk_index(&self, tile: TileCoordinates) -> Result<usize> {
        self.tile_layout_checked()?.chunk_index(tile)
    }

    /// The layout of a tiled part, or the matching error for scan line parts.
    pub(crate) fn tile_layout_checked(&self) -> Result<&TileLayout> {
        if !self.storage.is_tiled() { return Err(Error::TiledApiOnScanlineFile) }
        self.geometry_known()?;
        self.tile_layout.as_ref().ok_or_else(|| Error::invalid_argument("chunk layout has not been computed"))
    }

    /// The size of the chunk offset table in bytes.
    pub fn chunk_table_byte_size(&self) -> Result<u64> {
        Ok(self.geometry_known()? as u64 * u64::BYTE_SIZE as u64)
    }
}
