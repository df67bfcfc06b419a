//! Contains all meta data attribute values.
//! Each part can have any number of attributes, including custom attributes.

use smallvec::SmallVec;
use std::any::Any;
use std::sync::Arc;
use std::borrow::Borrow;
use std::hash::{Hash, Hasher};
use bit_field::BitField;

use crate::io::*;
use crate::meta::sequence_end;
use crate::error::*;
use crate::math::{RoundingMode, Vec2};
pub use crate::compression::Compression;


/// Contains one of all possible attribute values.
/// Includes a variant for custom attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {

    /// 2D integer rectangle (`box2i`).
    IntegerBounds(IntegerBounds),

    /// 2D float rectangle (`box2f`).
    FloatRect(FloatRect),

    /// Channel meta data (`chlist`).
    ChannelList(ChannelList),

    /// Color space definition.
    Chromaticities(Chromaticities),

    /// Compression method of a part.
    Compression(Compression),

    /// 64-bit float (`double`).
    F64(f64),

    /// This image is an environment map.
    EnvironmentMap(EnvironmentMap),

    /// 32-bit float.
    F32(f32),

    /// A list of 32-bit floats.
    FloatVector(Vec<f32>),

    /// 32-bit signed integer.
    I32(i32),

    /// Film roll information.
    KeyCode(KeyCode),

    /// Order of the chunks in the file.
    LineOrder(LineOrder),

    /// A 3x3 matrix of floats.
    Matrix3x3(Matrix3x3),

    /// A 3x3 matrix of doubles.
    DoubleMatrix3x3(DoubleMatrix3x3),

    /// A 4x4 matrix of floats.
    Matrix4x4(Matrix4x4),

    /// A 4x4 matrix of doubles.
    DoubleMatrix4x4(DoubleMatrix4x4),

    /// 8-bit rgba Preview of the image.
    Preview(Preview),

    /// An integer dividend and divisor.
    Rational(Rational),

    /// A string of bytes.
    Text(Text),

    /// List of texts.
    TextVector(Vec<Text>),

    /// How to tile up the image.
    TileDescription(TileDescription),

    /// Timepoint and more.
    TimeCode(TimeCode),

    /// 2D integer vector.
    IntVec2(Vec2<i32>),

    /// 2D float vector.
    FloatVec2(Vec2<f32>),

    /// 2D double vector.
    DoubleVec2(Vec2<f64>),

    /// 3D integer vector.
    IntVec3((i32, i32, i32)),

    /// 3D float vector.
    FloatVec3((f32, f32, f32)),

    /// 3D double vector.
    DoubleVec3((f64, f64, f64)),

    /// An attribute of a type that is not built into this crate.
    Opaque(OpaqueValue),
}

/// An attribute name together with its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {

    /// Unique within a part.
    pub name: Text,

    /// The value, which also determines the type name.
    pub value: AttributeValue,
}

/// The raw bytes of an attribute with a type unknown to this crate.
/// A registered [`crate::meta::opaque::OpaqueHandler`] may provide an unpacked value.
#[derive(Clone)]
pub struct OpaqueValue {

    /// The name of the type this attribute is an instance of.
    pub kind: Text,

    /// The value, stored in little-endian byte order.
    pub bytes: Vec<u8>,

    /// The value produced by a registered handler, if any.
    pub unpacked: Option<Arc<dyn Any + Send + Sync>>,
}

/// A byte array with each byte being a char.
/// Names are usually ascii, but any byte except zero is stored as-is.
#[derive(Clone, PartialEq, Ord, PartialOrd, Default)] // hash implemented manually
pub struct Text {
    bytes: TextBytes,
}

/// The raw bytes that make up a string in an exr file.
// will mostly be "R", "G", "B" or "deepscanline"
pub type TextBytes = SmallVec<[u8; 24]>;

/// A byte slice, interpreted as text.
pub type TextSlice = [u8];

/// A rectangle of integer pixel coordinates.
/// Both `min` and `max` are inclusive, as stored in the file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct IntegerBounds {

    /// The top left corner.
    pub min: Vec2<i32>,

    /// The bottom right corner, inclusive.
    pub max: Vec2<i32>,
}

/// A rectangle of float coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[allow(missing_docs)]
pub struct FloatRect {
    pub min: Vec2<f32>,
    pub max: Vec2<f32>,
}

/// A list of channels, sorted by name.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ChannelList {

    /// The channels, sorted alphabetically.
    pub list: SmallVec<[ChannelDescription; 5]>,
}

/// A single channel of a part.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ChannelDescription {

    /// One of "R", "G", or "B" most of the time.
    pub name: Text,

    /// U32, F16 or F32.
    pub sample_type: SampleType,

    /// This attribute only tells lossy compression methods
    /// whether this value should be quantized exponentially or linearly.
    pub quantize_linearly: bool,

    /// How many of the samples are skipped compared to the other channels.
    /// Kept signed so that invalid files can be reported instead of wrapped.
    pub sampling: Vec2<i32>,
}

/// The type of samples in a channel.
#[derive(Clone, Debug, Eq, PartialEq, Copy, Hash)]
pub enum SampleType {

    /// 32-bit unsigned integer.
    U32,

    /// 16-bit float.
    F16,

    /// 32-bit float.
    F32,
}

/// The color space of the pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub struct Chromaticities {
    pub red: Vec2<f32>,
    pub green: Vec2<f32>,
    pub blue: Vec2<f32>,
    pub white: Vec2<f32>,
}

/// If this attribute is present, it describes how this texture should be projected onto an environment.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EnvironmentMap {

    /// This image is an environment map projected like a world map.
    LatitudeLongitude,

    /// This image contains the six sides of a cube.
    Cube,
}

/// Uniquely identifies a motion picture film frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
#[allow(missing_docs)]
pub struct KeyCode {
    pub film_manufacturer_code: i32,
    pub film_type: i32,
    pub film_roll_prefix: i32,
    pub count: i32,
    pub perforation_offset: i32,
    pub perforations_per_frame: i32,
    pub perforations_per_count: i32,
}

/// In what order the chunks of a part are stored in the file.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum LineOrder {

    /// The chunk with the smallest y coordinate comes first.
    Increasing,

    /// The chunk with the largest y coordinate comes first.
    Decreasing,

    /// Chunks are stored in any order.
    Unspecified,
}

impl Default for LineOrder {
    fn default() -> Self { LineOrder::Increasing }
}

/// A small `rgba` image of `i8` values that approximates the real exr image.
#[derive(Clone, Eq, PartialEq, Hash, Default)]
pub struct Preview {

    /// The dimensions of the preview image.
    pub size: Vec2<u32>,

    /// An array with a length of 4 × width × height.
    /// The pixels are stored in `LineOrder::Increasing`.
    /// Each pixel consists of the four `u8` values red, green, blue, alpha.
    pub pixel_data: Vec<u8>,
}

/// Describes how the tiles of a part are laid out.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TileDescription {

    /// The size of each tile.
    /// Stays the same number of pixels across all levels.
    pub tile_size: Vec2<u32>,

    /// Whether to also store smaller versions of the image.
    pub level_mode: LevelMode,

    /// Whether to round up or down when calculating Mip/Rip levels.
    pub rounding_mode: RoundingMode,
}

/// Whether to also store increasingly smaller versions of the original image.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum LevelMode {

    /// Only a single level.
    Singular,

    /// Levels with a similar aspect ratio.
    MipMap,

    /// Levels with all possible aspect ratios.
    RipMap,
}

/// Contains time information for this frame within a sequence.
/// Also defined methods to compile this information into a
/// `TV60`, `TV50` or `Film24` bit sequence, packed into `u32`.
///
/// Satisfies the [SMPTE standard 12M-1999](https://en.wikipedia.org/wiki/SMPTE_timecode).
#[derive(Copy, Debug, Clone, Eq, PartialEq, Hash, Default)]
pub struct TimeCode {

    /// Hours 0 - 23 are valid.
    pub hours: u8,

    /// Minutes 0 - 59 are valid.
    pub minutes: u8,

    /// Seconds 0 - 59 are valid.
    pub seconds: u8,

    /// Frame Indices 0 - 29 are valid.
    pub frame: u8,

    /// Whether this is a drop frame.
    pub drop_frame: bool,

    /// Whether this is a color frame.
    pub color_frame: bool,

    /// Field Phase.
    pub field_phase: bool,

    /// Flags for `TimeCode.binary_groups`.
    pub binary_group_flags: [bool; 3],

    /// The user-defined control codes.
    /// Every entry in this array can use at most 3 bits.
    pub binary_groups: [u8; 8]
}

/// A rational number `(numerator, denominator)`.
pub type Rational = (i32, u32);

/// A 3x3 matrix of floats, row major.
pub type Matrix3x3 = [f32; 3*3];

/// A 3x3 matrix of doubles, row major.
pub type DoubleMatrix3x3 = [f64; 3*3];

/// A 4x4 matrix of floats, row major.
pub type Matrix4x4 = [f32; 4*4];

/// A 4x4 matrix of doubles, row major.
pub type DoubleMatrix4x4 = [f64; 4*4];


fn invalid_type() -> Error {
    Error::type_mismatch("attribute value has a different type")
}


impl Text {

    /// Create a `Text` from the utf-8 bytes of a string.
    pub fn new(string: impl AsRef<str>) -> Self {
        Self::from_slice_unchecked(string.as_ref().as_bytes())
    }

    /// Create a `Text` from a slice of bytes,
    /// without checking any of the bytes.
    pub fn from_slice_unchecked(text: &TextSlice) -> Self {
        Self::from_bytes_unchecked(SmallVec::from_slice(text))
    }

    /// Create a `Text` from the specified bytes object,
    /// without checking any of the bytes.
    pub fn from_bytes_unchecked(bytes: TextBytes) -> Self {
        Text { bytes }
    }

    /// The internal bytes this text is made of.
    pub fn as_slice(&self) -> &TextSlice {
        self.bytes.as_slice()
    }

    /// The underlying bytes that represent this text.
    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// The number of bytes.
    pub fn len(&self) -> usize { self.bytes.len() }

    /// Whether this text has no bytes.
    pub fn is_empty(&self) -> bool { self.bytes.is_empty() }

    /// Check whether this text can be used as an attribute name, attribute type name, or channel name.
    pub fn validate_name(&self, max_length: usize) -> UnitResult {
        Self::validate_name_bytes(self.as_slice(), max_length)
    }

    /// Names must not be empty, must not exceed the maximum length,
    /// and must not contain control characters.
    pub fn validate_name_bytes(text: &TextSlice, max_length: usize) -> UnitResult {
        if text.is_empty() {
            return Err(Error::invalid_argument("name must not be empty"));
        }

        if text.len() > max_length {
            return Err(Error::name_too_long(format!(
                "`{}` has {} bytes, but at most {} are allowed",
                String::from_utf8_lossy(text), text.len(), max_length
            )));
        }

        if text.iter().any(|&byte| byte < 0x20 || byte == 0x7f) {
            return Err(Error::invalid_attribute(format!(
                "name `{}` contains control characters", String::from_utf8_lossy(text)
            )));
        }

        Ok(())
    }

    /// The byte count this string would occupy if it were encoded as a null-terminated string.
    pub fn null_terminated_byte_size(&self) -> usize {
        self.bytes.len() + sequence_end::byte_size()
    }

    /// The byte count this string would occupy if it were encoded as a size-prefixed string.
    pub fn i32_sized_byte_size(&self) -> usize {
        self.bytes.len() + i32::BYTE_SIZE
    }

    /// Write the length of a string and then the contents with that length.
    pub fn write_i32_sized<W: Write>(&self, write: &mut W) -> UnitResult {
        i32::write(usize_to_i32(self.bytes.len(), "text length")?, write)?;
        u8::write_slice(write, self.bytes.as_slice())
    }

    /// Read the length of a string and then the contents with that length.
    pub fn read_i32_sized<R: Read>(read: &mut R, max_size: usize) -> Result<Self> {
        let size = i32_to_usize(i32::read(read)?, "text length")?;
        Ok(Text::from_bytes_unchecked(SmallVec::from_vec(u8::read_vec(read, size, 1024, Some(max_size), "text attribute length")?)))
    }

    /// Write the string contents and a null-terminator.
    pub fn write_null_terminated<W: Write>(&self, write: &mut W) -> UnitResult {
        debug_assert!(!self.bytes.is_empty(), "text is empty bug"); // required to avoid mixup with "sequence_end"
        u8::write_slice(write, self.bytes.as_slice())?;
        sequence_end::write(write)
    }

    /// Read a string until the null-terminator is found. Then skips the null-terminator.
    /// Returns `NameTooLong` if more than `max_length` bytes precede the terminator.
    pub fn read_null_terminated<R: Read>(read: &mut R, max_length: usize) -> Result<Self> {
        let mut bytes = TextBytes::new();

        loop {
            match u8::read(read)? {
                0 => break,
                non_terminator => bytes.push(non_terminator),
            }

            if bytes.len() > max_length {
                return Err(Error::name_too_long(format!(
                    "`{}...` exceeds {} bytes", String::from_utf8_lossy(&bytes[..max_length.min(16)]), max_length
                )))
            }
        }

        Ok(Text { bytes })
    }

    /// The number of texts can be inferred from the total attribute size.
    fn read_vec_of_i32_sized(read: &mut impl Read, total_byte_size: usize) -> Result<Vec<Text>> {
        let mut result = Vec::with_capacity(2);
        let mut processed_bytes = 0;

        while processed_bytes < total_byte_size {
            let remaining = total_byte_size - processed_bytes;
            let size = i32_to_usize(i32::read(read)?, "text length")?;
            if size + i32::BYTE_SIZE > remaining {
                return Err(Error::size_mismatch("string vector entry exceeds attribute size"))
            }

            let bytes = u8::read_vec(read, size, 1024, None, "string vector entry")?;
            processed_bytes += i32::BYTE_SIZE + size;
            result.push(Text::from_bytes_unchecked(SmallVec::from_vec(bytes)));
        }

        // the expected byte size did not match the actual text byte size
        if processed_bytes != total_byte_size {
            return Err(Error::size_mismatch("string vector byte size"))
        }

        Ok(result)
    }

    fn write_vec_of_i32_sized_texts<W: Write>(write: &mut W, texts: &[Text]) -> UnitResult {
        for text in texts {
            text.write_i32_sized(write)?;
        }

        Ok(())
    }
}

impl PartialEq<str> for Text {
    fn eq(&self, other: &str) -> bool {
        self.bytes() == other.as_bytes()
    }
}

impl PartialEq<Text> for str {
    fn eq(&self, other: &Text) -> bool {
        other.bytes() == self.as_bytes()
    }
}

impl Eq for Text {}

impl Borrow<TextSlice> for Text {
    fn borrow(&self) -> &TextSlice {
        self.as_slice()
    }
}

// forwarding implementation. guarantees `text.borrow().hash() == text.hash()` (required for Borrow)
impl Hash for Text {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state)
    }
}

impl<'s> From<&'s str> for Text {
    fn from(str: &'s str) -> Self {
        Text::new(str)
    }
}

impl From<Text> for String {
    fn from(text: Text) -> Self {
        text.to_string()
    }
}

impl ::std::fmt::Debug for Text {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(f, "exr::Text(\"{}\")", self)
    }
}

// automatically implements to_string for us
impl ::std::fmt::Display for Text {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.bytes()))
    }
}


impl IntegerBounds {

    /// Create a box from its inclusive corners.
    pub fn new(min: impl Into<Vec2<i32>>, max: impl Into<Vec2<i32>>) -> Self {
        Self { min: min.into(), max: max.into() }
    }

    /// Create a box with a size starting at zero.
    pub fn from_dimensions(width: i32, height: i32) -> Self {
        Self::new(Vec2(0, 0), Vec2(width - 1, height - 1))
    }

    /// Width and height, computed without overflow.
    /// Negative for degenerate boxes.
    pub fn size(self) -> Vec2<i64> {
        Vec2(
            self.max.x() as i64 - self.min.x() as i64 + 1,
            self.max.y() as i64 - self.min.y() as i64 + 1,
        )
    }

    /// Width and height. Degenerate boxes are reported as invalid.
    pub fn size_usize(self) -> Result<Vec2<usize>> {
        let Vec2(width, height) = self.size();
        if width < 1 || height < 1 { return Err(Error::invalid_attribute("degenerate box")) }
        Ok(Vec2(
            u64_to_usize(width as u64, "box width")?,
            u64_to_usize(height as u64, "box height")?,
        ))
    }

    /// Returns whether `min` is not larger than `max` on both axes.
    pub fn is_ordered(self) -> bool {
        self.min.x() <= self.max.x() && self.min.y() <= self.max.y()
    }

    /// The intersection of both boxes. May be degenerate.
    pub fn intersect(self, other: Self) -> Self {
        IntegerBounds {
            min: Vec2(self.min.x().max(other.min.x()), self.min.y().max(other.min.y())),
            max: Vec2(self.max.x().min(other.max.x()), self.max.y().min(other.max.y())),
        }
    }

    /// Returns whether the specified coordinate is inside this box.
    pub fn contains(self, point: Vec2<i32>) -> bool {
        point.x() >= self.min.x() && point.x() <= self.max.x()
            && point.y() >= self.min.y() && point.y() <= self.max.y()
    }

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        4 * i32::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.min.x().write(write)?;
        self.min.y().write(write)?;
        self.max.x().write(write)?;
        self.max.y().write(write)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        let x_min = i32::read(read)?;
        let y_min = i32::read(read)?;
        let x_max = i32::read(read)?;
        let y_max = i32::read(read)?;
        Ok(IntegerBounds { min: Vec2(x_min, y_min), max: Vec2(x_max, y_max) })
    }
}

impl FloatRect {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        4 * f32::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.min.x().write(write)?;
        self.min.y().write(write)?;
        self.max.x().write(write)?;
        self.max.y().write(write)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        let x_min = f32::read(read)?;
        let y_min = f32::read(read)?;
        let x_max = f32::read(read)?;
        let y_max = f32::read(read)?;
        Ok(FloatRect { min: Vec2(x_min, y_min), max: Vec2(x_max, y_max) })
    }
}

impl SampleType {

    /// How many bytes a single sample takes up.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleType::F16 => 2,
            SampleType::F32 | SampleType::U32 => 4,
        }
    }

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        i32::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        match *self {
            SampleType::U32 => 0_i32,
            SampleType::F16 => 1_i32,
            SampleType::F32 => 2_i32,
        }.write(write)
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        Ok(match i32::read(read)? {
            0 => SampleType::U32,
            1 => SampleType::F16,
            2 => SampleType::F32,
            _ => return Err(Error::invalid_attribute("unknown channel pixel type")),
        })
    }
}

impl ChannelDescription {

    /// Create a new channel with the specified properties and a sampling rate of (1,1).
    pub fn new(name: impl Into<Text>, sample_type: SampleType, quantize_linearly: bool) -> Self {
        Self { name: name.into(), sample_type, quantize_linearly, sampling: Vec2(1, 1) }
    }

    /// Replace the sampling rate.
    pub fn with_sampling(self, x: i32, y: i32) -> Self {
        Self { sampling: Vec2(x, y), .. self }
    }

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size(&self) -> usize {
        self.name.null_terminated_byte_size()
            + SampleType::byte_size()
            + 1 // is_linear
            + 3 // reserved bytes
            + 2 * i32::BYTE_SIZE // sampling x, y
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        Text::write_null_terminated(&self.name, write)?;
        self.sample_type.write(write)?;

        match self.quantize_linearly {
            false => 0_u8,
            true  => 1_u8,
        }.write(write)?;

        i8::write_slice(write, &[0_i8, 0_i8, 0_i8])?;
        self.sampling.x().write(write)?;
        self.sampling.y().write(write)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R, max_name_length: usize) -> Result<Self> {
        let name = Text::read_null_terminated(read, max_name_length)?;
        let sample_type = SampleType::read(read)?;

        // only the lowest bit carries meaning, the rest are reserved
        let is_linear = u8::read(read)? & 1 == 1;

        let mut reserved = [0_i8; 3];
        i8::read_slice(read, &mut reserved)?;

        let x_sampling = i32::read(read)?;
        let y_sampling = i32::read(read)?;

        Ok(ChannelDescription {
            name, sample_type,
            quantize_linearly: is_linear,
            sampling: Vec2(x_sampling, y_sampling),
        })
    }
}

impl ChannelList {

    /// Sorts the channels by name.
    pub fn new(mut channels: SmallVec<[ChannelDescription; 5]>) -> Self {
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        Self { list: channels }
    }

    /// Insert a channel at its sorted position.
    /// Fails if a channel with that name exists.
    pub fn insert(&mut self, channel: ChannelDescription) -> UnitResult {
        match self.list.binary_search_by(|existing| existing.name.cmp(&channel.name)) {
            Ok(_) => Err(Error::invalid_argument(format!("duplicate channel name `{}`", channel.name))),
            Err(index) => { self.list.insert(index, channel); Ok(()) }
        }
    }

    /// Find a channel by its exact name.
    pub fn find(&self, name: &str) -> Option<&ChannelDescription> {
        self.list.binary_search_by(|channel| channel.name.as_slice().cmp(name.as_bytes()))
            .ok().map(|index| &self.list[index])
    }

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size(&self) -> usize {
        self.list.iter().map(ChannelDescription::byte_size).sum::<usize>() + sequence_end::byte_size()
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write(&self, write: &mut impl Write) -> UnitResult {
        for channel in &self.list {
            channel.write(write)?;
        }

        sequence_end::write(write)
    }

    /// Read the value without validating.
    pub fn read(read: &mut PeekRead<impl Read>, max_name_length: usize) -> Result<Self> {
        let mut channels = SmallVec::new();
        while !sequence_end::has_come(read)? {
            channels.push(ChannelDescription::read(read, max_name_length)?);
        }

        Ok(ChannelList::new(channels))
    }
}

fn u8_to_decimal32(binary: u8) -> u32 {
    let units = binary as u32 % 10;
    let tens = (binary as u32 / 10) % 10;
    units | (tens << 4)
}

// assumes value fits into u8
fn u8_from_decimal32(coded: u32) -> u8 {
    ((coded & 0x0f) + 10 * ((coded >> 4) & 0x0f)) as u8
}

// https://github.com/AcademySoftwareFoundation/openexr/blob/master/src/lib/OpenEXR/ImfTimeCode.cpp
impl TimeCode {

    /// Number of bytes this would consume in an exr file.
    pub const BYTE_SIZE: usize = 2 * u32::BYTE_SIZE;

    /// Returns an error if this time code is considered invalid.
    pub fn validate(&self) -> UnitResult {
        if self.frame > 29 { Err(Error::invalid_attribute("time code frame larger than 29")) }
        else if self.seconds > 59 { Err(Error::invalid_attribute("time code seconds larger than 59")) }
        else if self.minutes > 59 { Err(Error::invalid_attribute("time code minutes larger than 59")) }
        else if self.hours > 23 { Err(Error::invalid_attribute("time code hours larger than 23")) }
        else if self.binary_groups.iter().any(|&group| group > 15) {
            Err(Error::invalid_attribute("time code binary group value too large for 3 bits"))
        }
        else { Ok(()) }
    }

    /// Pack the SMPTE time code into a u32 value, according to TV60 packing.
    /// This is the encoding which is used within a binary exr file.
    pub fn pack_time_as_tv60_u32(&self) -> Result<u32> {
        // validate strictly to prevent set_bit panic! below
        self.validate()?;

        Ok(*0_u32
            .set_bits(0..6, u8_to_decimal32(self.frame))
            .set_bit(6, self.drop_frame)
            .set_bit(7, self.color_frame)
            .set_bits(8..15, u8_to_decimal32(self.seconds))
            .set_bit(15, self.field_phase)
            .set_bits(16..23, u8_to_decimal32(self.minutes))
            .set_bit(23, self.binary_group_flags[0])
            .set_bits(24..30, u8_to_decimal32(self.hours))
            .set_bit(30, self.binary_group_flags[1])
            .set_bit(31, self.binary_group_flags[2])
        )
    }

    /// Unpack a time code from one TV60 encoded u32 value and the encoded user data.
    pub fn from_tv60_time(tv60_time: u32, user_data: u32) -> Self {
        Self {
            frame: u8_from_decimal32(tv60_time.get_bits(0..6)), // cast cannot fail, as these are less than 8 bits
            drop_frame: tv60_time.get_bit(6),
            color_frame: tv60_time.get_bit(7),
            seconds: u8_from_decimal32(tv60_time.get_bits(8..15)),
            field_phase: tv60_time.get_bit(15),
            minutes: u8_from_decimal32(tv60_time.get_bits(16..23)),
            hours: u8_from_decimal32(tv60_time.get_bits(24..30)),
            binary_group_flags: [
                tv60_time.get_bit(23),
                tv60_time.get_bit(30),
                tv60_time.get_bit(31),
            ],

            binary_groups: Self::unpack_user_data_from_u32(user_data)
        }
    }

    /// Pack the SMPTE time code into a u32 value, according to TV50 packing.
    /// This encoding does not support the `drop_frame` flag, it will be lost.
    pub fn pack_time_as_tv50_u32(&self) -> Result<u32> {
        Ok(*self.pack_time_as_tv60_u32()?

            // swap some fields by replacing some bits in the packed u32
            .set_bit(6, false)
            .set_bit(15, self.binary_group_flags[0])
            .set_bit(30, self.binary_group_flags[1])
            .set_bit(23, self.binary_group_flags[2])
            .set_bit(31, self.field_phase)
        )
    }

    /// Unpack a time code from one TV50 encoded u32 value and the encoded user data.
    /// This encoding does not support the `drop_frame` flag, it will always be false.
    pub fn from_tv50_time(tv50_time: u32, user_data: u32) -> Self {
        Self {
            drop_frame: false, // do not use bit [6]

            // swap some fields:
            field_phase: tv50_time.get_bit(31),
            binary_group_flags: [
                tv50_time.get_bit(15),
                tv50_time.get_bit(30),
                tv50_time.get_bit(23),
            ],

            .. Self::from_tv60_time(tv50_time, user_data)
        }
    }

    /// Pack the SMPTE time code into a u32 value, according to FILM24 packing.
    /// This encoding does not support the `drop_frame` and `color_frame` flags, they will be lost.
    pub fn pack_time_as_film24_u32(&self) -> Result<u32> {
        Ok(*self.pack_time_as_tv60_u32()?
            .set_bit(6, false)
            .set_bit(7, false)
        )
    }

    /// Unpack a time code from one FILM24 encoded u32 value and the encoded user data.
    pub fn from_film24_time(film24_time: u32, user_data: u32) -> Self {
        Self {
            drop_frame: false, // bit [6]
            color_frame: false, // bit [7]
            .. Self::from_tv60_time(film24_time, user_data)
        }
    }

    // in rust, group index starts at zero, not at one.
    fn user_data_bit_indices(group_index: usize) -> std::ops::Range<usize> {
        let min_bit = 4 * group_index;
        min_bit .. min_bit + 4 // +4, not +3, as `Range` is exclusive
    }

    /// Pack the user data `u8` array into one u32.
    /// User data values are clamped to the valid range (maximum value is 15).
    pub fn pack_user_data_as_u32(&self) -> u32 {
        self.binary_groups.iter().enumerate().fold(0_u32, |mut packed, (group_index, group_value)|
            *packed.set_bits(Self::user_data_bit_indices(group_index), *group_value.min(&15) as u32)
        )
    }

    fn unpack_user_data_from_u32(user_data: u32) -> [u8; 8] {
        let mut groups = [0_u8; 8];
        for (group_index, group) in groups.iter_mut().enumerate() {
            *group = user_data.get_bits(Self::user_data_bit_indices(group_index)) as u8;
        }

        groups
    }

    /// Write this time code to the byte stream, encoded as TV60 integers.
    /// Returns an error if the fields are out of the allowed range.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.pack_time_as_tv60_u32()?.write(write)?; // will validate
        self.pack_user_data_as_u32().write(write)?;
        Ok(())
    }

    /// Read the time code, without validating, extracting from TV60 integers.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        let time_and_flags = u32::read(read)?;
        let user_data = u32::read(read)?;
        Ok(Self::from_tv60_time(time_and_flags, user_data))
    }
}

impl Chromaticities {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        8 * f32::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        for point in [self.red, self.green, self.blue, self.white] {
            point.x().write(write)?;
            point.y().write(write)?;
        }

        Ok(())
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        Ok(Chromaticities {
            red: Vec2(f32::read(read)?, f32::read(read)?),
            green: Vec2(f32::read(read)?, f32::read(read)?),
            blue: Vec2(f32::read(read)?, f32::read(read)?),
            white: Vec2(f32::read(read)?, f32::read(read)?),
        })
    }
}

impl EnvironmentMap {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        u8::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(self, write: &mut W) -> UnitResult {
        match self {
            EnvironmentMap::LatitudeLongitude => 0_u8,
            EnvironmentMap::Cube => 1_u8
        }.write(write)
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        Ok(match u8::read(read)? {
            0 => EnvironmentMap::LatitudeLongitude,
            1 => EnvironmentMap::Cube,
            _ => return Err(Error::invalid_attribute("environment map attribute value")),
        })
    }
}

impl KeyCode {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        7 * i32::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.film_manufacturer_code.write(write)?;
        self.film_type.write(write)?;
        self.film_roll_prefix.write(write)?;
        self.count.write(write)?;
        self.perforation_offset.write(write)?;
        self.perforations_per_frame.write(write)?;
        self.perforations_per_count.write(write)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        Ok(KeyCode {
            film_manufacturer_code: i32::read(read)?,
            film_type: i32::read(read)?,
            film_roll_prefix: i32::read(read)?,
            count: i32::read(read)?,
            perforation_offset: i32::read(read)?,
            perforations_per_frame: i32::read(read)?,
            perforations_per_count: i32::read(read)?,
        })
    }
}

impl LineOrder {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        u8::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(self, write: &mut W) -> UnitResult {
        match self {
            LineOrder::Increasing => 0_u8,
            LineOrder::Decreasing => 1_u8,
            LineOrder::Unspecified => 2_u8,
        }.write(write)
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        Ok(match u8::read(read)? {
            0 => LineOrder::Increasing,
            1 => LineOrder::Decreasing,
            2 => LineOrder::Unspecified,
            _ => return Err(Error::invalid_attribute("line order attribute value")),
        })
    }
}

impl Preview {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size(&self) -> usize {
        2 * u32::BYTE_SIZE + self.pixel_data.len()
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.size.width().write(write)?;
        self.size.height().write(write)?;
        u8::write_slice(write, &self.pixel_data)
    }

    /// Read the value, checking the pixel count against the attribute size.
    pub fn read<R: Read>(read: &mut R, byte_size: usize) -> Result<Self> {
        let width = u32::read(read)?;
        let height = u32::read(read)?;

        let pixel_bytes = (width as u64) * (height as u64) * 4;
        if pixel_bytes + 8 != byte_size as u64 {
            return Err(Error::size_mismatch("preview dimensions do not match attribute size"));
        }

        let pixel_data = u8::read_vec(read, pixel_bytes as usize, 1024*1024*4, None, "preview attribute pixel count")?;
        Ok(Preview { size: Vec2(width, height), pixel_data })
    }
}

impl ::std::fmt::Debug for Preview {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(f, "Preview ({}x{} px)", self.size.width(), self.size.height())
    }
}

impl TileDescription {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        2 * u32::BYTE_SIZE + 1 // size x,y + (level mode + rounding mode)
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.tile_size.width().write(write)?;
        self.tile_size.height().write(write)?;

        let level_mode = match self.level_mode {
            LevelMode::Singular => 0_u8,
            LevelMode::MipMap => 1_u8,
            LevelMode::RipMap => 2_u8,
        };

        let rounding_mode = match self.rounding_mode {
            RoundingMode::Down => 0_u8,
            RoundingMode::Up => 1_u8,
        };

        let mode: u8 = level_mode + (rounding_mode * 16);
        mode.write(write)
    }

    /// Read the value without validating the tile size.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        let x_size = u32::read(read)?;
        let y_size = u32::read(read)?;

        // mode = level_mode + (rounding_mode * 16)
        let mode = u8::read(read)?;
        let level_mode = mode & 0b00001111;
        let rounding_mode = mode >> 4;

        let level_mode = match level_mode {
            0 => LevelMode::Singular,
            1 => LevelMode::MipMap,
            2 => LevelMode::RipMap,
            _ => return Err(Error::invalid_attribute("tile description level mode")),
        };

        let rounding_mode = match rounding_mode {
            0 => RoundingMode::Down,
            1 => RoundingMode::Up,
            _ => return Err(Error::invalid_attribute("tile description rounding mode")),
        };

        Ok(TileDescription { tile_size: Vec2(x_size, y_size), level_mode, rounding_mode, })
    }
}

impl PartialEq for OpaqueValue {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.bytes == other.bytes
    }
}

impl ::std::fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(f, "Opaque {} ({} bytes{})", self.kind, self.bytes.len(),
               if self.unpacked.is_some() { ", unpacked" } else { "" })
    }
}

impl OpaqueValue {

    /// Raw bytes of a custom type, without an unpacked value.
    pub fn new(kind: impl Into<Text>, bytes: Vec<u8>) -> Self {
        OpaqueValue { kind: kind.into(), bytes, unpacked: None }
    }

    /// The unpacked value, if a handler produced one of type `T`.
    pub fn unpacked<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.unpacked.as_ref().and_then(|value| value.downcast_ref::<T>())
    }
}


impl Attribute {

    /// Create a new attribute.
    pub fn new(name: impl Into<Text>, value: AttributeValue) -> Self {
        Attribute { name: name.into(), value }
    }

    /// The type name as it appears in the file.
    pub fn type_name(&self) -> &[u8] {
        self.value.kind_name()
    }

    /// Number of bytes this attribute would consume in an exr file,
    /// including name, type name and size.
    pub fn byte_size(&self) -> usize {
        self.name.null_terminated_byte_size()
            + self.value.kind_name().len() + sequence_end::byte_size()
            + i32::BYTE_SIZE // serialized byte size
            + self.value.byte_size()
    }

    /// Write name, type name, size and value.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.name.write_null_terminated(write)?;
        Text::from_slice_unchecked(self.value.kind_name()).write_null_terminated(write)?;
        i32::write(usize_to_i32(self.value.byte_size(), "attribute byte size")?, write)?;
        self.value.write(write)
    }
}


impl AttributeValue {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size(&self) -> usize {
        use self::AttributeValue::*;

        match *self {
            IntegerBounds(_) => self::IntegerBounds::byte_size(),
            FloatRect(_) => self::FloatRect::byte_size(),

            I32(_) => i32::BYTE_SIZE,
            F32(_) => f32::BYTE_SIZE,
            F64(_) => f64::BYTE_SIZE,

            Rational(_) => { i32::BYTE_SIZE + u32::BYTE_SIZE },
            TimeCode(_) => self::TimeCode::BYTE_SIZE,

            IntVec2(_) => { 2 * i32::BYTE_SIZE },
            FloatVec2(_) => { 2 * f32::BYTE_SIZE },
            DoubleVec2(_) => { 2 * f64::BYTE_SIZE },
            IntVec3(_) => { 3 * i32::BYTE_SIZE },
            FloatVec3(_) => { 3 * f32::BYTE_SIZE },
            DoubleVec3(_) => { 3 * f64::BYTE_SIZE },

            ChannelList(ref channels) => channels.byte_size(),
            Chromaticities(_) => self::Chromaticities::byte_size(),
            Compression(_) => self::Compression::byte_size(),
            EnvironmentMap(_) => self::EnvironmentMap::byte_size(),

            KeyCode(_) => self::KeyCode::byte_size(),
            LineOrder(_) => self::LineOrder::byte_size(),

            Matrix3x3(ref value) => value.len() * f32::BYTE_SIZE,
            DoubleMatrix3x3(ref value) => value.len() * f64::BYTE_SIZE,
            Matrix4x4(ref value) => value.len() * f32::BYTE_SIZE,
            DoubleMatrix4x4(ref value) => value.len() * f64::BYTE_SIZE,

            Preview(ref value) => value.byte_size(),

            // attribute value texts never have limited size.
            // also, don't serialize size, as it can be inferred from attribute size
            Text(ref value) => value.bytes.len(),

            TextVector(ref value) => value.iter().map(self::Text::i32_sized_byte_size).sum(),
            FloatVector(ref value) => value.len() * f32::BYTE_SIZE,
            TileDescription(_) => self::TileDescription::byte_size(),
            Opaque(ref value) => value.bytes.len(),
        }
    }

    /// The exr name string of the type that an attribute can have.
    pub fn kind_name(&self) -> &[u8] {
        use self::AttributeValue::*;
        use self::type_names as ty;

        match *self {
            IntegerBounds(_) =>  ty::I32BOX2,
            FloatRect(_) =>  ty::F32BOX2,
            I32(_) =>  ty::I32,
            F32(_) =>  ty::F32,
            F64(_) =>  ty::F64,
            Rational(_) => ty::RATIONAL,
            TimeCode(_) => ty::TIME_CODE,
            IntVec2(_) => ty::I32VEC2,
            FloatVec2(_) => ty::F32VEC2,
            DoubleVec2(_) => ty::F64VEC2,
            IntVec3(_) => ty::I32VEC3,
            FloatVec3(_) => ty::F32VEC3,
            DoubleVec3(_) => ty::F64VEC3,
            ChannelList(_) =>  ty::CHANNEL_LIST,
            Chromaticities(_) =>  ty::CHROMATICITIES,
            Compression(_) =>  ty::COMPRESSION,
            EnvironmentMap(_) =>  ty::ENVIRONMENT_MAP,
            KeyCode(_) =>  ty::KEY_CODE,
            LineOrder(_) =>  ty::LINE_ORDER,
            Matrix3x3(_) =>  ty::F32MATRIX3X3,
            DoubleMatrix3x3(_) =>  ty::F64MATRIX3X3,
            Matrix4x4(_) =>  ty::F32MATRIX4X4,
            DoubleMatrix4x4(_) =>  ty::F64MATRIX4X4,
            Preview(_) =>  ty::PREVIEW,
            Text(_) =>  ty::TEXT,
            TextVector(_) =>  ty::TEXT_VECTOR,
            FloatVector(_) =>  ty::F32VECTOR,
            TileDescription(_) =>  ty::TILES,
            Opaque(ref value) => value.kind.as_slice(),
        }
    }

    /// The zero value of a type. Unknown type names produce an opaque value
    /// with `extra_bytes` zeroes. Variable-size types reserve `extra_bytes`.
    pub fn default_for_type(kind: &TextSlice, extra_bytes: usize) -> Self {
        use self::AttributeValue::*;
        use self::type_names as ty;

        match kind {
            ty::I32BOX2 => IntegerBounds(Default::default()),
            ty::F32BOX2 => FloatRect(Default::default()),
            ty::I32 => I32(0),
            ty::F32 => F32(0.0),
            ty::F64 => F64(0.0),
            ty::RATIONAL => Rational((0, 1)),
            ty::TIME_CODE => TimeCode(Default::default()),
            ty::I32VEC2 => IntVec2(Vec2(0, 0)),
            ty::F32VEC2 => FloatVec2(Vec2(0.0, 0.0)),
            ty::F64VEC2 => DoubleVec2(Vec2(0.0, 0.0)),
            ty::I32VEC3 => IntVec3((0, 0, 0)),
            ty::F32VEC3 => FloatVec3((0.0, 0.0, 0.0)),
            ty::F64VEC3 => DoubleVec3((0.0, 0.0, 0.0)),
            ty::CHANNEL_LIST => ChannelList(Default::default()),
            ty::CHROMATICITIES => Chromaticities(self::Chromaticities {
                red: Vec2(0.64, 0.33), green: Vec2(0.3, 0.6),
                blue: Vec2(0.15, 0.06), white: Vec2(0.3127, 0.329),
            }),
            ty::COMPRESSION => Compression(Default::default()),
            ty::ENVIRONMENT_MAP => EnvironmentMap(self::EnvironmentMap::LatitudeLongitude),
            ty::KEY_CODE => KeyCode(Default::default()),
            ty::LINE_ORDER => LineOrder(Default::default()),
            ty::F32MATRIX3X3 => Matrix3x3([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
            ty::F64MATRIX3X3 => DoubleMatrix3x3([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
            ty::F32MATRIX4X4 => Matrix4x4({
                let mut identity = [0.0; 16];
                for index in 0..4 { identity[index * 5] = 1.0; }
                identity
            }),
            ty::F64MATRIX4X4 => DoubleMatrix4x4({
                let mut identity = [0.0; 16];
                for index in 0..4 { identity[index * 5] = 1.0; }
                identity
            }),
            ty::PREVIEW => Preview(Default::default()),
            ty::TEXT => Text(self::Text::from_bytes_unchecked(TextBytes::with_capacity(extra_bytes))),
            ty::TEXT_VECTOR => TextVector(Vec::with_capacity(extra_bytes)),
            ty::F32VECTOR => FloatVector(Vec::with_capacity(extra_bytes / f32::BYTE_SIZE)),
            ty::TILES => TileDescription(self::TileDescription {
                tile_size: Vec2(64, 64), level_mode: LevelMode::Singular, rounding_mode: RoundingMode::Down
            }),
            _ => Opaque(OpaqueValue::new(self::Text::from_slice_unchecked(kind), vec![0; extra_bytes])),
        }
    }

    /// The number of bytes every value of this type occupies,
    /// or `None` for types of variable size.
    pub fn fixed_byte_size(kind: &TextSlice) -> Option<usize> {
        use self::type_names as ty;

        Some(match kind {
            ty::I32BOX2 | ty::F32BOX2 => 16,
            ty::CHROMATICITIES => 32,
            ty::COMPRESSION | ty::ENVIRONMENT_MAP | ty::LINE_ORDER => 1,
            ty::F64 | ty::RATIONAL | ty::TIME_CODE | ty::I32VEC2 | ty::F32VEC2 => 8,
            ty::F32 | ty::I32 => 4,
            ty::KEY_CODE => 28,
            ty::F32MATRIX3X3 => 36,
            ty::F64MATRIX3X3 => 72,
            ty::F32MATRIX4X4 => 64,
            ty::F64MATRIX4X4 => 128,
            ty::TILES => 9,
            ty::F64VEC2 => 16,
            ty::I32VEC3 | ty::F32VEC3 => 12,
            ty::F64VEC3 => 24,
            _ => return None,
        })
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        use self::AttributeValue::*;
        match *self {
            IntegerBounds(value) => value.write(write)?,
            FloatRect(value) => value.write(write)?,

            I32(value) => value.write(write)?,
            F32(value) => value.write(write)?,
            F64(value) => value.write(write)?,

            Rational((a, b)) => { a.write(write)?; b.write(write)?; },
            TimeCode(codes) => { codes.write(write)?; },

            IntVec2(Vec2(x, y)) => { x.write(write)?; y.write(write)?; },
            FloatVec2(Vec2(x, y)) => { x.write(write)?; y.write(write)?; },
            DoubleVec2(Vec2(x, y)) => { x.write(write)?; y.write(write)?; },
            IntVec3((x, y, z)) => { x.write(write)?; y.write(write)?; z.write(write)?; },
            FloatVec3((x, y, z)) => { x.write(write)?; y.write(write)?; z.write(write)?; },
            DoubleVec3((x, y, z)) => { x.write(write)?; y.write(write)?; z.write(write)?; },

            ChannelList(ref channels) => channels.write(write)?,
            Chromaticities(ref value) => value.write(write)?,
            Compression(value) => value.write(write)?,
            EnvironmentMap(value) => value.write(write)?,

            KeyCode(value) => value.write(write)?,
            LineOrder(value) => value.write(write)?,

            Matrix3x3(ref value) => f32::write_slice(write, value)?,
            DoubleMatrix3x3(ref value) => f64::write_slice(write, value)?,
            Matrix4x4(ref value) => f32::write_slice(write, value)?,
            DoubleMatrix4x4(ref value) => f64::write_slice(write, value)?,

            Preview(ref value) => { value.write(write)?; },

            // attribute value texts never have limited size.
            // also, don't serialize size, as it can be inferred from attribute size
            Text(ref value) => u8::write_slice(write, value.bytes.as_slice())?,

            TextVector(ref value) => self::Text::write_vec_of_i32_sized_texts(write, value)?,
            FloatVector(ref value) => f32::write_slice(write, value)?,
            TileDescription(ref value) => value.write(write)?,
            Opaque(ref value) => u8::write_slice(write, &value.bytes)?,
        };

        Ok(())
    }

    /// Parse the payload of an attribute with the specified type name.
    /// Fixed-size types must have exactly their size, otherwise `SizeMismatch` is returned.
    /// Unknown type names produce an opaque value holding the bytes.
    pub fn read(kind: &Text, bytes: &[u8], max_name_length: usize) -> Result<Self> {
        if let Some(expected) = Self::fixed_byte_size(kind.as_slice()) {
            if bytes.len() != expected {
                return Err(Error::size_mismatch(format!(
                    "`{}` attribute has {} bytes instead of {}", kind, bytes.len(), expected
                )));
            }
        }

        Self::read_unchecked(kind, bytes, max_name_length).map_err(|error| {
            if error.is_unexpected_end() {
                Error::size_mismatch(format!("`{}` attribute is shorter than its contents", kind))
            }
            else { error }
        })
    }

    fn read_unchecked(kind: &Text, bytes: &[u8], max_name_length: usize) -> Result<Self> {
        use self::AttributeValue::*;
        use self::type_names as ty;

        let byte_size = bytes.len();
        let reader = &mut &bytes[..];

        // these consume all bytes by definition
        match kind.as_slice() {
            ty::TEXT => return Ok(Text(self::Text::from_slice_unchecked(bytes))),
            other if !type_names::ALL.contains(&other) => return Ok(Opaque(OpaqueValue::new(kind.clone(), bytes.to_vec()))),
            _ => {}
        }

        let value = match kind.as_slice() {
            ty::I32BOX2 => IntegerBounds(self::IntegerBounds::read(reader)?),
            ty::F32BOX2 => FloatRect(self::FloatRect::read(reader)?),

            ty::I32 => I32(i32::read(reader)?),
            ty::F32 => F32(f32::read(reader)?),
            ty::F64 => F64(f64::read(reader)?),

            ty::RATIONAL => Rational({
                let a = i32::read(reader)?;
                let b = u32::read(reader)?;
                (a, b)
            }),

            ty::TIME_CODE => TimeCode(self::TimeCode::read(reader)?),

            ty::I32VEC2 => IntVec2(Vec2(i32::read(reader)?, i32::read(reader)?)),
            ty::F32VEC2 => FloatVec2(Vec2(f32::read(reader)?, f32::read(reader)?)),
            ty::F64VEC2 => DoubleVec2(Vec2(f64::read(reader)?, f64::read(reader)?)),

            ty::I32VEC3 => IntVec3((i32::read(reader)?, i32::read(reader)?, i32::read(reader)?)),
            ty::F32VEC3 => FloatVec3((f32::read(reader)?, f32::read(reader)?, f32::read(reader)?)),
            ty::F64VEC3 => DoubleVec3((f64::read(reader)?, f64::read(reader)?, f64::read(reader)?)),

            ty::CHANNEL_LIST => {
                let mut peek = PeekRead::new(&mut *reader);
                let channels = self::ChannelList::read(&mut peek, max_name_length)?;
                if peek.has_peeked() { return Err(Error::size_mismatch("channel list followed by extra bytes")) }
                ChannelList(channels)
            },

            ty::CHROMATICITIES  => Chromaticities(self::Chromaticities::read(reader)?),
            ty::COMPRESSION     => Compression(self::Compression::read(reader)?),
            ty::ENVIRONMENT_MAP => EnvironmentMap(self::EnvironmentMap::read(reader)?),

            ty::KEY_CODE   => KeyCode(self::KeyCode::read(reader)?),
            ty::LINE_ORDER => LineOrder(self::LineOrder::read(reader)?),

            ty::F32MATRIX3X3 => Matrix3x3({
                let mut result = [0.0_f32; 9];
                f32::read_slice(reader, &mut result)?;
                result
            }),

            ty::F64MATRIX3X3 => DoubleMatrix3x3({
                let mut result = [0.0_f64; 9];
                f64::read_slice(reader, &mut result)?;
                result
            }),

            ty::F32MATRIX4X4 => Matrix4x4({
                let mut result = [0.0_f32; 16];
                f32::read_slice(reader, &mut result)?;
                result
            }),

            ty::F64MATRIX4X4 => DoubleMatrix4x4({
                let mut result = [0.0_f64; 16];
                f64::read_slice(reader, &mut result)?;
                result
            }),

            ty::PREVIEW => Preview(self::Preview::read(reader, byte_size)?),

            // the number of strings can be inferred from the total attribute size
            ty::TEXT_VECTOR => TextVector(self::Text::read_vec_of_i32_sized(reader, byte_size)?),

            ty::F32VECTOR => {
                if byte_size % f32::BYTE_SIZE != 0 {
                    return Err(Error::size_mismatch("float vector size is not a multiple of 4"));
                }

                FloatVector(f32::read_vec(reader, byte_size / f32::BYTE_SIZE, 1024, None, "float vector")?)
            },

            ty::TILES => TileDescription(self::TileDescription::read(reader)?),

            _ => return Err(Error::unsupported("attribute type without a parser")),
        };

        if !reader.is_empty() {
            return Err(Error::size_mismatch(format!("`{}` attribute has unused bytes", kind)));
        }

        Ok(value)
    }


    /// Return `Ok(i32)` if this attribute is an i32.
    pub fn to_i32(&self) -> Result<i32> {
        match *self {
            AttributeValue::I32(value) => Ok(value),
            _ => Err(invalid_type())
        }
    }

    /// Return `Ok(f32)` if this attribute is an f32.
    pub fn to_f32(&self) -> Result<f32> {
        match *self {
            AttributeValue::F32(value) => Ok(value),
            _ => Err(invalid_type())
        }
    }

    /// Return `Ok(Text)` if this attribute is a text.
    pub fn to_text(&self) -> Result<&Text> {
        match self {
            AttributeValue::Text(value) => Ok(value),
            _ => Err(invalid_type())
        }
    }

    /// Return `Ok(IntegerBounds)` if this attribute is a `box2i`.
    pub fn to_integer_bounds(&self) -> Result<IntegerBounds> {
        match *self {
            AttributeValue::IntegerBounds(value) => Ok(value),
            _ => Err(invalid_type())
        }
    }

    /// Return `Ok(Vec2<f32>)` if this attribute is a `v2f`.
    pub fn to_float_vec2(&self) -> Result<Vec2<f32>> {
        match *self {
            AttributeValue::FloatVec2(value) => Ok(value),
            _ => Err(invalid_type())
        }
    }

    /// Return `Ok(&ChannelList)` if this attribute is a channel list.
    pub fn to_channel_list(&self) -> Result<&ChannelList> {
        match self {
            AttributeValue::ChannelList(value) => Ok(value),
            _ => Err(invalid_type())
        }
    }

    /// Return `Ok(Compression)` if this attribute is a compression.
    pub fn to_compression(&self) -> Result<Compression> {
        match *self {
            AttributeValue::Compression(value) => Ok(value),
            _ => Err(invalid_type())
        }
    }

    /// Return `Ok(LineOrder)` if this attribute is a line order.
    pub fn to_line_order(&self) -> Result<LineOrder> {
        match *self {
            AttributeValue::LineOrder(value) => Ok(value),
            _ => Err(invalid_type())
        }
    }

    /// Return `Ok(TileDescription)` if this attribute is a tile description.
    pub fn to_tile_description(&self) -> Result<TileDescription> {
        match *self {
            AttributeValue::TileDescription(value) => Ok(value),
            _ => Err(invalid_type())
        }
    }

    /// Return `Ok(TimeCode)` if this attribute is a time code.
    pub fn to_time_code(&self) -> Result<TimeCode> {
        match *self {
            AttributeValue::TimeCode(value) => Ok(value),
            _ => Err(invalid_type())
        }
    }
}


/// Contains string literals identifying the type of an attribute.
pub mod type_names {
    macro_rules! define_attribute_type_names {
        ( $($name: ident : $value: expr),* ) => {
            $(
                /// The byte-string name of this attribute type as it appears in an exr file.
                pub const $name: &'static [u8] = $value;
            )*

            /// All type names that have a built-in representation.
            pub const ALL: &'static [&'static [u8]] = &[ $( $value ),* ];
        };
    }

    define_attribute_type_names! {
        I32BOX2:        b"box2i",
        F32BOX2:        b"box2f",
        CHANNEL_LIST:   b"chlist",
        CHROMATICITIES: b"chromaticities",
        COMPRESSION:    b"compression",
        F64:            b"double",
        ENVIRONMENT_MAP:b"envmap",
        F32:            b"float",
        F32VECTOR:      b"floatvector",
        I32:            b"int",
        KEY_CODE:       b"keycode",
        LINE_ORDER:     b"lineOrder",
        F32MATRIX3X3:   b"m33f",
        F64MATRIX3X3:   b"m33d",
        F32MATRIX4X4:   b"m44f",
        F64MATRIX4X4:   b"m44d",
        PREVIEW:        b"preview",
        RATIONAL:       b"rational",
        TEXT:           b"string",
        TEXT_VECTOR:    b"stringvector",
        TILES:          b"tiledesc",
        TIME_CODE:      b"timecode",
        I32VEC2:        b"v2i",
        F32VEC2:        b"v2f",
        F64VEC2:        b"v2d",
        I32VEC3:        b"v3i",
        F32VEC3:        b"v3f",
        F64VEC3:        b"v3d"
    }
}
