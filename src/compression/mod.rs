//! Contains the compression attribute definition
//! and the interface through which pixel data is compressed and decompressed.
//! The lossless byte oriented methods are built in,
//! all other methods are provided by registering a [`Codec`].


// private modules make non-breaking changes easier
mod zip;
mod rle;

use std::sync::Arc;
use crate::error::{Result, UnitResult, Error};
use crate::io::{Data, Read, Write};
use crate::math::Vec2;
use crate::meta::attribute::ChannelList;

pub use self::rle::RunLength;
pub use self::zip::Zip;


/// A byte vector.
pub type ByteVec = Vec<u8>;

/// A byte slice.
pub type Bytes<'s> = &'s [u8];

/// Specifies which compression method is used for the chunks of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {

    /// Store uncompressed values.
    /// Produces large files that can be read and written very quickly.
    #[default]
    Uncompressed,

    /// Produces slightly smaller files
    /// that can still be read and written rather quickly.
    /// Works best for images with large flat areas, such as masks and abstract graphics.
    /// This compression method is lossless.
    RLE,

    /// Uses ZIP compression to compress each line.
    /// This compression method is lossless.
    ZIP1,

    /// Uses ZIP compression to compress blocks of 16 lines.
    /// This compression method is lossless.
    ZIP16,

    /// Wavelet transform and Huffman coding, in blocks of 32 lines.
    /// Lossless, not built in.
    PIZ,

    /// Like `ZIP16`, but reduces precision of `f32` images to `f24`. Not built in.
    PXR24,

    /// Lossy 4-by-4 pixel block compression for `f16` channels. Not built in.
    B44,

    /// Like `B44`, but compresses uniformly colored blocks further. Not built in.
    B44A,

    /// Lossy DCT based compression, in blocks of 32 lines. Not built in.
    DWAA,

    /// Lossy DCT based compression, in blocks of 256 lines. Not built in.
    DWAB,
}

impl std::fmt::Display for Compression {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{} compression", match self {
            Compression::Uncompressed => "no",
            Compression::RLE => "rle",
            Compression::ZIP1 => "zip line",
            Compression::ZIP16 => "zip block",
            Compression::B44 => "b44",
            Compression::B44A => "b44a",
            Compression::DWAA => "dwaa",
            Compression::DWAB => "dwab",
            Compression::PIZ => "piz",
            Compression::PXR24 => "pxr24",
        })
    }
}

impl Compression {

    /// All compression methods, ordered by their identifier in the file.
    pub const ALL: [Compression; 10] = [
        Compression::Uncompressed, Compression::RLE, Compression::ZIP1, Compression::ZIP16, Compression::PIZ,
        Compression::PXR24, Compression::B44, Compression::B44A, Compression::DWAA, Compression::DWAB,
    ];

    /// The byte that identifies this method in the file.
    pub fn id(self) -> u8 {
        match self {
            Compression::Uncompressed => 0,
            Compression::RLE => 1,
            Compression::ZIP1 => 2,
            Compression::ZIP16 => 3,
            Compression::PIZ => 4,
            Compression::PXR24 => 5,
            Compression::B44 => 6,
            Compression::B44A => 7,
            Compression::DWAA => 8,
            Compression::DWAB => 9,
        }
    }

    /// The method with the specified identifier, if it exists.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize { u8::BYTE_SIZE }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(self, write: &mut W) -> UnitResult {
        self.id().write(write)
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        let id = u8::read(read)?;
        Self::from_id(id).ok_or_else(|| Error::invalid_attribute(format!("unknown compression method {}", id)))
    }

    /// For scan line images and deep scan line images, one or more scan lines may be
    /// stored together as a scan line block. The number of scan lines per block
    /// depends on how the pixel data are compressed.
    pub fn scan_lines_per_block(self) -> usize {
        use self::Compression::*;
        match self {
            Uncompressed | RLE | ZIP1 => 1,
            ZIP16 | PXR24 => 16,
            PIZ | B44 | B44A | DWAA => 32,
            DWAB => 256,
        }
    }

    /// Deep data can only be compressed using RLE or ZIP compression.
    pub fn supports_deep_data(self) -> bool {
        use self::Compression::*;
        matches!(self, Uncompressed | RLE | ZIP1)
    }

    /// Most compression methods will reconstruct the exact pixel bytes,
    /// but some might throw away unimportant data for specific types of samples.
    pub fn is_lossless(self) -> bool {
        use self::Compression::*;
        matches!(self, Uncompressed | RLE | ZIP1 | ZIP16 | PIZ)
    }
}


/// Describes the chunk that a codec is processing.
/// The unpacked bytes are in the little-endian layout of the file:
/// for each line, for each channel, all samples of that channel in that line.
#[derive(Debug, Clone, Copy)]
pub struct CodecInfo<'c> {

    /// The compression method.
    pub compression: Compression,

    /// The channels of the part.
    pub channels: &'c ChannelList,

    /// The absolute pixel position of the chunk.
    pub position: Vec2<i32>,

    /// The pixel size of the chunk.
    pub size: Vec2<usize>,

    /// The exact byte count of the unpacked data.
    pub unpacked_size: usize,

    /// Whether this chunk contains deep samples or a deep sample count table.
    pub deep: bool,
}

/// Compresses and decompresses the chunks of one compression method.
/// Implementations must be usable from many threads at once.
pub trait Codec: Send + Sync {

    /// Compress the unpacked little-endian bytes of a chunk.
    fn compress(&self, info: &CodecInfo<'_>, unpacked: Bytes<'_>) -> Result<ByteVec>;

    /// Decompress into the target, which has exactly `info.unpacked_size` bytes.
    fn decompress(&self, info: &CodecInfo<'_>, packed: Bytes<'_>, unpacked: &mut [u8]) -> UnitResult;
}

/// The codecs available to a context, keyed by compression method.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: [Option<Arc<dyn Codec>>; 10],
}

impl Default for CodecRegistry {

    /// Contains the built in codecs for `RLE`, `ZIP1` and `ZIP16`.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Compression::RLE, Arc::new(RunLength));
        registry.register(Compression::ZIP1, Arc::new(Zip::default()));
        registry.register(Compression::ZIP16, Arc::new(Zip::default()));
        registry
    }
}

impl CodecRegistry {

    /// A registry without any codecs. Only uncompressed data can be processed.
    pub fn empty() -> Self {
        CodecRegistry { codecs: Default::default() }
    }

    /// Use the codec for the compression method, replacing any previous codec.
    pub fn register(&mut self, compression: Compression, codec: Arc<dyn Codec>) {
        self.codecs[compression.id() as usize] = Some(codec);
    }

    /// The codec for the compression method.
    /// `Uncompressed` never has a codec, as the bytes are stored as-is.
    pub fn find(&self, compression: Compression) -> Result<&dyn Codec> {
        self.codecs[compression.id() as usize].as_deref()
            .ok_or_else(|| Error::unsupported(format!("no codec registered for {}", compression)))
    }

    /// Decompress the packed bytes. Bytes that were stored without compression are copied.
    pub fn decompress(&self, info: &CodecInfo<'_>, packed: Bytes<'_>, unpacked: &mut [u8]) -> UnitResult {
        if unpacked.len() != info.unpacked_size {
            return Err(Error::invalid_argument("unpacked buffer size does not match the chunk"));
        }

        // compressors store the raw bytes if compression would not reduce the size
        if info.compression == Compression::Uncompressed || packed.len() == info.unpacked_size {
            if packed.len() != unpacked.len() {
                return Err(Error::bad_chunk("uncompressed chunk size does not match the chunk"));
            }

            unpacked.copy_from_slice(packed);
            return Ok(());
        }

        self.find(info.compression)?.decompress(info, packed, unpacked)
    }

    /// Compress the unpacked bytes, keeping them as-is if compression does not reduce the size.
    pub fn compress(&self, info: &CodecInfo<'_>, unpacked: Bytes<'_>) -> Result<ByteVec> {
        if info.compression == Compression::Uncompressed {
            return Ok(unpacked.to_vec());
        }

        let packed = self.find(info.compression)?.compress(info, unpacked)?;

        if packed.len() < unpacked.len() { Ok(packed) }
        else { Ok(unpacked.to_vec()) }
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(
            Compression::ALL.iter().filter(|compression| self.codecs[compression.id() as usize].is_some())
        ).finish()
    }
}


/// Byte reordering and delta coding shared by the zip and rle codecs.
mod optimize_bytes {

    /// Integrate over all differences to the previous value in order to reconstruct sample values.
    pub fn differences_to_samples(buffer: &mut [u8]) {
        // processing pairs allows the two additions to overlap
        let mut previous = match buffer.first() {
            Some(&first) => first as i16,
            None => return,
        };

        let mut pairs = buffer[1..].chunks_exact_mut(2);
        for chunk in &mut pairs {
            let diff0 = chunk[0] as i16;
            let diff1 = chunk[1] as i16;
            let sample0 = (previous + diff0 - 128) as u8;
            let sample1 = (sample0 as i16 + diff1 - 128) as u8;
            chunk[0] = sample0;
            chunk[1] = sample1;
            previous = sample1 as i16;
        }

        for diff in pairs.into_remainder() {
            *diff = (previous + *diff as i16 - 128) as u8;
        }
    }

    /// Derive over all values in order to produce differences to the previous value.
    pub fn samples_to_differences(buffer: &mut [u8]){
        for index in (1..buffer.len()).rev() {
            buffer[index] = (buffer[index] as i32 - buffer[index - 1] as i32 + 128) as u8;
        }
    }

    /// Interleave the bytes such that the second half of the array is each other byte.
    pub fn interleave_byte_blocks(separated: &mut [u8]) {
        let (first_half, second_half) = separated.split_at((separated.len() + 1) / 2);

        let mut interleaved = Vec::with_capacity(separated.len());
        for index in 0 .. first_half.len() {
            interleaved.push(first_half[index]);
            if let Some(&second) = second_half.get(index) { interleaved.push(second); }
        }

        separated.copy_from_slice(interleaved.as_slice())
    }

    /// Separate the bytes such that the second half contains each other byte.
    pub fn separate_bytes_fragments(source: &mut [u8]) {
        let mut result = Vec::with_capacity(source.len());
        result.extend(source.iter().step_by(2));
        result.extend(source.iter().skip(1).step_by(2));
        source.copy_from_slice(result.as_slice());
    }


}
