
//! Read the bytes of one chunk, decompress them, and distribute the samples to caller buffers.

use smallvec::SmallVec;
use crate::error::*;
use crate::io::*;
use crate::meta::attribute::ChannelList;
use crate::meta::part::Part;
use crate::compression::{CodecInfo, CodecRegistry};
use crate::block::chunk::{ChunkInfo, ChannelLayouts, channel_layouts};
use crate::block::unpack::{self, PixelSlot};


/// The destination of one stage of the pipeline.
/// The pipeline stops, without an error, at the first stage that is skipped.
#[derive(Debug, Default)]
pub enum Scratch<'b> {

    /// Do not run this stage and any following stage.
    Skip,

    /// Allocate a buffer for this stage. It becomes `Owned` afterwards.
    #[default]
    Allocate,

    /// A buffer owned by the request, resized to the required length as needed.
    Owned(Vec<u8>),

    /// A caller buffer, which must be at least as large as required.
    Borrowed(&'b mut [u8]),
}

impl<'b> Scratch<'b> {

    /// Make room for `length` bytes, or return none if the stage is skipped.
    fn prepare(&mut self, length: usize, purpose: &'static str) -> Result<Option<&mut [u8]>> {
        if let Scratch::Allocate = self {
            *self = Scratch::Owned(allocate(length, purpose)?);
        }

        match self {
            Scratch::Skip => Ok(None),
            Scratch::Allocate => Err(Error::invalid_argument("scratch buffer was not allocated")),

            Scratch::Owned(bytes) => {
                if bytes.len() < length {
                    bytes.try_reserve_exact(length - bytes.len()).map_err(|_| Error::out_of_memory(purpose))?;
                }

                bytes.resize(length, 0);
                Ok(Some(bytes.as_mut_slice()))
            },

            Scratch::Borrowed(bytes) => {
                if bytes.len() < length {
                    return Err(Error::invalid_argument(format!(
                        "{} buffer has {} bytes, but {} are required", purpose, bytes.len(), length
                    )));
                }

                Ok(Some(&mut bytes[.. length]))
            },
        }
    }

    /// The bytes produced by the last decode, if this stage ran.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Scratch::Owned(bytes) => Some(bytes),
            Scratch::Borrowed(bytes) => Some(bytes),
            Scratch::Skip | Scratch::Allocate => None,
        }
    }
}


/// Everything required to decode one chunk.
/// Created by the read context for a scan line or a tile.
#[derive(Debug)]
pub struct DecodeRequest<'b> {

    /// Where the chunk is located in the file, and which pixels it contains.
    pub chunk: ChunkInfo,

    /// The samples of each channel in this chunk, in the order of the channel list.
    pub channels: ChannelLayouts,

    /// For each channel, where its samples should be written.
    /// Channels without output are decompressed but not distributed.
    pub outputs: SmallVec<[Option<PixelSlot>; 4]>,

    /// The caller buffers that the outputs refer to.
    pub buffers: SmallVec<[&'b mut [u8]; 4]>,

    /// The compressed pixel data.
    pub packed: Scratch<'b>,

    /// The decompressed pixel data in the little-endian file layout.
    pub unpacked: Scratch<'b>,

    /// The compressed sample count table of deep chunks.
    pub packed_sample_table: Scratch<'b>,

    /// The decompressed sample count table of deep chunks, in the little-endian file layout.
    pub unpacked_sample_table: Scratch<'b>,

    /// The cumulative sample counts of each pixel, per line, after decoding a deep chunk.
    pub sample_counts: Vec<i32>,
}

impl<'b> DecodeRequest<'b> {

    /// A request without any outputs.
    pub fn new(part: &Part, chunk: ChunkInfo) -> Result<Self> {
        let channels = channel_layouts(part.channels()?, chunk.start, chunk.size);

        Ok(DecodeRequest {
            outputs: smallvec::smallvec![ None; channels.len() ],
            channels, chunk,
            buffers: SmallVec::new(),
            packed: Scratch::Allocate,
            unpacked: Scratch::Allocate,
            packed_sample_table: Scratch::Allocate,
            unpacked_sample_table: Scratch::Allocate,
            sample_counts: Vec::new(),
        })
    }

    /// Add a caller buffer and return its index for use in pixel slots.
    pub fn add_buffer(&mut self, buffer: &'b mut [u8]) -> usize {
        self.buffers.push(buffer);
        self.buffers.len() - 1
    }

    /// Write the samples of the named channel to the slot.
    pub fn set_output(&mut self, channel_name: &str, slot: PixelSlot) -> UnitResult {
        let index = self.channels.iter().position(|channel| channel.name == *channel_name)
            .ok_or_else(|| Error::invalid_argument(format!("no channel named `{}` in this part", channel_name)))?;

        self.outputs[index] = Some(slot);
        Ok(())
    }

    /// For deep chunks, the total sample count of each line after decoding.
    pub fn line_sample_counts(&self) -> Result<Vec<usize>> {
        unpack::line_sample_totals(&self.sample_counts, self.chunk.size.width())
            .ok_or_else(|| Error::bad_chunk("deep sample counts decrease within a line"))
    }

    fn codec_info<'c>(&self, channels: &'c ChannelList, unpacked_size: usize) -> CodecInfo<'c> {
        CodecInfo {
            compression: self.chunk.compression,
            channels,
            position: self.chunk.start,
            size: self.chunk.size,
            unpacked_size,
            deep: self.chunk.deep,
        }
    }

    /// Samples that are stored raw, in the type and layout of the outputs,
    /// can be read into the outputs without an intermediate buffer.
    fn can_read_directly(&self) -> bool {
        !self.chunk.deep && self.chunk.is_stored_raw()
            && matches!(self.packed, Scratch::Allocate) && matches!(self.unpacked, Scratch::Allocate)
            && self.channels.iter().zip(&self.outputs).all(|(channel, output)| {
                output.map_or(true, |slot| {
                    slot.sample_type == channel.sample_type && slot.pixel_stride == channel.bytes_per_element()
                })
            })
    }

    /// Run the pipeline until the first skipped stage.
    pub fn decode(&mut self, source: &dyn ReadAt, channels: &ChannelList, codecs: &CodecRegistry) -> UnitResult {
        if self.outputs.len() != self.channels.len() {
            return Err(Error::invalid_argument("one optional output per channel is required"));
        }

        if self.chunk.deep { self.decode_deep(source, channels, codecs) }
        else if self.can_read_directly() { self.read_directly(source) }
        else { self.decode_flat(source, channels, codecs) }
    }

    fn read_directly(&mut self, source: &dyn ReadAt) -> UnitResult {
        unpack::check_slots(&self.channels, &self.outputs, &self.buffers[..])?;

        let expected: usize = self.channels.iter().map(|channel| channel.byte_size()).sum();
        if expected as u64 != self.chunk.unpacked_size {
            return Err(Error::bad_chunk("chunk size does not match its channels"));
        }

        for (channel_index, line, range) in unpack::channel_lines(&self.channels, self.chunk.start.y(), self.chunk.size.height()) {
            let Some(slot) = self.outputs[channel_index] else { continue };

            let start = slot.sample_position(line, 0);
            let target = &mut self.buffers[slot.buffer][start .. start + range.len()];

            source.read_exact_at(target, self.chunk.data_offset + range.start as u64)?;
            unpack::little_endian_to_native(target, self.channels[channel_index].bytes_per_element());
        }

        Ok(())
    }

    fn decode_flat(&mut self, source: &dyn ReadAt, channels: &ChannelList, codecs: &CodecRegistry) -> UnitResult {
        let packed_size = u64_to_usize(self.chunk.packed_size, "packed chunk size")?;
        let unpacked_size = u64_to_usize(self.chunk.unpacked_size, "unpacked chunk size")?;
        let info = self.codec_info(channels, unpacked_size);

        let Some(packed) = self.packed.prepare(packed_size, "packed chunk")? else { return Ok(()) };
        source.read_exact_at(packed, self.chunk.data_offset)?;

        let Some(unpacked) = self.unpacked.prepare(unpacked_size, "unpacked chunk")? else { return Ok(()) };
        codecs.decompress(&info, packed, unpacked)?;

        if self.outputs.iter().any(Option::is_some) {
            unpack::scatter(
                &self.channels, self.chunk.start.y(), self.chunk.size.height(),
                unpacked, &self.outputs, &mut self.buffers
            )?;
        }

        Ok(())
    }

    fn decode_deep(&mut self, source: &dyn ReadAt, channels: &ChannelList, codecs: &CodecRegistry) -> UnitResult {
        let table_size = u64_to_usize(self.chunk.sample_table_size, "sample table size")?;
        let unpacked_table_size = u64_to_usize(self.chunk.unpacked_sample_table_size(), "sample table size")?;
        let table_info = self.codec_info(channels, unpacked_table_size);

        let Some(packed_table) = self.packed_sample_table.prepare(table_size, "packed sample table")? else { return Ok(()) };
        source.read_exact_at(packed_table, self.chunk.sample_table_offset)?;

        let Some(table) = self.unpacked_sample_table.prepare(unpacked_table_size, "sample table")? else { return Ok(()) };
        codecs.decompress(&table_info, packed_table, table)?;

        self.sample_counts = table.chunks_exact(i32::BYTE_SIZE)
            .map(|bytes| i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();

        let line_totals = self.line_sample_counts()?;
        let bytes_per_sample: u64 = self.channels.iter().map(|channel| channel.bytes_per_element() as u64).sum();
        let total_samples: u64 = line_totals.iter().map(|&count| count as u64).sum();

        if total_samples * bytes_per_sample != self.chunk.unpacked_size {
            return Err(Error::bad_chunk(format!(
                "deep chunk has {} unpacked bytes, but its sample counts require {}",
                self.chunk.unpacked_size, total_samples * bytes_per_sample
            )));
        }

        let packed_size = u64_to_usize(self.chunk.packed_size, "packed chunk size")?;
        let unpacked_size = u64_to_usize(self.chunk.unpacked_size, "unpacked chunk size")?;
        let info = self.codec_info(channels, unpacked_size);

        let Some(packed) = self.packed.prepare(packed_size, "packed chunk")? else { return Ok(()) };
        source.read_exact_at(packed, self.chunk.data_offset)?;

        let Some(unpacked) = self.unpacked.prepare(unpacked_size, "unpacked chunk")? else { return Ok(()) };
        codecs.decompress(&info, packed, unpacked)?;

        if self.outputs.iter().any(Option::is_some) {
            unpack::scatter_deep(&self.channels, &line_totals, unpacked, &self.outputs, &mut self.buffers)?;
        }

        Ok(())
    }
}
