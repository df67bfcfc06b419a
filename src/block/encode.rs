
//! Collect caller samples into one chunk, compress it, and produce the chunk record bytes.

use smallvec::SmallVec;
use crate::error::*;
use crate::io::*;
use crate::meta::attribute::ChannelList;
use crate::meta::part::Part;
use crate::compression::{CodecInfo, CodecRegistry};
use crate::block::chunk::{ChunkInfo, ChannelLayouts, channel_layouts, write_prefix};
use crate::block::unpack::{self, PixelSlot};


/// Everything required to encode one chunk.
/// Created by the write context for a scan line block or a tile.
#[derive(Debug)]
pub struct EncodeRequest<'b> {

    /// Which pixels the chunk contains. The sizes are filled in by `encode`.
    pub chunk: ChunkInfo,

    /// The samples of each channel in this chunk, in the order of the channel list.
    pub channels: ChannelLayouts,

    /// For each channel, where its samples are read from. Every channel needs an input.
    pub inputs: SmallVec<[Option<PixelSlot>; 4]>,

    /// The caller buffers that the inputs refer to.
    pub buffers: SmallVec<[&'b [u8]; 4]>,

    /// For deep chunks, the cumulative sample count of each pixel, per line.
    pub sample_counts: Vec<i32>,
}

impl<'b> EncodeRequest<'b> {

    /// A request without any inputs.
    pub fn new(part: &Part, chunk: ChunkInfo) -> Result<Self> {
        let channels = channel_layouts(part.channels()?, chunk.start, chunk.size);

        Ok(EncodeRequest {
            inputs: smallvec::smallvec![ None; channels.len() ],
            channels, chunk,
            buffers: SmallVec::new(),
            sample_counts: Vec::new(),
        })
    }

    /// Add a caller buffer and return its index for use in pixel slots.
    pub fn add_buffer(&mut self, buffer: &'b [u8]) -> usize {
        self.buffers.push(buffer);
        self.buffers.len() - 1
    }

    /// Read the samples of the named channel from the slot.
    pub fn set_input(&mut self, channel_name: &str, slot: PixelSlot) -> UnitResult {
        let index = self.channels.iter().position(|channel| channel.name == *channel_name)
            .ok_or_else(|| Error::invalid_argument(format!("no channel named `{}` in this part", channel_name)))?;

        self.inputs[index] = Some(slot);
        Ok(())
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

    /// Gather and compress the samples, update the chunk sizes,
    /// and return the complete chunk record including its prefix.
    pub fn encode(&mut self, channels: &ChannelList, codecs: &CodecRegistry, multipart: bool) -> Result<Vec<u8>> {
        if self.inputs.len() != self.channels.len() {
            return Err(Error::invalid_argument("one input per channel is required"));
        }

        let (sample_table, packed) = if self.chunk.deep { self.encode_deep(channels, codecs)? }
            else { (Vec::new(), self.encode_flat(channels, codecs)?) };

        self.chunk.sample_table_size = sample_table.len() as u64;
        self.chunk.packed_size = packed.len() as u64;

        let mut record = Vec::with_capacity(28 + sample_table.len() + packed.len());
        write_prefix(&mut record, multipart, &self.chunk)?;
        record.extend_from_slice(&sample_table);
        record.extend_from_slice(&packed);
        Ok(record)
    }

    fn encode_flat(&mut self, channels: &ChannelList, codecs: &CodecRegistry) -> Result<Vec<u8>> {
        let unpacked_size = u64_to_usize(self.chunk.unpacked_size, "unpacked chunk size")?;
        let mut unpacked = allocate::<u8>(unpacked_size, "unpacked chunk")?;

        unpack::gather(
            &self.channels, self.chunk.start.y(), self.chunk.size.height(),
            &self.inputs, &self.buffers, &mut unpacked
        )?;

        codecs.compress(&self.codec_info(channels, unpacked_size), &unpacked)
    }

    fn encode_deep(&mut self, channels: &ChannelList, codecs: &CodecRegistry) -> Result<(Vec<u8>, Vec<u8>)> {
        if self.sample_counts.len() != self.chunk.size.area() {
            return Err(Error::invalid_argument(format!(
                "deep chunk needs {} sample counts, but {} were provided", self.chunk.size.area(), self.sample_counts.len()
            )));
        }

        let line_totals = unpack::line_sample_totals(&self.sample_counts, self.chunk.size.width())
            .ok_or_else(|| Error::invalid_argument("sample counts must be cumulative within each line"))?;

        let mut table = Vec::with_capacity(self.sample_counts.len() * i32::BYTE_SIZE);
        i32::write_slice(&mut table, &self.sample_counts)?;

        let packed_table = codecs.compress(&self.codec_info(channels, table.len()), &table)?;

        let unpacked = unpack::gather_deep(&self.channels, &line_totals, &self.inputs, &self.buffers)?;
        self.chunk.unpacked_size = unpacked.len() as u64;

        let packed = codecs.compress(&self.codec_info(channels, unpacked.len()), &unpacked)?;
        Ok((packed_table, packed))
    }
}
