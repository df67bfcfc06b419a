
//! Move samples between the little-endian layout of an unpacked chunk
//! and caller buffers in host byte order.
//!
//! The unpacked layout contains, for each line, for each channel in the list,
//! all samples of that channel in that line. Subsampled channels skip lines.

use half::f16;
use crate::error::*;
use crate::meta::attribute::SampleType;
use crate::block::chunk::ChannelLayout;


/// Where the samples of one channel are located in a caller buffer.
/// Several slots may refer to the same buffer, for example to interleave channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelSlot {

    /// The index of the buffer in the request.
    pub buffer: usize,

    /// The byte position of the first sample within the buffer.
    pub offset: usize,

    /// The type of the samples in the buffer. Half and float convert into each other.
    pub sample_type: SampleType,

    /// Bytes from one sample to the next sample in the same line.
    /// For deep data, bytes from one sample to the next sample of the channel.
    pub pixel_stride: usize,

    /// Bytes from one line to the next line. Unused for deep data.
    pub line_stride: usize,
}

impl PixelSlot {

    /// Samples without gaps, lines without gaps.
    pub fn dense(buffer: usize, offset: usize, sample_type: SampleType, width: usize) -> Self {
        let pixel_stride = sample_type.bytes_per_sample();
        PixelSlot { buffer, offset, sample_type, pixel_stride, line_stride: pixel_stride * width }
    }

    /// Interleave multiple channels in one buffer.
    pub fn interleaved(buffer: usize, offset: usize, sample_type: SampleType, pixel_stride: usize, width: usize) -> Self {
        PixelSlot { buffer, offset, sample_type, pixel_stride, line_stride: pixel_stride * width }
    }

    /// The buffer length needed to hold the specified lines, or none on overflow.
    fn end(&self, width: usize, height: usize) -> Option<usize> {
        if width == 0 || height == 0 { return Some(self.offset) }

        (height - 1).checked_mul(self.line_stride)?
            .checked_add((width - 1).checked_mul(self.pixel_stride)?)?
            .checked_add(self.offset)?
            .checked_add(self.sample_type.bytes_per_sample())
    }

    pub(crate) fn sample_position(&self, line: usize, sample: usize) -> usize {
        self.offset + line * self.line_stride + sample * self.pixel_stride
    }
}


/// A single value of any sample type.
#[derive(Copy, Clone, Debug)]
enum Sample {
    F16(f16),
    F32(f32),
    U32(u32),
}

impl Sample {

    #[inline]
    fn from_le_bytes(sample_type: SampleType, bytes: &[u8]) -> Self {
        match sample_type {
            SampleType::F16 => Sample::F16(f16::from_bits(u16::from_le_bytes([bytes[0], bytes[1]]))),
            SampleType::F32 => Sample::F32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            SampleType::U32 => Sample::U32(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        }
    }

    #[inline]
    fn from_ne_bytes(sample_type: SampleType, bytes: &[u8]) -> Self {
        match sample_type {
            SampleType::F16 => Sample::F16(f16::from_bits(u16::from_ne_bytes([bytes[0], bytes[1]]))),
            SampleType::F32 => Sample::F32(f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            SampleType::U32 => Sample::U32(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        }
    }

    /// Only called for pairs accepted by `check_conversion`.
    #[inline]
    fn convert(self, target: SampleType) -> Self {
        match (self, target) {
            (Sample::F16(value), SampleType::F32) => Sample::F32(value.to_f32()),
            (Sample::F32(value), SampleType::F16) => Sample::F16(f16::from_f32(value)),
            (sample, _) => sample,
        }
    }

    #[inline]
    fn write_ne_bytes(self, target: &mut [u8]) {
        match self {
            Sample::F16(value) => target[..2].copy_from_slice(&value.to_bits().to_ne_bytes()),
            Sample::F32(value) => target[..4].copy_from_slice(&value.to_ne_bytes()),
            Sample::U32(value) => target[..4].copy_from_slice(&value.to_ne_bytes()),
        }
    }

    #[inline]
    fn write_le_bytes(self, target: &mut [u8]) {
        match self {
            Sample::F16(value) => target[..2].copy_from_slice(&value.to_bits().to_le_bytes()),
            Sample::F32(value) => target[..4].copy_from_slice(&value.to_le_bytes()),
            Sample::U32(value) => target[..4].copy_from_slice(&value.to_le_bytes()),
        }
    }
}

/// Half and float convert into each other, unsigned integers only into themselves.
pub fn check_conversion(from: SampleType, to: SampleType) -> UnitResult {
    let float = |sample_type| matches!(sample_type, SampleType::F16 | SampleType::F32);

    if from == to || (float(from) && float(to)) { Ok(()) }
    else {
        Err(Error::invalid_argument(format!("cannot convert {:?} samples to {:?}", from, to)))
    }
}


/// The specialized routine that a request can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routine {

    /// Any layout, with conversion.
    General,

    /// Four half channels interleaved in one buffer with a pixel stride of 8 bytes.
    Interleaved16x4,

    /// Half channels, each with contiguous samples.
    Planar16,

    /// 32-bit channels, each with contiguous samples.
    Planar32,
}

/// Find the fastest routine that produces the same output as the general one.
pub fn choose_routine(channels: &[ChannelLayout], slots: &[Option<PixelSlot>]) -> Routine {
    let all_present_and_unconverted = channels.len() == slots.len()
        && channels.iter().zip(slots).all(|(channel, slot)| {
            slot.map_or(false, |slot| slot.sample_type == channel.sample_type)
                && channel.sampling.x() == 1 && channel.sampling.y() == 1
        });

    if !all_present_and_unconverted || channels.is_empty() {
        return Routine::General;
    }

    let slots: Vec<PixelSlot> = slots.iter().flatten().copied().collect();
    let all_half = channels.iter().all(|channel| channel.sample_type == SampleType::F16);
    let all_32_bit = channels.iter().all(|channel| channel.bytes_per_element() == 4);

    let interleaved = all_half && slots.len() == 4
        && slots.iter().all(|slot| slot.pixel_stride == 8
            && slot.buffer == slots[0].buffer && slot.line_stride == slots[0].line_stride);

    if interleaved { Routine::Interleaved16x4 }
    else if all_half && slots.iter().all(|slot| slot.pixel_stride == 2) { Routine::Planar16 }
    else if all_32_bit && slots.iter().all(|slot| slot.pixel_stride == 4) { Routine::Planar32 }
    else { Routine::General }
}

pub(crate) fn check_slots<B: AsRef<[u8]>>(channels: &[ChannelLayout], slots: &[Option<PixelSlot>], buffers: &[B]) -> UnitResult {
    if slots.len() != channels.len() {
        return Err(Error::invalid_argument("one optional slot per channel is required"));
    }

    for (channel, slot) in channels.iter().zip(slots) {
        if let Some(slot) = slot {
            check_conversion(channel.sample_type, slot.sample_type)?;

            let buffer = buffers.get(slot.buffer)
                .ok_or_else(|| Error::invalid_argument(format!("no buffer with index {}", slot.buffer)))?;

            let end = slot.end(channel.width, channel.height)
                .ok_or_else(|| Error::invalid_argument("slot exceeds the address space"))?;

            if end > buffer.as_ref().len() {
                return Err(Error::invalid_argument(format!(
                    "channel `{}` needs {} bytes, but buffer {} has {}", channel.name, end, slot.buffer, buffer.as_ref().len()
                )));
            }
        }
    }

    Ok(())
}

fn check_unpacked_size(channels: &[ChannelLayout], unpacked: usize) -> UnitResult {
    let expected: usize = channels.iter().map(ChannelLayout::byte_size).sum();

    if expected == unpacked { Ok(()) }
    else {
        Err(Error::bad_chunk(format!("unpacked chunk has {} bytes instead of {}", unpacked, expected)))
    }
}

/// Iterate the channel lines of an unpacked chunk as (channel index, line of that channel, byte range).
pub(crate) fn channel_lines(channels: &[ChannelLayout], start_y: i32, line_count: usize) -> impl Iterator<Item = (usize, usize, std::ops::Range<usize>)> + '_ {
    let mut lines_so_far = vec![ 0_usize; channels.len() ];
    let mut position = 0;

    (0 .. line_count).flat_map(move |line| {
        let y = start_y + line as i32;

        channels.iter().enumerate()
            .filter(move |(_, channel)| channel.has_line(y))
            .map(|(index, channel)| (index, channel.width * channel.bytes_per_element()))
            .collect::<Vec<_>>()
    })
    .map(move |(index, byte_count)| {
        let range = position .. position + byte_count;
        position += byte_count;

        let line = lines_so_far[index];
        lines_so_far[index] += 1;
        (index, line, range)
    })
}


/// Convert little-endian samples to host byte order in place.
pub(crate) fn little_endian_to_native(bytes: &mut [u8], bytes_per_sample: usize) {
    if cfg!(target_endian = "big") {
        for sample in bytes.chunks_exact_mut(bytes_per_sample) {
            sample.reverse();
        }
    }
}

/// The total sample count of each line, from the cumulative counts of each pixel in each line.
/// Returns none if the counts decrease within a line or are negative.
pub fn line_sample_totals(cumulative_counts: &[i32], width: usize) -> Option<Vec<usize>> {
    if width == 0 { return Some(Vec::new()) }
    if cumulative_counts.len() % width != 0 { return None }

    cumulative_counts.chunks_exact(width)
        .map(|line| {
            let increasing = line.windows(2).all(|pair| pair[0] <= pair[1]);
            let non_negative = line.first().map_or(true, |&first| first >= 0);
            if increasing && non_negative { line.last().map(|&total| total as usize) } else { None }
        })
        .collect()
}


/// Write all samples of an unpacked chunk into the slots, converting to host byte order.
/// Channels without slot are skipped.
pub fn scatter(
    channels: &[ChannelLayout], start_y: i32, line_count: usize,
    unpacked: &[u8], slots: &[Option<PixelSlot>], buffers: &mut [&mut [u8]]
) -> UnitResult
{
    check_unpacked_size(channels, unpacked.len())?;
    check_slots(channels, slots, &*buffers)?;

    match choose_routine(channels, slots) {
        Routine::General => scatter_general(channels, start_y, line_count, unpacked, slots, buffers),
        Routine::Interleaved16x4 => scatter_interleaved_16x4(channels, start_y, line_count, unpacked, slots, buffers),
        Routine::Planar16 => scatter_planar::<2>(channels, start_y, line_count, unpacked, slots, buffers),
        Routine::Planar32 => scatter_planar::<4>(channels, start_y, line_count, unpacked, slots, buffers),
    }

    Ok(())
}

/// Requires checked slots.
pub(crate) fn scatter_general(
    channels: &[ChannelLayout], start_y: i32, line_count: usize,
    unpacked: &[u8], slots: &[Option<PixelSlot>], buffers: &mut [&mut [u8]]
) {
    for (channel_index, line, range) in channel_lines(channels, start_y, line_count) {
        let channel = &channels[channel_index];
        let Some(slot) = slots[channel_index] else { continue };

        let source = &unpacked[range];
        let target = &mut *buffers[slot.buffer];

        for (sample_index, bytes) in source.chunks_exact(channel.bytes_per_element()).enumerate() {
            let position = slot.sample_position(line, sample_index);
            Sample::from_le_bytes(channel.sample_type, bytes)
                .convert(slot.sample_type)
                .write_ne_bytes(&mut target[position ..]);
        }
    }
}

/// Requires checked slots of four half channels sharing one buffer.
pub(crate) fn scatter_interleaved_16x4(
    channels: &[ChannelLayout], start_y: i32, line_count: usize,
    unpacked: &[u8], slots: &[Option<PixelSlot>], buffers: &mut [&mut [u8]]
) {
    let slots: [PixelSlot; 4] = match slots {
        [Some(a), Some(b), Some(c), Some(d)] => [*a, *b, *c, *d],
        _ => return scatter_general(channels, start_y, line_count, unpacked, slots, buffers),
    };

    let target = &mut *buffers[slots[0].buffer];

    for (channel_index, line, range) in channel_lines(channels, start_y, line_count) {
        let slot = slots[channel_index];
        let mut position = slot.sample_position(line, 0);

        for bytes in unpacked[range].chunks_exact(2) {
            let value = u16::from_le_bytes([bytes[0], bytes[1]]);
            target[position .. position + 2].copy_from_slice(&value.to_ne_bytes());
            position += 8;
        }
    }
}

/// Requires checked slots with contiguous samples of the stored type.
pub(crate) fn scatter_planar<const BYTES: usize>(
    channels: &[ChannelLayout], start_y: i32, line_count: usize,
    unpacked: &[u8], slots: &[Option<PixelSlot>], buffers: &mut [&mut [u8]]
) {
    for (channel_index, line, range) in channel_lines(channels, start_y, line_count) {
        let Some(slot) = slots[channel_index] else { continue };

        let start = slot.sample_position(line, 0);
        let target = &mut buffers[slot.buffer][start .. start + range.len()];
        target.copy_from_slice(&unpacked[range]);
        little_endian_to_native(target, BYTES);
    }
}


/// Read all samples from the slots into the unpacked little-endian layout.
/// Every channel requires a slot.
pub fn gather(
    channels: &[ChannelLayout], start_y: i32, line_count: usize,
    slots: &[Option<PixelSlot>], buffers: &[&[u8]], unpacked: &mut [u8]
) -> UnitResult
{
    check_unpacked_size(channels, unpacked.len())?;
    check_slots(channels, slots, buffers)?;

    if let Some(missing) = channels.iter().zip(slots).find(|(_, slot)| slot.is_none()) {
        return Err(Error::invalid_argument(format!("no samples provided for channel `{}`", missing.0.name)));
    }

    for (channel_index, line, range) in channel_lines(channels, start_y, line_count) {
        let channel = &channels[channel_index];
        let Some(slot) = slots[channel_index] else { continue };
        let source = buffers[slot.buffer];

        for (sample_index, bytes) in unpacked[range].chunks_exact_mut(channel.bytes_per_element()).enumerate() {
            let position = slot.sample_position(line, sample_index);
            Sample::from_ne_bytes(slot.sample_type, &source[position ..])
                .convert(channel.sample_type)
                .write_le_bytes(bytes);
        }
    }

    Ok(())
}


/// Check the slots of deep channels against the total sample count of each channel.
fn check_deep_slots<B: AsRef<[u8]>>(channels: &[ChannelLayout], slots: &[Option<PixelSlot>], buffers: &[B], total_samples: usize) -> UnitResult {
    let as_lines: Vec<ChannelLayout> = channels.iter()
        .map(|channel| ChannelLayout { width: total_samples, height: 1, ..channel.clone() })
        .collect();

    check_slots(&as_lines, slots, buffers)
}

/// Write the samples of a deep chunk consecutively per channel.
/// `line_samples` contains the total sample count of each line.
pub fn scatter_deep(
    channels: &[ChannelLayout], line_samples: &[usize],
    unpacked: &[u8], slots: &[Option<PixelSlot>], buffers: &mut [&mut [u8]]
) -> UnitResult
{
    let total_samples: usize = line_samples.iter().sum();
    let bytes_per_sample: usize = channels.iter().map(ChannelLayout::bytes_per_element).sum();

    if total_samples * bytes_per_sample != unpacked.len() {
        return Err(Error::bad_chunk("deep sample data does not match the sample counts"));
    }

    check_deep_slots(channels, slots, &*buffers, total_samples)?;

    let mut written = vec![ 0_usize; channels.len() ];
    let mut position = 0;

    for &samples in line_samples {
        for (channel_index, channel) in channels.iter().enumerate() {
            let byte_count = samples * channel.bytes_per_element();
            let source = &unpacked[position .. position + byte_count];
            position += byte_count;

            let Some(slot) = slots[channel_index] else { continue };
            let target = &mut *buffers[slot.buffer];

            for bytes in source.chunks_exact(channel.bytes_per_element()) {
                let target_position = slot.offset + written[channel_index] * slot.pixel_stride;
                written[channel_index] += 1;

                Sample::from_le_bytes(channel.sample_type, bytes)
                    .convert(slot.sample_type)
                    .write_ne_bytes(&mut target[target_position ..]);
            }
        }
    }

    Ok(())
}

/// Read consecutive deep samples per channel into the unpacked little-endian layout.
pub fn gather_deep(
    channels: &[ChannelLayout], line_samples: &[usize],
    slots: &[Option<PixelSlot>], buffers: &[&[u8]]
) -> Result<Vec<u8>>
{
    let total_samples: usize = line_samples.iter().sum();
    check_deep_slots(channels, slots, buffers, total_samples)?;

    let bytes_per_sample: usize = channels.iter().map(ChannelLayout::bytes_per_element).sum();
    let mut unpacked = crate::io::allocate::<u8>(total_samples * bytes_per_sample, "deep samples")?;
    let mut read = vec![ 0_usize; channels.len() ];
    let mut position = 0;

    for &samples in line_samples {
        for (channel_index, channel) in channels.iter().enumerate() {
            let slot = slots[channel_index].ok_or_else(|| Error::invalid_argument(format!(
                "no samples provided for channel `{}`", channel.name
            )))?;

            let byte_count = samples * channel.bytes_per_element();
            let target = &mut unpacked[position .. position + byte_count];
            position += byte_count;

            for bytes in target.chunks_exact_mut(channel.bytes_per_element()) {
                let source_position = slot.offset + read[channel_index] * slot.pixel_stride;
                read[channel_index] += 1;

                Sample::from_ne_bytes(slot.sample_type, &buffers[slot.buffer][source_position ..])
                    .convert(channel.sample_type)
                    .write_le_bytes(bytes);
            }
        }
    }

    Ok(unpacked)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::math::Vec2;
    use crate::meta::attribute::Text;
    use rand::Rng;

    fn layout(name: &str, sample_type: SampleType, width: usize, height: usize) -> ChannelLayout {
        ChannelLayout { name: Text::from(name), sample_type, sampling: Vec2(1, 1), width, height }
    }

    fn random_bytes(count: usize) -> Vec<u8> {
        let mut rng = rand::rng();

        // avoid half NaN payloads, which may not survive a conversion bit for bit
        (0 .. count).map(|index| if index % 2 == 1 { rng.random_range(0 .. 0x7c) } else { rng.random() }).collect()
    }

    fn compare_with_general(channels: &[ChannelLayout], slots: &[Option<PixelSlot>], buffer_len: usize, expected: Routine) {
        assert_eq!(choose_routine(channels, slots), expected);

        let height = channels[0].height;
        let unpacked = random_bytes(channels.iter().map(ChannelLayout::byte_size).sum());

        let mut fast = vec![ 0_u8; buffer_len ];
        let mut general = vec![ 0_u8; buffer_len ];

        scatter(channels, 0, height, &unpacked, slots, &mut [ fast.as_mut_slice() ]).unwrap();
        check_slots(channels, slots, &[ general.as_slice() ]).unwrap();
        scatter_general(channels, 0, height, &unpacked, slots, &mut [ general.as_mut_slice() ]);

        assert_eq!(fast, general);

        let mut gathered = vec![ 0_u8; unpacked.len() ];
        gather(channels, 0, height, slots, &[ fast.as_slice() ], &mut gathered).unwrap();
        assert_eq!(gathered, unpacked);
    }

    #[test]
    fn interleaved_half_equals_general(){
        let (width, height) = (7, 3);
        let channels: Vec<ChannelLayout> = ["A", "B", "G", "R"].iter()
            .map(|name| layout(name, SampleType::F16, width, height)).collect();

        let slots: Vec<Option<PixelSlot>> = (0 .. 4)
            .map(|index| Some(PixelSlot::interleaved(0, index * 2, SampleType::F16, 8, width)))
            .collect();

        compare_with_general(&channels, &slots, width * height * 8, Routine::Interleaved16x4);
    }

    #[test]
    fn planar_half_equals_general(){
        let (width, height) = (5, 4);
        let channels = [ layout("X", SampleType::F16, width, height), layout("Y", SampleType::F16, width, height) ];
        let plane = width * height * 2;

        let slots = [
            Some(PixelSlot::dense(0, 0, SampleType::F16, width)),
            Some(PixelSlot::dense(0, plane, SampleType::F16, width)),
        ];

        compare_with_general(&channels, &slots, 2 * plane, Routine::Planar16);
    }

    #[test]
    fn planar_32_bit_equals_general(){
        let (width, height) = (3, 2);
        let channels = [ layout("I", SampleType::U32, width, height), layout("Z", SampleType::F32, width, height) ];
        let plane = width * height * 4;

        let slots = [
            Some(PixelSlot::dense(0, 0, SampleType::U32, width)),
            Some(PixelSlot::dense(0, plane, SampleType::F32, width)),
        ];

        compare_with_general(&channels, &slots, 2 * plane, Routine::Planar32);
    }

    #[test]
    fn half_converts_to_float(){
        let channels = [ layout("Y", SampleType::F16, 2, 1) ];
        let mut unpacked = Vec::new();
        unpacked.extend_from_slice(&f16::from_f32(0.5).to_bits().to_le_bytes());
        unpacked.extend_from_slice(&f16::from_f32(-2.0).to_bits().to_le_bytes());

        let slots = [ Some(PixelSlot::dense(0, 0, SampleType::F32, 2)) ];
        let mut output = vec![ 0_u8; 8 ];
        scatter(&channels, 0, 1, &unpacked, &slots, &mut [ output.as_mut_slice() ]).unwrap();

        assert_eq!(f32::from_ne_bytes([output[0], output[1], output[2], output[3]]), 0.5);
        assert_eq!(f32::from_ne_bytes([output[4], output[5], output[6], output[7]]), -2.0);
    }

    #[test]
    fn rejects_bad_slots(){
        let channels = [ layout("I", SampleType::U32, 2, 2) ];
        let unpacked = vec![ 0_u8; 16 ];
        let mut output = vec![ 0_u8; 16 ];

        let float_slot = [ Some(PixelSlot::dense(0, 0, SampleType::F32, 2)) ];
        let error = scatter(&channels, 0, 2, &unpacked, &float_slot, &mut [ output.as_mut_slice() ]).unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidArgument);

        let shifted = [ Some(PixelSlot::dense(0, 1, SampleType::U32, 2)) ];
        let error = scatter(&channels, 0, 2, &unpacked, &shifted, &mut [ output.as_mut_slice() ]).unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidArgument);

        let missing_buffer = [ Some(PixelSlot::dense(1, 0, SampleType::U32, 2)) ];
        let error = scatter(&channels, 0, 2, &unpacked, &missing_buffer, &mut [ output.as_mut_slice() ]).unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidArgument);

        let error = scatter(&channels, 0, 2, &unpacked[1..], &[ None ], &mut [ output.as_mut_slice() ]).unwrap_err();
        assert_eq!(error.code(), ErrorCode::BadChunkData);
    }

    #[test]
    fn subsampled_lines_are_skipped(){
        let full = layout("A", SampleType::F16, 4, 2);
        let half = ChannelLayout { sampling: Vec2(2, 2), ..layout("B", SampleType::F16, 2, 1) };
        let channels = [ full, half ];

        // line 0: A (8 bytes), B (4 bytes); line 1: A (8 bytes)
        let unpacked: Vec<u8> = (0 .. 20).collect();
        let mut a = vec![ 0_u8; 16 ];
        let mut b = vec![ 0_u8; 4 ];

        let slots = [
            Some(PixelSlot::dense(0, 0, SampleType::F16, 4)),
            Some(PixelSlot::dense(1, 0, SampleType::F16, 2)),
        ];

        scatter(&channels, 0, 2, &unpacked, &slots, &mut [ a.as_mut_slice(), b.as_mut_slice() ]).unwrap();

        let native = |bytes: &[u8]| u16::from_ne_bytes([bytes[0], bytes[1]]);
        assert_eq!(native(&a[0..2]), u16::from_le_bytes([0, 1]));
        assert_eq!(native(&a[8..10]), u16::from_le_bytes([12, 13]));
        assert_eq!(native(&b[0..2]), u16::from_le_bytes([8, 9]));
    }

    #[test]
    fn cumulative_counts_become_line_totals(){
        assert_eq!(line_sample_totals(&[ 0, 2, 3, 1, 1, 4 ], 3), Some(vec![ 3, 4 ]));
        assert_eq!(line_sample_totals(&[ 0, 2, 1 ], 3), None);
        assert_eq!(line_sample_totals(&[ -1, 2, 3 ], 3), None);
        assert_eq!(line_sample_totals(&[ 0, 2 ], 3), None);
    }

    #[test]
    fn deep_samples_are_consecutive(){
        let channels = [ layout("A", SampleType::F32, 2, 2), layout("Z", SampleType::F16, 2, 2) ];
        let line_samples = [ 3_usize, 1 ];

        let a_values = [ 1.0_f32, 2.0, 3.0, 4.0 ];
        let z_values = [ 0.5_f32, 0.25, 0.125, 1.5 ];

        let a_input: Vec<u8> = a_values.iter().flat_map(|value| value.to_ne_bytes()).collect();
        let z_input: Vec<u8> = z_values.iter().flat_map(|value| f16::from_f32(*value).to_bits().to_ne_bytes()).collect();

        let slots = [
            Some(PixelSlot::dense(0, 0, SampleType::F32, 1)),
            Some(PixelSlot::dense(1, 0, SampleType::F16, 1)),
        ];

        let unpacked = gather_deep(&channels, &line_samples, &slots, &[ &a_input, &z_input ]).unwrap();
        assert_eq!(unpacked.len(), 4 * 4 + 4 * 2);

        // the first line contains three samples of A, then three samples of Z
        assert_eq!(&unpacked[0 .. 4], &1.0_f32.to_le_bytes());
        assert_eq!(&unpacked[12 .. 14], &f16::from_f32(0.5).to_bits().to_le_bytes());

        let float_slots = [
            Some(PixelSlot::dense(0, 0, SampleType::F32, 1)),
            Some(PixelSlot::dense(1, 0, SampleType::F32, 1)),
        ];

        let mut a_output = vec![ 0_u8; 16 ];
        let mut z_output = vec![ 0_u8; 16 ];
        scatter_deep(&channels, &line_samples, &unpacked, &float_slots, &mut [ a_output.as_mut_slice(), z_output.as_mut_slice() ]).unwrap();

        assert_eq!(a_output, a_input);
        let z_floats: Vec<f32> = z_output.chunks_exact(4).map(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])).collect();
        assert_eq!(z_floats, z_values);

        let error = scatter_deep(&channels, &[ 3, 2 ], &unpacked, &float_slots, &mut [ a_output.as_mut_slice(), z_output.as_mut_slice() ]).unwrap_err();
        assert_eq!(error.code(), ErrorCode::BadChunkData);
    }
}
