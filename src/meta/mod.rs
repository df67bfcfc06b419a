
//! Describes all meta data possible in an exr file.
//! Contains the version flags, the header parser and the header writer.

pub mod attribute;
pub mod attribute_list;
pub mod opaque;
pub mod part;
pub mod tiles;
pub mod validate;

use std::io::{Read, Write};
use smallvec::SmallVec;
use tracing::debug;

use crate::io::*;
use crate::error::*;
use self::attribute::*;
use self::attribute_list::AttributeList;
use self::opaque::OpaqueRegistry;
use self::part::{Part, Required, Storage};
use self::validate::{Direction, Limits};


/// The maximum length of attribute names, type names and channel names in files with the long names flag.
pub const LONG_NAME_LENGTH: usize = 255;

/// The maximum length of names in files without the long names flag.
pub const SHORT_NAME_LENGTH: usize = 31;

/// All parts of a file. Single-part files do not allocate.
pub type Parts = SmallVec<[Part; 1]>;


/// The parsed and validated header of a file.
#[derive(Debug, Clone)]
pub struct MetaData {

    /// The flags of the version field.
    pub requirements: Requirements,

    /// One entry per part, with computed geometry and chunk table offsets.
    pub parts: Parts,

    /// The byte position where the first chunk table starts.
    pub header_byte_size: u64,

    /// The byte position where the first chunk starts.
    pub chunk_tables_end: u64,
}


/// The first four bytes of each exr file.
pub mod magic_number {
    use super::*;

    /// The first four bytes of each exr file.
    pub const BYTES: [u8; 4] = [0x76, 0x2f, 0x31, 0x01];

    /// Without validation, write this instance to the byte stream.
    pub fn write(write: &mut impl Write) -> UnitResult {
        u8::write_slice(write, &self::BYTES)
    }

    /// Consumes four bytes from the reader and returns whether the file may be an exr file.
    pub fn is_exr(read: &mut impl Read) -> Result<bool> {
        let mut magic_num = [0; 4];
        u8::read_slice(read, &mut magic_num)?;
        Ok(magic_num == self::BYTES)
    }

    /// Validate this image. If it is an exr file, return `Ok(())`.
    pub fn validate_exr(read: &mut impl Read) -> UnitResult {
        if self::is_exr(read)? { Ok(()) }
        else { Err(Error::bad_header("file identifier missing")) }
    }
}

/// A `0_u8` at the end of a sequence.
pub mod sequence_end {
    use super::*;

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        1
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(write: &mut W) -> UnitResult {
        0_u8.write(write)
    }

    /// Peeks the next byte. If it is zero, consumes the byte and returns true.
    pub fn has_come(read: &mut PeekRead<impl Read>) -> Result<bool> {
        Ok(read.skip_if_eq(0)?)
    }
}


/// The flags of the version field, summarizing the features needed to read the file.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Requirements {

    /// Always 2 for supported files.
    file_format_version: u8,

    /// The only part is tiled. Never set together with deep data or multiple parts.
    is_single_part_and_tiled: bool,

    /// Names may have up to 255 instead of 31 bytes.
    has_long_names: bool,

    /// At least one part contains deep data.
    has_deep_data: bool,

    /// The header contains a list of parts.
    has_multiple_parts: bool,
}

impl Requirements {

    const TILED_BIT: usize = 9;
    const LONG_NAMES_BIT: usize = 10;
    const DEEP_BIT: usize = 11;
    const MULTIPART_BIT: usize = 12;

    /// Infer the flags required to store these parts.
    pub fn infer(parts: &[Part]) -> Self {
        let has_multiple_parts = parts.len() > 1;
        let has_deep_data = parts.iter().any(|part| part.storage().is_deep());

        let first_part_is_tiled = parts.first()
            .map_or(false, |part| part.storage().is_tiled());

        let is_long = |name: &TextSlice| name.len() > SHORT_NAME_LENGTH;
        let has_long_names = parts.iter().any(|part| {
            part.attributes().iter().any(|attribute| {
                is_long(attribute.name.as_slice()) || is_long(attribute.value.kind_name())
                    || match &attribute.value {
                        AttributeValue::ChannelList(channels) => channels.list.iter()
                            .any(|channel| is_long(channel.name.as_slice())),
                        _ => false,
                    }
            })
        });

        Requirements {
            file_format_version: 2,
            is_single_part_and_tiled: !has_multiple_parts && !has_deep_data && first_part_is_tiled,
            has_long_names, has_deep_data, has_multiple_parts,
        }
    }

    /// Whether the header is a list of parts.
    pub fn is_multipart(&self) -> bool { self.has_multiple_parts }

    /// Whether any part contains deep data.
    pub fn has_deep_data(&self) -> bool { self.has_deep_data }

    /// Whether the only part is tiled.
    pub fn is_single_part_and_tiled(&self) -> bool { self.is_single_part_and_tiled }

    /// Whether names may be longer than 31 bytes.
    pub fn has_long_names(&self) -> bool { self.has_long_names }

    /// The maximum byte count of names in this file.
    pub fn max_name_length(&self) -> usize {
        if self.has_long_names { LONG_NAME_LENGTH } else { SHORT_NAME_LENGTH }
    }

    /// Read and validate the version field.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        use ::bit_field::BitField;

        let version_and_flags = u32::read(read)?;

        // the 8 least significant bits contain the file format version number
        let version = version_and_flags.get_bits(0 .. 8) as u8;

        let known_flags = (1 << Self::TILED_BIT) | (1 << Self::LONG_NAMES_BIT)
            | (1 << Self::DEEP_BIT) | (1 << Self::MULTIPART_BIT);

        let unknown_flags = version_and_flags & !0xff & !known_flags;
        if unknown_flags != 0 {
            return Err(Error::bad_header(format!("unsupported feature flags {:#x}", unknown_flags)));
        }

        let requirements = Requirements {
            file_format_version: version,
            is_single_part_and_tiled: version_and_flags.get_bit(Self::TILED_BIT),
            has_long_names: version_and_flags.get_bit(Self::LONG_NAMES_BIT),
            has_deep_data: version_and_flags.get_bit(Self::DEEP_BIT),
            has_multiple_parts: version_and_flags.get_bit(Self::MULTIPART_BIT),
        };

        requirements.validate()?;
        Ok(requirements)
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(self, write: &mut W) -> UnitResult {
        use ::bit_field::BitField;

        let mut version_and_flags = self.file_format_version as u32;
        version_and_flags.set_bit(Self::TILED_BIT, self.is_single_part_and_tiled);
        version_and_flags.set_bit(Self::LONG_NAMES_BIT, self.has_long_names);
        version_and_flags.set_bit(Self::DEEP_BIT, self.has_deep_data);
        version_and_flags.set_bit(Self::MULTIPART_BIT, self.has_multiple_parts);

        version_and_flags.write(write)
    }

    /// Check the version and the combination of flags.
    pub fn validate(&self) -> UnitResult {
        if self.file_format_version != 2 {
            return Err(Error::bad_header(format!("file format version {} is not supported", self.file_format_version)));
        }

        if self.is_single_part_and_tiled && (self.has_deep_data || self.has_multiple_parts) {
            return Err(Error::bad_header("single-part tiled flag combined with deep data or multiple parts"));
        }

        Ok(())
    }
}


impl MetaData {

    /// Parse the header, validate each part, compute the chunk geometry
    /// and the position of each chunk table.
    /// A strict read rejects type attributes that disagree with the version flags.
    pub fn read_validated(read: impl Read, file_size: Option<u64>, limits: &Limits, strict: bool, opaque: &OpaqueRegistry) -> Result<Self> {
        let mut read = PeekRead::new(Tracking::new(read));
        let (requirements, mut parts) = Self::read_unvalidated(&mut read, file_size, opaque)?;

        debug_assert!(!read.has_peeked(), "header end was peeked");
        let header_byte_size = read.inner().byte_position();

        for part in &mut parts {
            validate::validate_part(part, &requirements, limits, Direction::Read { strict })?;
        }

        let chunk_tables_end = assign_chunk_table_offsets(&mut parts, header_byte_size)?;

        debug!(
            parts = parts.len(), multipart = requirements.is_multipart(),
            deep = requirements.has_deep_data(), long_names = requirements.has_long_names(),
            header_byte_size, "parsed header"
        );

        Ok(MetaData { requirements, parts, header_byte_size, chunk_tables_end })
    }

    /// Parse magic number, version flags and all attributes of all parts.
    /// Does not compute the geometry of the parts.
    pub fn read_unvalidated(read: &mut PeekRead<impl Read>, file_size: Option<u64>, opaque: &OpaqueRegistry) -> Result<(Requirements, Parts)> {
        magic_number::validate_exr(read)?;
        let requirements = Requirements::read(read)?;
        let mut parts = Parts::new();

        loop {
            parts.push(read_part(read, &requirements, file_size, opaque)?);

            if !requirements.is_multipart() || sequence_end::has_come(read)? {
                break;
            }
        }

        Ok((requirements, parts))
    }

    /// Write magic number, flags and all attributes of all parts in creation order.
    /// Opaque attributes must be packed before.
    pub fn write_header(write: &mut impl Write, requirements: Requirements, parts: &[Part]) -> UnitResult {
        magic_number::write(write)?;
        requirements.write(write)?;

        for part in parts {
            for attribute in part.attributes() {
                attribute.write(write)?;
            }

            sequence_end::write(write)?;
        }

        if requirements.is_multipart() {
            sequence_end::write(write)?;
        }

        Ok(())
    }
}


/// Read the attributes of one part, until the terminating null byte.
fn read_part(read: &mut PeekRead<impl Read>, requirements: &Requirements, file_size: Option<u64>, opaque: &OpaqueRegistry) -> Result<Part> {
    let max_name_length = requirements.max_name_length();
    let mut attributes = AttributeList::with_max_name_length(max_name_length);

    // a lower bound of the current position, enough to reject absurd sizes early
    let mut position = (magic_number::BYTES.len() + u32::BYTE_SIZE) as u64;

    while !sequence_end::has_come(read)? {
        let name = Text::read_null_terminated(read, max_name_length)?;
        Text::validate_name_bytes(name.as_slice(), max_name_length)?;

        let kind = Text::read_null_terminated(read, max_name_length)?;
        if kind.is_empty() {
            return Err(Error::invalid_attribute(format!("attribute `{}` has no type name", name)));
        }

        Text::validate_name_bytes(kind.as_slice(), max_name_length)?;

        let size = i32::read(read)?;
        let size = usize::try_from(size).map_err(|_| Error::invalid_attribute(format!(
            "attribute `{}` has negative size {}", name, size
        )))?;

        position += (name.len() + kind.len() + 2 + i32::BYTE_SIZE) as u64;
        if let Some(file_size) = file_size {
            if position + size as u64 > file_size {
                return Err(Error::invalid_attribute(format!(
                    "attribute `{}` with {} bytes exceeds the file", name, size
                )));
            }
        }

        if let Some(required) = Required::from_name(name.as_slice()) {
            required.check_type(kind.as_slice())?;
        }

        let bytes = u8::read_vec(read, size, 1024 * 1024, None, "attribute value")?;
        position += size as u64;

        let mut value = AttributeValue::read(&kind, &bytes, max_name_length)?;
        if let AttributeValue::Opaque(opaque_value) = &mut value {
            opaque.unpack(opaque_value)?;
        }

        attributes.insert_new(Attribute { name, value })?;
    }

    // the type attribute decides, falling back to the flags
    let storage = attributes.find_by_name(Required::Type.name())
        .and_then(|attribute| attribute.value.to_text().ok())
        .and_then(|text| Storage::from_type_name(text.as_slice()))
        .unwrap_or(if requirements.is_single_part_and_tiled() { Storage::Tiled } else { Storage::ScanLine });

    Ok(Part::from_attributes(storage, attributes))
}


/// Place the chunk tables of all parts back to back, starting at the end of the header.
/// Returns the end of the last table. Requires the geometry of each part.
pub fn assign_chunk_table_offsets(parts: &mut [Part], header_end: u64) -> Result<u64> {
    let mut offset = header_end;

    for part in parts {
        part.chunk_table_offset = offset;
        offset = offset.checked_add(part.chunk_table_byte_size()?)
            .ok_or_else(|| Error::invalid_attribute("chunk tables exceed the file size limit"))?;
    }

    Ok(offset)
}
