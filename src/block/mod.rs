//! Locate, read, decompress and write the chunks of pixel data.
//! Each part has a table that contains the file position of each of its chunks.

pub mod chunk;
pub mod unpack;
pub mod decode;
pub mod encode;

use tracing::{debug, trace};
use crate::error::*;
use crate::io::*;
use crate::meta::MetaData;
use crate::block::chunk::{read_chunk_index, read_chunk_info, validate_chunk_offset};


/// The chunk offset table of a part, loading it from the file on first access.
///
/// Concurrent callers may each read the table, but only the first one to finish
/// publishes it. The others drop their copy and use the published one.
pub fn load_chunk_table<'m>(
    source: &dyn ReadAt, meta: &'m MetaData, part_index: usize,
    file_size: u64, reconstruct: bool
) -> Result<&'m [u64]>
{
    let part = meta.parts.get(part_index)
        .ok_or_else(|| Error::out_of_range(format!("part index {} of {}", part_index, meta.parts.len())))?;

    if let Some(table) = part.chunk_table.get() {
        return Ok(table);
    }

    let chunk_count = usize::try_from(part.chunk_count())
        .map_err(|_| Error::invalid_argument("chunk count of part is not known yet"))?;

    let mut table = allocate::<u64>(chunk_count, "chunk offset table")?;

    let mut read = SourceReader::new(source, part.chunk_table_offset());
    u64::read_slice(&mut read, &mut table).map_err(|error| {
        if error.is_unexpected_end() { Error::bad_chunk("chunk offset table exceeds the file") }
        else { error }
    })?;

    let is_invalid = |&offset: &u64| validate_chunk_offset(offset, meta.chunk_tables_end, file_size).is_err();
    let invalid_count = table.iter().filter(|&offset| is_invalid(offset)).count();

    if invalid_count != 0 && reconstruct && !meta.requirements.is_multipart() {
        debug!(part_index, invalid_count, "reconstructing incomplete chunk offset table");
        reconstruct_chunk_table(source, meta, part_index, file_size, &mut table);
    }

    match part.chunk_table.set(table.into_boxed_slice()) {
        Ok(()) => trace!(part_index, chunk_count, "published chunk offset table"),
        Err(_) => trace!(part_index, "chunk offset table was published by another caller"),
    }

    part.chunk_table.get().map(|table| &**table)
        .ok_or_else(|| Error::Unknown("chunk offset table was not published".into()))
}

/// Walk the chunk records that follow the tables and record the position of each one.
/// Stops at the first record that cannot be parsed. Entries that were not found remain unchanged.
fn reconstruct_chunk_table(source: &dyn ReadAt, meta: &MetaData, part_index: usize, file_size: u64, table: &mut [u64]) {
    let part = &meta.parts[part_index];
    let mut position = meta.chunk_tables_end;
    let mut found = 0_usize;

    while position < file_size {
        let record = read_chunk_index(source, part, position).and_then(|chunk_index| {
            read_chunk_info(source, file_size, false, part, part_index, chunk_index, position)
        });

        let info = match record {
            Ok(info) => info,
            Err(error) => {
                trace!(position, %error, "stopped reconstructing chunk offset table");
                break;
            }
        };

        table[info.chunk_index] = position;
        found += 1;
        position = info.data_offset + info.packed_size;
    }

    debug!(part_index, found, "reconstructed chunk offset table");
}

/// The validated file position of a chunk.
pub fn chunk_offset(table: &[u64], chunk_index: usize, meta: &MetaData, file_size: u64) -> Result<u64> {
    let offset = *table.get(chunk_index)
        .ok_or_else(|| Error::out_of_range(format!("chunk index {} of {}", chunk_index, table.len())))?;

    validate_chunk_offset(offset, meta.chunk_tables_end, file_size)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::math::Vec2;
    use crate::meta::{Requirements, assign_chunk_table_offsets};
    use crate::meta::attribute::*;
    use crate::meta::part::{Part, Storage};
    use crate::meta::Parts;

    /// A file with a scan line part of 4 lines and the specified chunk table.
    fn file_with_table(table: [u64; 4], records: &[u8]) -> (MetaData, MemoryStream) {
        let channels = ChannelList::new(smallvec::smallvec![ ChannelDescription::new("Y", SampleType::U32, false) ]);
        let mut part = Part::with_required(Storage::ScanLine, channels, IntegerBounds::from_dimensions(1, 4), Compression::Uncompressed).unwrap();
        part.compute_geometry().unwrap();

        let mut parts: Parts = smallvec::smallvec![ part ];
        let chunk_tables_end = assign_chunk_table_offsets(&mut parts, 0).unwrap();
        let requirements = Requirements::infer(&parts);

        let mut bytes = Vec::new();
        u64::write_slice(&mut bytes, &table).unwrap();
        bytes.extend_from_slice(records);

        let meta = MetaData { requirements, parts, header_byte_size: 0, chunk_tables_end };
        (meta, MemoryStream::new(bytes))
    }

    fn records(lines: &[i32]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for &y in lines {
            y.write(&mut bytes).unwrap();
            4_i32.write(&mut bytes).unwrap();
            (y as u32 * 10).write(&mut bytes).unwrap();
        }
        bytes
    }

    #[test]
    fn table_is_loaded_once(){
        let (meta, source) = file_with_table([ 32, 44, 56, 68 ], &records(&[ 0, 1, 2, 3 ]));
        let size = source.size().unwrap();

        let first = load_chunk_table(&source, &meta, 0, size, true).unwrap();
        let second = load_chunk_table(&source, &meta, 0, size, true).unwrap();

        assert_eq!(first, &[ 32, 44, 56, 68 ]);
        assert!(std::ptr::eq(first, second));
        assert_eq!(chunk_offset(first, 2, &meta, size).unwrap(), 56);
        assert_eq!(chunk_offset(first, 4, &meta, size).unwrap_err().code(), ErrorCode::ArgumentOutOfRange);
    }

    #[test]
    fn zeroed_table_is_reconstructed(){
        // records stored out of order, as concurrent writers may produce them
        let (meta, source) = file_with_table([ 0; 4 ], &records(&[ 2, 0, 3, 1 ]));
        let size = source.size().unwrap();

        let table = load_chunk_table(&source, &meta, 0, size, true).unwrap();
        assert_eq!(table, &[ 44, 68, 32, 56 ]);
    }

    #[test]
    fn reconstruction_can_be_disabled(){
        let (meta, source) = file_with_table([ 0; 4 ], &records(&[ 0, 1, 2, 3 ]));
        let size = source.size().unwrap();

        let table = load_chunk_table(&source, &meta, 0, size, false).unwrap();
        assert_eq!(table, &[ 0; 4 ]);
        assert_eq!(chunk_offset(table, 0, &meta, size).unwrap_err().code(), ErrorCode::BadChunkData);
    }

    #[test]
    fn truncated_table(){
        let (meta, _) = file_with_table([ 32, 44, 56, 68 ], &[]);
        let source = MemoryStream::new(vec![ 0_u8; 12 ]);

        let error = load_chunk_table(&source, &meta, 0, 12, true).unwrap_err();
        assert_eq!(error.code(), ErrorCode::BadChunkData);
        assert_eq!(meta.parts[0].chunk_count(), 4);
        assert_eq!(meta.parts[0].data_window().max, Vec2(0, 3));
    }
}
