
//! Write a header, then chunks in any order from any number of threads, then the chunk tables.

use std::sync::{PoisonError, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;
use crate::error::*;
use crate::io::*;
use crate::meta::{MetaData, Parts, Requirements, assign_chunk_table_offsets};
use crate::meta::attribute::{AttributeValue, Text};
use crate::meta::part::{Part, Required};
use crate::meta::tiles::TileCoordinates;
use crate::meta::validate::{validate_part, Direction};
use crate::block::chunk::{ChunkInfo, chunk_info_from_geometry};
use crate::block::encode::EncodeRequest;
use crate::context::options::ContextOptions;


/// A file that is open for writing.
///
/// The header and zeroed chunk tables are written on creation.
/// Each chunk reserves its byte range with an atomic increment of the file end,
/// so chunks can be written concurrently. `finish` waits for chunks that are
/// being written, then writes the chunk tables.
pub struct WriteContext<W: WriteAt> {
    sink: W,
    meta: MetaData,
    options: ContextOptions,
    next_chunk_offset: AtomicU64,
    tables: Vec<Vec<AtomicU64>>,
    finished: AtomicBool,

    /// Held shared by each chunk write from the `finished` check until its table entry is stored,
    /// and held exclusively by `finish` while it writes the tables.
    in_flight: RwLock<()>,
}

impl<W: WriteAt> WriteContext<W> {

    /// Validate the parts and write the header.
    /// Attributes required for multi-part or deep files are added where missing.
    pub fn new(sink: W, parts: impl IntoIterator<Item = Part>, options: ContextOptions) -> Result<Self> {
        Self::create(sink, parts.into_iter().collect(), options.clone())
            .map_err(|error| { options.report(&error); error })
    }

    fn create(sink: W, mut parts: Parts, options: ContextOptions) -> Result<Self> {
        if parts.is_empty() {
            return Err(Error::invalid_argument("a file requires at least one part"));
        }

        let multipart = parts.len() > 1;
        let deep = parts.iter().any(|part| part.storage().is_deep());

        for part in &mut parts {
            part.pack_opaque_attributes(&options.opaque_handlers)?;

            if multipart || deep {
                add_part_attributes(part)?;
            }
        }

        let requirements = Requirements::infer(&parts);

        for part in &mut parts {
            validate_part(part, &requirements, &options.limits(), Direction::Write)?;
        }

        let mut header = Vec::new();
        MetaData::write_header(&mut header, requirements, &parts)?;

        let header_byte_size = header.len() as u64;
        let chunk_tables_end = assign_chunk_table_offsets(&mut parts, header_byte_size)?;

        let tables: Vec<Vec<AtomicU64>> = parts.iter()
            .map(|part| (0 .. part.chunk_count().max(0)).map(|_| AtomicU64::new(0)).collect())
            .collect();

        // zeroed tables mark chunks that have not been written
        header.resize(u64_to_usize(chunk_tables_end, "chunk table size")?, 0);
        sink.write_at(&header, 0).map_err(Error::WriteIo)?;

        debug!(parts = parts.len(), multipart, deep, header_byte_size, "wrote header");

        Ok(WriteContext {
            sink, options, tables,
            meta: MetaData { requirements, parts, header_byte_size, chunk_tables_end },
            next_chunk_offset: AtomicU64::new(chunk_tables_end),
            finished: AtomicBool::new(false),
            in_flight: RwLock::new(()),
        })
    }

    fn report<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|error| { self.options.report(&error); error })
    }

    /// All parts, with their computed geometry.
    pub fn parts(&self) -> &[Part] { &self.meta.parts }

    /// The flags written to the file.
    pub fn requirements(&self) -> Requirements { self.meta.requirements }

    fn find_part(&self, part_index: usize) -> Result<&Part> {
        self.meta.parts.get(part_index).ok_or_else(|| Error::out_of_range(format!(
            "part index {} but the file has {} parts", part_index, self.meta.parts.len()
        )))
    }

    /// The chunk at a position in the chunk table of a part.
    pub fn chunk(&self, part_index: usize, chunk_index: usize) -> Result<ChunkInfo> {
        self.report(self.find_part(part_index).and_then(|part| {
            if chunk_index as i64 >= part.chunk_count() {
                return Err(Error::out_of_range(format!("chunk index {} of {}", chunk_index, part.chunk_count())));
            }

            chunk_info_from_geometry(part, part_index, chunk_index)
        }))
    }

    /// The chunk that contains the line `y` of a scan line part.
    pub fn scan_line_chunk(&self, part_index: usize, y: i32) -> Result<ChunkInfo> {
        let chunk_index = self.report(self.find_part(part_index).and_then(|part| part.scan_line_chunk_index(y)))?;
        self.chunk(part_index, chunk_index)
    }

    /// The chunk that contains a tile of a tiled part.
    pub fn tile_chunk(&self, part_index: usize, tile: TileCoordinates) -> Result<ChunkInfo> {
        let chunk_index = self.report(self.find_part(part_index).and_then(|part| part.tile_chunk_index(tile)))?;
        self.chunk(part_index, chunk_index)
    }

    /// Prepare the encoding of a chunk. Add inputs before writing.
    pub fn encode_request<'b>(&self, chunk: ChunkInfo) -> Result<EncodeRequest<'b>> {
        self.report(self.find_part(chunk.part_index).and_then(|part| EncodeRequest::new(part, chunk)))
    }

    /// Encode the chunk and write it at the end of the file.
    /// Writing a chunk again appends it again, and the table refers to the newest copy.
    pub fn write_chunk(&self, request: &mut EncodeRequest<'_>) -> UnitResult {
        self.report(self.write_chunk_unreported(request))
    }

    fn write_chunk_unreported(&self, request: &mut EncodeRequest<'_>) -> UnitResult {
        if self.finished.load(Ordering::Acquire) {
            return Err(Error::NotOpenForWrite);
        }

        let part_index = request.chunk.part_index;
        let chunk_index = request.chunk.chunk_index;
        let part = self.find_part(part_index)?;

        let slot = self.tables[part_index].get(chunk_index)
            .ok_or_else(|| Error::out_of_range(format!("chunk index {} of {}", chunk_index, part.chunk_count())))?;

        let record = request.encode(part.channels()?, &self.options.codecs, self.meta.requirements.is_multipart())?;

        // the guard protects no data, so a panic in another writer does not invalidate it
        let _writing = self.in_flight.read().unwrap_or_else(PoisonError::into_inner);
        if self.finished.load(Ordering::Acquire) {
            return Err(Error::NotOpenForWrite);
        }

        let offset = self.next_chunk_offset.fetch_add(record.len() as u64, Ordering::Relaxed);
        self.sink.write_at(&record, offset).map_err(Error::WriteIo)?;
        slot.store(offset, Ordering::Release);

        Ok(())
    }

    /// Write the chunk tables and flush. Chunks cannot be written afterwards.
    pub fn finish(&self) -> UnitResult {
        self.report(self.finish_unreported())
    }

    fn finish_unreported(&self) -> UnitResult {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(Error::NotOpenForWrite);
        }

        let _tables = self.in_flight.write().unwrap_or_else(PoisonError::into_inner);

        for (part, table) in self.meta.parts.iter().zip(&self.tables) {
            let offsets: Vec<u64> = table.iter().map(|offset| offset.load(Ordering::Acquire)).collect();

            let mut bytes = Vec::with_capacity(offsets.len() * u64::BYTE_SIZE);
            u64::write_slice(&mut bytes, &offsets)?;
            self.sink.write_at(&bytes, part.chunk_table_offset()).map_err(Error::WriteIo)?;
        }

        self.sink.flush().map_err(Error::WriteIo)?;
        debug!(file_size = self.next_chunk_offset.load(Ordering::Relaxed), "finished file");
        Ok(())
    }

    /// The byte count of the file written so far.
    pub fn file_size(&self) -> u64 {
        self.next_chunk_offset.load(Ordering::Relaxed)
    }

    /// Return the sink, for example to read an in-memory file.
    pub fn into_inner(self) -> W { self.sink }
}

/// Parts of multi-part and deep files declare their type and chunk count.
fn add_part_attributes(part: &mut Part) -> UnitResult {
    if part.required(Required::Type).is_none() {
        let type_name = Text::from_slice_unchecked(part.storage().type_name());
        part.set_attribute("type", AttributeValue::Text(type_name))?;
    }

    if part.storage().is_deep() && part.required(Required::Version).is_none() {
        part.set_attribute("version", AttributeValue::I32(1))?;
    }

    if part.required(Required::ChunkCount).is_none() {
        part.compute_geometry()?;
        let chunk_count = i32::try_from(part.chunk_count())
            .map_err(|_| Error::invalid_attribute("too many chunks"))?;

        part.set_attribute("chunkCount", AttributeValue::I32(chunk_count))?;
    }

    Ok(())
}

impl<W: WriteAt> std::fmt::Debug for WriteContext<W> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("WriteContext")
            .field("requirements", &self.meta.requirements)
            .field("parts", &self.meta.parts.len())
            .field("file_size", &self.file_size())
            .field("finished", &self.finished.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
