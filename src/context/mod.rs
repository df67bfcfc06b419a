
//! Open a file, inspect its parts, and decode its chunks.
//! A context can be shared between threads; all chunk operations take `&self`.

pub mod options;
pub mod write;

use std::io::BufReader;
use std::path::{Path, PathBuf};
use crate::error::*;
use crate::io::*;
use crate::meta::{MetaData, Requirements};
use crate::meta::part::Part;
use crate::meta::tiles::TileCoordinates;
use crate::block::{load_chunk_table, chunk_offset};
use crate::block::chunk::{ChunkInfo, read_chunk_info};
use crate::block::decode::DecodeRequest;

pub use self::options::{ContextOptions, ErrorHandler};
pub use self::write::WriteContext;


/// A file that is open for reading.
/// The header is parsed and validated when the context is created,
/// the chunk tables are loaded on first access.
pub struct Context {
    stream: Box<dyn ReadAt>,
    meta: MetaData,
    file_name: Option<PathBuf>,
    file_size: u64,
    options: ContextOptions,
}

impl Context {

    /// Open a file on disk.
    pub fn open(path: impl AsRef<Path>, options: ContextOptions) -> Result<Self> {
        let path = path.as_ref();

        let opened = FileStream::open(path).map_err(Error::FileAccess)
            .and_then(|stream| Self::read(Box::new(stream), Some(path.to_path_buf()), options.clone()));

        opened.map_err(|error| { options.report(&error); error })
    }

    /// Read from any positional byte source.
    pub fn from_stream(stream: impl ReadAt + 'static, options: ContextOptions) -> Result<Self> {
        Self::read(Box::new(stream), None, options.clone())
            .map_err(|error| { options.report(&error); error })
    }

    /// Read a file that is completely in memory.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, options: ContextOptions) -> Result<Self> {
        Self::from_stream(MemoryStream::new(bytes), options)
    }

    fn read(stream: Box<dyn ReadAt>, file_name: Option<PathBuf>, options: ContextOptions) -> Result<Self> {
        let size = stream.size();

        let meta = MetaData::read_validated(
            BufReader::new(SourceReader::new(&*stream, 0)), size,
            &options.limits(), options.strict, &options.opaque_handlers
        )?;

        Ok(Context { file_size: size.unwrap_or(u64::MAX), stream, meta, file_name, options })
    }

    /// Invoke the error handler for a failed public operation.
    fn report<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|error| { self.options.report(&error); error })
    }

    /// All parts of the file.
    pub fn parts(&self) -> &[Part] { &self.meta.parts }

    /// The part with the specified index.
    pub fn part(&self, part_index: usize) -> Result<&Part> {
        self.report(self.find_part(part_index))
    }

    fn find_part(&self, part_index: usize) -> Result<&Part> {
        self.meta.parts.get(part_index).ok_or_else(|| Error::out_of_range(format!(
            "part index {} but the file has {} parts", part_index, self.meta.parts.len()
        )))
    }

    /// The flags of the file.
    pub fn requirements(&self) -> Requirements { self.meta.requirements }

    /// The parsed header.
    pub fn meta_data(&self) -> &MetaData { &self.meta }

    /// The path of the file, if it was opened from disk.
    pub fn file_name(&self) -> Option<&Path> { self.file_name.as_deref() }

    /// The byte count of the file, or `u64::MAX` if the source does not know its size.
    pub fn file_size(&self) -> u64 { self.file_size }

    /// The options that this context was created with.
    pub fn options(&self) -> &ContextOptions { &self.options }

    /// The chunk offset table of a part, loaded on first access.
    pub fn chunk_table(&self, part_index: usize) -> Result<&[u64]> {
        self.report(self.load_table(part_index))
    }

    fn load_table(&self, part_index: usize) -> Result<&[u64]> {
        load_chunk_table(&*self.stream, &self.meta, part_index, self.file_size, self.options.reconstruct_chunk_tables)
    }

    /// The chunk that contains the line `y` of a scan line part.
    pub fn scan_line_chunk(&self, part_index: usize, y: i32) -> Result<ChunkInfo> {
        self.report(self.find_part(part_index)
            .and_then(|part| part.scan_line_chunk_index(y))
            .and_then(|chunk_index| self.read_chunk(part_index, chunk_index)))
    }

    /// The chunk that contains a tile of a tiled part.
    pub fn tile_chunk(&self, part_index: usize, tile: TileCoordinates) -> Result<ChunkInfo> {
        self.report(self.find_part(part_index)
            .and_then(|part| part.tile_chunk_index(tile))
            .and_then(|chunk_index| self.read_chunk(part_index, chunk_index)))
    }

    /// The chunk at a position in the chunk table of a part.
    pub fn chunk(&self, part_index: usize, chunk_index: usize) -> Result<ChunkInfo> {
        self.report(self.read_chunk(part_index, chunk_index))
    }

    fn read_chunk(&self, part_index: usize, chunk_index: usize) -> Result<ChunkInfo> {
        let part = self.find_part(part_index)?;
        let table = self.load_table(part_index)?;
        let offset = chunk_offset(table, chunk_index, &self.meta, self.file_size)?;

        read_chunk_info(
            &*self.stream, self.file_size, self.meta.requirements.is_multipart(),
            part, part_index, chunk_index, offset
        )
    }

    /// Prepare the decoding of a chunk. Add outputs before decoding.
    pub fn decode_request<'b>(&self, chunk: ChunkInfo) -> Result<DecodeRequest<'b>> {
        self.report(self.find_part(chunk.part_index).and_then(|part| DecodeRequest::new(part, chunk)))
    }

    /// Run the decode pipeline of a request.
    pub fn decode(&self, request: &mut DecodeRequest<'_>) -> UnitResult {
        let result = self.find_part(request.chunk.part_index)
            .and_then(|part| part.channels())
            .and_then(|channels| request.decode(&*self.stream, channels, &self.options.codecs));

        self.report(result)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("Context")
            .field("file_name", &self.file_name)
            .field("file_size", &self.file_size)
            .field("requirements", &self.meta.requirements)
            .field("parts", &self.meta.parts.len())
            .finish_non_exhaustive()
    }
}
