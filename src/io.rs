
//! Specialized binary input and output.
//! Uses the error handling for this crate.

pub use ::std::io::{Read, Write};
use lebe::prelude::*;
use crate::error::{Error, Result, UnitResult, IoResult, IoError};
use std::io::ErrorKind;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;


/// A byte source that can be read at arbitrary positions from multiple threads.
/// The header parser reads it sequentially, chunks are read at their table offsets.
pub trait ReadAt: Send + Sync {

    /// Read bytes starting at `offset` into the buffer.
    /// Returns the number of bytes read, which is zero at the end of the source.
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> IoResult<usize>;

    /// The total byte count, if known.
    /// Chunk validation is stricter when this is available.
    fn size(&self) -> Option<u64> { None }

    /// Fill the whole buffer, or fail with `UnexpectedEof`.
    fn read_exact_at(&self, mut buffer: &mut [u8], mut offset: u64) -> IoResult<()> {
        while !buffer.is_empty() {
            match self.read_at(buffer, offset) {
                Ok(0) => return Err(IoError::new(ErrorKind::UnexpectedEof, "byte source ended early")),
                Ok(count) => {
                    buffer = &mut std::mem::take(&mut buffer)[count..];
                    offset += count as u64;
                },
                Err(error) if error.kind() == ErrorKind::Interrupted => {},
                Err(error) => return Err(error),
            }
        }

        Ok(())
    }
}

/// A byte sink that can be written at arbitrary positions from multiple threads.
/// Concurrent writers never receive overlapping ranges.
pub trait WriteAt: Send + Sync {

    /// Write all bytes starting at `offset`.
    fn write_at(&self, bytes: &[u8], offset: u64) -> IoResult<()>;

    /// Flush any buffered bytes.
    fn flush(&self) -> IoResult<()> { Ok(()) }
}

impl<T: ReadAt + ?Sized> ReadAt for Box<T> {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> IoResult<usize> { (**self).read_at(buffer, offset) }
    fn size(&self) -> Option<u64> { (**self).size() }
}

impl<T: WriteAt + ?Sized> WriteAt for Box<T> {
    fn write_at(&self, bytes: &[u8], offset: u64) -> IoResult<()> { (**self).write_at(bytes, offset) }
    fn flush(&self) -> IoResult<()> { (**self).flush() }
}


fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "lock poisoned")
}

/// A file handle that reads and writes at explicit positions.
/// On unix, the cursor of the file is never used, so threads do not wait for each other.
#[cfg(unix)]
#[derive(Debug)]
struct PositionalFile(File);

#[cfg(unix)]
impl PositionalFile {
    fn new(file: File) -> Self { PositionalFile(file) }

    fn read_at(&self, buffer: &mut [u8], offset: u64) -> IoResult<usize> {
        std::os::unix::fs::FileExt::read_at(&self.0, buffer, offset)
    }

    fn write_all_at(&self, bytes: &[u8], offset: u64) -> IoResult<()> {
        std::os::unix::fs::FileExt::write_all_at(&self.0, bytes, offset)
    }

    fn flush(&self) -> IoResult<()> { (&self.0).flush() }
}

/// Elsewhere, the shared cursor is locked for each seek and transfer.
#[cfg(not(unix))]
#[derive(Debug)]
struct PositionalFile(Mutex<File>);

#[cfg(not(unix))]
impl PositionalFile {
    fn new(file: File) -> Self { PositionalFile(Mutex::new(file)) }

    fn read_at(&self, buffer: &mut [u8], offset: u64) -> IoResult<usize> {
        use std::io::{Seek, SeekFrom};
        let mut file = self.0.lock().map_err(|_| poisoned())?;
        file.seek(SeekFrom::Start(offset))?;
        file.read(buffer)
    }

    fn write_all_at(&self, bytes: &[u8], offset: u64) -> IoResult<()> {
        use std::io::{Seek, SeekFrom};
        let mut file = self.0.lock().map_err(|_| poisoned())?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)
    }

    fn flush(&self) -> IoResult<()> {
        self.0.lock().map_err(|_| poisoned())?.flush()
    }
}

/// Positional reads from a file on disk.
#[derive(Debug)]
pub struct FileStream {
    file: PositionalFile,
    size: u64,
}

impl FileStream {

    /// Open an existing file for reading.
    pub fn open(path: impl AsRef<Path>) -> IoResult<Self> {
        Self::from_file(File::open(path)?)
    }

    /// Use an already opened file.
    pub fn from_file(file: File) -> IoResult<Self> {
        let size = file.metadata()?.len();
        Ok(FileStream { file: PositionalFile::new(file), size })
    }
}

impl ReadAt for FileStream {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> IoResult<usize> {
        self.file.read_at(buffer, offset)
    }

    fn size(&self) -> Option<u64> { Some(self.size) }
}

/// Positional writes into a file on disk.
#[derive(Debug)]
pub struct FileSink {
    file: PositionalFile,
}

impl FileSink {

    /// Create or truncate a file for writing.
    pub fn create(path: impl AsRef<Path>) -> IoResult<Self> {
        Ok(FileSink { file: PositionalFile::new(File::create(path)?) })
    }
}

impl WriteAt for FileSink {
    fn write_at(&self, bytes: &[u8], offset: u64) -> IoResult<()> {
        self.file.write_all_at(bytes, offset)
    }

    fn flush(&self) -> IoResult<()> {
        self.file.flush()
    }
}

/// A complete file held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    bytes: Vec<u8>,
}

impl MemoryStream {

    /// Read from the bytes of a complete file.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        MemoryStream { bytes: bytes.into() }
    }

    /// The complete file.
    pub fn bytes(&self) -> &[u8] { &self.bytes }
}

impl ReadAt for MemoryStream {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> IoResult<usize> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.bytes.len());
        let available = &self.bytes[start..];
        let count = available.len().min(buffer.len());
        buffer[..count].copy_from_slice(&available[..count]);
        Ok(count)
    }

    fn size(&self) -> Option<u64> { Some(self.bytes.len() as u64) }
}

/// Collects a written file in memory.
/// Gaps between written ranges are filled with zeroes.
#[derive(Debug, Default)]
pub struct MemorySink {
    bytes: Mutex<Vec<u8>>,
}

impl MemorySink {
    /// An empty file.
    pub fn new() -> Self { Self::default() }

    /// The bytes written so far, consuming the sink.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WriteAt for MemorySink {
    fn write_at(&self, bytes: &[u8], offset: u64) -> IoResult<()> {
        let start = usize::try_from(offset).map_err(|_| IoError::new(ErrorKind::InvalidInput, "offset exceeds memory"))?;
        let end = start + bytes.len();

        let mut target = self.bytes.lock().map_err(|_| poisoned())?;
        if target.len() < end { target.resize(end, 0); }
        target[start .. end].copy_from_slice(bytes);
        Ok(())
    }
}


/// Sequential `Read` over a positional byte source.
/// Wrap in a `BufReader` to avoid one positional read per field.
pub struct SourceReader<'s> {
    source: &'s dyn ReadAt,
    position: u64,
}

impl<'s> SourceReader<'s> {

    /// Read sequentially, starting at the position in the source.
    pub fn new(source: &'s dyn ReadAt, position: u64) -> Self {
        SourceReader { source, position }
    }
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buffer: &mut [u8]) -> IoResult<usize> {
        let count = self.source.read_at(buffer, self.position)?;
        self.position += count as u64;
        Ok(count)
    }
}


/// Peek a single byte without consuming it.
#[derive(Debug)]
pub struct PeekRead<T> {

    /// Cannot be exposed as it will not contain peeked values anymore.
    inner: T,

    peeked: Option<IoResult<u8>>,
}

impl<T: Read> PeekRead<T> {

    /// Wrap a reader without peeking yet.
    #[inline]
    pub fn new(inner: T) -> Self {
        Self { inner, peeked: None }
    }

    /// Read a single byte and return that without consuming it.
    /// The next `read` call will include that byte.
    #[inline]
    pub fn peek_u8(&mut self) -> &IoResult<u8> {
        let inner = &mut self.inner;
        self.peeked.get_or_insert_with(|| u8::read_from_little_endian(inner))
    }

    /// Skip a single byte if it equals the specified value.
    /// Returns whether the value was found.
    /// Consumes the peeked result if an error occurred.
    #[inline]
    pub fn skip_if_eq(&mut self, value: u8) -> IoResult<bool> {
        match self.peek_u8() {
            Ok(peeked) if *peeked == value =>  {
                self.peeked = None; // consume the byte
                Ok(true)
            },

            Ok(_) => Ok(false),

            // io errors cannot be cloned, so the error is moved out of the peek slot
            Err(_) => match self.peeked.take() {
                Some(Err(error)) => Err(error),
                _ => Ok(false),
            }
        }
    }

    /// The wrapped reader. Any peeked byte is not included.
    pub fn inner(&self) -> &T { &self.inner }

    /// Whether a byte has been peeked but not consumed.
    pub fn has_peeked(&self) -> bool { matches!(self.peeked, Some(Ok(_))) }
}


impl<T: Read> Read for PeekRead<T> {
    fn read(&mut self, target_buffer: &mut [u8]) -> IoResult<usize> {
        if target_buffer.is_empty() {
            return Ok(0)
        }

        match self.peeked.take() {
            None => self.inner.read(target_buffer),
            Some(peeked) => {
                target_buffer[0] = peeked?;

                // indexing [1..] is safe because an empty buffer already returned ok
                Ok(1 + self.inner.read(&mut target_buffer[1..])?)
            }
        }
    }
}

/// Keep track of what byte we are at.
/// Used to find the chunk tables after the header has been parsed.
#[derive(Debug)]
pub struct Tracking<T> {

    /// Do not expose to prevent reading without updating position
    inner: T,

    position: u64,
}

impl<T: Read> Read for Tracking<T> {
    fn read(&mut self, buffer: &mut [u8]) -> IoResult<usize> {
        let count = self.inner.read(buffer)?;
        self.position += count as u64;
        Ok(count)
    }
}

impl<T> Tracking<T> {

    /// Start counting at zero.
    pub fn new(inner: T) -> Self {
        Tracking { inner, position: 0 }
    }

    /// Current number of bytes read.
    pub fn byte_position(&self) -> u64 {
        self.position
    }
}


/// Allocate a zeroed vector, reporting allocation failure instead of aborting.
/// Used for all buffers whose size is derived from file contents.
pub(crate) fn allocate<T: Clone + Default>(length: usize, purpose: &'static str) -> Result<Vec<T>> {
    let mut vec = Vec::new();
    vec.try_reserve_exact(length).map_err(|_| Error::out_of_memory(purpose))?;
    vec.resize(length, T::default());
    Ok(vec)
}


/// Generic trait that defines common binary operations such as reading and writing for this type.
pub trait Data: Sized + Default + Clone {

    /// Number of bytes this would consume in an exr file.
    const BYTE_SIZE: usize = ::std::mem::size_of::<Self>();

    /// Read a value of type `Self`.
    fn read(read: &mut impl Read) -> Result<Self>;

    /// Read as many values of type `Self` as fit into the specified slice.
    fn read_slice(read: &mut impl Read, slice: &mut[Self]) -> UnitResult;

    /// Write this value to the writer.
    fn write(self, write: &mut impl Write) -> UnitResult;

    /// Write all values of that slice to the writer.
    fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult;

    /// Read as many values of type `Self` as specified with `data_size`.
    ///
    /// This method will not allocate more memory than `soft_max` at once.
    /// If `hard_max` is specified, it will never read any more than that.
    #[inline]
    fn read_vec(read: &mut impl Read, data_size: usize, soft_max: usize, hard_max: Option<usize>, purpose: &'static str) -> Result<Vec<Self>> {
        if let Some(max) = hard_max {
            if data_size > max {
                return Err(Error::invalid_attribute(purpose))
            }
        }

        let soft_max = hard_max.unwrap_or(soft_max).min(soft_max).max(1);
        let mut data = Vec::new();

        // do not allocate more than $chunks memory at once
        // (most of the time, this loop will run only once)
        while data.len() < data_size {
            let chunk_start = data.len();
            let chunk_end = (chunk_start + soft_max).min(data_size);

            data.try_reserve(chunk_end - chunk_start).map_err(|_| Error::out_of_memory(purpose))?;
            data.resize(chunk_end, Self::default());
            Self::read_slice(read, &mut data[chunk_start .. chunk_end])?;
        }

        Ok(data)
    }
}


macro_rules! implement_data_for_primitive {
    ($kind: ident) => {
        impl Data for $kind {
            #[inline]
            fn read(read: &mut impl Read) -> Result<Self> {
                Ok(read.read_from_little_endian()?)
            }

            #[inline]
            fn write(self, write: &mut impl Write) -> Result<()> {
                write.write_as_little_endian(&self).map_err(Error::WriteIo)?;
                Ok(())
            }

            #[inline]
            fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> Result<()> {
                read.read_from_little_endian_into(slice)?;
                Ok(())
            }

            #[inline]
            fn write_slice(write: &mut impl Write, slice: &[Self]) -> Result<()> {
                write.write_as_little_endian(slice).map_err(Error::WriteIo)?;
                Ok(())
            }
        }
    };
}

implement_data_for_primitive!(u8);
implement_data_for_primitive!(i8);
implement_data_for_primitive!(u16);
implement_data_for_primitive!(u32);
implement_data_for_primitive!(i32);
implement_data_for_primitive!(i64);
implement_data_for_primitive!(u64);
implement_data_for_primitive!(f32);
implement_data_for_primitive!(f64);
