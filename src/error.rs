
//! Error type definitions.

use std::borrow::Cow;
use std::convert::TryFrom;
use std::fmt;
use thiserror::Error;
pub use std::io::Error as IoError;
pub use std::io::Result as IoResult;


/// A result that may contain an exr error.
pub type Result<T> = std::result::Result<T, Error>;

/// A result that, if ok, contains nothing, and otherwise contains an exr error.
pub type UnitResult = Result<()>;


/// The kind of an error, without any message.
/// This is what the error handler of a context receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    OutOfMemory,
    InvalidArgument,
    ArgumentOutOfRange,
    FileAccess,
    FileBadHeader,
    NotOpenForRead,
    NotOpenForWrite,
    ReadIo,
    WriteIo,
    NameTooLong,
    MissingRequiredAttribute,
    InvalidAttribute,
    BadChunkData,
    TypeMismatch,
    SizeMismatch,
    ScanlineApiOnTiledFile,
    TiledApiOnScanlineFile,
    FeatureNotImplemented,
    Unknown,
}

/// An error that may happen while reading or writing an exr file.
/// Each variant corresponds to one [`ErrorCode`].
#[derive(Debug, Error)]
pub enum Error {

    /// A buffer whose size was derived from the file could not be allocated.
    #[error("out of memory while allocating {0}")]
    OutOfMemory(Cow<'static, str>),

    /// The caller passed an unusable value.
    #[error("invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),

    /// The caller passed an index or coordinate outside of the valid range.
    #[error("argument out of range: {0}")]
    ArgumentOutOfRange(Cow<'static, str>),

    /// The file could not be opened or created.
    #[error("cannot access file: {0}")]
    FileAccess(#[source] IoError),

    /// The magic number or the version flags are not supported.
    #[error("bad file header: {0}")]
    FileBadHeader(Cow<'static, str>),

    /// A read operation was attempted on a write context.
    /// Contexts are split by direction at the type level,
    /// so this crate never produces it. It exists so that every `ErrorCode` has a variant.
    #[error("context is not open for reading")]
    NotOpenForRead,

    /// A write operation was attempted on a read context,
    /// or after the header has been finalized.
    #[error("context is not open for writing")]
    NotOpenForWrite,

    /// The byte source failed or ended early.
    #[error("read failed: {0}")]
    ReadIo(#[source] IoError),

    /// The byte sink failed.
    #[error("write failed: {0}")]
    WriteIo(#[source] IoError),

    /// An attribute name or type name exceeds the maximum name length.
    #[error("name too long: {0}")]
    NameTooLong(Cow<'static, str>),

    /// A part lacks an attribute that its storage mode requires.
    #[error("missing required attribute `{0}`")]
    MissingRequiredAttribute(Cow<'static, str>),

    /// An attribute contains a value that is not allowed.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(Cow<'static, str>),

    /// A chunk record or chunk table entry is inconsistent.
    #[error("bad chunk data: {0}")]
    BadChunkData(Cow<'static, str>),

    /// An attribute does not have the type that its name requires.
    #[error("attribute type mismatch: {0}")]
    TypeMismatch(Cow<'static, str>),

    /// An attribute byte size does not match its type.
    #[error("attribute size mismatch: {0}")]
    SizeMismatch(Cow<'static, str>),

    /// A scan line operation was used on a tiled part.
    #[error("scan line operation on a tiled part")]
    ScanlineApiOnTiledFile,

    /// A tile operation was used on a scan line part.
    #[error("tile operation on a scan line part")]
    TiledApiOnScanlineFile,

    /// The file uses a feature that is not supported, for example an unregistered codec.
    #[error("not implemented: {0}")]
    FeatureNotImplemented(Cow<'static, str>),

    /// Any other failure.
    #[error("unknown error: {0}")]
    Unknown(Cow<'static, str>),
}


impl Error {

    /// The kind of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::OutOfMemory(_) => ErrorCode::OutOfMemory,
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::ArgumentOutOfRange(_) => ErrorCode::ArgumentOutOfRange,
            Error::FileAccess(_) => ErrorCode::FileAccess,
            Error::FileBadHeader(_) => ErrorCode::FileBadHeader,
            Error::NotOpenForRead => ErrorCode::NotOpenForRead,
            Error::NotOpenForWrite => ErrorCode::NotOpenForWrite,
            Error::ReadIo(_) => ErrorCode::ReadIo,
            Error::WriteIo(_) => ErrorCode::WriteIo,
            Error::NameTooLong(_) => ErrorCode::NameTooLong,
            Error::MissingRequiredAttribute(_) => ErrorCode::MissingRequiredAttribute,
            Error::InvalidAttribute(_) => ErrorCode::InvalidAttribute,
            Error::BadChunkData(_) => ErrorCode::BadChunkData,
            Error::TypeMismatch(_) => ErrorCode::TypeMismatch,
            Error::SizeMismatch(_) => ErrorCode::SizeMismatch,
            Error::ScanlineApiOnTiledFile => ErrorCode::ScanlineApiOnTiledFile,
            Error::TiledApiOnScanlineFile => ErrorCode::TiledApiOnScanlineFile,
            Error::FeatureNotImplemented(_) => ErrorCode::FeatureNotImplemented,
            Error::Unknown(_) => ErrorCode::Unknown,
        }
    }

    pub(crate) fn out_of_memory(purpose: impl Into<Cow<'static, str>>) -> Self {
        Error::OutOfMemory(purpose.into())
    }

    pub(crate) fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub(crate) fn out_of_range(message: impl Into<Cow<'static, str>>) -> Self {
        Error::ArgumentOutOfRange(message.into())
    }

    pub(crate) fn bad_header(message: impl Into<Cow<'static, str>>) -> Self {
        Error::FileBadHeader(message.into())
    }

    pub(crate) fn name_too_long(message: impl Into<Cow<'static, str>>) -> Self {
        Error::NameTooLong(message.into())
    }

    pub(crate) fn missing_attribute(name: impl Into<Cow<'static, str>>) -> Self {
        Error::MissingRequiredAttribute(name.into())
    }

    pub(crate) fn invalid_attribute(message: impl Into<Cow<'static, str>>) -> Self {
        Error::InvalidAttribute(message.into())
    }

    pub(crate) fn bad_chunk(message: impl Into<Cow<'static, str>>) -> Self {
        Error::BadChunkData(message.into())
    }

    pub(crate) fn type_mismatch(message: impl Into<Cow<'static, str>>) -> Self {
        Error::TypeMismatch(message.into())
    }

    pub(crate) fn size_mismatch(message: impl Into<Cow<'static, str>>) -> Self {
        Error::SizeMismatch(message.into())
    }

    pub(crate) fn unsupported(message: impl Into<Cow<'static, str>>) -> Self {
        Error::FeatureNotImplemented(message.into())
    }

    /// Whether this error was caused by a byte source that ended too early.
    pub(crate) fn is_unexpected_end(&self) -> bool {
        matches!(self, Error::ReadIo(error) if error.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// Enable using the `?` operator on io::Result while reading.
/// Writing code maps its errors to `Error::WriteIo` explicitly.
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        Error::ReadIo(error)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::ArgumentOutOfRange => "argument out of range",
            ErrorCode::FileAccess => "file access",
            ErrorCode::FileBadHeader => "bad file header",
            ErrorCode::NotOpenForRead => "not open for read",
            ErrorCode::NotOpenForWrite => "not open for write",
            ErrorCode::ReadIo => "read io",
            ErrorCode::WriteIo => "write io",
            ErrorCode::NameTooLong => "name too long",
            ErrorCode::MissingRequiredAttribute => "missing required attribute",
            ErrorCode::InvalidAttribute => "invalid attribute",
            ErrorCode::BadChunkData => "bad chunk data",
            ErrorCode::TypeMismatch => "type mismatch",
            ErrorCode::SizeMismatch => "size mismatch",
            ErrorCode::ScanlineApiOnTiledFile => "scan line api on tiled file",
            ErrorCode::TiledApiOnScanlineFile => "tiled api on scan line file",
            ErrorCode::FeatureNotImplemented => "feature not implemented",
            ErrorCode::Unknown => "unknown",
        })
    }
}


/// Return error on invalid range.
#[inline]
pub(crate) fn i32_to_usize(value: i32, error_message: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::invalid_attribute(error_message))
}

/// Return error on a value that does not fit into an `i32`.
#[inline]
pub(crate) fn usize_to_i32(value: usize, error_message: &'static str) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::out_of_range(error_message))
}

/// Return error on a file offset that does not fit into memory.
#[inline]
pub(crate) fn u64_to_usize(value: u64, error_message: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::bad_chunk(error_message))
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes_match_variants(){
        assert_eq!(Error::bad_header("magic").code(), ErrorCode::FileBadHeader);
        assert_eq!(Error::size_mismatch("box2i").code(), ErrorCode::SizeMismatch);
        assert_eq!(Error::from(IoError::from(std::io::ErrorKind::UnexpectedEof)).code(), ErrorCode::ReadIo);
        assert_eq!(Error::TiledApiOnScanlineFile.code(), ErrorCode::TiledApiOnScanlineFile);
        assert_eq!(Error::NotOpenForRead.code(), ErrorCode::NotOpenForRead);
    }

    #[test]
    fn conversions(){
        assert_eq!(i32_to_usize(7, "x").unwrap(), 7);
        assert_eq!(i32_to_usize(-1, "x").unwrap_err().code(), ErrorCode::InvalidAttribute);
        assert_eq!(usize_to_i32(usize::MAX, "x").unwrap_err().code(), ErrorCode::ArgumentOutOfRange);
    }

    #[test]
    fn display_contains_message(){
        let message = Error::missing_attribute("channels").to_string();
        assert!(message.contains("channels"), "{}", message);
    }
}
