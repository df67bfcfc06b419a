
//! Settings that are shared by read and write contexts.

use std::sync::Arc;
use crate::error::ErrorCode;
use crate::math::Vec2;
use crate::meta::validate::Limits;
use crate::meta::opaque::OpaqueRegistry;
use crate::compression::CodecRegistry;


/// Receives the code and message of each failed public operation, exactly once.
pub type ErrorHandler = Arc<dyn Fn(ErrorCode, &str) + Send + Sync>;

/// Logs the error through `tracing`.
pub fn log_error() -> ErrorHandler {
    Arc::new(|code, message| tracing::error!(?code, "{}", message))
}

/// How a context reads or writes a file.
#[derive(Clone)]
pub struct ContextOptions {

    /// Reject files with a larger data or display window.
    pub max_image_size: Option<Vec2<usize>>,

    /// Reject files with larger tiles.
    pub max_tile_size: Option<Vec2<usize>>,

    /// When reading, reject inconsistencies that would otherwise be corrected.
    /// Writing is always strict.
    pub strict: bool,

    /// Recover the chunk positions of single-part files whose chunk table was not written completely.
    pub reconstruct_chunk_tables: bool,

    /// Called when a public operation fails.
    pub error_handler: ErrorHandler,

    /// The codecs used to compress and decompress chunks.
    pub codecs: CodecRegistry,

    /// Handlers for custom attribute types.
    pub opaque_handlers: OpaqueRegistry,
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions {
            max_image_size: None,
            max_tile_size: None,
            strict: false,
            reconstruct_chunk_tables: true,
            error_handler: log_error(),
            codecs: CodecRegistry::default(),
            opaque_handlers: OpaqueRegistry::default(),
        }
    }
}

impl ContextOptions {

    /// Reject images larger than the specified size.
    pub fn with_max_image_size(self, max_image_size: Vec2<usize>) -> Self {
        ContextOptions { max_image_size: Some(max_image_size), ..self }
    }

    /// Reject tiles larger than the specified size.
    pub fn with_max_tile_size(self, max_tile_size: Vec2<usize>) -> Self {
        ContextOptions { max_tile_size: Some(max_tile_size), ..self }
    }

    /// Reject inconsistent files instead of correcting them.
    pub fn strict(self) -> Self {
        ContextOptions { strict: true, ..self }
    }

    /// Do not recover incomplete chunk tables.
    pub fn without_chunk_table_reconstruction(self) -> Self {
        ContextOptions { reconstruct_chunk_tables: false, ..self }
    }

    /// Replace the error handler.
    pub fn with_error_handler(self, handler: impl Fn(ErrorCode, &str) + Send + Sync + 'static) -> Self {
        ContextOptions { error_handler: Arc::new(handler), ..self }
    }

    /// Replace the codecs.
    pub fn with_codecs(self, codecs: CodecRegistry) -> Self {
        ContextOptions { codecs, ..self }
    }

    /// Replace the handlers for custom attribute types.
    pub fn with_opaque_handlers(self, opaque_handlers: OpaqueRegistry) -> Self {
        ContextOptions { opaque_handlers, ..self }
    }

    /// The size limits for the validator.
    pub fn limits(&self) -> Limits {
        Limits { max_image_size: self.max_image_size, max_tile_size: self.max_tile_size }
    }

    pub(crate) fn report(&self, error: &crate::error::Error) {
        (self.error_handler)(error.code(), &error.to_string());
    }
}

impl std::fmt::Debug for ContextOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("ContextOptions")
            .field("max_image_size", &self.max_image_size)
            .field("max_tile_size", &self.max_tile_size)
            .field("strict", &self.strict)
            .field("reconstruct_chunk_tables", &self.reconstruct_chunk_tables)
            .field("codecs", &self.codecs)
            .field("opaque_handlers", &self.opaque_handlers)
            .finish_non_exhaustive()
    }
}
