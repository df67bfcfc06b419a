
//! Read and write the OpenEXR container: the header of each part with its attributes,
//! the chunk offset tables, and the compressed chunks of scan line, tiled and deep pixel data.
//!
//! Open a file with [`context::Context`], look up the chunk that contains a line or a tile,
//! and decode it into your own buffers with a [`block::decode::DecodeRequest`].
//! Files are written with a [`context::WriteContext`], which accepts chunks from many threads at once.
//!
//! Only the lossless byte oriented compression methods are built in.
//! Other methods can be added by registering a [`compression::Codec`].

#![forbid(unsafe_code)]
#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused_must_use,
    missing_copy_implementations,
    missing_debug_implementations,
)]


pub mod io;
pub mod math;
pub mod error;
pub mod meta;
pub mod compression;
pub mod block;
pub mod context;

#[macro_use]
extern crate smallvec;


/// Re-exports of the types that most users need.
pub mod prelude {

    // main exports
    pub use crate::context::{Context, ContextOptions, WriteContext};
    pub use crate::block::decode::{DecodeRequest, Scratch};
    pub use crate::block::encode::EncodeRequest;
    pub use crate::block::unpack::PixelSlot;
    pub use crate::block::chunk::ChunkInfo;

    // core data types
    pub use crate::meta::part::{Part, Storage};
    pub use crate::meta::tiles::TileCoordinates;
    pub use crate::meta::attribute::{
        AttributeValue, ChannelDescription, ChannelList, IntegerBounds,
        LineOrder, SampleType, Text, TileDescription, LevelMode,
    };

    pub use crate::compression::{Compression, Codec, CodecInfo, CodecRegistry};
    pub use crate::io::{ReadAt, WriteAt, FileStream, FileSink, MemoryStream, MemorySink};
    pub use crate::math::{Vec2, RoundingMode};
    pub use crate::error::{Error, ErrorCode, Result, UnitResult};

    // re-export external stuff
    pub use half::f16;
}
