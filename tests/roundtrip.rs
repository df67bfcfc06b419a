//! Write files into memory and read them again.

extern crate exr_core;

use std::sync::{Arc, Mutex};
use exr_core::prelude::*;

/// Print the library logs when running with `RUST_LOG=exr_core=trace`.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}


fn sample_value(x: i32, y: i32, channel: usize) -> f32 {
    (x + 100 * y + 1000 * channel as i32) as f32
}

/// The host order bytes of a channel within a chunk, one sample per pixel.
fn sample_bytes(sample_type: SampleType, start: Vec2<i32>, size: Vec2<usize>, channel: usize) -> Vec<u8> {
    let mut bytes = Vec::new();

    for y in 0 .. size.height() as i32 {
        for x in 0 .. size.width() as i32 {
            let value = sample_value(start.x() + x, start.y() + y, channel);

            match sample_type {
                SampleType::F16 => bytes.extend_from_slice(&f16::from_f32(value).to_bits().to_ne_bytes()),
                SampleType::F32 => bytes.extend_from_slice(&value.to_ne_bytes()),
                SampleType::U32 => bytes.extend_from_slice(&(value as u32).to_ne_bytes()),
            }
        }
    }

    bytes
}

fn channels(descriptions: &[(&str, SampleType)]) -> ChannelList {
    ChannelList::new(descriptions.iter()
        .map(|&(name, sample_type)| ChannelDescription::new(name, sample_type, false))
        .collect())
}

fn encode_chunk<W: WriteAt>(context: &WriteContext<W>, part_index: usize, chunk_index: usize) {
    let chunk = context.chunk(part_index, chunk_index).unwrap();
    let channels = context.parts()[part_index].channels().unwrap().list.clone();

    let buffers: Vec<Vec<u8>> = channels.iter().enumerate()
        .map(|(index, channel)| sample_bytes(channel.sample_type, chunk.start, chunk.size, index))
        .collect();

    let width = chunk.size.width();
    let mut request = context.encode_request(chunk).unwrap();

    for (channel, buffer) in channels.iter().zip(&buffers) {
        let index = request.add_buffer(buffer);
        request.set_input(&channel.name.to_string(), PixelSlot::dense(index, 0, channel.sample_type, width)).unwrap();
    }

    context.write_chunk(&mut request).unwrap();
}

fn write_file(parts: Vec<Part>, options: ContextOptions, finish: bool) -> Vec<u8> {
    let context = WriteContext::new(MemorySink::new(), parts, options).unwrap();

    for part_index in 0 .. context.parts().len() {
        let chunk_count = context.parts()[part_index].chunk_count() as usize;

        // write backwards, as the order of chunks in the file must not matter
        for chunk_index in (0 .. chunk_count).rev() {
            encode_chunk(&context, part_index, chunk_index);
        }
    }

    if finish { context.finish().unwrap(); }
    context.into_inner().into_bytes()
}

fn check_chunk(context: &Context, chunk: ChunkInfo) {
    let channels = context.parts()[chunk.part_index].channels().unwrap().list.clone();
    let expected: Vec<Vec<u8>> = channels.iter().enumerate()
        .map(|(index, channel)| sample_bytes(channel.sample_type, chunk.start, chunk.size, index))
        .collect();

    let mut decoded: Vec<Vec<u8>> = expected.iter().map(|bytes| vec![ 0_u8; bytes.len() ]).collect();
    let width = chunk.size.width();
    let mut request = context.decode_request(chunk).unwrap();

    for (channel, buffer) in channels.iter().zip(decoded.iter_mut()) {
        let index = request.add_buffer(buffer);
        request.set_output(&channel.name.to_string(), PixelSlot::dense(index, 0, channel.sample_type, width)).unwrap();
    }

    context.decode(&mut request).unwrap();
    drop(request);

    assert_eq!(decoded, expected);
}

fn check_all_chunks(context: &Context) {
    for (part_index, part) in context.parts().iter().enumerate() {
        for chunk_index in 0 .. part.chunk_count() as usize {
            check_chunk(context, context.chunk(part_index, chunk_index).unwrap());
        }
    }
}


#[test]
fn small_scan_line_file(){
    init_logging();

    let part = Part::with_required(
        Storage::ScanLine, channels(&[ ("Z", SampleType::F16) ]),
        IntegerBounds::from_dimensions(10, 4), Compression::ZIP1
    ).unwrap();

    let bytes = write_file(vec![ part ], ContextOptions::default(), true);
    let context = Context::from_bytes(bytes, ContextOptions::default()).unwrap();

    let part = &context.parts()[0];
    assert_eq!(part.chunk_count(), 4);
    assert_eq!(part.lines_per_chunk(), 1);
    assert_eq!(part.unpacked_size_per_chunk(), 20);
    assert!(!context.requirements().is_multipart());

    let table = context.chunk_table(0).unwrap().to_vec();
    let chunk = context.scan_line_chunk(0, 2).unwrap();
    assert_eq!(chunk.chunk_index, 2);
    assert_eq!(chunk.start, Vec2(0, 2));
    assert_eq!(chunk.size, Vec2(10, 1));
    assert_eq!(chunk.unpacked_size, 20);

    // the data follows the line number and the packed size
    assert_eq!(chunk.data_offset, table[2] + 8);

    check_all_chunks(&context);
}

#[test]
fn decreasing_line_order(){
    let mut part = Part::with_required(
        Storage::ScanLine, channels(&[ ("Z", SampleType::F16) ]),
        IntegerBounds::from_dimensions(10, 4), Compression::Uncompressed
    ).unwrap();

    part.set_attribute("lineOrder", AttributeValue::LineOrder(LineOrder::Decreasing)).unwrap();

    let bytes = write_file(vec![ part ], ContextOptions::default(), true);
    let context = Context::from_bytes(bytes, ContextOptions::default()).unwrap();

    let first_line = context.scan_line_chunk(0, 0).unwrap();
    assert_eq!(first_line.chunk_index, 3);
    assert_eq!(first_line.start.y(), 0);

    check_all_chunks(&context);
}

#[test]
fn lossless_compression_methods(){
    for compression in [ Compression::Uncompressed, Compression::RLE, Compression::ZIP1, Compression::ZIP16 ] {
        let part = Part::with_required(
            Storage::ScanLine, channels(&[ ("A", SampleType::F16), ("Z", SampleType::F32), ("id", SampleType::U32) ]),
            IntegerBounds::new(Vec2(-3, 5), Vec2(10, 20)), compression
        ).unwrap();

        let bytes = write_file(vec![ part ], ContextOptions::default(), true);
        let context = Context::from_bytes(bytes, ContextOptions::default()).unwrap();

        assert_eq!(context.parts()[0].compression(), compression);
        assert_eq!(context.parts()[0].chunk_count(), (20 + compression.scan_lines_per_block() as i64 - 1) / compression.scan_lines_per_block() as i64);
        check_all_chunks(&context);
    }
}

#[test]
fn unsupported_compression_is_reported(){
    let part = Part::with_required(
        Storage::ScanLine, channels(&[ ("Y", SampleType::F16) ]),
        IntegerBounds::from_dimensions(8, 8), Compression::PIZ
    ).unwrap();

    let error = WriteContext::new(MemorySink::new(), vec![ part ], ContextOptions::default())
        .and_then(|context| {
            let chunk = context.chunk(0, 0)?;
            let bytes = vec![ 0_u8; 8 * 8 * 2 ];
            let mut request = context.encode_request(chunk)?;
            let index = request.add_buffer(&bytes);
            request.set_input("Y", PixelSlot::dense(index, 0, SampleType::F16, 8))?;
            context.write_chunk(&mut request)
        })
        .unwrap_err();

    assert_eq!(error.code(), ErrorCode::FeatureNotImplemented);
}

#[test]
fn tiled_mip_map(){
    let mut part = Part::with_required(
        Storage::Tiled, channels(&[ ("Y", SampleType::F32) ]),
        IntegerBounds::from_dimensions(10, 7), Compression::ZIP1
    ).unwrap();

    part.set_attribute("tiles", AttributeValue::TileDescription(TileDescription {
        tile_size: Vec2(4, 4), level_mode: LevelMode::MipMap, rounding_mode: RoundingMode::Down,
    })).unwrap();

    let bytes = write_file(vec![ part ], ContextOptions::default(), true);
    let context = Context::from_bytes(bytes, ContextOptions::default()).unwrap();
    assert!(context.requirements().is_single_part_and_tiled());

    // levels of 10x7, 5x3, 2x1 and 1x1 pixels
    assert_eq!(context.parts()[0].chunk_count(), 6 + 2 + 1 + 1);

    let tile = TileCoordinates { tile_index: Vec2(1, 0), level_index: Vec2(1, 1) };
    let chunk = context.tile_chunk(0, tile).unwrap();
    assert_eq!(chunk.chunk_index, 7);
    assert_eq!(chunk.tile, Some(tile));
    assert_eq!(chunk.size, Vec2(1, 3));

    let missing_level = TileCoordinates { tile_index: Vec2(0, 0), level_index: Vec2(4, 4) };
    assert_eq!(context.tile_chunk(0, missing_level).unwrap_err().code(), ErrorCode::ArgumentOutOfRange);
    assert_eq!(context.scan_line_chunk(0, 0).unwrap_err().code(), ErrorCode::ScanlineApiOnTiledFile);

    check_all_chunks(&context);
}

#[test]
fn tile_operations_on_scan_lines(){
    let part = Part::with_required(
        Storage::ScanLine, channels(&[ ("Y", SampleType::F32) ]),
        IntegerBounds::from_dimensions(4, 4), Compression::Uncompressed
    ).unwrap();

    let bytes = write_file(vec![ part ], ContextOptions::default(), true);
    let context = Context::from_bytes(bytes, ContextOptions::default()).unwrap();

    let error = context.tile_chunk(0, TileCoordinates::default()).unwrap_err();
    assert_eq!(error.code(), ErrorCode::TiledApiOnScanlineFile);
    assert_eq!(context.scan_line_chunk(0, 4).unwrap_err().code(), ErrorCode::ArgumentOutOfRange);
    assert_eq!(context.part(1).unwrap_err().code(), ErrorCode::ArgumentOutOfRange);
}

fn named_part(name: &str, compression: Compression, height: i32) -> Part {
    let mut part = Part::with_required(
        Storage::ScanLine, channels(&[ ("B", SampleType::F16), ("G", SampleType::F16) ]),
        IntegerBounds::from_dimensions(6, height), compression
    ).unwrap();

    part.set_attribute("name", AttributeValue::Text(Text::from(name))).unwrap();
    part
}

#[test]
fn multiple_parts(){
    init_logging();

    let parts = vec![ named_part("left", Compression::RLE, 5), named_part("right", Compression::ZIP1, 3) ];
    let mut bytes = write_file(parts, ContextOptions::default(), true);

    let context = Context::from_bytes(bytes.clone(), ContextOptions::default()).unwrap();
    assert!(context.requirements().is_multipart());
    assert_eq!(context.parts().len(), 2);
    assert_eq!(context.parts()[1].name().map(Text::to_string), Some("right".to_string()));
    assert_eq!(context.parts()[0].declared_chunk_count(), Some(5));

    // the tables follow each other directly
    let (left, right) = (&context.parts()[0], &context.parts()[1]);
    assert_eq!(right.chunk_table_offset(), left.chunk_table_offset() + 5 * 8);
    assert_eq!(context.meta_data().chunk_tables_end, right.chunk_table_offset() + 3 * 8);

    check_all_chunks(&context);

    // point the first chunk of the right part to a chunk of the left part
    let left_offset = context.chunk_table(0).unwrap()[0];
    let position = right.chunk_table_offset() as usize;
    bytes[position .. position + 8].copy_from_slice(&left_offset.to_le_bytes());

    let damaged = Context::from_bytes(bytes, ContextOptions::default()).unwrap();
    assert_eq!(damaged.chunk(1, 0).unwrap_err().code(), ErrorCode::BadChunkData);
    assert!(damaged.chunk(1, 1).is_ok());
}

#[test]
fn multiple_parts_require_names(){
    let unnamed = Part::with_required(
        Storage::ScanLine, channels(&[ ("Y", SampleType::F16) ]),
        IntegerBounds::from_dimensions(2, 2), Compression::Uncompressed
    ).unwrap();

    let parts = vec![ named_part("named", Compression::RLE, 2), unnamed ];
    let error = WriteContext::new(MemorySink::new(), parts, ContextOptions::default()).unwrap_err();
    assert_eq!(error.code(), ErrorCode::MissingRequiredAttribute);
}

#[test]
fn deep_scan_lines(){
    let mut part = Part::with_required(
        Storage::DeepScanLine, channels(&[ ("A", SampleType::F16), ("Z", SampleType::F32) ]),
        IntegerBounds::from_dimensions(5, 3), Compression::RLE
    ).unwrap();

    part.set_attribute("version", AttributeValue::I32(1)).unwrap();
    part.set_attribute("name", AttributeValue::Text(Text::from("depth"))).unwrap();

    let context = WriteContext::new(MemorySink::new(), vec![ part ], ContextOptions::default()).unwrap();
    assert!(context.requirements().has_deep_data());

    let counts_of_line = |y: i32| -> Vec<i32> {
        (0 .. 5).scan(0, |sum, x| { *sum += (x + y) % 3; Some(*sum) }).collect()
    };

    let depth = |index: usize| -> f32 { 0.5 + index as f32 };

    for y in 0 .. 3 {
        let counts = counts_of_line(y);
        let total = *counts.last().unwrap() as usize;

        let alpha: Vec<u8> = (0 .. total).flat_map(|_| f16::from_f32(1.0).to_bits().to_ne_bytes()).collect();
        let depths: Vec<u8> = (0 .. total).flat_map(|index| depth(index).to_ne_bytes()).collect();

        let mut request = context.encode_request(context.scan_line_chunk(0, y).unwrap()).unwrap();
        request.sample_counts = counts;
        let a = request.add_buffer(&alpha);
        let z = request.add_buffer(&depths);
        request.set_input("A", PixelSlot::dense(a, 0, SampleType::F16, 1)).unwrap();
        request.set_input("Z", PixelSlot::dense(z, 0, SampleType::F32, 1)).unwrap();
        context.write_chunk(&mut request).unwrap();
    }

    context.finish().unwrap();
    let bytes = context.into_inner().into_bytes();

    let context = Context::from_bytes(bytes, ContextOptions::default()).unwrap();
    let part = &context.parts()[0];
    assert_eq!(part.storage(), Storage::DeepScanLine);
    assert_eq!(part.version(), Some(1));
    assert_eq!(part.type_attribute().map(Text::to_string), Some("deepscanline".to_string()));

    for y in 0 .. 3 {
        let expected_counts = counts_of_line(y);
        let total = *expected_counts.last().unwrap() as usize;

        let mut alpha = vec![ 0_u8; total * 4 ];
        let mut request = context.decode_request(context.scan_line_chunk(0, y).unwrap()).unwrap();
        let a = request.add_buffer(&mut alpha);
        request.set_output("A", PixelSlot::dense(a, 0, SampleType::F32, 1)).unwrap();
        context.decode(&mut request).unwrap();

        assert_eq!(request.sample_counts, expected_counts);
        drop(request);

        assert!(alpha.chunks_exact(4).all(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == 1.0));
    }
}

#[test]
fn deep_parts_reject_multi_line_compression(){
    let mut part = Part::with_required(
        Storage::DeepScanLine, channels(&[ ("Z", SampleType::F32) ]),
        IntegerBounds::from_dimensions(5, 3), Compression::ZIP16
    ).unwrap();

    part.set_attribute("version", AttributeValue::I32(1)).unwrap();
    part.set_attribute("name", AttributeValue::Text(Text::from("depth"))).unwrap();

    let error = WriteContext::new(MemorySink::new(), vec![ part ], ContextOptions::default()).unwrap_err();
    assert_eq!(error.code(), ErrorCode::InvalidAttribute);
}

#[test]
fn custom_attributes(){
    let mut part = Part::with_required(
        Storage::ScanLine, channels(&[ ("Y", SampleType::F16) ]),
        IntegerBounds::from_dimensions(3, 3), Compression::Uncompressed
    ).unwrap();

    let attributes = vec![
        ("owner", AttributeValue::Text(Text::from("someone"))),
        ("capDate", AttributeValue::Text(Text::from("2020:01:01 12:00:00"))),
        ("frame", AttributeValue::I32(-17)),
        ("exposure", AttributeValue::F64(1.25)),
        ("weights", AttributeValue::FloatVector(vec![ 0.5, 1.5, -2.0 ])),
        ("views", AttributeValue::TextVector(vec![ Text::from("left"), Text::from("right") ])),
        ("offset", AttributeValue::IntVec2(Vec2(-4, 9))),
        ("up", AttributeValue::FloatVec3((0.0, 1.0, 0.0))),
        ("origin", AttributeValue::DoubleVec3((1.0, 2.0, 3.0))),
        ("crop", AttributeValue::IntegerBounds(IntegerBounds::new(Vec2(1, 1), Vec2(2, 2)))),
        ("custom", AttributeValue::Opaque(exr_core::meta::attribute::OpaqueValue::new("myCustomType", vec![ 9, 8, 7 ]))),
    ];

    for (name, value) in &attributes {
        part.set_attribute(*name, value.clone()).unwrap();
    }

    let bytes = write_file(vec![ part ], ContextOptions::default(), true);
    let context = Context::from_bytes(bytes, ContextOptions::default()).unwrap();
    let part = &context.parts()[0];

    for (name, value) in &attributes {
        assert_eq!(part.find(name), Some(value), "{}", name);
    }

    // attributes are written in creation order, after the required ones
    let names: Vec<String> = part.attributes().iter().map(|attribute| attribute.name.to_string()).collect();
    assert_eq!(names[0], "channels");
    assert_eq!(names.last().map(String::as_str), Some("custom"));
}

#[test]
fn incomplete_chunk_tables_are_reconstructed(){
    init_logging();

    let part = Part::with_required(
        Storage::ScanLine, channels(&[ ("Y", SampleType::F32) ]),
        IntegerBounds::from_dimensions(7, 9), Compression::ZIP1
    ).unwrap();

    let bytes = write_file(vec![ part ], ContextOptions::default(), false);

    let context = Context::from_bytes(bytes.clone(), ContextOptions::default()).unwrap();
    assert!(context.chunk_table(0).unwrap().iter().all(|&offset| offset >= context.meta_data().chunk_tables_end));
    check_all_chunks(&context);

    let options = ContextOptions::default().without_chunk_table_reconstruction();
    let context = Context::from_bytes(bytes, options).unwrap();
    assert_eq!(context.chunk(0, 0).unwrap_err().code(), ErrorCode::BadChunkData);
}

#[test]
fn writing_after_finish(){
    let part = Part::with_required(
        Storage::ScanLine, channels(&[ ("Y", SampleType::F32) ]),
        IntegerBounds::from_dimensions(2, 2), Compression::Uncompressed
    ).unwrap();

    let context = WriteContext::new(MemorySink::new(), vec![ part ], ContextOptions::default()).unwrap();
    context.finish().unwrap();

    let bytes = vec![ 0_u8; 8 ];
    let mut request = context.encode_request(context.chunk(0, 0).unwrap()).unwrap();
    let index = request.add_buffer(&bytes);
    request.set_input("Y", PixelSlot::dense(index, 0, SampleType::F32, 2)).unwrap();

    assert_eq!(context.write_chunk(&mut request).unwrap_err().code(), ErrorCode::NotOpenForWrite);
    assert_eq!(context.finish().unwrap_err().code(), ErrorCode::NotOpenForWrite);
}

#[test]
fn errors_are_reported_once(){
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();

    let options = ContextOptions::default()
        .with_error_handler(move |code, _| sink.lock().unwrap().push(code));

    let part = Part::with_required(
        Storage::ScanLine, channels(&[ ("Y", SampleType::F16) ]),
        IntegerBounds::from_dimensions(2, 2), Compression::RLE
    ).unwrap();

    let bytes = write_file(vec![ part ], ContextOptions::default(), true);
    let context = Context::from_bytes(bytes, options.clone()).unwrap();

    assert!(context.scan_line_chunk(0, 7).is_err());
    assert!(context.chunk(0, 0).is_ok());
    assert_eq!(*received.lock().unwrap(), vec![ ErrorCode::ArgumentOutOfRange ]);

    assert!(Context::from_bytes(vec![ 1, 2, 3 ], options).is_err());
    assert_eq!(received.lock().unwrap().len(), 2);
}

#[test]
fn files_on_disk(){
    let part = Part::with_required(
        Storage::ScanLine, channels(&[ ("Y", SampleType::F16) ]),
        IntegerBounds::from_dimensions(3, 2), Compression::ZIP16
    ).unwrap();

    let path = std::env::temp_dir().join(format!("exr-core-test-{}.exr", std::process::id()));

    let context = WriteContext::new(FileSink::create(&path).unwrap(), vec![ part ], ContextOptions::default()).unwrap();
    encode_chunk(&context, 0, 0);
    context.finish().unwrap();
    drop(context);

    let context = Context::open(&path, ContextOptions::default()).unwrap();
    assert_eq!(context.file_name(), Some(path.as_path()));
    assert_eq!(context.file_size(), std::fs::metadata(&path).unwrap().len());
    check_all_chunks(&context);

    std::fs::remove_file(&path).unwrap();

    let error = Context::open(&path, ContextOptions::default()).unwrap_err();
    assert_eq!(error.code(), ErrorCode::FileAccess);
}
