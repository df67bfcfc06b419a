#[macro_use]
extern crate bencher;

extern crate exr_core;
use exr_core::prelude::*;

use bencher::Bencher;
use rayon::prelude::*;

const SIZE: usize = 512;

/// An in-memory file with four interleavable half channels.
fn rgba_file(compression: Compression) -> Vec<u8> {
    let channels = ChannelList::new(["A", "B", "G", "R"].iter()
        .map(|&name| ChannelDescription::new(name, SampleType::F16, false))
        .collect());

    let part = Part::with_required(Storage::ScanLine, channels, IntegerBounds::from_dimensions(SIZE as i32, SIZE as i32), compression).unwrap();
    let context = WriteContext::new(MemorySink::new(), vec![ part ], ContextOptions::default()).unwrap();

    for chunk_index in 0 .. context.parts()[0].chunk_count() as usize {
        let chunk = context.chunk(0, chunk_index).unwrap();
        let pixels = chunk.size.area();

        let line: Vec<u8> = (0 .. pixels)
            .flat_map(|index| f16::from_f32((index % 97) as f32 / 97.0).to_bits().to_ne_bytes())
            .collect();

        let mut request = context.encode_request(chunk).unwrap();
        let buffer = request.add_buffer(&line);

        for name in ["A", "B", "G", "R"] {
            request.set_input(name, PixelSlot::dense(buffer, 0, SampleType::F16, SIZE)).unwrap();
        }

        context.write_chunk(&mut request).unwrap();
    }

    context.finish().unwrap();
    context.into_inner().into_bytes()
}

/// Decode all chunks into one interleaved rgba buffer per chunk.
fn decode_interleaved(context: &Context, chunk_index: usize) -> Vec<u8> {
    let chunk = context.chunk(0, chunk_index).unwrap();
    let mut pixels = vec![ 0_u8; chunk.size.area() * 8 ];

    let mut request = context.decode_request(chunk).unwrap();
    let buffer = request.add_buffer(&mut pixels);

    for (offset, name) in ["R", "G", "B", "A"].iter().enumerate() {
        request.set_output(name, PixelSlot::interleaved(buffer, offset * 2, SampleType::F16, 8, SIZE)).unwrap();
    }

    context.decode(&mut request).unwrap();
    drop(request);
    pixels
}

fn read_uncompressed_interleaved(bench: &mut Bencher) {
    let file = rgba_file(Compression::Uncompressed);

    bench.iter(||{
        let context = Context::from_bytes(file.clone(), ContextOptions::default()).unwrap();
        let chunks = context.parts()[0].chunk_count() as usize;
        let pixels: Vec<Vec<u8>> = (0 .. chunks).map(|index| decode_interleaved(&context, index)).collect();
        bencher::black_box(pixels);
    })
}

fn read_zip16_interleaved(bench: &mut Bencher) {
    let file = rgba_file(Compression::ZIP16);

    bench.iter(||{
        let context = Context::from_bytes(file.clone(), ContextOptions::default()).unwrap();
        let chunks = context.parts()[0].chunk_count() as usize;
        let pixels: Vec<Vec<u8>> = (0 .. chunks).map(|index| decode_interleaved(&context, index)).collect();
        bencher::black_box(pixels);
    })
}

/// Decode chunks on all cores, sharing one context
fn read_zip16_interleaved_parallel(bench: &mut Bencher) {
    let file = rgba_file(Compression::ZIP16);

    bench.iter(||{
        let context = Context::from_bytes(file.clone(), ContextOptions::default()).unwrap();
        let chunks = context.parts()[0].chunk_count() as usize;
        let pixels: Vec<Vec<u8>> = (0 .. chunks).into_par_iter().map(|index| decode_interleaved(&context, index)).collect();
        bencher::black_box(pixels);
    })
}

fn read_rle_planar(bench: &mut Bencher) {
    let file = rgba_file(Compression::RLE);

    bench.iter(||{
        let context = Context::from_bytes(file.clone(), ContextOptions::default()).unwrap();
        let mut red = vec![ 0_u8; SIZE * SIZE * 2 ];

        for chunk_index in 0 .. SIZE {
            let chunk = context.chunk(0, chunk_index).unwrap();
            let start = chunk.start.y() as usize * SIZE * 2;

            let mut request = context.decode_request(chunk).unwrap();
            let buffer = request.add_buffer(&mut red[start .. start + SIZE * 2]);
            request.set_output("R", PixelSlot::dense(buffer, 0, SampleType::F16, SIZE)).unwrap();
            context.decode(&mut request).unwrap();
        }

        bencher::black_box(red);
    })
}

benchmark_group!(read,
    read_uncompressed_interleaved,
    read_zip16_interleaved,
    read_zip16_interleaved_parallel,
    read_rle_planar,
);

benchmark_main!(read);
