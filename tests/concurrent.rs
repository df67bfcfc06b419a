//! Share read and write contexts between threads.

extern crate exr_core;

use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use rayon::prelude::*;
use exr_core::prelude::*;


fn part(height: i32) -> Part {
    let channels = ChannelList::new(vec![
        ChannelDescription::new("B", SampleType::F16, false),
        ChannelDescription::new("G", SampleType::F32, false),
    ].into_iter().collect());

    Part::with_required(Storage::ScanLine, channels, IntegerBounds::from_dimensions(16, height), Compression::ZIP1).unwrap()
}

/// Both channels contain the line number in every sample.
fn line_bytes(y: i32) -> (Vec<u8>, Vec<u8>) {
    let blue = (0 .. 16).flat_map(|_| f16::from_f32(y as f32).to_bits().to_ne_bytes()).collect();
    let green = (0 .. 16).flat_map(|_| (y as f32).to_ne_bytes()).collect();
    (blue, green)
}

fn write_line(context: &WriteContext<impl WriteAt>, y: i32) -> UnitResult {
    let (blue, green) = line_bytes(y);
    let mut request = context.encode_request(context.scan_line_chunk(0, y)?)?;

    let b = request.add_buffer(&blue);
    let g = request.add_buffer(&green);
    request.set_input("B", PixelSlot::dense(b, 0, SampleType::F16, 16))?;
    request.set_input("G", PixelSlot::dense(g, 0, SampleType::F32, 16))?;

    context.write_chunk(&mut request)
}

fn write_concurrently(height: i32) -> Vec<u8> {
    let context = WriteContext::new(MemorySink::new(), vec![ part(height) ], ContextOptions::default()).unwrap();
    (0 .. height).into_par_iter().for_each(|y| write_line(&context, y).unwrap());

    context.finish().unwrap();
    context.into_inner().into_bytes()
}

fn decode_line(context: &Context, y: i32) -> (Vec<u8>, Vec<u8>) {
    let (mut blue, mut green) = (vec![ 0_u8; 16 * 2 ], vec![ 0_u8; 16 * 4 ]);
    let mut request = context.decode_request(context.scan_line_chunk(0, y).unwrap()).unwrap();

    let b = request.add_buffer(&mut blue);
    let g = request.add_buffer(&mut green);
    request.set_output("B", PixelSlot::dense(b, 0, SampleType::F16, 16)).unwrap();
    request.set_output("G", PixelSlot::dense(g, 0, SampleType::F32, 16)).unwrap();

    context.decode(&mut request).unwrap();
    drop(request);

    (blue, green)
}

#[test]
fn parallel_writes_are_all_recorded(){
    let bytes = write_concurrently(64);
    let context = Context::from_bytes(bytes, ContextOptions::default()).unwrap();

    let table = context.chunk_table(0).unwrap();
    let mut sorted = table.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    assert_eq!(sorted.len(), 64, "every chunk has its own position");
    assert!(sorted[0] >= context.meta_data().chunk_tables_end);

    for y in 0 .. 64 {
        assert_eq!(decode_line(&context, y), line_bytes(y));
    }
}

#[test]
fn chunk_table_is_shared_between_threads(){
    let bytes = write_concurrently(32);
    let context = Context::from_bytes(bytes, ContextOptions::default()).unwrap();

    let addresses: Vec<usize> = (0 .. 16).into_par_iter()
        .map(|_| context.chunk_table(0).unwrap().as_ptr() as usize)
        .collect();

    assert!(addresses.iter().all(|&address| address == addresses[0]));
}

#[test]
fn parallel_decoding(){
    let bytes = write_concurrently(48);
    let context = Context::from_bytes(bytes, ContextOptions::default()).unwrap();

    let all_equal = (0 .. 48).into_par_iter()
        .all(|y| decode_line(&context, y) == line_bytes(y));

    assert!(all_equal);
}

/// Holds the first write after the header until the gate has been passed twice.
struct GatedSink {
    inner: MemorySink,
    gate: Arc<Barrier>,
    armed: AtomicBool,
}

impl WriteAt for GatedSink {
    fn write_at(&self, bytes: &[u8], offset: u64) -> std::io::Result<()> {
        if offset > 0 && self.armed.swap(false, Ordering::AcqRel) {
            self.gate.wait(); // the write has started
            self.gate.wait(); // the write may complete
        }

        self.inner.write_at(bytes, offset)
    }
}

#[test]
fn finish_waits_for_chunks_being_written(){
    let gate = Arc::new(Barrier::new(2));
    let sink = GatedSink { inner: MemorySink::new(), gate: gate.clone(), armed: AtomicBool::new(true) };
    let context = WriteContext::new(sink, vec![ part(1) ], ContextOptions::default()).unwrap();
    let table_offset = context.parts()[0].chunk_table_offset() as usize;

    let (written, finished) = std::thread::scope(|scope| {
        let writer = scope.spawn(|| write_line(&context, 0));
        gate.wait();

        let finisher = scope.spawn(|| context.finish());
        std::thread::sleep(Duration::from_millis(50));
        gate.wait();

        (writer.join().unwrap(), finisher.join().unwrap())
    });

    assert!(finished.is_ok(), "{:?}", finished);
    let bytes = context.into_inner().inner.into_bytes();
    let entry = u64::from_le_bytes(bytes[table_offset .. table_offset + 8].try_into().unwrap());

    match written {
        Ok(()) => {
            assert_ne!(entry, 0, "a chunk that was written successfully is in the table");
            let context = Context::from_bytes(bytes, ContextOptions::default()).unwrap();
            assert_eq!(decode_line(&context, 0), line_bytes(0));
        },

        Err(error) => assert_eq!(error.code(), ErrorCode::NotOpenForWrite),
    }
}
