use super::*;
use super::optimize_bytes::*;

// inspired by  https://github.com/openexr/openexr/blob/master/OpenEXR/IlmImf/ImfRle.cpp

const MIN_RUN_LENGTH : usize = 3;
const MAX_RUN_LENGTH : usize = 127;


/// Run length encoding of the delta coded bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLength;

impl Codec for RunLength {
    fn compress(&self, _info: &CodecInfo<'_>, unpacked: Bytes<'_>) -> Result<ByteVec> {
        compress_bytes(unpacked)
    }

    fn decompress(&self, _info: &CodecInfo<'_>, packed: Bytes<'_>, unpacked: &mut [u8]) -> UnitResult {
        let decompressed = decompress_bytes(packed, unpacked.len())?;
        unpacked.copy_from_slice(&decompressed);
        Ok(())
    }
}


fn decompress_bytes(mut remaining: Bytes<'_>, expected_byte_size: usize) -> Result<ByteVec> {
    let mut decompressed = Vec::with_capacity(expected_byte_size.min(8*2048));

    while !remaining.is_empty() {
        let count = take_1(&mut remaining)? as i8 as i32;

        if count < 0 {
            // take the next '-count' bytes as-is
            let values = take_n(&mut remaining, (-count) as usize)?;
            decompressed.extend_from_slice(values);
        }
        else {
            // repeat the next value 'count + 1' times
            let value = take_1(&mut remaining)?;
            decompressed.resize(decompressed.len() + count as usize + 1, value);
        }

        if decompressed.len() > expected_byte_size {
            return Err(Error::bad_chunk("run length data exceeds chunk size"));
        }
    }

    if decompressed.len() != expected_byte_size {
        return Err(Error::bad_chunk("run length data does not fill the chunk"));
    }

    differences_to_samples(&mut decompressed);
    interleave_byte_blocks(&mut decompressed);
    Ok(decompressed)
}

fn compress_bytes(data: Bytes<'_>) -> Result<ByteVec> {
    let mut data = Vec::from(data);
    separate_bytes_fragments(&mut data);
    samples_to_differences(&mut data);

    let mut compressed = Vec::with_capacity(data.len());
    let mut run_start = 0;
    let mut run_end = 1;

    while run_start < data.len() {
        while
            run_end < data.len()
                && data[run_start] == data[run_end]
                && (run_end - run_start) as i32 - 1 < MAX_RUN_LENGTH as i32
            {
                run_end += 1;
            }

        if run_end - run_start >= MIN_RUN_LENGTH {
            compressed.push(((run_end - run_start) as i32 - 1) as u8);
            compressed.push(data[run_start]);
            run_start = run_end;

        } else {
            while
                run_end < data.len() && (
                    (run_end + 1 >= data.len() || data[run_end] != data[run_end + 1])
                        || (run_end + 2 >= data.len() || data[run_end + 1] != data[run_end + 2])
                ) && run_end - run_start < MAX_RUN_LENGTH
                {
                    run_end += 1;
                }

            compressed.push((run_start as i32 - run_end as i32) as u8);
            compressed.extend_from_slice(&data[run_start .. run_end]);

            run_start = run_end;
            run_end += 1;
        }
    }

    Ok(compressed)
}

fn take_1(slice: &mut &[u8]) -> Result<u8> {
    match slice.split_first() {
        Some((&first, rest)) => {
            *slice = rest;
            Ok(first)
        },

        None => Err(Error::bad_chunk("run length data ended early")),
    }
}

fn take_n<'s>(slice: &mut &'s [u8], n: usize) -> Result<&'s [u8]> {
    if n <= slice.len() {
        let (front, back) = slice.split_at(n);
        *slice = back;
        Ok(front)

    } else {
        Err(Error::bad_chunk("run length data ended early"))
    }
}
