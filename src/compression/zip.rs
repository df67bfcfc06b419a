// see https://github.com/openexr/openexr/blob/master/OpenEXR/IlmImf/ImfZip.cpp

use super::*;
use super::optimize_bytes::*;
use zune_inflate::{DeflateDecoder, DeflateOptions};


/// The zlib codec used by `ZIP1` and `ZIP16`, which only differ in the number of lines per chunk.
/// The bytes are split into two halves and delta coded before deflating.
#[derive(Debug, Clone, Copy)]
pub struct Zip {

    /// The deflate level between 0 and 10.
    pub level: u8,
}

impl Default for Zip {
    fn default() -> Self { Zip { level: 4 } }
}

impl Codec for Zip {
    fn compress(&self, _info: &CodecInfo<'_>, unpacked: Bytes<'_>) -> Result<ByteVec> {
        let mut packed = unpacked.to_vec();

        separate_bytes_fragments(&mut packed);
        samples_to_differences(&mut packed);

        Ok(miniz_oxide::deflate::compress_to_vec_zlib(packed.as_slice(), self.level))
    }

    fn decompress(&self, info: &CodecInfo<'_>, packed: Bytes<'_>, unpacked: &mut [u8]) -> UnitResult {
        let options = DeflateOptions::default()
            .set_limit(info.unpacked_size)
            .set_size_hint(info.unpacked_size);

        let mut decompressed = DeflateDecoder::new_with_options(packed, options)
            .decode_zlib()
            .map_err(|_| Error::bad_chunk("zlib-compressed data malformed"))?;

        if decompressed.len() != unpacked.len() {
            return Err(Error::bad_chunk("zlib-compressed data has unexpected size"));
        }

        differences_to_samples(&mut decompressed);
        interleave_byte_blocks(&mut decompressed);

        unpacked.copy_from_slice(&decompressed);
        Ok(())
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::{ChannelDescription, SampleType};
    use smallvec::smallvec;

    #[test]
    fn round_trip(){
        let channels = ChannelList::new(smallvec![ ChannelDescription::new("Y", SampleType::F16, false) ]);
        let unpacked: Vec<u8> = (0 .. 2048_u32).map(|value| (value / 7) as u8).collect();

        let info = CodecInfo {
            compression: Compression::ZIP16, channels: &channels,
            position: Vec2(0, 0), size: Vec2(64, 16), unpacked_size: unpacked.len(), deep: false,
        };

        let packed = Zip::default().compress(&info, &unpacked).unwrap();
        assert!(packed.len() < unpacked.len());

        let mut decompressed = vec![0; unpacked.len()];
        Zip::default().decompress(&info, &packed, &mut decompressed).unwrap();
        assert_eq!(decompressed, unpacked);
    }

    #[test]
    fn malformed_data(){
        let channels = ChannelList::new(smallvec![ ChannelDescription::new("Y", SampleType::F16, false) ]);
        let info = CodecInfo {
            compression: Compression::ZIP1, channels: &channels,
            position: Vec2(0, 0), size: Vec2(8, 1), unpacked_size: 16, deep: false,
        };

        let error = Zip::default().decompress(&info, &[ 1, 2, 3, 4, 5 ], &mut [0; 16]).unwrap_err();
        assert_eq!(error.code(), crate::error::ErrorCode::BadChunkData);
    }
}
