use crate::error::{Error, Result};

// compression level 4 is a good speed/ratio tradeoff for pixel data
const COMPRESSION_LEVEL: u8 = 4;

pub fn compress_bytes(raw: &[u8]) -> Result<Vec<u8>> {
    Ok(miniz_oxide::deflate::compress_to_vec_zlib(
        raw,
        COMPRESSION_LEVEL,
    ))
}

pub fn decompress_bytes(compressed: &[u8], expected_byte_size: usize) -> Result<Vec<u8>> {
    let options = zune_inflate::DeflateOptions::default()
        .set_limit(expected_byte_size)
        .set_size_hint(expected_byte_size);

    let mut decoder = zune_inflate::DeflateDecoder::new_with_options(compressed, options);
    decoder
        .decode_zlib()
        .map_err(|_| Error::DecompressionFailed)
}
