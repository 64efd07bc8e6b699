//! Contains the compression attribute definition
//! and methods to compress and decompress block payloads.
//!
//! Every block is compressed independently,
//! so any block can be decoded without touching the rest of the file.

// private modules make non-breaking changes easier
mod rle;
mod zip;

use crate::error::{Error, Result};

/// A byte vector.
pub type ByteVec = Vec<u8>;

/// A byte slice.
pub type Bytes<'s> = &'s [u8];

/// Specifies which compression method is applied to each block payload.
/// Use no compression for fastest loading and writing speeds.
/// Use RLE compression for fast loading and writing with slight memory savings.
/// Use ZIP compression for slower processing with large memory savings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Store uncompressed block payloads.
    /// Produces large files that can be read and written very quickly.
    None,

    /// Uses ZIP (zlib deflate) compression on each block.
    /// Slowly produces small files which can be read with moderate speed.
    /// This compression method is lossless.
    Zip,

    /// Produces slightly smaller files that can still be read and written
    /// rather quickly. Works best for images with large flat areas,
    /// such as masks. This compression method is lossless.
    Rle,
}

impl Compression {
    /// The tag byte stored in the file header.
    pub fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Zip => 1,
            Compression::Rle => 2,
        }
    }

    /// Decode a tag byte read from a file header.
    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Compression::None,
            1 => Compression::Zip,
            2 => Compression::Rle,
            _ => return Err(Error::corrupt("unknown compression tag")),
        })
    }

    /// Compress one raw block payload.
    pub fn compress(self, raw: Bytes<'_>) -> Result<ByteVec> {
        let compressed = match self {
            Compression::None => raw.to_vec(),
            Compression::Zip => zip::compress_bytes(raw)?,
            Compression::Rle => rle::compress_bytes(raw),
        };

        debug_assert!(
            compressed.len() <= self.max_compressed_size(raw.len()),
            "compressed block exceeds the worst-case size bound"
        );

        Ok(compressed)
    }

    /// Decompress one block payload back into exactly `raw_size` bytes.
    /// Any other decompressed length means the payload does not belong
    /// to a block of that shape, and is reported as an error.
    pub fn decompress(self, compressed: Bytes<'_>, raw_size: usize) -> Result<ByteVec> {
        let raw = match self {
            Compression::None => compressed.to_vec(),
            Compression::Zip => zip::decompress_bytes(compressed, raw_size)?,
            Compression::Rle => rle::decompress_bytes(compressed, raw_size)?,
        };

        if raw.len() != raw_size {
            return Err(Error::DecompressionFailed);
        }

        Ok(raw)
    }

    /// Conservative upper bound for the compressed size of a block of
    /// `raw_size` bytes. Sizes the fixed queue slots of the writer pipeline,
    /// covering payloads that compress larger than the raw data.
    ///
    /// Both zlib (5 bytes per 16 KiB of stored data plus a constant) and the
    /// run-length coder (one marker byte per 127 literals) stay well below
    /// two percent overhead.
    pub(crate) fn max_compressed_size(self, raw_size: usize) -> usize {
        raw_size + raw_size / 50 + 256
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{} compression",
            match self {
                Compression::None => "no",
                Compression::Zip => "zip",
                Compression::Rle => "rle",
            }
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const CODECS: [Compression; 3] = [Compression::None, Compression::Zip, Compression::Rle];

    fn roundtrip(codec: Compression, data: &[u8]) {
        let compressed = codec.compress(data).unwrap();
        assert!(compressed.len() <= codec.max_compressed_size(data.len()));

        let decompressed = codec.decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data, "{codec} not round tripping");
    }

    #[test]
    fn roundtrip_gradient() {
        let data: Vec<u8> = (0..4096_u32).map(|index| (index % 251) as u8).collect();
        for codec in CODECS {
            roundtrip(codec, &data);
        }
    }

    #[test]
    fn roundtrip_flat() {
        for codec in CODECS {
            roundtrip(codec, &[42_u8; 2048]);
        }
    }

    #[test]
    fn roundtrip_incompressible() {
        // xorshift noise compresses to more than its raw size
        let mut state = 0x2545_f491_4f6c_dd1d_u64;
        let data: Vec<u8> = (0..4096)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 32) as u8
            })
            .collect();

        for codec in CODECS {
            roundtrip(codec, &data);
        }
    }

    #[test]
    fn roundtrip_tiny() {
        for codec in CODECS {
            roundtrip(codec, &[7]);
            roundtrip(codec, &[0, 0]);
        }
    }

    #[test]
    fn wrong_decompressed_size_is_an_error() {
        for codec in CODECS {
            let compressed = codec.compress(&[1, 2, 3, 4]).unwrap();
            assert!(matches!(
                codec.decompress(&compressed, 5),
                Err(Error::DecompressionFailed)
            ));
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(Compression::from_tag(3).is_err());

        for codec in CODECS {
            assert_eq!(Compression::from_tag(codec.tag()).unwrap(), codec);
        }
    }
}
