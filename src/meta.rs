//! Describes the image and the on-disk container:
//! the fixed-layout header and the block offset index.

use crate::compression::Compression;
use crate::error::{u64_to_usize, Error, Result, UnitResult};
use crate::io::{Data, Read, Tracking, Write};
use crate::math::{self, Coords};
use std::io::Seek;

/// Number of axes of every image, in fixed `(x, y, z, c, t)` order.
pub const DIMENSIONS: usize = 5;

/// The format version this implementation reads and writes.
pub const VERSION: u8 = 1;

/// Size of the fixed header prefix, up to and excluding the metadata blob.
pub(crate) const FIXED_HEADER_BYTES: u64 = 88;

/// Byte position of the index-offset field inside the header.
/// It is the only field rewritten in place at finalize.
pub(crate) const INDEX_OFFSET_BYTE: u64 = 76;

const RESERVED_BYTES: usize = 5;

/// Soft allocation cap for length-prefixed reads, in elements.
const READ_CHUNK: usize = 1 << 20;

/// Hard cap for the metadata blob, in bytes.
const MAX_METADATA_BYTES: usize = 1 << 30;

/// The first eight bytes of every vbf file.
/// Used to abort reading non-vbf files.
pub mod magic_number {
    use super::*;

    /// The first eight bytes of every vbf file.
    pub const BYTES: [u8; 8] = *b"VBF1\r\n\x1a\n";

    /// Without validation, write the signature to the byte stream.
    pub fn write(write: &mut impl Write) -> UnitResult {
        u8::write_slice_le(write, &BYTES)
    }

    /// Consume eight bytes and error with `BadMagic` unless they are the signature.
    pub fn validate(read: &mut impl Read) -> UnitResult {
        let mut magic = [0_u8; 8];
        u8::read_slice_le(read, &mut magic).map_err(|_| Error::BadMagic)?;
        if magic == BYTES {
            Ok(())
        } else {
            Err(Error::BadMagic)
        }
    }
}

/// One of the five image axes, in fixed storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// First and fastest-varying axis.
    X,

    /// Second axis.
    Y,

    /// Third axis, usually depth.
    Z,

    /// Fourth axis, usually the channel.
    Channel,

    /// Fifth and slowest-varying axis, usually time.
    Time,
}

impl Axis {
    /// All axes, in storage order.
    pub const ALL: [Axis; DIMENSIONS] = [Axis::X, Axis::Y, Axis::Z, Axis::Channel, Axis::Time];

    /// Position of this axis in the fixed storage order.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::Channel => 3,
            Axis::Time => 4,
        }
    }
}

/// The type of every sample in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    /// 8-bit unsigned integer samples.
    U8,

    /// 16-bit unsigned integer samples.
    U16,

    /// 32-bit unsigned integer samples.
    U32,

    /// 64-bit unsigned integer samples.
    U64,

    /// 8-bit signed integer samples.
    I8,

    /// 16-bit signed integer samples.
    I16,

    /// 32-bit signed integer samples.
    I32,

    /// 64-bit signed integer samples.
    I64,

    /// 32-bit floating point samples.
    F32,

    /// 64-bit floating point samples.
    F64,
}

impl PixelType {
    /// The tag byte stored in the file header.
    pub fn tag(self) -> u8 {
        match self {
            PixelType::U8 => 0,
            PixelType::U16 => 1,
            PixelType::U32 => 2,
            PixelType::U64 => 3,
            PixelType::I8 => 4,
            PixelType::I16 => 5,
            PixelType::I32 => 6,
            PixelType::I64 => 7,
            PixelType::F32 => 8,
            PixelType::F64 => 9,
        }
    }

    /// Decode a tag byte read from a file header.
    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => PixelType::U8,
            1 => PixelType::U16,
            2 => PixelType::U32,
            3 => PixelType::U64,
            4 => PixelType::I8,
            5 => PixelType::I16,
            6 => PixelType::I32,
            7 => PixelType::I64,
            8 => PixelType::F32,
            9 => PixelType::F64,
            _ => return Err(Error::corrupt("unknown pixel type tag")),
        })
    }

    /// Number of bytes one sample occupies.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            PixelType::U8 | PixelType::I8 => 1,
            PixelType::U16 | PixelType::I16 => 2,
            PixelType::U32 | PixelType::I32 | PixelType::F32 => 4,
            PixelType::U64 | PixelType::I64 | PixelType::F64 => 8,
        }
    }
}

/// Describes one image: its extents, block tiling, sample type,
/// compression method, physical sample spacing, and an opaque metadata blob.
///
/// The pixel memory layout implied by this descriptor is row-major
/// with `x` varying fastest, then `y`, `z`, `c`, `t`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    /// Number of pixels along each axis. Every component is at least one.
    pub extent: Coords,

    /// Nominal extent of one block along each axis.
    /// Blocks at the trailing edge of an axis may be shorter.
    pub block_extent: Coords,

    /// The type of every sample.
    pub pixel_type: PixelType,

    /// How each block payload is compressed.
    pub compression: Compression,

    /// Physical size of one pixel along each axis. Semantically opaque to this
    /// library; typically micrometers for the spatial axes.
    pub sample_spacing: [f32; DIMENSIONS],

    /// Free-form bytes stored in the header, opaque to this library.
    pub metadata: Vec<u8>,
}

impl ImageInfo {
    /// A descriptor with unit sample spacing and no metadata.
    pub fn new(
        extent: Coords,
        block_extent: Coords,
        pixel_type: PixelType,
        compression: Compression,
    ) -> Self {
        ImageInfo {
            extent,
            block_extent,
            pixel_type,
            compression,
            sample_spacing: [1.0; DIMENSIONS],
            metadata: Vec::new(),
        }
    }

    /// Total number of pixels in the image.
    pub fn pixel_count(&self) -> u64 {
        math::volume(&self.extent)
    }

    /// Number of bytes one sample occupies.
    pub fn bytes_per_sample(&self) -> usize {
        self.pixel_type.bytes_per_sample()
    }

    /// Total number of bytes of the raw pixel data.
    pub fn byte_size(&self) -> u64 {
        self.pixel_count() * self.bytes_per_sample() as u64
    }

    /// Byte length of the serialized header, including the metadata blob.
    /// This is also the file offset of the first block payload.
    pub fn header_byte_size(&self) -> u64 {
        FIXED_HEADER_BYTES + self.metadata.len() as u64
    }

    /// Check the descriptor invariants.
    pub fn validate(&self) -> UnitResult {
        for axis in 0..DIMENSIONS {
            if self.extent[axis] == 0 {
                return Err(Error::corrupt("image extent must be at least one per axis"));
            }

            if self.block_extent[axis] == 0 {
                return Err(Error::corrupt("block extent must be at least one per axis"));
            }

            if self.block_extent[axis] > self.extent[axis] {
                return Err(Error::corrupt("block extent exceeds image extent"));
            }
        }

        // the total byte size must not overflow,
        // so all later size arithmetic stays exact
        let mut byte_size = self.bytes_per_sample() as u64;
        for &extent in &self.extent {
            byte_size = byte_size
                .checked_mul(u64::from(extent))
                .ok_or_else(|| Error::corrupt("image byte size overflows"))?;
        }

        if self.metadata.len() > MAX_METADATA_BYTES {
            return Err(Error::corrupt("metadata blob too large"));
        }

        Ok(())
    }
}

/// Write the header at the current position, which must be byte zero.
/// The index-offset field is written as zero
/// and patched in place by [`patch_index_offset`] at finalize.
pub(crate) fn write_header(write: &mut impl Write, info: &ImageInfo) -> UnitResult {
    info.validate()?;

    magic_number::write(write)?;
    VERSION.write_le(write)?;
    info.pixel_type.tag().write_le(write)?;
    info.compression.tag().write_le(write)?;
    u8::write_slice_le(write, &[0_u8; RESERVED_BYTES])?;

    u32::write_slice_le(write, &info.extent)?;
    u32::write_slice_le(write, &info.block_extent)?;
    f32::write_slice_le(write, &info.sample_spacing)?;

    0_u64.write_le(write)?; // index offset placeholder

    (info.metadata.len() as u32).write_le(write)?;
    u8::write_slice_le(write, &info.metadata)?;

    Ok(())
}

/// Read and validate the header from the start of a byte stream.
/// Returns the image descriptor and the absolute offset of the block index.
pub(crate) fn read_header(read: &mut impl Read) -> Result<(ImageInfo, u64)> {
    magic_number::validate(read)?;

    let version = u8::read_le(read)?;
    if version != VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let pixel_type = PixelType::from_tag(u8::read_le(read)?)?;
    let compression = Compression::from_tag(u8::read_le(read)?)?;

    let mut reserved = [0_u8; RESERVED_BYTES];
    u8::read_slice_le(read, &mut reserved)?;

    let mut extent = [0_u32; DIMENSIONS];
    let mut block_extent = [0_u32; DIMENSIONS];
    let mut sample_spacing = [0.0_f32; DIMENSIONS];
    u32::read_slice_le(read, &mut extent)?;
    u32::read_slice_le(read, &mut block_extent)?;
    f32::read_slice_le(read, &mut sample_spacing)?;

    let index_offset = u64::read_le(read)?;

    let metadata_len = u64_to_usize(u64::from(u32::read_le(read)?), "metadata length")?;
    let metadata = u8::read_vec_le(
        read,
        metadata_len,
        READ_CHUNK,
        Some(MAX_METADATA_BYTES),
        "metadata length",
    )?;

    let info = ImageInfo {
        extent,
        block_extent,
        pixel_type,
        compression,
        sample_spacing,
        metadata,
    };

    info.validate()?;
    Ok((info, index_offset))
}

/// Append the block offset index at the current end of the stream.
/// Returns the absolute byte offset where the index starts.
pub(crate) fn write_index(
    write: &mut Tracking<impl Write>,
    offsets: &[u64],
) -> Result<u64> {
    let index_offset = write.byte_position();
    u64::write_slice_le(write, offsets)?;
    Ok(index_offset)
}

/// Overwrite the index-offset field of an already written header.
pub(crate) fn patch_index_offset(
    write: &mut Tracking<impl Write + Seek>,
    index_offset: u64,
) -> UnitResult {
    write.seek_write_to(INDEX_OFFSET_BYTE)?;
    index_offset.write_le(write)
}

/// Read and validate the block offset index. The stream must be positioned
/// at `index_offset`. Returns `block_count + 1` entries: the absolute start
/// of each block payload, plus `index_offset` itself as the end sentinel of
/// the last block.
pub(crate) fn read_index(
    read: &mut impl Read,
    block_count: u64,
    payload_start: u64,
    index_offset: u64,
    file_len: u64,
) -> Result<Vec<u64>> {
    let count = u64_to_usize(block_count, "block count")?;

    let index_bytes = block_count
        .checked_mul(u64::BYTE_SIZE as u64)
        .ok_or(Error::TruncatedIndex)?;
    if index_offset.checked_add(index_bytes).map_or(true, |end| end > file_len) {
        return Err(Error::TruncatedIndex);
    }

    let mut offsets =
        u64::read_vec_le(read, count, READ_CHUNK, None, "offset index length")
            .map_err(|_| Error::TruncatedIndex)?;

    let mut previous = None;
    for &offset in &offsets {
        if offset < payload_start || offset >= index_offset {
            return Err(Error::corrupt("block offset out of file bounds"));
        }

        if previous.map_or(false, |previous| offset <= previous) {
            return Err(Error::IndexNotMonotonic);
        }

        previous = Some(offset);
    }

    offsets.push(index_offset);
    Ok(offsets)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn small_info() -> ImageInfo {
        ImageInfo {
            extent: [20, 17, 10, 1, 1],
            block_extent: [8, 4, 2, 1, 1],
            pixel_type: PixelType::U16,
            compression: Compression::Zip,
            sample_spacing: [1.2, 2.4, 3.6, 4.8, 6.0],
            metadata: b"specimen a7".to_vec(),
        }
    }

    #[test]
    fn header_roundtrip_preserves_descriptor() {
        let info = small_info();

        let mut bytes = Vec::new();
        {
            let mut write = Tracking::new(Cursor::new(&mut bytes));
            write_header(&mut write, &info).unwrap();
            assert_eq!(write.byte_position(), info.header_byte_size());

            patch_index_offset(&mut write, 12345).unwrap();
        }

        let (loaded, index_offset) = read_header(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded, info);
        assert_eq!(index_offset, 12345);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = Vec::new();
        {
            let mut write = Tracking::new(Cursor::new(&mut bytes));
            write_header(&mut write, &small_info()).unwrap();
        }
        bytes[2] ^= 0xff;

        assert!(matches!(read_header(&mut bytes.as_slice()), Err(Error::BadMagic)));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = Vec::new();
        {
            let mut write = Tracking::new(Cursor::new(&mut bytes));
            write_header(&mut write, &small_info()).unwrap();
        }
        bytes[8] = 250;

        assert!(matches!(
            read_header(&mut bytes.as_slice()),
            Err(Error::UnsupportedVersion(250))
        ));
    }

    #[test]
    fn rejects_block_extent_larger_than_image() {
        let mut info = small_info();
        info.block_extent[1] = 64;
        assert!(matches!(info.validate(), Err(Error::CorruptHeader(_))));
    }

    #[test]
    fn index_sentinel_and_monotonicity() {
        let offsets = [88_u64, 100, 230];
        let mut bytes = Vec::new();
        u64::write_slice_le(&mut bytes, &offsets).unwrap();

        let loaded = read_index(&mut bytes.as_slice(), 3, 88, 300, 324).unwrap();
        assert_eq!(loaded, vec![88, 100, 230, 300]);

        let not_monotonic = [88_u64, 230, 100];
        let mut bytes = Vec::new();
        u64::write_slice_le(&mut bytes, &not_monotonic).unwrap();
        assert!(matches!(
            read_index(&mut bytes.as_slice(), 3, 88, 300, 324),
            Err(Error::IndexNotMonotonic)
        ));
    }

    #[test]
    fn truncated_index_is_detected() {
        let offsets = [88_u64, 100];
        let mut bytes = Vec::new();
        u64::write_slice_le(&mut bytes, &offsets).unwrap();

        // file ends in the middle of the index
        assert!(matches!(
            read_index(&mut bytes.as_slice(), 2, 88, 300, 310),
            Err(Error::TruncatedIndex)
        ));
    }
}
