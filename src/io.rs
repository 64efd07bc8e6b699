//! Low-level byte stream helpers:
//! little-endian primitives and a position-tracking writer.

pub use std::io::{Read, Write};

use crate::error::{Error, Result, UnitResult};
use lebe::prelude::*;
use std::io::{Seek, SeekFrom};

/// Keep track of what byte we are at.
/// Used to seek back to a previous place after appending data,
/// for example to patch the index-offset field of an already written header.
#[derive(Debug)]
pub struct Tracking<T> {
    inner: T,
    position: u64,
}

impl<T: Write> Write for Tracking<T> {
    fn write(&mut self, buffer: &[u8]) -> std::io::Result<usize> {
        let count = self.inner.write(buffer)?;
        self.position += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<T> Tracking<T> {
    /// Wrap a byte stream, starting the position count at zero.
    pub fn new(inner: T) -> Self {
        Tracking { inner, position: 0 }
    }

    /// The number of bytes written or skipped so far.
    pub fn byte_position(&self) -> u64 {
        self.position
    }
}

impl<T: Write + Seek> Tracking<T> {
    /// Move the write cursor to an absolute byte position.
    /// Seeking forwards fills the gap with zeroes.
    pub fn seek_write_to(&mut self, target_position: u64) -> std::io::Result<()> {
        if target_position < self.position {
            self.inner.seek(SeekFrom::Start(target_position))?;
        } else if target_position > self.position {
            std::io::copy(
                &mut std::io::repeat(0).take(target_position - self.position),
                &mut self.inner,
            )?;
        }

        self.position = target_position;
        Ok(())
    }
}

/// Extension trait for reading and writing
/// little-endian primitives and slices of primitives.
pub trait Data: Sized + Default + Clone {
    /// Number of bytes this value occupies in a file.
    const BYTE_SIZE: usize = std::mem::size_of::<Self>();

    /// Read a single value from the byte stream.
    fn read_le(read: &mut impl Read) -> Result<Self>;

    /// Fill the slice with values from the byte stream.
    fn read_slice_le(read: &mut impl Read, slice: &mut [Self]) -> UnitResult;

    /// Write a single value to the byte stream.
    fn write_le(self, write: &mut impl Write) -> UnitResult;

    /// Write all values in the slice to the byte stream.
    fn write_slice_le(write: &mut impl Write, slice: &[Self]) -> UnitResult;

    /// Read a vector of values, refusing `data_size` greater than `hard_max`,
    /// and never allocating more than `soft_max` elements at once. This avoids
    /// allocating gigabytes up front where a corrupt file declares a giant length.
    #[inline]
    fn read_vec_le(
        read: &mut impl Read,
        data_size: usize,
        soft_max: usize,
        hard_max: Option<usize>,
        purpose: &'static str,
    ) -> Result<Vec<Self>> {
        if let Some(max) = hard_max {
            if data_size > max {
                return Err(Error::corrupt(purpose));
            }
        }

        let soft_max = hard_max.unwrap_or(soft_max).min(soft_max);
        let mut data = Vec::new();

        // most of the time, this loop will run only once
        while data.len() < data_size {
            let chunk_start = data.len();
            let chunk_end = (chunk_start + soft_max).min(data_size);

            data.resize(chunk_end, Self::default());
            Self::read_slice_le(read, &mut data[chunk_start..chunk_end])?;
        }

        Ok(data)
    }
}

macro_rules! implement_data_for_primitive {
    ($kind: ident) => {
        impl Data for $kind {
            #[inline]
            fn read_le(read: &mut impl Read) -> Result<Self> {
                Ok(read.read_from_little_endian()?)
            }

            #[inline]
            fn write_le(self, write: &mut impl Write) -> UnitResult {
                write.write_as_little_endian(&self)?;
                Ok(())
            }

            #[inline]
            fn read_slice_le(read: &mut impl Read, slice: &mut [Self]) -> UnitResult {
                read.read_from_little_endian_into(slice)?;
                Ok(())
            }

            #[inline]
            fn write_slice_le(write: &mut impl Write, slice: &[Self]) -> UnitResult {
                write.write_as_little_endian(slice)?;
                Ok(())
            }
        }
    };
}

implement_data_for_primitive!(u8);
implement_data_for_primitive!(u16);
implement_data_for_primitive!(u32);
implement_data_for_primitive!(u64);
implement_data_for_primitive!(f32);
implement_data_for_primitive!(f64);

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn tracking_counts_written_bytes() {
        let mut write = Tracking::new(Cursor::new(Vec::new()));
        42_u32.write_le(&mut write).unwrap();
        7_u64.write_le(&mut write).unwrap();
        assert_eq!(write.byte_position(), 12);
    }

    #[test]
    fn seek_back_and_patch() {
        let mut write = Tracking::new(Cursor::new(Vec::new()));
        u32::write_slice_le(&mut write, &[1, 2, 3, 4]).unwrap();

        write.seek_write_to(4).unwrap();
        9_u32.write_le(&mut write).unwrap();

        let bytes = write.inner.into_inner();
        let mut read = bytes.as_slice();
        let mut values = [0_u32; 4];
        u32::read_slice_le(&mut read, &mut values).unwrap();
        assert_eq!(values, [1, 9, 3, 4]);
    }

    #[test]
    fn bounded_vec_rejects_giant_length() {
        let bytes = [0_u8; 16];
        let result = u64::read_vec_le(&mut bytes.as_slice(), 4096, 64, Some(64), "test length");
        assert!(result.is_err());
    }

    #[test]
    fn roundtrip_le_slices() {
        let mut write = Tracking::new(Cursor::new(Vec::new()));
        let offsets = [88_u64, 1024, 70_000];
        u64::write_slice_le(&mut write, &offsets).unwrap();

        let bytes = write.inner.into_inner();
        let loaded = u64::read_vec_le(&mut bytes.as_slice(), 3, 1024, None, "offsets").unwrap();
        assert_eq!(loaded, offsets);
    }
}
