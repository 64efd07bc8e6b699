//! Write a complete image to a vbf file,
//! compressing blocks on multiple threads.
//!
//! Block ids are claimed from a shared counter by a pool of compression
//! workers. Each worker owns one bounded queue into the single serializing
//! thread, which drains the queues in canonical block-id order and records
//! the offset of every payload. Out-of-order completion is reconciled by
//! matching each claimed id against the id the serializer expects next.

use crate::error::{Error, Result, UnitResult};
use crate::grid::{BlockGrid, Rect};
use crate::io::Tracking;
use crate::math;
use crate::meta::{self, ImageInfo, DIMENSIONS};
use crate::pipeline::ErrorCell;
use crate::queue::BlockQueue;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Writes one image to one file. Created with [`Writer::create`],
/// consumed by [`Writer::write`]. If writing fails, or the writer is
/// dropped without writing, the partial file is removed.
#[derive(Debug)]
#[must_use]
pub struct Writer {
    path: PathBuf,
    file: Option<Tracking<BufWriter<File>>>,
    info: ImageInfo,
    grid: BlockGrid,
    worker_count: usize,
    finished: bool,
}

impl Writer {
    /// Create the target file and write the image descriptor to it.
    /// The pixel data is supplied later, in one call to [`write`](Self::write).
    /// A `worker_count` of zero is treated as one.
    pub fn create(
        path: impl AsRef<Path>,
        info: ImageInfo,
        worker_count: usize,
    ) -> Result<Self> {
        info.validate()?;

        let path = path.as_ref().to_path_buf();
        let mut file = Tracking::new(BufWriter::new(File::create(&path)?));
        meta::write_header(&mut file, &info)?;
        debug_assert_eq!(file.byte_position(), info.header_byte_size());

        Ok(Writer {
            grid: BlockGrid::new(&info),
            worker_count: worker_count.max(1),
            finished: false,
            file: Some(file),
            path,
            info,
        })
    }

    /// The descriptor this writer was created with.
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// Compress and write the whole image, then finalize the file.
    /// The buffer must hold exactly the raw image bytes in the layout the
    /// descriptor declares: little-endian samples, row-major with `x` fastest.
    ///
    /// The buffer is fully read before this call returns;
    /// no background work outlives it.
    pub fn write(mut self, pixels: &[u8]) -> UnitResult {
        let result = self.write_pixels(pixels);
        if result.is_ok() {
            self.finished = true;
        }

        result // on error, drop removes the partial file
    }

    fn write_pixels(&mut self, pixels: &[u8]) -> UnitResult {
        let expected_bytes = self.info.byte_size();
        if pixels.len() as u64 != expected_bytes {
            return Err(Error::BufferTooSmall {
                expected: usize::try_from(expected_bytes).unwrap_or(usize::MAX),
                actual: pixels.len(),
            });
        }

        let info = &self.info;
        let grid = &self.grid;
        let file = self.file.as_mut().expect("file already finalized");

        let block_count = grid.block_count();
        let worker_count = self.worker_count.min(block_count as usize);

        let bytes_per_sample = info.bytes_per_sample();
        let max_raw_bytes = grid.max_block_pixel_count() as usize * bytes_per_sample;
        let slot_capacity = info.compression.max_compressed_size(max_raw_bytes);

        let queues: Vec<BlockQueue> = (0..worker_count)
            .map(|_| BlockQueue::new(slot_capacity))
            .collect();

        let run = ErrorCell::new();
        let next_block_id = AtomicU64::new(0);
        let image_strides = math::strides(&info.extent);

        // the serializer learns which worker queue holds which block id
        // through this channel, in the order the ids were claimed
        let (claim_sender, claim_receiver) = flume::unbounded::<(u64, usize)>();

        let mut offsets: Vec<u64> = Vec::with_capacity(block_count as usize);

        std::thread::scope(|scope| {
            for worker_index in 0..worker_count {
                let claims = claim_sender.clone();
                let queues = &queues;
                let run = &run;
                let next_block_id = &next_block_id;
                let image_strides = &image_strides;

                scope.spawn(move || {
                    let mut scratch = vec![0_u8; max_raw_bytes];

                    loop {
                        if run.is_cancelled() {
                            return;
                        }

                        let block_id = next_block_id.fetch_add(1, Ordering::AcqRel);
                        if block_id >= block_count {
                            return;
                        }

                        // the send only fails when the serializer has
                        // already stopped, which means the run is over
                        if claims.send((block_id, worker_index)).is_err() {
                            return;
                        }

                        let rect = grid.block_rect(block_id);
                        let raw_bytes = rect.pixel_count() as usize * bytes_per_sample;
                        gather_block(
                            pixels,
                            image_strides,
                            &rect,
                            bytes_per_sample,
                            &mut scratch[..raw_bytes],
                        );

                        let compressed = match info.compression.compress(&scratch[..raw_bytes]) {
                            Ok(bytes) => bytes,
                            Err(error) => return fail_all(run, queues, error),
                        };

                        match queues[worker_index].push(run, block_id, &compressed) {
                            Ok(()) => {}
                            Err(Error::Cancelled) => return,
                            Err(error) => return fail_all(run, queues, error),
                        }
                    }
                });
            }

            // the calling thread is the serializing i/o thread
            drop(claim_sender);

            let mut pending_claims: BTreeMap<u64, usize> = BTreeMap::new();
            let io_result = (|| -> UnitResult {
                for next_expected in 0..block_count {
                    let worker_index = loop {
                        if let Some(worker_index) = pending_claims.remove(&next_expected) {
                            break worker_index;
                        }

                        match claim_receiver.recv() {
                            Ok((block_id, worker_index)) => {
                                pending_claims.insert(block_id, worker_index);
                            }
                            // all workers exited without claiming this id,
                            // so the run was cancelled
                            Err(_) => return Err(Error::Cancelled),
                        }
                    };

                    let slot = queues[worker_index].wait_read_slot(&run)?;
                    debug_assert_eq!(slot.block_id(), next_expected, "queue order bug");

                    offsets.push(file.byte_position());
                    file.write_all(slot.payload())?;
                    slot.pop();
                }

                Ok(())
            })();

            if let Err(error) = io_result {
                fail_all(&run, &queues, error);
            }
        });

        if let Some(error) = run.into_error() {
            return Err(error);
        }

        debug_assert_eq!(offsets.len() as u64, block_count);

        let index_offset = meta::write_index(file, &offsets)?;
        meta::patch_index_offset(file, index_offset)?;
        file.flush()?;
        Ok(())
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if !self.finished {
            self.file = None; // close before removing
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Record the first error and wake every queue
/// so all blocked threads can observe the cancellation.
fn fail_all(run: &ErrorCell, queues: &[BlockQueue], error: Error) {
    run.fail(error);
    for queue in queues {
        queue.interrupt();
    }
}

/// Copy the pixels of one block out of the image buffer
/// into a contiguous block-local tile, one `x`-contiguous row at a time.
fn gather_block(
    pixels: &[u8],
    image_strides: &[u64; DIMENSIONS],
    rect: &Rect,
    bytes_per_sample: usize,
    tile: &mut [u8],
) {
    let row_bytes = rect.extent[0] as usize * bytes_per_sample;
    let mut tile_offset = 0;

    for row in rect.rows() {
        let mut coords = rect.start;
        for axis in 1..DIMENSIONS {
            coords[axis] += row[axis];
        }

        let pixel_index = math::flat_index(&coords, image_strides);
        let byte_index = pixel_index as usize * bytes_per_sample;

        tile[tile_offset..tile_offset + row_bytes]
            .copy_from_slice(&pixels[byte_index..byte_index + row_bytes]);
        tile_offset += row_bytes;
    }

    debug_assert_eq!(tile_offset, tile.len(), "tile size bug");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compression::Compression;
    use crate::meta::PixelType;

    #[test]
    fn gather_extracts_a_block_local_tile() {
        // 4x3 image of u8, blocks of 2x2: block 1 covers x 2..4, y 0..2
        let info = ImageInfo::new([4, 3, 1, 1, 1], [2, 2, 1, 1, 1], PixelType::U8, Compression::None);
        let grid = BlockGrid::new(&info);
        let pixels: Vec<u8> = (0..12).collect();

        let mut tile = [0_u8; 4];
        gather_block(&pixels, &math::strides(&info.extent), &grid.block_rect(1), 1, &mut tile);
        assert_eq!(tile, [2, 3, 6, 7]);

        // block 3 is short along y: x 2..4, y 2..3
        let mut tile = [0_u8; 2];
        gather_block(&pixels, &math::strides(&info.extent), &grid.block_rect(3), 1, &mut tile);
        assert_eq!(tile, [10, 11]);
    }

    #[test]
    fn gather_respects_sample_size() {
        let info = ImageInfo::new([2, 2, 1, 1, 1], [1, 2, 1, 1, 1], PixelType::U16, Compression::None);
        let grid = BlockGrid::new(&info);
        let pixels: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

        let mut tile = [0_u8; 4];
        gather_block(&pixels, &math::strides(&info.extent), &grid.block_rect(1), 2, &mut tile);
        assert_eq!(tile, [2, 3, 6, 7]);
    }
}
