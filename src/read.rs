//! Read an image, or any axis-aligned part of one, from a vbf file.
//!
//! Opening a file parses and validates the header and the block offset
//! index. A region read then touches only the blocks intersecting the
//! region: workers claim block tasks, read the compressed payload at the
//! indexed offset through a private file handle, decompress it, and hand
//! the tile to the calling thread, which scatters the intersecting rows
//! into the destination buffer.

use crate::error::{Error, Result, UnitResult};
use crate::grid::{BlockGrid, BlockTask, BlockTasks, Roi};
use crate::math;
use crate::meta::{self, ImageInfo, DIMENSIONS};
use crate::pipeline::ErrorCell;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reads pixels from one vbf file. Created with [`Reader::open`],
/// which validates the header and loads the block offset index.
/// A reader is immutable after opening, so one reader can serve
/// concurrent [`read`](Self::read) calls.
#[derive(Debug)]
pub struct Reader {
    path: PathBuf,
    info: ImageInfo,
    grid: BlockGrid,

    // absolute payload start of each block, plus the index offset
    // as the end sentinel of the last block
    offsets: Vec<u64>,

    worker_count: usize,
}

impl Reader {
    /// Open a vbf file, validate its header, and load the block offset index.
    /// No pixel data is read or decompressed yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let mut read = BufReader::new(file);

        let (info, index_offset) = meta::read_header(&mut read)?;
        let grid = BlockGrid::new(&info);

        let payload_start = info.header_byte_size();
        if index_offset < payload_start || index_offset > file_len {
            return Err(Error::corrupt("index offset out of file bounds"));
        }

        read.seek(SeekFrom::Start(index_offset))?;
        let offsets = meta::read_index(
            &mut read,
            grid.block_count(),
            payload_start,
            index_offset,
            file_len,
        )?;

        Ok(Reader {
            worker_count: std::thread::available_parallelism().map_or(1, |count| count.get()),
            path,
            info,
            grid,
            offsets,
        })
    }

    /// Use this many decompression workers for subsequent reads.
    /// Defaults to the available parallelism. A count of zero is treated as one.
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    /// The image descriptor read from the file header.
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// The block grid of the image.
    pub fn grid(&self) -> &BlockGrid {
        &self.grid
    }

    /// The validated block offset index: the absolute byte offset of every
    /// block payload, plus the end of the last payload as a final sentinel.
    pub fn block_offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Read the given region into a freshly allocated buffer.
    pub fn read_into_vec(&self, roi: &Roi) -> Result<Vec<u8>> {
        roi.validate(&self.info)?;

        let byte_size = usize::try_from(roi.byte_size(&self.info))
            .map_err(|_| Error::invalid_roi("too large for this platform"))?;

        let mut pixels = vec![0_u8; byte_size];
        self.read(roi, &mut pixels)?;
        Ok(pixels)
    }

    /// Read the given region of the image into the caller's buffer,
    /// decompressing only the blocks the region touches. The buffer must
    /// hold exactly the region's pixels, in the same layout as a full
    /// image of the region's extent: row-major, `x` varying fastest.
    ///
    /// The buffer is fully written before this call returns;
    /// no background work outlives it.
    pub fn read(&self, roi: &Roi, pixels: &mut [u8]) -> UnitResult {
        roi.validate(&self.info)?;

        let expected_bytes = roi.byte_size(&self.info);
        if pixels.len() as u64 != expected_bytes {
            return Err(Error::BufferTooSmall {
                expected: usize::try_from(expected_bytes).unwrap_or(usize::MAX),
                actual: pixels.len(),
            });
        }

        let tasks: BlockTasks = self.grid.blocks_intersecting(roi).collect();
        let worker_count = self.worker_count.min(tasks.len()).max(1);

        let run = ErrorCell::new();
        let next_task = AtomicUsize::new(0);

        // tiles flow to the scatter loop through a bounded channel,
        // so decompression stays ahead by a few blocks at most
        let (tile_sender, tile_receiver) = flume::bounded::<(usize, Vec<u8>)>(worker_count * 2);

        let bytes_per_sample = self.info.bytes_per_sample();
        let destination_strides = math::strides(&roi.extent);

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let tiles = tile_sender.clone();
                let tasks = &tasks;
                let run = &run;
                let next_task = &next_task;

                scope.spawn(move || {
                    let mut file = match File::open(&self.path) {
                        Ok(file) => file,
                        Err(error) => return run.fail(error.into()),
                    };

                    let mut compressed = Vec::new();

                    loop {
                        if run.is_cancelled() {
                            return;
                        }

                        let task_index = next_task.fetch_add(1, Ordering::AcqRel);
                        let Some(task) = tasks.get(task_index) else {
                            return;
                        };

                        match self.decode_block(&mut file, task, &mut compressed) {
                            Ok(tile) => {
                                // the send only fails when the scatter loop
                                // has already stopped
                                if tiles.send((task_index, tile)).is_err() {
                                    return;
                                }
                            }
                            Err(error) => return run.fail(error),
                        }
                    }
                });
            }

            drop(tile_sender);

            // the calling thread owns the destination buffer
            // and places every arriving tile
            for (task_index, tile) in tile_receiver {
                let task = &tasks[task_index];
                scatter_tile(
                    &tile,
                    &self.grid.block_rect(task.block_id).extent,
                    task,
                    &destination_strides,
                    bytes_per_sample,
                    pixels,
                );
            }
        });

        if let Some(error) = run.into_error() {
            return Err(error);
        }

        Ok(())
    }

    /// Read and decompress the block of one task
    /// through this worker's private file handle.
    fn decode_block(
        &self,
        file: &mut File,
        task: &BlockTask,
        compressed: &mut Vec<u8>,
    ) -> Result<Vec<u8>> {
        let block_index = task.block_id as usize;
        let start = self.offsets[block_index];
        let end = self.offsets[block_index + 1];
        compressed.resize((end - start) as usize, 0);

        file.seek(SeekFrom::Start(start))?;
        file.read_exact(compressed)?;

        let raw_bytes =
            self.grid.block_rect(task.block_id).pixel_count() as usize * self.info.bytes_per_sample();
        self.info.compression.decompress(compressed, raw_bytes)
    }
}

/// Copy the intersecting rows of a decompressed block-local tile
/// into the destination buffer, one `x`-contiguous row at a time.
fn scatter_tile(
    tile: &[u8],
    tile_extent: &[u32; DIMENSIONS],
    task: &BlockTask,
    destination_strides: &[u64; DIMENSIONS],
    bytes_per_sample: usize,
    destination: &mut [u8],
) {
    let tile_strides = math::strides(tile_extent);
    let row_bytes = task.src.extent[0] as usize * bytes_per_sample;

    for row in task.src.rows() {
        let mut tile_coords = task.src.start;
        let mut destination_coords = task.dst.start;
        for axis in 1..DIMENSIONS {
            tile_coords[axis] += row[axis];
            destination_coords[axis] += row[axis];
        }

        let tile_byte =
            math::flat_index(&tile_coords, &tile_strides) as usize * bytes_per_sample;
        let destination_byte =
            math::flat_index(&destination_coords, destination_strides) as usize * bytes_per_sample;

        destination[destination_byte..destination_byte + row_bytes]
            .copy_from_slice(&tile[tile_byte..tile_byte + row_bytes]);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::grid::Rect;

    #[test]
    fn scatter_places_rows_at_region_coordinates() {
        // tile of a 3x2 block, scattered into a 4x4 region at offset (1, 2)
        let tile: Vec<u8> = vec![1, 2, 3, 4, 5, 6];
        let task = BlockTask {
            block_id: 0,
            src: Rect { start: [0; 5], extent: [3, 2, 1, 1, 1] },
            dst: Rect { start: [1, 2, 0, 0, 0], extent: [3, 2, 1, 1, 1] },
        };

        let region_extent = [4, 4, 1, 1, 1];
        let mut destination = vec![0_u8; 16];
        scatter_tile(
            &tile,
            &[3, 2, 1, 1, 1],
            &task,
            &math::strides(&region_extent),
            1,
            &mut destination,
        );

        #[rustfmt::skip]
        assert_eq!(destination, vec![
            0, 0, 0, 0,
            0, 0, 0, 0,
            0, 1, 2, 3,
            0, 4, 5, 6,
        ]);
    }

    #[test]
    fn scatter_takes_a_sub_rect_of_the_tile() {
        // take the 2x1 piece at tile offset (1, 1) of a 3x2 tile
        let tile: Vec<u8> = vec![1, 2, 3, 4, 5, 6];
        let task = BlockTask {
            block_id: 0,
            src: Rect { start: [1, 1, 0, 0, 0], extent: [2, 1, 1, 1, 1] },
            dst: Rect { start: [0; 5], extent: [2, 1, 1, 1, 1] },
        };

        let region_extent = [2, 1, 1, 1, 1];
        let mut destination = vec![0_u8; 2];
        scatter_tile(
            &tile,
            &[3, 2, 1, 1, 1],
            &task,
            &math::strides(&region_extent),
            1,
            &mut destination,
        );

        assert_eq!(destination, vec![5, 6]);
    }
}
