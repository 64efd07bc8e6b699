//! The block grid: how an image is tiled into blocks,
//! and which blocks a region of interest touches.
//!
//! Blocks are identified by a linear block id
//! that enumerates the grid with the `x` axis varying fastest.

use crate::error::{Error, UnitResult};
use crate::math::{self, Coords};
use crate::meta::{Axis, ImageInfo, DIMENSIONS};
use smallvec::SmallVec;

/// An axis-aligned box of pixels, as a start coordinate and an extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    /// The smallest coordinate inside the box, per axis.
    pub start: Coords,

    /// Number of pixels along each axis.
    pub extent: Coords,
}

impl Rect {
    /// One-past-the-end coordinate along the given axis.
    #[inline]
    pub fn end(&self, axis: usize) -> u32 {
        self.start[axis] + self.extent[axis]
    }

    /// Number of pixels inside the box.
    pub fn pixel_count(&self) -> u64 {
        math::volume(&self.extent)
    }

    /// Iterate the local start coordinates of all `x`-contiguous rows
    /// in this box, relative to `self.start`. The `x` component is always zero.
    pub(crate) fn rows(&self) -> RowCoords {
        RowCoords {
            extent: self.extent,
            next: Some([0; DIMENSIONS]),
        }
    }
}

/// A region of interest: an axis-aligned box in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Roi {
    /// The smallest image coordinate inside the region, per axis.
    pub start: Coords,

    /// Number of pixels along each axis.
    pub extent: Coords,
}

impl Roi {
    /// The region covering the whole image.
    pub fn full(info: &ImageInfo) -> Self {
        Roi {
            start: [0; DIMENSIONS],
            extent: info.extent,
        }
    }

    /// A region that is one pixel thick along the given axis
    /// and covers the full image on all other axes.
    /// For example, `Roi::slice(Axis::Z, 3, info)` is the fourth `x`-`y` plane.
    pub fn slice(axis: Axis, index: u32, info: &ImageInfo) -> Self {
        let mut roi = Self::full(info);
        roi.start[axis.index()] = index;
        roi.extent[axis.index()] = 1;
        roi
    }

    /// The region between two corners: `lo` inclusive, `hi` exclusive.
    /// A corner pair with any `hi <= lo` axis produces an empty region,
    /// which is rejected when the region is used.
    pub fn from_corners(lo: Coords, hi: Coords) -> Self {
        let mut extent = [0; DIMENSIONS];
        for axis in 0..DIMENSIONS {
            extent[axis] = hi[axis].saturating_sub(lo[axis]);
        }
        Roi { start: lo, extent }
    }

    /// One-past-the-end image coordinate along the given axis.
    #[inline]
    pub fn end(&self, axis: usize) -> u32 {
        self.start[axis] + self.extent[axis]
    }

    /// Number of pixels inside the region.
    pub fn pixel_count(&self) -> u64 {
        math::volume(&self.extent)
    }

    /// Number of bytes of a pixel buffer holding this region.
    pub fn byte_size(&self, info: &ImageInfo) -> u64 {
        self.pixel_count() * info.bytes_per_sample() as u64
    }

    /// Check that the region is non-empty and inside the image.
    pub fn validate(&self, info: &ImageInfo) -> UnitResult {
        for axis in 0..DIMENSIONS {
            if self.extent[axis] == 0 {
                return Err(Error::invalid_roi("empty on at least one axis"));
            }

            let end = u64::from(self.start[axis]) + u64::from(self.extent[axis]);
            if end > u64::from(info.extent[axis]) {
                return Err(Error::invalid_roi("exceeds the image extent"));
            }
        }

        Ok(())
    }

    #[inline]
    fn rect(&self) -> Rect {
        Rect {
            start: self.start,
            extent: self.extent,
        }
    }
}

/// The work of one block during a region read:
/// which block to decode, which part of it to take,
/// and where that part lands inside the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTask {
    /// Linear id of the intersecting block.
    pub block_id: u64,

    /// The intersection, in block-local coordinates.
    pub src: Rect,

    /// The intersection, in region-local coordinates.
    /// Same extent as `src`.
    pub dst: Rect,
}

/// The intersecting blocks of a typical region fit inline.
pub(crate) type BlockTasks = SmallVec<[BlockTask; 8]>;

/// Derived from an image descriptor:
/// maps between linear block ids, grid coordinates, and pixel boxes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockGrid {
    image_extent: Coords,
    block_extent: Coords,
    blocks_per_axis: Coords,
    id_strides: [u64; DIMENSIONS],
}

impl BlockGrid {
    /// The grid implied by an image descriptor.
    /// The descriptor must be valid.
    pub fn new(info: &ImageInfo) -> Self {
        let mut blocks_per_axis = [0; DIMENSIONS];
        for axis in 0..DIMENSIONS {
            blocks_per_axis[axis] = math::ceil_div(info.extent[axis], info.block_extent[axis]);
        }

        BlockGrid {
            image_extent: info.extent,
            block_extent: info.block_extent,
            id_strides: math::strides(&blocks_per_axis),
            blocks_per_axis,
        }
    }

    /// Total number of blocks in the image.
    pub fn block_count(&self) -> u64 {
        math::volume(&self.blocks_per_axis)
    }

    /// Number of blocks along each axis.
    pub fn blocks_per_axis(&self) -> Coords {
        self.blocks_per_axis
    }

    /// Grid coordinate of a block id. The id must be below `block_count`.
    pub fn block_coord(&self, block_id: u64) -> Coords {
        debug_assert!(block_id < self.block_count(), "block id out of range");

        let mut remaining = block_id;
        let mut coord = [0; DIMENSIONS];
        for axis in 0..DIMENSIONS {
            coord[axis] = (remaining % u64::from(self.blocks_per_axis[axis])) as u32;
            remaining /= u64::from(self.blocks_per_axis[axis]);
        }

        coord
    }

    /// The box of image pixels covered by a block.
    /// Blocks at the trailing edge of an axis are clipped to the image.
    pub fn block_rect(&self, block_id: u64) -> Rect {
        let coord = self.block_coord(block_id);

        let mut start = [0; DIMENSIONS];
        let mut extent = [0; DIMENSIONS];
        for axis in 0..DIMENSIONS {
            start[axis] = coord[axis] * self.block_extent[axis];
            extent[axis] = self.block_extent[axis].min(self.image_extent[axis] - start[axis]);
        }

        Rect { start, extent }
    }

    /// Number of pixels in a full (unclipped) block.
    pub fn max_block_pixel_count(&self) -> u64 {
        math::volume(&self.block_extent)
    }

    /// All blocks whose pixel box intersects the region, in increasing
    /// block-id order, each with the intersection expressed in block-local
    /// (source) and region-local (destination) coordinates.
    /// The region must be valid for the image this grid was derived from.
    pub fn blocks_intersecting<'g>(&'g self, roi: &Roi) -> impl Iterator<Item = BlockTask> + 'g {
        let mut lo = [0; DIMENSIONS];
        let mut hi = [0; DIMENSIONS];
        for axis in 0..DIMENSIONS {
            debug_assert!(roi.extent[axis] >= 1, "unvalidated region");
            lo[axis] = roi.start[axis] / self.block_extent[axis];
            hi[axis] = (roi.end(axis) - 1) / self.block_extent[axis];
        }

        IntersectingBlocks {
            grid: self,
            roi: roi.rect(),
            lo,
            hi,
            next: Some(lo),
        }
    }
}

// x varies fastest, matching the block id order
struct IntersectingBlocks<'g> {
    grid: &'g BlockGrid,
    roi: Rect,
    lo: Coords,
    hi: Coords,
    next: Option<Coords>,
}

impl Iterator for IntersectingBlocks<'_> {
    type Item = BlockTask;

    fn next(&mut self) -> Option<Self::Item> {
        let coord = self.next?;

        // advance the grid coordinate for the next call
        self.next = {
            let mut following = coord;
            let mut axis = 0;
            loop {
                if axis == DIMENSIONS {
                    break None;
                }

                following[axis] += 1;
                if following[axis] <= self.hi[axis] {
                    break Some(following);
                }

                following[axis] = self.lo[axis];
                axis += 1;
            }
        };

        let block_id = math::flat_index(&coord, &self.grid.id_strides);
        let block = self.grid.block_rect(block_id);

        let mut src = Rect {
            start: [0; DIMENSIONS],
            extent: [0; DIMENSIONS],
        };
        let mut dst = src;

        for axis in 0..DIMENSIONS {
            let start = block.start[axis].max(self.roi.start[axis]);
            let end = block.end(axis).min(self.roi.end(axis));
            debug_assert!(start < end, "block does not intersect the region");

            src.start[axis] = start - block.start[axis];
            dst.start[axis] = start - self.roi.start[axis];
            src.extent[axis] = end - start;
            dst.extent[axis] = end - start;
        }

        Some(BlockTask { block_id, src, dst })
    }
}

/// Yields the local start coordinate of each row in a box,
/// with the `x` component pinned to zero.
pub(crate) struct RowCoords {
    extent: Coords,
    next: Option<Coords>,
}

impl Iterator for RowCoords {
    type Item = Coords;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.next?;

        self.next = {
            let mut following = row;
            let mut axis = 1;
            loop {
                if axis == DIMENSIONS {
                    break None;
                }

                following[axis] += 1;
                if following[axis] < self.extent[axis] {
                    break Some(following);
                }

                following[axis] = 0;
                axis += 1;
            }
        };

        Some(row)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compression::Compression;
    use crate::meta::PixelType;

    fn info(extent: Coords, block_extent: Coords) -> ImageInfo {
        ImageInfo::new(extent, block_extent, PixelType::U16, Compression::None)
    }

    #[test]
    fn block_count_rounds_up_per_axis() {
        let grid = BlockGrid::new(&info([1002, 200, 54, 1, 1], [256, 256, 32, 1, 1]));
        assert_eq!(grid.blocks_per_axis(), [4, 1, 2, 1, 1]);
        assert_eq!(grid.block_count(), 8);
    }

    #[test]
    fn single_block_image() {
        let grid = BlockGrid::new(&info([20, 17, 10, 1, 1], [20, 17, 10, 1, 1]));
        assert_eq!(grid.block_count(), 1);
        assert_eq!(
            grid.block_rect(0),
            Rect { start: [0; 5], extent: [20, 17, 10, 1, 1] }
        );
    }

    #[test]
    fn block_ids_enumerate_x_fastest() {
        let grid = BlockGrid::new(&info([20, 17, 10, 1, 1], [8, 4, 2, 1, 1]));
        assert_eq!(grid.blocks_per_axis(), [3, 5, 5, 1, 1]);

        assert_eq!(grid.block_coord(0), [0, 0, 0, 0, 0]);
        assert_eq!(grid.block_coord(1), [1, 0, 0, 0, 0]);
        assert_eq!(grid.block_coord(3), [0, 1, 0, 0, 0]);
        assert_eq!(grid.block_coord(15), [0, 0, 1, 0, 0]);
        assert_eq!(grid.block_coord(74), [2, 4, 4, 0, 0]);
    }

    #[test]
    fn short_trailing_blocks_are_clipped() {
        let grid = BlockGrid::new(&info([20, 17, 10, 1, 1], [8, 4, 2, 1, 1]));

        // last block along every axis
        let rect = grid.block_rect(74);
        assert_eq!(rect.start, [16, 16, 8, 0, 0]);
        assert_eq!(rect.extent, [4, 1, 2, 1, 1]);
    }

    #[test]
    fn slabs_tile_the_image_disjointly() {
        let image = [20, 17, 10, 1, 1];
        let grid = BlockGrid::new(&info(image, [8, 4, 2, 1, 1]));

        let mut covered = vec![0_u8; math::volume(&image) as usize];
        let strides = math::strides(&image);

        for block_id in 0..grid.block_count() {
            let rect = grid.block_rect(block_id);
            for z in 0..rect.extent[2] {
                for y in 0..rect.extent[1] {
                    for x in 0..rect.extent[0] {
                        let coord = [rect.start[0] + x, rect.start[1] + y, rect.start[2] + z, 0, 0];
                        covered[math::flat_index(&coord, &strides) as usize] += 1;
                    }
                }
            }
        }

        assert!(covered.iter().all(|&count| count == 1));
    }

    #[test]
    fn full_image_roi_visits_every_block() {
        let image_info = info([1002, 200, 54, 1, 1], [256, 256, 32, 1, 1]);
        let grid = BlockGrid::new(&image_info);

        let ids: Vec<u64> = grid
            .blocks_intersecting(&Roi::full(&image_info))
            .map(|task| task.block_id)
            .collect();

        assert_eq!(ids, (0..8).collect::<Vec<u64>>());
    }

    #[test]
    fn roi_inside_one_block() {
        let image_info = info([1002, 200, 54, 1, 1], [256, 256, 32, 1, 1]);
        let grid = BlockGrid::new(&image_info);

        let roi = Roi::from_corners([300, 10, 5, 0, 0], [400, 20, 10, 0, 0]);
        let tasks: Vec<BlockTask> = grid.blocks_intersecting(&roi).collect();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].block_id, 1);
        assert_eq!(tasks[0].src.start, [44, 10, 5, 0, 0]);
        assert_eq!(tasks[0].src.extent, [100, 10, 5, 0, 0]);
        assert_eq!(tasks[0].dst.start, [0; 5]);
        assert_eq!(tasks[0].dst.extent, [100, 10, 5, 0, 0]);
    }

    #[test]
    fn roi_aligned_with_block_boundaries() {
        let image_info = info([64, 64, 1, 1, 1], [16, 16, 1, 1, 1]);
        let grid = BlockGrid::new(&image_info);

        let roi = Roi::from_corners([16, 32, 0, 0, 0], [48, 48, 1, 1, 1]);
        let tasks: Vec<BlockTask> = grid.blocks_intersecting(&roi).collect();

        assert_eq!(tasks.len(), 2);
        for task in &tasks {
            // aligned regions cause no short copies
            assert_eq!(task.src.start, [0; 5]);
            assert_eq!(task.src.extent, [16, 16, 1, 1, 1]);
        }
        assert_eq!(tasks[0].dst.start, [0, 0, 0, 0, 0]);
        assert_eq!(tasks[1].dst.start, [16, 0, 0, 0, 0]);
    }

    #[test]
    fn single_voxel_roi() {
        let image_info = info([20, 17, 10, 1, 1], [8, 4, 2, 1, 1]);
        let grid = BlockGrid::new(&image_info);

        let roi = Roi::from_corners([19, 16, 9, 0, 0], [20, 17, 10, 1, 1]);
        let tasks: Vec<BlockTask> = grid.blocks_intersecting(&roi).collect();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].block_id, 74);
        assert_eq!(tasks[0].src.start, [3, 0, 1, 0, 0]);
        assert_eq!(tasks[0].src.extent, [1, 1, 1, 1, 1]);
    }

    #[test]
    fn plane_roi_touches_expected_blocks() {
        let image_info = info([1002, 200, 54, 1, 1], [256, 256, 32, 1, 1]);
        let grid = BlockGrid::new(&image_info);

        // an x-z plane crosses all blocks along x and z, one along y
        let roi = Roi::slice(Axis::Y, 100, &image_info);
        let visited: Vec<u64> = grid
            .blocks_intersecting(&roi)
            .map(|task| task.block_id)
            .collect();
        assert_eq!(visited, (0..8).collect::<Vec<u64>>());

        // the visited set matches a brute-force intersection test
        for block_id in 0..grid.block_count() {
            let rect = grid.block_rect(block_id);
            let intersects = rect.start[1] <= 100 && 100 < rect.end(1);
            assert_eq!(intersects, visited.contains(&block_id));
        }
    }

    #[test]
    fn invalid_rois_are_rejected() {
        let image_info = info([20, 17, 10, 1, 1], [8, 4, 2, 1, 1]);

        let outside = Roi::from_corners([0, 0, 0, 0, 0], [21, 17, 10, 1, 1]);
        assert!(matches!(
            outside.validate(&image_info),
            Err(Error::InvalidRoi(_))
        ));

        let empty = Roi::from_corners([5, 5, 5, 0, 0], [5, 6, 6, 1, 1]);
        assert!(matches!(
            empty.validate(&image_info),
            Err(Error::InvalidRoi(_))
        ));

        assert!(Roi::full(&image_info).validate(&image_info).is_ok());
    }

    #[test]
    fn rows_iterate_all_non_x_coordinates() {
        let rect = Rect {
            start: [4, 2, 1, 0, 0],
            extent: [7, 2, 3, 1, 1],
        };

        let rows: Vec<Coords> = rect.rows().collect();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], [0, 0, 0, 0, 0]);
        assert_eq!(rows[1], [0, 1, 0, 0, 0]);
        assert_eq!(rows[2], [0, 0, 1, 0, 0]);
        assert_eq!(rows[5], [0, 1, 2, 0, 0]);
    }
}
