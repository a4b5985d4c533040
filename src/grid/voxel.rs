//! Sparse 3D occupancy set used to deduplicate support placements.
//!
//! Two support points landing in the same voxel would anchor the same spot
//! twice; the filter remembers taken cells so the global pass plants at most
//! one support per cell. The cell size is chosen by the caller, normally the
//! minimum distance between support points.

use crate::geometry::{Vec3f, Vec3i};
use crate::object::PrintObject;
use hashbrown::HashSet;

/// Sparse voxel set over the object volume, with a one-cell margin on every
/// side so support points on the hull stay in bounds.
#[derive(Clone, Debug)]
pub struct SupportGridFilter {
    cell_size: f32,
    origin: Vec3f,
    cell_count: Vec3i,
    taken_cells: HashSet<usize>,
}

impl SupportGridFilter {
    pub fn new(object: &PrintObject, voxel_size: f32) -> Self {
        let half = object.size() * 0.5;
        let origin = Vec3f::new(-half.x - voxel_size, -half.y - voxel_size, -voxel_size);
        let max = Vec3f::new(
            half.x + voxel_size,
            half.y + voxel_size,
            object.height() + voxel_size,
        );
        let extent = max - origin;
        let cell_count = Vec3i::new(
            (extent.x / voxel_size) as i32 + 1,
            (extent.y / voxel_size) as i32 + 1,
            (extent.z / voxel_size) as i32 + 1,
        );
        Self {
            cell_size: voxel_size,
            origin,
            cell_count,
            taken_cells: HashSet::new(),
        }
    }

    /// Mark the cell containing `position` as taken.
    pub fn take_position(&mut self, position: Vec3f) {
        let idx = self.to_cell_index(self.to_cell_coords(position));
        self.taken_cells.insert(idx);
    }

    /// Has the cell containing `position` already been taken?
    pub fn position_taken(&self, position: Vec3f) -> bool {
        self.taken_cells
            .contains(&self.to_cell_index(self.to_cell_coords(position)))
    }

    fn to_cell_coords(&self, position: Vec3f) -> Vec3i {
        let rel = position - self.origin;
        Vec3i::new(
            (rel.x / self.cell_size) as i32,
            (rel.y / self.cell_size) as i32,
            (rel.z / self.cell_size) as i32,
        )
    }

    fn to_cell_index(&self, coords: Vec3i) -> usize {
        debug_assert!(coords.x >= 0 && coords.x < self.cell_count.x);
        debug_assert!(coords.y >= 0 && coords.y < self.cell_count.y);
        debug_assert!(coords.z >= 0 && coords.z < self.cell_count.z);
        (coords.z * self.cell_count.x * self.cell_count.y
            + coords.y * self.cell_count.x
            + coords.x) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vec2f;
    use crate::object::{Layer, PrintObject};

    fn make_filter(voxel_size: f32) -> SupportGridFilter {
        let object = PrintObject::new(
            Vec2f::new(20.0, 20.0),
            vec![Layer::new(10.0, Vec::new())],
        );
        SupportGridFilter::new(&object, voxel_size)
    }

    #[test]
    fn test_take_and_query() {
        let mut filter = make_filter(1.0);
        let p = Vec3f::new(1.2, -3.4, 5.0);
        assert!(!filter.position_taken(p));
        filter.take_position(p);
        assert!(filter.position_taken(p));
        // A point in the same voxel is taken too.
        assert!(filter.position_taken(Vec3f::new(1.4, -3.1, 5.3)));
        // A point a few cells away is not.
        assert!(!filter.position_taken(Vec3f::new(4.0, -3.4, 5.0)));
    }

    #[test]
    fn test_boundary_positions_stay_in_bounds() {
        let mut filter = make_filter(1.0);
        // Corners of the object volume, including the bed plane.
        filter.take_position(Vec3f::new(-10.0, -10.0, 0.0));
        filter.take_position(Vec3f::new(10.0, 10.0, 10.0));
        assert!(filter.position_taken(Vec3f::new(-10.0, -10.0, 0.0)));
    }
}
