//! Input model: the sliced object as the analyzer sees it.
//!
//! The caller (the slicing pipeline) owns path generation; this module only
//! describes the finished result: an ordered stack of layers, each holding
//! regions with their flow table, perimeter entities and fill entities. The
//! object is expected in the usual bed frame: xy centered on the origin,
//! z growing upward from the bed.

use crate::extrusion::ExtrusionEntity;
use crate::flow::RegionFlows;
use crate::geometry::Vec2f;
use serde::{Deserialize, Serialize};

/// One region of a layer: a set of extrusions sharing print settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerRegion {
    /// Flow table of this region, one flow per role.
    pub flows: RegionFlows,
    /// Perimeter entities (usually collections of loops).
    pub perimeters: Vec<ExtrusionEntity>,
    /// Fill entities (solid, sparse, gap fill, bridges).
    pub fills: Vec<ExtrusionEntity>,
}

impl LayerRegion {
    pub fn new(flows: RegionFlows) -> Self {
        Self {
            flows,
            perimeters: Vec::new(),
            fills: Vec::new(),
        }
    }
}

/// A single horizontal slice of the object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Layer {
    /// Print z of this layer (mm).
    pub slice_z: f32,
    pub regions: Vec<LayerRegion>,
}

impl Layer {
    pub fn new(slice_z: f32, regions: Vec<LayerRegion>) -> Self {
        Self { slice_z, regions }
    }
}

/// A sliced print object: layers ordered bottom to top.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrintObject {
    layers: Vec<Layer>,
    /// Size of the xy bounding box (mm); the object is centered on the
    /// origin, so geometry spans ±size/2.
    size: Vec2f,
}

impl PrintObject {
    pub fn new(size: Vec2f, layers: Vec<Layer>) -> Self {
        Self { layers, size }
    }

    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[inline]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Size of the xy bounding box (mm).
    #[inline]
    pub fn size(&self) -> Vec2f {
        self.size
    }

    /// Height of the object: print z of the topmost layer (mm).
    pub fn height(&self) -> f32 {
        self.layers.last().map_or(0.0, |l| l.slice_z)
    }
}
