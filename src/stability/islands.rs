//! Island reckoning: classify a layer's lines into islands, accumulate their
//! moments, and connect them to the islands of the layer below.
//!
//! Islands are seeded from external perimeters: each one starts as a
//! candidate island, inner extrusions are assigned by a signed containment
//! test, and candidates embedded within another candidate (holes) are merged
//! away. The finished layer is rasterized with per-island ids and compared
//! pixel by pixel against the previous layer's raster; every shared pixel
//! feeds area and moment accumulators of the connection edge between the two
//! islands.

use crate::extrusion::{EntityId, EntityTable, ExtrusionLine, ExtrusionRole};
use crate::flow::FlowRole;
use crate::geometry::{Vec2f, Vec2i, Vec3f};
use crate::grid::{PixelGrid, NULL_ISLAND};
use crate::object::Layer;
use crate::stability::distancer::LinesDistancer;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Overlap edge between an island and one island of the layer below:
/// accumulated contact area with its first and second moments.
///
/// Additive: merging two connections is plain accumulator addition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IslandConnection {
    pub area: f32,
    pub centroid_accumulator: Vec3f,
    pub second_moment_of_area_accumulator: Vec2f,
}

impl IslandConnection {
    pub fn add(&mut self, other: &IslandConnection) {
        self.area += other.area;
        self.centroid_accumulator += other.centroid_accumulator;
        self.second_moment_of_area_accumulator += other.second_moment_of_area_accumulator;
    }

    /// Crude strength proxy used to pick the weaker of two connections: the
    /// smaller footprint variance, discounted by the lever arm from the
    /// connection down to the current layer.
    pub(crate) fn strength_estimate(&self, layer_z: f32) -> f32 {
        let centroid = self.centroid_accumulator / self.area;
        let min_variance = (self.second_moment_of_area_accumulator / self.area
            - centroid.xy().component_mul(centroid.xy()))
        .min_component();
        let arm_len_estimate = (layer_z - self.centroid_accumulator.z / self.area).max(1.1);
        min_variance / arm_len_estimate
    }
}

/// One island: a maximal set of extrusions on a single layer connected
/// through external perimeters and containment.
#[derive(Clone, Debug, Default)]
pub struct Island {
    /// Overlap edges to the previous layer, keyed by previous island index.
    /// Ordered so every downstream walk over connections is deterministic.
    pub connected_islands: BTreeMap<usize, IslandConnection>,
    pub volume: f32,
    pub volume_centroid_accumulator: Vec3f,
    /// Anchor footprint: populated from every segment on the base layer, or
    /// from segments that received a local support point on any other layer.
    pub sticking_area: f32,
    pub sticking_centroid_accumulator: Vec3f,
    pub sticking_second_moment_of_area_accumulator: Vec2f,
    /// The island's seeding (external perimeter) lines; the global pass
    /// walks these when placing supports.
    pub external_lines: Vec<ExtrusionLine>,
}

/// All islands of one layer.
#[derive(Clone, Debug, Default)]
pub struct LayerIslands {
    pub islands: Vec<Island>,
    pub layer_z: f32,
}

/// Group consecutive lines sharing an entity handle into `[start, end)`
/// ranges: one range per connected extrusion path.
fn group_extrusions(layer_lines: &[ExtrusionLine]) -> Vec<(usize, usize)> {
    let mut extrusions: Vec<(usize, usize)> = Vec::new();
    let mut current: Option<EntityId> = None;
    for (lidx, line) in layer_lines.iter().enumerate() {
        match extrusions.last_mut() {
            Some(last) if current == Some(line.entity) => last.1 = lidx + 1,
            _ => {
                extrusions.push((lidx, lidx + 1));
                current = Some(line.entity);
            }
        }
    }
    extrusions
}

/// Classify the layer's lines into islands and rasterize them.
///
/// `current_grid` is cleared and refilled with the new island ids; the
/// caller rolls it into the previous-grid slot afterwards. The previous
/// raster defines the comparison frame for the connection sweep.
pub(crate) fn reckon_islands(
    layer: &Layer,
    first_layer: bool,
    prev_grid: &PixelGrid,
    current_grid: &mut PixelGrid,
    layer_lines: &[ExtrusionLine],
    table: &EntityTable,
) -> LayerIslands {
    let mut result = LayerIslands {
        islands: Vec::new(),
        layer_z: layer.slice_z,
    };
    current_grid.clear();

    let extrusions = group_extrusions(layer_lines);

    // Island candidates, one per external perimeter. Some will disappear
    // again (holes).
    let mut islands: Vec<LinesDistancer> = Vec::new();
    let mut island_extrusions: Vec<Vec<usize>> = Vec::new();
    for (e, &(start, end)) in extrusions.iter().enumerate() {
        if table.role(layer_lines[start].entity) == ExtrusionRole::ExternalPerimeter {
            islands.push(LinesDistancer::new(layer_lines[start..end].to_vec()));
            island_extrusions.push(vec![e]);
        }
    }
    // External perimeters may all have been reclassified (e.g. pure overhang
    // perimeters), so there is no way to seed with certainty. Make the first
    // extrusion the island; it may be wrong, but it is safe.
    if islands.is_empty() && !extrusions.is_empty() {
        warn!("no external perimeter on layer, seeding island from first extrusion");
        let (start, end) = extrusions[0];
        islands.push(LinesDistancer::new(layer_lines[start..end].to_vec()));
        island_extrusions.push(vec![0]);
    }

    // Assign the remaining extrusions to the first island containing their
    // first point; unassigned ones fall into island 0.
    for (e, &(start, _)) in extrusions.iter().enumerate() {
        if table.role(layer_lines[start].entity) == ExtrusionRole::ExternalPerimeter {
            continue;
        }
        let probe = layer_lines[start].a;
        match islands
            .iter()
            .position(|island| island.signed_distance(probe) < 0.0)
        {
            Some(i) => island_extrusions[i].push(e),
            None => island_extrusions[0].push(e),
        }
    }

    // Merge islands embedded within each other, mainly holes.
    for i in 0..islands.len() {
        for j in 0..islands.len() {
            if i == j || island_extrusions[j].is_empty() {
                continue;
            }
            let probe = islands[j].lines()[0].a;
            if islands[i].signed_distance(probe) < 0.0 {
                let absorbed = std::mem::take(&mut island_extrusions[j]);
                island_extrusions[i].extend(absorbed);
            }
        }
    }

    let flow_width = layer
        .regions
        .first()
        .map_or(0.0, |r| r.flows.flow(FlowRole::ExternalPerimeter).width());

    // Build the surviving islands and their accumulators.
    let mut line_to_island: Vec<usize> = vec![NULL_ISLAND; layer_lines.len()];
    for island_ex in &island_extrusions {
        let Some(&seed) = island_ex.first() else {
            continue;
        };
        let mut island = Island {
            external_lines: layer_lines[extrusions[seed].0..extrusions[seed].1].to_vec(),
            ..Island::default()
        };
        for &extrusion_idx in island_ex {
            let (start, end) = extrusions[extrusion_idx];
            for lidx in start..end {
                line_to_island[lidx] = result.islands.len();
                let line = &layer_lines[lidx];
                let volume = table.min_mm3_per_mm(line.entity) * line.len;
                island.volume += volume;
                let middle = (line.a + line.b) * 0.5;
                island.volume_centroid_accumulator += middle.to_3d(layer.slice_z) * volume;

                if first_layer {
                    let sticking_area = line.len * flow_width;
                    island.sticking_area += sticking_area;
                    island.sticking_centroid_accumulator +=
                        middle.to_3d(layer.slice_z) * sticking_area;
                    island.sticking_second_moment_of_area_accumulator +=
                        middle.component_mul(middle) * sticking_area;
                } else if line.support_point_generated {
                    let sticking_area = line.len * flow_width;
                    island.sticking_area += sticking_area;
                    island.sticking_centroid_accumulator +=
                        line.b.to_3d(layer.slice_z) * sticking_area;
                    island.sticking_second_moment_of_area_accumulator +=
                        line.b.component_mul(line.b) * sticking_area;
                }
            }
        }
        result.islands.push(island);
    }

    // Rasterize the layer with its island ids. Parallel last-write-wins
    // stores: all lines of one island carry the same id, so whichever write
    // lands on a shared cell the connection sweep below sees the same graph.
    {
        let grid: &PixelGrid = current_grid;
        layer_lines.par_iter().enumerate().for_each(|(lidx, line)| {
            grid.distribute_edge(line.a, line.b, line_to_island[lidx]);
        });
    }

    // Compare the rasters: every pixel occupied on both layers feeds the
    // connection edge between the two islands.
    let pixel_area = current_grid.pixel_area();
    for x in 0..current_grid.pixel_count().x {
        for y in 0..current_grid.pixel_count().y {
            let coords = Vec2i::new(x, y);
            let current = current_grid.get_pixel(coords);
            let previous = prev_grid.get_pixel(coords);
            if current != NULL_ISLAND && previous != NULL_ISLAND {
                let center = current_grid.get_pixel_center(coords);
                let connection = result.islands[current]
                    .connected_islands
                    .entry(previous)
                    .or_default();
                connection.area += pixel_area;
                connection.centroid_accumulator += center.to_3d(result.layer_z) * pixel_area;
                connection.second_moment_of_area_accumulator +=
                    center.component_mul(center) * pixel_area;
            }
        }
    }

    result
}
