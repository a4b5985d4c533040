//! Support-spot analysis: decides where support material must be anchored.
//!
//! Two passes run over the sliced object:
//!
//! - the **local pass** ([`local`]) walks every perimeter (and gap-fill /
//!   bridge-infill) path of every layer against the lines of the layer below,
//!   anchoring sustained bridges and tracking malformation;
//! - the **global pass** ([`global`]) builds a layered island/part graph
//!   ([`islands`], [`parts`]) and runs a rigid-body torque balance per
//!   outermost line, planting supports where the balance goes unstable.
//!
//! The pipeline is sequential across layers (each layer's island graph
//! depends on the previous raster) while rasterization within a layer is
//! data parallel. For a fixed input the output support-point sequence is
//! deterministic.
//!
//! The analyzer never fails: every degenerate input (empty object, empty
//! layer, zero-length segment) is quietly tolerated and the outcome is always
//! a, possibly empty, list of support points.

pub mod distancer;
#[cfg(feature = "debug-dumps")]
pub mod dump;
pub mod global;
pub mod islands;
pub mod local;
pub mod parts;

use crate::extrusion::{EntityTable, ExtrusionEntity, ExtrusionLine, ExtrusionRole};
use crate::flow::{FlowRole, RegionFlows};
use crate::geometry::Vec3f;
use crate::grid::{PixelGrid, SupportGridFilter};
use crate::object::PrintObject;
use distancer::LinesDistancer;
use global::check_global_stability;
use islands::{reckon_islands, LayerIslands};
use local::check_entity_stability;
use serde::{Deserialize, Serialize};
use std::mem;
use tracing::debug;

/// Tuning knobs of the analysis. All lengths in mm, masses in g, forces in
/// the implied g·mm/s² unit system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Maximum unsupported distance an extrusion may travel before a support
    /// is anchored; also the re-sampling cadence of the local analysis.
    pub bridge_distance: f32,
    /// How strongly accumulated curvature shortens the tolerable bridge
    /// distance: the threshold becomes
    /// `bridge_distance / (1 + max_curvature · factor / π)`.
    pub bridge_distance_decrease_by_curvature_factor: f32,
    /// Spacing gate of the global pass: external lines closer than this to
    /// the previous checked spot are skipped (unless malformed).
    pub min_distance_between_support_points: f32,
    /// Radius of the disk footprint a planted support contributes to the
    /// part's anchor moments.
    pub support_points_interface_radius: f32,
    /// Filament density, g/mm³.
    pub filament_density: f32,
    /// Gravitational acceleration.
    pub gravity_constant: f32,
    /// Worst-case print-move acceleration, mm/s².
    pub max_acceleration: f32,
    /// Nominal force the extruder tip exerts on the part while printing.
    pub standard_extruder_conflict_force: f32,
    /// Extra conflict force added in full for malformation ≥ 1.
    pub malformations_additive_conflict_extruder_force: f32,
    /// Yield strength of the first-layer bed adhesion.
    pub bed_adhesion_yield_strength: f32,
    /// Yield strength of an inter-layer material joint.
    pub material_yield_strength: f32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            bridge_distance: 2.0,
            bridge_distance_decrease_by_curvature_factor: 5.0,
            min_distance_between_support_points: 1.0,
            support_points_interface_radius: 0.6,
            filament_density: 1.25e-3,
            gravity_constant: 9.81,
            max_acceleration: 1000.0,
            standard_extruder_conflict_force: 10.0,
            malformations_additive_conflict_extruder_force: 5.0,
            bed_adhesion_yield_strength: 0.018,
            material_yield_strength: 0.008,
        }
    }
}

/// A place where support material must be anchored.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupportPoint {
    pub position: Vec3f,
    /// Instability force estimate; 0 for supports anchoring local bridges,
    /// positive (useful for ranking) for global stability supports.
    pub force: f32,
    /// Direction of the destabilizing push: straight down for bridges, the
    /// extrusion direction for global supports.
    pub direction: Vec3f,
}

impl SupportPoint {
    pub fn new(position: Vec3f, force: f32, direction: Vec3f) -> Self {
        Self {
            position,
            force,
            direction,
        }
    }
}

/// Everything the analysis found. Ordering is deterministic: global supports
/// first, then local ones, each in layer order then entity order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Issues {
    pub support_points: Vec<SupportPoint>,
}

/// Flow width applicable to an extrusion of the given role.
///
/// Bridge infill is laid at external-perimeter flow; gap fill and internal
/// infill use the infill flow; anything unclassified falls back to perimeter
/// flow.
pub(crate) fn flow_width_for_role(flows: &RegionFlows, role: ExtrusionRole) -> f32 {
    let flow_role = match role {
        ExtrusionRole::BridgeInfill => FlowRole::ExternalPerimeter,
        ExtrusionRole::ExternalPerimeter => FlowRole::ExternalPerimeter,
        ExtrusionRole::GapFill => FlowRole::Infill,
        ExtrusionRole::Perimeter => FlowRole::Perimeter,
        ExtrusionRole::SolidInfill => FlowRole::SolidInfill,
        ExtrusionRole::InternalInfill => FlowRole::Infill,
        ExtrusionRole::TopSolidInfill => FlowRole::TopSolidInfill,
        _ => FlowRole::Perimeter,
    };
    flows.flow(flow_role).width()
}

/// Flatten an entity into raw vertex-pair lines, registering each contained
/// path in the table. Loops get their closing segment when `close_loops` is
/// set (perimeters on the base layer).
fn flatten_paths(
    entity: &ExtrusionEntity,
    table: &mut EntityTable,
    lines_out: &mut Vec<ExtrusionLine>,
    close_loops: bool,
) {
    entity.for_each_path(&mut |path| {
        if path.points.len() < 2 {
            return;
        }
        let id = table.register(path.role, path.mm3_per_mm);
        for pair in path.points.windows(2) {
            lines_out.push(ExtrusionLine::new(pair[0], pair[1], id));
        }
        if close_loops && path.closed {
            let first = path.points[0];
            let last = path.points[path.points.len() - 1];
            lines_out.push(ExtrusionLine::new(last, first, id));
        }
    });
}

/// Route a fill entity: gap fill and bridge infill get the full local
/// stability treatment, everything else feeds raw lines into the reckoner.
#[allow(clippy::too_many_arguments)]
fn dispatch_fill(
    entity: &ExtrusionEntity,
    table: &mut EntityTable,
    layer_lines: &mut Vec<ExtrusionLine>,
    layer_z: f32,
    flows: &RegionFlows,
    prev_layer_lines: &LinesDistancer,
    issues: &mut Issues,
    params: &Params,
) {
    match entity {
        ExtrusionEntity::Collection(children) => {
            for child in children {
                dispatch_fill(
                    child,
                    table,
                    layer_lines,
                    layer_z,
                    flows,
                    prev_layer_lines,
                    issues,
                    params,
                );
            }
        }
        ExtrusionEntity::Path(path) => match path.role {
            ExtrusionRole::GapFill | ExtrusionRole::BridgeInfill => check_entity_stability(
                entity,
                table,
                layer_lines,
                layer_z,
                flows,
                prev_layer_lines,
                issues,
                params,
            ),
            _ => flatten_paths(entity, table, layer_lines, false),
        },
    }
}

/// Run the local pass over all layers and build the layered island graph.
///
/// Returns the local issues (bridging supports) and the graph the global
/// pass consumes. `interrupt` is polled at layer boundaries; when it returns
/// true the walk stops and the partial results are returned.
pub fn check_extrusions_and_build_graph<F: Fn() -> bool>(
    object: &PrintObject,
    params: &Params,
    interrupt: F,
) -> (Issues, Vec<LayerIslands>) {
    let mut issues = Issues::default();
    let mut islands_graph: Vec<LayerIslands> = Vec::new();

    if object.layer_count() == 0 {
        return (issues, islands_graph);
    }
    // The raster resolution follows the widest structural extrusion.
    let Some(flow_width) = object
        .layers()
        .iter()
        .rev()
        .find_map(|l| l.regions.first())
        .map(|r| r.flows.flow(FlowRole::ExternalPerimeter).width())
    else {
        return (issues, islands_graph);
    };
    if flow_width <= 0.0 {
        return (issues, islands_graph);
    }

    let mut layer_lines: Vec<ExtrusionLine> = Vec::new();
    let mut table = EntityTable::new();
    let mut prev_grid = PixelGrid::new(object, flow_width);
    let mut current_grid = PixelGrid::new(object, flow_width);

    // Base layer: everything lands on the bed, so no local analysis; all
    // lines (perimeter loops closed) feed the reckoner directly.
    let layer = &object.layers()[0];
    for region in &layer.regions {
        for entity in &region.perimeters {
            flatten_paths(entity, &mut table, &mut layer_lines, true);
        }
        for entity in &region.fills {
            flatten_paths(entity, &mut table, &mut layer_lines, false);
        }
    }
    let layer_islands = reckon_islands(
        layer,
        true,
        &prev_grid,
        &mut current_grid,
        &layer_lines,
        &table,
    );
    debug!(
        layer = 0,
        islands = layer_islands.islands.len(),
        "reckoned base layer"
    );
    islands_graph.push(layer_islands);
    let mut prev_layer_lines = LinesDistancer::new(mem::take(&mut layer_lines));
    mem::swap(&mut prev_grid, &mut current_grid);

    for layer_idx in 1..object.layer_count() {
        if interrupt() {
            debug!(layer = layer_idx, "analysis interrupted, returning partial results");
            return (issues, islands_graph);
        }
        table.clear();
        let layer = &object.layers()[layer_idx];
        for region in &layer.regions {
            for entity in &region.perimeters {
                check_entity_stability(
                    entity,
                    &mut table,
                    &mut layer_lines,
                    layer.slice_z,
                    &region.flows,
                    &prev_layer_lines,
                    &mut issues,
                    params,
                );
            }
            for entity in &region.fills {
                dispatch_fill(
                    entity,
                    &mut table,
                    &mut layer_lines,
                    layer.slice_z,
                    &region.flows,
                    &prev_layer_lines,
                    &mut issues,
                    params,
                );
            }
        }
        let layer_islands = reckon_islands(
            layer,
            false,
            &prev_grid,
            &mut current_grid,
            &layer_lines,
            &table,
        );
        debug!(
            layer = layer_idx,
            islands = layer_islands.islands.len(),
            "reckoned layer"
        );
        islands_graph.push(layer_islands);
        prev_layer_lines = LinesDistancer::new(mem::take(&mut layer_lines));
        mem::swap(&mut prev_grid, &mut current_grid);
    }

    (issues, islands_graph)
}

/// Run the full analysis: local pass, island graph, global pass.
///
/// The returned support points hold the global (part stability) points
/// first, followed by the local (bridging) points.
pub fn full_search(object: &PrintObject, params: &Params) -> Issues {
    full_search_cancellable(object, params, || false)
}

/// [`full_search`] with a cooperative cancellation probe, polled between
/// layers; on interruption the partial issue list gathered so far is
/// returned.
pub fn full_search_cancellable<F: Fn() -> bool>(
    object: &PrintObject,
    params: &Params,
    interrupt: F,
) -> Issues {
    let (local_issues, islands_graph) = check_extrusions_and_build_graph(object, params, interrupt);
    let presence_grid = SupportGridFilter::new(object, params.min_distance_between_support_points);
    let mut issues = check_global_stability(presence_grid, &islands_graph, params);

    #[cfg(feature = "debug-dumps")]
    {
        if let Err(err) = dump::write_support_points_obj(
            &dump::debug_out_path("local_issues_supports.obj"),
            &local_issues,
        ) {
            tracing::warn!("debug dump failed: {err}");
        }
        if let Err(err) =
            dump::write_support_points_obj(&dump::debug_out_path("global_issues_supports.obj"), &issues)
        {
            tracing::warn!("debug dump failed: {err}");
        }
    }

    issues.support_points.extend(local_issues.support_points);
    issues
}

/// Fast, possibly empty, screen for support-needing layers.
///
/// The contract allows an empty answer; the current implementation always
/// returns one.
pub fn quick_search(_object: &PrintObject, _params: &Params) -> Vec<usize> {
    Vec::new()
}
