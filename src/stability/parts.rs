//! Object parts: connected components of islands across layers, treated as
//! rigid bodies, plus the closed-form torque balance deciding whether a part
//! stays put while a line is extruded onto it.

use crate::extrusion::ExtrusionLine;
use crate::geometry::{distance_to_infinite_line, Vec2f, Vec3f};
use crate::stability::islands::{Island, IslandConnection};
use crate::stability::Params;
use crate::EPSILON;
use hashbrown::HashMap;
use tracing::trace;

/// Crude area-weighted bending-resistance proxy of an anchor footprint,
/// projected against the push direction.
fn elastic_section_modulus(
    centroid_accumulator: Vec3f,
    second_moment_of_area_accumulator: Vec2f,
    area: f32,
    line_dir: Vec2f,
) -> f32 {
    let centroid = centroid_accumulator / area;
    let mut variance =
        second_moment_of_area_accumulator / area - centroid.xy().component_mul(centroid.xy());
    variance = variance.component_mul(line_dir.abs());
    let extreme_fiber_dist = variance.component_sqrt().norm();
    if extreme_fiber_dist < EPSILON {
        return 0.0;
    }
    area * (variance.x + variance.y) / extreme_fiber_dist
}

/// A rigid body: the moment bundle of an island without the graph edges.
/// Closed under [`add`](ObjectPart::add); parts grow by absorbing islands
/// and other parts as layers accumulate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ObjectPart {
    pub volume: f32,
    pub volume_centroid_accumulator: Vec3f,
    pub sticking_area: f32,
    pub sticking_centroid_accumulator: Vec3f,
    pub sticking_second_moment_of_area_accumulator: Vec2f,
}

impl ObjectPart {
    pub fn from_island(island: &Island) -> Self {
        Self {
            volume: island.volume,
            volume_centroid_accumulator: island.volume_centroid_accumulator,
            sticking_area: island.sticking_area,
            sticking_centroid_accumulator: island.sticking_centroid_accumulator,
            sticking_second_moment_of_area_accumulator: island
                .sticking_second_moment_of_area_accumulator,
        }
    }

    pub fn add(&mut self, other: &ObjectPart) {
        self.volume += other.volume;
        self.volume_centroid_accumulator += other.volume_centroid_accumulator;
        self.sticking_area += other.sticking_area;
        self.sticking_centroid_accumulator += other.sticking_centroid_accumulator;
        self.sticking_second_moment_of_area_accumulator +=
            other.sticking_second_moment_of_area_accumulator;
    }

    /// Inject a point-sized footprint into the anchor moments.
    pub fn add_support_point(&mut self, position: Vec3f, sticking_area: f32) {
        self.sticking_area += sticking_area;
        self.sticking_centroid_accumulator += position * sticking_area;
        self.sticking_second_moment_of_area_accumulator +=
            position.xy().component_mul(position.xy()) * sticking_area;
    }

    /// Torque balance while hypothetically extruding `extruded_line` onto
    /// this part.
    ///
    /// Returns a nonnegative instability force estimate: 0 means stable,
    /// positive means a support is required and the magnitude ranks the
    /// severity. Checked twice: about the bed anchor footprint, then about
    /// the weakest inter-layer connection on the path back to the bed. A
    /// part with no anchor at all (or a connection with no area) is freshly
    /// hanging and yields 1.0 outright.
    pub fn is_stable_while_extruding(
        &self,
        connection: &IslandConnection,
        extruded_line: &ExtrusionLine,
        layer_z: f32,
        params: &Params,
    ) -> f32 {
        let line_dir = (extruded_line.b - extruded_line.a).normalized();

        let mass_centroid = self.volume_centroid_accumulator / self.volume;
        let mass = self.volume * params.filament_density;
        let weight = mass * params.gravity_constant;
        let movement_force = params.max_acceleration * mass;

        // Malformed extrusions push the nozzle partly downward and conflict
        // harder with the already-printed part.
        let extruder_pressure_direction = line_dir
            .to_3d(-extruded_line.malformation * 0.5)
            .normalized();
        let endpoint = extruded_line.b.to_3d(layer_z);
        let extruder_conflict_force = params.standard_extruder_conflict_force
            + extruded_line.malformation.min(1.0)
                * params.malformations_additive_conflict_extruder_force;

        // Balance about the bed anchor.
        {
            if self.sticking_area < EPSILON {
                return 1.0;
            }
            let bed_centroid = self.sticking_centroid_accumulator / self.sticking_area;
            let bed_yield_torque = elastic_section_modulus(
                self.sticking_centroid_accumulator,
                self.sticking_second_moment_of_area_accumulator,
                self.sticking_area,
                line_dir,
            ) * params.bed_adhesion_yield_strength;

            let bed_weight_arm = (bed_centroid.xy() - mass_centroid.xy()).norm();
            let bed_weight_torque = bed_weight_arm * weight;

            let bed_movement_arm = (mass_centroid.z - bed_centroid.z).max(0.0);
            let bed_movement_torque = movement_force * bed_movement_arm;

            let bed_conflict_torque_arm =
                distance_to_infinite_line(endpoint, extruder_pressure_direction, bed_centroid);
            let bed_extruder_conflict_torque = extruder_conflict_force * bed_conflict_torque_arm;

            let bed_total_torque =
                bed_movement_torque + bed_extruder_conflict_torque + bed_weight_torque
                    - bed_yield_torque;

            trace!(
                bed_yield_torque,
                bed_weight_arm,
                bed_weight_torque,
                bed_movement_arm,
                bed_movement_torque,
                bed_conflict_torque_arm,
                bed_extruder_conflict_torque,
                bed_total_torque,
                layer_z,
                "bed stability"
            );

            if bed_total_torque > 0.0 {
                return bed_total_torque / bed_conflict_torque_arm;
            }
        }

        // Balance about the weakest inter-layer connection.
        {
            if connection.area < EPSILON {
                return 1.0;
            }
            let conn_centroid = connection.centroid_accumulator / connection.area;
            let conn_yield_torque = elastic_section_modulus(
                connection.centroid_accumulator,
                connection.second_moment_of_area_accumulator,
                connection.area,
                line_dir,
            ) * params.material_yield_strength;

            let conn_weight_arm = (conn_centroid.xy() - mass_centroid.xy()).norm();
            // Only the mass above the connection actually loads it.
            let conn_weight_torque = conn_weight_arm * weight * (conn_centroid.z / layer_z);

            let conn_movement_arm = (mass_centroid.z - conn_centroid.z).max(0.0);
            let conn_movement_torque = movement_force * conn_movement_arm;

            let conn_conflict_torque_arm =
                distance_to_infinite_line(endpoint, extruder_pressure_direction, conn_centroid);
            let conn_extruder_conflict_torque = extruder_conflict_force * conn_conflict_torque_arm;

            let conn_total_torque =
                conn_movement_torque + conn_extruder_conflict_torque + conn_weight_torque
                    - conn_yield_torque;

            trace!(
                conn_yield_torque,
                conn_weight_arm,
                conn_weight_torque,
                conn_movement_arm,
                conn_movement_torque,
                conn_conflict_torque_arm,
                conn_extruder_conflict_torque,
                conn_total_torque,
                layer_z,
                "connection stability"
            );

            conn_total_torque / conn_conflict_torque_arm
        }
    }
}

/// Disjoint set of the parts alive at the current layer. Payloads live on
/// the representative only; merging adds the loser into the winner and
/// drops the loser's payload.
#[derive(Debug, Default)]
pub struct ActiveObjectParts {
    next_part_idx: usize,
    active_object_parts: HashMap<usize, ObjectPart>,
    id_mapping: HashMap<usize, usize>,
}

impl ActiveObjectParts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh part from an emerging island, returning its id.
    pub fn insert(&mut self, island: &Island) -> usize {
        let id = self.next_part_idx;
        self.next_part_idx += 1;
        self.active_object_parts
            .insert(id, ObjectPart::from_island(island));
        self.id_mapping.insert(id, id);
        id
    }

    /// Resolve an id to its current representative, compressing the path.
    pub fn find(&mut self, id: usize) -> usize {
        let mut root = self.id_mapping[&id];
        while root != self.id_mapping[&root] {
            root = self.id_mapping[&root];
        }
        // Second pass: point the whole chain at the root. Chains get long in
        // tall prints, so compression is mandatory, not an optimization.
        let mut current = id;
        while root != self.id_mapping[&current] {
            let next = self.id_mapping[&current];
            self.id_mapping.insert(current, root);
            current = next;
        }
        root
    }

    /// The payload of the representative of `id`.
    pub fn access(&mut self, id: usize) -> &mut ObjectPart {
        let root = self.find(id);
        self.active_object_parts
            .get_mut(&root)
            .unwrap_or_else(|| unreachable!("representative {root} has no payload"))
    }

    /// Dissolve `from` into `to`.
    pub fn merge(&mut self, from: usize, to: usize) {
        let to_root = self.find(to);
        let from_root = self.find(from);
        if to_root == from_root {
            return;
        }
        if let Some(absorbed) = self.active_object_parts.remove(&from_root) {
            self.access(to_root).add(&absorbed);
        }
        self.id_mapping.insert(from_root, to_root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extrusion::EntityId;
    use approx::assert_relative_eq;

    fn island_with_volume(volume: f32) -> Island {
        Island {
            volume,
            volume_centroid_accumulator: Vec3f::new(0.0, 0.0, 0.1) * volume,
            ..Island::default()
        }
    }

    #[test]
    fn test_find_is_idempotent() {
        let mut parts = ActiveObjectParts::new();
        let a = parts.insert(&island_with_volume(1.0));
        let b = parts.insert(&island_with_volume(2.0));
        parts.merge(a, b);
        let root = parts.find(a);
        assert_eq!(parts.find(root), root);
        assert_eq!(parts.find(a), parts.find(b));
    }

    #[test]
    fn test_merge_sums_payloads() {
        let mut parts = ActiveObjectParts::new();
        let a = parts.insert(&island_with_volume(1.0));
        let b = parts.insert(&island_with_volume(2.5));
        parts.merge(a, b);
        assert_relative_eq!(parts.access(a).volume, 3.5);
        assert_relative_eq!(parts.access(b).volume, 3.5);
    }

    #[test]
    fn test_path_compression_through_chain() {
        let mut parts = ActiveObjectParts::new();
        let ids: Vec<usize> = (0..6)
            .map(|i| parts.insert(&island_with_volume(i as f32 + 1.0)))
            .collect();
        // Chain the parts one into the next.
        for pair in ids.windows(2) {
            parts.merge(pair[0], pair[1]);
        }
        let root = parts.find(ids[0]);
        for &id in &ids {
            assert_eq!(parts.find(id), root);
        }
        assert_relative_eq!(parts.access(ids[0]).volume, 21.0);
    }

    #[test]
    fn test_part_add_is_commutative() {
        let mut a = ObjectPart {
            volume: 1.0,
            volume_centroid_accumulator: Vec3f::new(1.0, 0.0, 0.5),
            sticking_area: 2.0,
            sticking_centroid_accumulator: Vec3f::new(2.0, 0.0, 0.0),
            sticking_second_moment_of_area_accumulator: Vec2f::new(4.0, 0.0),
        };
        let mut b = ObjectPart {
            volume: 3.0,
            volume_centroid_accumulator: Vec3f::new(0.0, 3.0, 1.5),
            sticking_area: 1.0,
            sticking_centroid_accumulator: Vec3f::new(0.0, 1.0, 0.0),
            sticking_second_moment_of_area_accumulator: Vec2f::new(0.0, 1.0),
        };
        let (a0, b0) = (a, b);
        a.add(&b0);
        b.add(&a0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unanchored_part_is_flagged() {
        let part = ObjectPart {
            volume: 1.0,
            volume_centroid_accumulator: Vec3f::new(0.0, 0.0, 1.0),
            ..ObjectPart::default()
        };
        let line = ExtrusionLine::new(Vec2f::ZERO, Vec2f::new(1.0, 0.0), EntityId(0));
        let force = part.is_stable_while_extruding(
            &IslandConnection::default(),
            &line,
            2.0,
            &Params::default(),
        );
        assert_relative_eq!(force, 1.0);
    }

    #[test]
    fn test_zero_variance_footprint_has_no_yield() {
        // A point-like anchor cannot resist any torque.
        let modulus = elastic_section_modulus(
            Vec3f::new(5.0, 0.0, 0.0) * 4.0,
            Vec2f::new(25.0, 0.0) * 4.0,
            4.0,
            Vec2f::new(1.0, 0.0),
        );
        assert_eq!(modulus, 0.0);
    }

    #[test]
    fn test_spread_footprint_yields() {
        // Two pads symmetric about x = 0 have real variance along x.
        let area = 2.0;
        let centroid_accum = Vec3f::ZERO; // centroid at origin
        let second_moment = Vec2f::new(2.0 * 25.0, 0.0); // pads at x = ±5
        let modulus =
            elastic_section_modulus(centroid_accum, second_moment, area, Vec2f::new(1.0, 0.0));
        assert!(modulus > 0.0);
    }

    #[test]
    fn test_well_anchored_plate_is_stable() {
        // A wide, flat, well-stuck plate: yield torque dwarfs the loads.
        let area = 400.0;
        let part = ObjectPart {
            volume: 20.0,
            volume_centroid_accumulator: Vec3f::new(0.0, 0.0, 0.1) * 20.0,
            sticking_area: area,
            sticking_centroid_accumulator: Vec3f::new(0.0, 0.0, 0.2) * area,
            // Uniform square footprint 20×20: E[x²] = a²/12 ≈ 33.3 per axis.
            sticking_second_moment_of_area_accumulator: Vec2f::new(33.3, 33.3) * area,
        };
        let line = ExtrusionLine::new(Vec2f::new(-1.0, 0.0), Vec2f::new(1.0, 0.0), EntityId(0));
        let connection = IslandConnection {
            area,
            centroid_accumulator: Vec3f::new(0.0, 0.0, 0.2) * area,
            second_moment_of_area_accumulator: Vec2f::new(33.3, 33.3) * area,
        };
        let force = part.is_stable_while_extruding(&connection, &line, 0.4, &Params::default());
        assert!(force <= 0.0, "expected stable, got force {force}");
    }
}
