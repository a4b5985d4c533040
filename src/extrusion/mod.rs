//! Extrusion data model: roles, paths, entities and the per-layer flattened
//! line representation the analyzer works on.
//!
//! The analyzer never keeps references back into the caller's entity tree.
//! When a layer is flattened, every concrete path is registered in an
//! [`EntityTable`] and receives an opaque [`EntityId`]; the flattened
//! [`ExtrusionLine`]s carry only that handle. Role and flow lookups go
//! through the table, and equality of consecutive handles is what groups
//! lines back into connected paths.

use crate::geometry::{Segment2, Vec2f};
use serde::{Deserialize, Serialize};

/// Role of an extrusion, mirroring the slicing front end's classification.
///
/// Only `ExternalPerimeter` participates in island seeding; the other roles
/// matter for flow-width selection and for deciding which entities get the
/// local stability treatment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtrusionRole {
    ExternalPerimeter,
    Perimeter,
    OverhangPerimeter,
    BridgeInfill,
    SolidInfill,
    TopSolidInfill,
    InternalInfill,
    GapFill,
    Skirt,
    SupportMaterial,
    /// A collection whose children carry differing roles.
    Mixed,
}

/// Opaque handle to a registered extrusion path.
///
/// Handles are valid only for the layer they were assigned on; the analyzer
/// never compares handles across layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

/// Per-layer registry mapping [`EntityId`] to the path properties the
/// analyzer needs (role and volumetric flow).
#[derive(Clone, Debug, Default)]
pub struct EntityTable {
    roles: Vec<ExtrusionRole>,
    mm3_per_mm: Vec<f32>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path, returning its handle.
    pub fn register(&mut self, role: ExtrusionRole, mm3_per_mm: f32) -> EntityId {
        let id = EntityId(self.roles.len() as u32);
        self.roles.push(role);
        self.mm3_per_mm.push(mm3_per_mm);
        id
    }

    pub fn role(&self, id: EntityId) -> ExtrusionRole {
        self.roles[id.0 as usize]
    }

    pub fn min_mm3_per_mm(&self, id: EntityId) -> f32 {
        self.mm3_per_mm[id.0 as usize]
    }

    /// Drop all registrations; handles from before this call are dead.
    pub fn clear(&mut self) {
        self.roles.clear();
        self.mm3_per_mm.clear();
    }
}

/// An oriented 2D extrusion segment on a layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtrusionLine {
    pub a: Vec2f,
    pub b: Vec2f,
    /// Cached length of `b - a`.
    pub len: f32,
    /// Handle of the originating path.
    pub entity: EntityId,
    /// Set by the local analysis when a bridging support was anchored at `b`.
    pub support_point_generated: bool,
    /// Cumulative shape-degradation score, 0 to roughly 1.
    pub malformation: f32,
}

impl ExtrusionLine {
    pub fn new(a: Vec2f, b: Vec2f, entity: EntityId) -> Self {
        Self {
            a,
            b,
            len: (b - a).norm(),
            entity,
            support_point_generated: false,
            malformation: 0.0,
        }
    }
}

impl Segment2 for ExtrusionLine {
    #[inline]
    fn seg_a(&self) -> Vec2f {
        self.a
    }
    #[inline]
    fn seg_b(&self) -> Vec2f {
        self.b
    }
}

/// A single extrusion path: one polyline printed with one role and flow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtrusionPath {
    pub role: ExtrusionRole,
    /// Path vertices in millimetres.
    pub points: Vec<Vec2f>,
    /// Volumetric flow of this path, mm³ of filament per mm of travel.
    pub mm3_per_mm: f32,
    /// Closed paths are printed as loops; the closing segment from the last
    /// vertex back to the first is implied.
    pub closed: bool,
}

impl ExtrusionPath {
    pub fn new(role: ExtrusionRole, points: Vec<Vec2f>, mm3_per_mm: f32) -> Self {
        Self {
            role,
            points,
            mm3_per_mm,
            closed: false,
        }
    }

    pub fn new_loop(role: ExtrusionRole, points: Vec<Vec2f>, mm3_per_mm: f32) -> Self {
        Self {
            role,
            points,
            mm3_per_mm,
            closed: true,
        }
    }
}

/// An extrusion entity: a concrete path or a nested collection of entities.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ExtrusionEntity {
    Path(ExtrusionPath),
    Collection(Vec<ExtrusionEntity>),
}

impl ExtrusionEntity {
    pub fn is_collection(&self) -> bool {
        matches!(self, ExtrusionEntity::Collection(_))
    }

    pub fn is_loop(&self) -> bool {
        match self {
            ExtrusionEntity::Path(p) => p.closed,
            ExtrusionEntity::Collection(_) => false,
        }
    }

    /// Role of the entity; a collection reports the common role of its
    /// children, or [`ExtrusionRole::Mixed`] when they disagree.
    pub fn role(&self) -> ExtrusionRole {
        match self {
            ExtrusionEntity::Path(p) => p.role,
            ExtrusionEntity::Collection(entities) => {
                let mut role = None;
                for e in entities {
                    let r = e.role();
                    match role {
                        None => role = Some(r),
                        Some(prev) if prev != r => return ExtrusionRole::Mixed,
                        Some(_) => {}
                    }
                }
                role.unwrap_or(ExtrusionRole::Mixed)
            }
        }
    }

    /// Smallest volumetric flow over all contained paths.
    pub fn min_mm3_per_mm(&self) -> f32 {
        match self {
            ExtrusionEntity::Path(p) => p.mm3_per_mm,
            ExtrusionEntity::Collection(entities) => entities
                .iter()
                .map(ExtrusionEntity::min_mm3_per_mm)
                .fold(f32::INFINITY, f32::min),
        }
    }

    /// Append all vertices, depth first.
    pub fn collect_points(&self, out: &mut Vec<Vec2f>) {
        match self {
            ExtrusionEntity::Path(p) => out.extend_from_slice(&p.points),
            ExtrusionEntity::Collection(entities) => {
                for e in entities {
                    e.collect_points(out);
                }
            }
        }
    }

    /// Visit every concrete path, depth first.
    pub fn for_each_path<'a>(&'a self, f: &mut dyn FnMut(&'a ExtrusionPath)) {
        match self {
            ExtrusionEntity::Path(p) => f(p),
            ExtrusionEntity::Collection(entities) => {
                for e in entities {
                    e.for_each_path(f);
                }
            }
        }
    }
}
