//! # support-spots
//!
//! Auto-support analyzer for layer-by-layer additive manufacturing (FDM/FFF).
//!
//! Given a sliced object (a stack of planar layers, each containing extrusion
//! paths: perimeters and infill), the analyzer decides where additional
//! support material must be anchored so that:
//!
//! - freshly deposited extrusions do not sag or flap in mid-air, and
//! - the partially built part, viewed as a rigid body rooted at the build
//!   plate, does not tip, twist or peel off under gravity and extruder-head
//!   forces.
//!
//! Two coupled analyses run over the layer stack:
//!
//! 1. **Local stability**: per-layer inspection of each extrusion segment.
//!    Segments far from any supporting feature on the layer below are
//!    bridging; sustained bridging combined with curvature is anchored with a
//!    support point. A running malformation score tracks cumulative shape
//!    degradation and propagates upward.
//! 2. **Global stability**: a layered island/part graph is built from the
//!    layers. Each connected part is modeled as a body with accumulated mass,
//!    a bed-anchor footprint and a weakest connection to the substrate below.
//!    While each outermost line of a layer is hypothetically extruded, a
//!    moment balance is computed; a positive net destabilizing torque plants
//!    a support point at a pivot-adjacent site.
//!
//! The analyzer is a conservative heuristic, not an optimizer: it never
//! computes support geometry and does not guarantee a minimal support count.
//!
//! # Example
//!
//! ```ignore
//! use support_spots::{full_search, Params, PrintObject};
//!
//! let object: PrintObject = build_sliced_object();
//! let issues = full_search(&object, &Params::default());
//! for sp in &issues.support_points {
//!     println!("support at {:?} (force {})", sp.position, sp.force);
//! }
//! ```

pub mod extrusion;
pub mod flow;
pub mod geometry;
pub mod grid;
pub mod object;
pub mod stability;

/// Tolerance for near-zero area/volume guards in accumulator consumers.
///
/// Any divide by an accumulated area or volume must check against this first;
/// the consumer then yields a conservative "stable" verdict instead.
pub const EPSILON: f32 = 1e-4;

pub use extrusion::{EntityId, ExtrusionEntity, ExtrusionLine, ExtrusionPath, ExtrusionRole};
pub use flow::{Flow, FlowRole, RegionFlows};
pub use geometry::{Vec2f, Vec3f};
pub use object::{Layer, LayerRegion, PrintObject};
pub use stability::{full_search, full_search_cancellable, quick_search, Issues, Params, SupportPoint};
