//! Extrusion flow parameters.
//!
//! Converts desired extrusion dimensions (width, height) into the material
//! quantities the analysis needs: the centerline spacing and the volumetric
//! flow in mm³ per mm of travel.
//!
//! Extruded plastic forms approximately a rectangle with semicircular ends
//! (a stadium), so the cross-sectional area is
//!
//! ```text
//! area = height × (width − height × (1 − π/4))
//! ```
//!
//! and not simply `width × height`, which would be off by 10–15%.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Flow role: which configured width applies to an extrusion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowRole {
    ExternalPerimeter,
    Perimeter,
    Infill,
    SolidInfill,
    TopSolidInfill,
}

/// Flow parameters for one extrusion role.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// Extrusion width (mm), the maximum width of the stadium.
    width: f32,
    /// Extrusion height (mm), the layer height.
    height: f32,
}

impl Flow {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.height
    }

    /// Centerline spacing producing proper overlap between adjacent threads.
    pub fn spacing(&self) -> f32 {
        self.width - self.height * (1.0 - PI / 4.0)
    }

    /// Volumetric flow: cross-sectional stadium area, mm³ per mm of travel.
    pub fn mm3_per_mm(&self) -> f32 {
        self.height * (self.width - self.height * (1.0 - PI / 4.0))
    }
}

/// The per-region flow table: one [`Flow`] per role.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionFlows {
    pub external_perimeter: Flow,
    pub perimeter: Flow,
    pub infill: Flow,
    pub solid_infill: Flow,
    pub top_solid_infill: Flow,
}

impl RegionFlows {
    /// Same flow for every role; the common case for test objects and
    /// single-extruder profiles.
    pub fn uniform(flow: Flow) -> Self {
        Self {
            external_perimeter: flow,
            perimeter: flow,
            infill: flow,
            solid_infill: flow,
            top_solid_infill: flow,
        }
    }

    pub fn flow(&self, role: FlowRole) -> Flow {
        match role {
            FlowRole::ExternalPerimeter => self.external_perimeter,
            FlowRole::Perimeter => self.perimeter,
            FlowRole::Infill => self.infill,
            FlowRole::SolidInfill => self.solid_infill,
            FlowRole::TopSolidInfill => self.top_solid_infill,
        }
    }
}
