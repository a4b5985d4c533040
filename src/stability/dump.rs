//! Diagnostic OBJ dumps: point clouds a mesh viewer can overlay on the
//! sliced object. Content is diagnostic only; no exact format is promised.

use crate::extrusion::ExtrusionLine;
use crate::grid::{PixelGrid, NULL_ISLAND};
use crate::stability::Issues;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure writing a diagnostic dump. Callers log and carry on; dumps never
/// affect the analysis result.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("failed to write debug dump: {0}")]
    Io(#[from] std::io::Error),
}

/// Where dump files land: the system temp directory.
pub fn debug_out_path(file_name: &str) -> PathBuf {
    std::env::temp_dir().join(file_name)
}

/// Map a value in `[min, max]` to a crude blue→green→red ramp.
fn value_to_rgb(min: f32, max: f32, value: f32) -> (f32, f32, f32) {
    let t = if max > min {
        ((value - min) / (max - min)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    if t < 0.5 {
        (0.0, 2.0 * t, 1.0 - 2.0 * t)
    } else {
        (2.0 * t - 1.0, 2.0 - 2.0 * t, 0.0)
    }
}

/// Dump all support points as a magenta point cloud.
pub fn write_support_points_obj(path: &Path, issues: &Issues) -> Result<(), DumpError> {
    let mut out = BufWriter::new(File::create(path)?);
    for sp in &issues.support_points {
        writeln!(
            out,
            "v {} {} {}  1.0 0.0 1.0",
            sp.position.x, sp.position.y, sp.position.z
        )?;
    }
    Ok(())
}

/// Dump one layer's raster as island-colored pixels at the layer's z.
pub fn write_segmentation_obj(path: &Path, grid: &PixelGrid, layer_z: f32) -> Result<(), DumpError> {
    let mut out = BufWriter::new(File::create(path)?);
    for x in 0..grid.pixel_count().x {
        for y in 0..grid.pixel_count().y {
            let coords = crate::geometry::Vec2i::new(x, y);
            let island_idx = grid.get_pixel(coords);
            if island_idx == NULL_ISLAND {
                continue;
            }
            let pos = grid.get_pixel_center(coords);
            // Scramble the island index so neighboring islands get distant hues.
            let pseudornd = ((island_idx + 127) * 33331 + 6907) % 23;
            let (r, g, b) = value_to_rgb(0.0, 23.0, pseudornd as f32);
            writeln!(out, "v {} {} {}  {r} {g} {b}", pos.x, pos.y, layer_z)?;
        }
    }
    Ok(())
}

/// Dump the endpoints of malformed lines, colored by malformation score.
pub fn write_malformations_obj(
    path: &Path,
    lines: &[ExtrusionLine],
    layer_z: f32,
) -> Result<(), DumpError> {
    let mut out = BufWriter::new(File::create(path)?);
    for line in lines {
        if line.malformation > 0.0 {
            let (r, g, b) = value_to_rgb(0.0, 1.0, line.malformation);
            writeln!(out, "v {} {} {}  {r} {g} {b}", line.b.x, line.b.y, layer_z)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vec3f;
    use crate::stability::SupportPoint;

    #[test]
    fn test_support_point_dump_roundtrip() {
        let issues = Issues {
            support_points: vec![SupportPoint::new(
                Vec3f::new(1.0, 2.0, 3.0),
                0.5,
                Vec3f::new(0.0, 0.0, -1.0),
            )],
        };
        let path = debug_out_path("support_spots_dump_test.obj");
        write_support_points_obj(&path, &issues).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("v 1 2 3"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_color_ramp_endpoints() {
        assert_eq!(value_to_rgb(0.0, 1.0, 0.0), (0.0, 0.0, 1.0));
        assert_eq!(value_to_rgb(0.0, 1.0, 1.0), (1.0, 0.0, 0.0));
    }
}
