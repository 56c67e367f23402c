//! Isosurface extraction by marching cubes.
//!
//! Corners below the isovalue are inside. Triangles are wound so their normals
//! point toward increasing field values, which makes the surface of a signed
//! distance field (negative inside) face outward.

mod tables;

use hashbrown::HashMap;
use nalgebra::Point3;
use tracing::{debug, info};

use crate::error::MeshResult;
use crate::grid::ScalarGrid;
use crate::tracing_ext::OperationTimer;
use crate::{Mesh, Vertex};

use tables::{CORNER_OFFSETS, EDGE_CONNECTIONS, EDGE_TABLE, TRI_TABLE};

/// Parameters for [`marching_cubes`].
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(default))]
pub struct IsosurfaceParams {
    /// Level set to extract.
    pub iso_value: f64,
}

impl Default for IsosurfaceParams {
    fn default() -> Self {
        Self { iso_value: 0.0 }
    }
}

impl IsosurfaceParams {
    /// Extract the level set at `iso_value`.
    pub fn at(iso_value: f64) -> Self {
        Self { iso_value }
    }
}

/// Result of isosurface extraction.
#[derive(Debug, Clone)]
pub struct IsosurfaceResult {
    /// Extracted surface.
    pub mesh: Mesh,

    /// Cells visited.
    pub cell_count: usize,

    /// Cells with corners on both sides of the isovalue.
    pub active_cells: usize,
}

/// Extract the `params.iso_value` level set of `grid` as a triangle mesh.
///
/// Vertices on edges shared by neighbouring cells are emitted once. A grid
/// whose samples are all on one side of the isovalue yields an empty mesh.
pub fn marching_cubes(grid: &ScalarGrid, params: &IsosurfaceParams) -> MeshResult<IsosurfaceResult> {
    grid.validate()?;
    let _timer = OperationTimer::new("marching_cubes");
    let iso = params.iso_value;
    let [nx, ny, nz] = grid.dims;

    let mut mesh = Mesh::new();
    let mut edge_vertices: HashMap<(usize, u8), u32> = HashMap::new();
    let mut active_cells = 0;
    let cell_count = (nx - 1) * (ny - 1) * (nz - 1);

    for z in 0..nz - 1 {
        for y in 0..ny - 1 {
            for x in 0..nx - 1 {
                let mut values = [0.0; 8];
                let mut case = 0usize;
                for (i, [dx, dy, dz]) in CORNER_OFFSETS.iter().enumerate() {
                    values[i] = grid.get(x + dx, y + dy, z + dz);
                    if values[i] < iso {
                        case |= 1 << i;
                    }
                }
                let crossed = EDGE_TABLE[case];
                if crossed == 0 {
                    continue;
                }
                active_cells += 1;

                let mut cell_vertices = [0u32; 12];
                for (e, &[c0, c1]) in EDGE_CONNECTIONS.iter().enumerate() {
                    if crossed & (1 << e) == 0 {
                        continue;
                    }
                    // Orient every edge from its lower corner so shared edges agree.
                    let (lo, hi) = if CORNER_OFFSETS[c0] <= CORNER_OFFSETS[c1] {
                        (c0, c1)
                    } else {
                        (c1, c0)
                    };
                    let [lx, ly, lz] = CORNER_OFFSETS[lo];
                    let [hx, hy, hz] = CORNER_OFFSETS[hi];
                    let axis = if hx != lx {
                        0u8
                    } else if hy != ly {
                        1
                    } else {
                        2
                    };
                    let key = (grid.linearize(x + lx, y + ly, z + lz), axis);
                    cell_vertices[e] = *edge_vertices.entry(key).or_insert_with(|| {
                        let p = interpolate(
                            &grid.point(x + lx, y + ly, z + lz),
                            &grid.point(x + hx, y + hy, z + hz),
                            values[lo],
                            values[hi],
                            iso,
                        );
                        mesh.vertices.push(Vertex::new(p));
                        (mesh.vertices.len() - 1) as u32
                    });
                }

                for tri in TRI_TABLE[case].chunks_exact(3) {
                    if tri[0] < 0 {
                        break;
                    }
                    let a = cell_vertices[tri[0] as usize];
                    let b = cell_vertices[tri[1] as usize];
                    let c = cell_vertices[tri[2] as usize];
                    if a == b || b == c || a == c {
                        continue;
                    }
                    mesh.faces.push([a, c, b]);
                }
            }
        }
    }

    debug!(cell_count, active_cells, "Marching cubes sweep finished");
    info!(
        iso_value = iso,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Isosurface extracted"
    );

    Ok(IsosurfaceResult {
        mesh,
        cell_count,
        active_cells,
    })
}

/// Point where the field crosses `iso` on the segment `p0..p1`.
///
/// Falls back to the midpoint when the end values are (nearly) equal.
fn interpolate(p0: &Point3<f64>, p1: &Point3<f64>, v0: f64, v1: f64, iso: f64) -> Point3<f64> {
    let dv = v1 - v0;
    let t = if dv.abs() < 1e-12 {
        0.5
    } else {
        ((iso - v0) / dv).clamp(0.0, 1.0)
    };
    p0 + (p1 - p0) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjacency::MeshAdjacency;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn sphere_grid(radius: f64, n: usize) -> ScalarGrid {
        let h = 2.0 / (n - 1) as f64;
        ScalarGrid::from_fn([n, n, n], Point3::new(-1.0, -1.0, -1.0), h, |p| {
            p.coords.norm() - radius
        })
        .unwrap()
    }

    #[test]
    fn test_tables_are_consistent() {
        for case in 0..256 {
            let row = &TRI_TABLE[case];
            let len = row.iter().position(|&e| e < 0).unwrap_or(16);
            assert_eq!(len % 3, 0, "case {case}");
            for &e in &row[..len] {
                assert!(EDGE_TABLE[case] & (1 << e) != 0, "case {case} edge {e}");
            }
            assert_eq!(len == 0, EDGE_TABLE[case] == 0, "case {case}");
            // Complementary cases cut the same edges.
            assert_eq!(EDGE_TABLE[case], EDGE_TABLE[255 - case]);
        }
    }

    #[test]
    fn test_single_corner_faces_away_from_inside() {
        let mut values = vec![1.0; 8];
        values[0] = -1.0;
        let grid = ScalarGrid::new([2, 2, 2], Point3::origin(), 1.0, values).unwrap();
        let result = marching_cubes(&grid, &IsosurfaceParams::default()).unwrap();
        assert_eq!(result.mesh.vertex_count(), 3);
        assert_eq!(result.mesh.face_count(), 1);
        assert_eq!(result.active_cells, 1);
        let tri = result.mesh.triangle(0).unwrap();
        let n = tri.normal().unwrap();
        assert!(n.dot(&nalgebra::Vector3::new(1.0, 1.0, 1.0)) > 0.0);
        for v in &result.mesh.vertices {
            assert_relative_eq!(v.position.coords.sum(), 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_uniform_grid_is_empty() {
        let grid = ScalarGrid::new([3, 3, 3], Point3::origin(), 1.0, vec![2.0; 27]).unwrap();
        let result = marching_cubes(&grid, &IsosurfaceParams::default()).unwrap();
        assert!(result.mesh.is_empty());
        assert_eq!(result.cell_count, 8);
        assert_eq!(result.active_cells, 0);
    }

    #[test]
    fn test_sphere_is_closed_and_outward() {
        let radius = 0.7;
        let result = marching_cubes(&sphere_grid(radius, 31), &IsosurfaceParams::default()).unwrap();
        let mesh = &result.mesh;
        let adj = MeshAdjacency::build(mesh);
        assert!(adj.is_watertight());
        assert!(adj.is_manifold());
        assert!(mesh.signed_volume() > 0.0);
        let exact = 4.0 / 3.0 * PI * radius.powi(3);
        assert_relative_eq!(mesh.volume(), exact, max_relative = 0.03);
        for v in &mesh.vertices {
            assert!((v.position.coords.norm() - radius).abs() < 0.02);
        }
    }

    #[test]
    fn test_iso_value_selects_level_set() {
        let grid = sphere_grid(0.0, 21);
        let result = marching_cubes(&grid, &IsosurfaceParams::at(0.5)).unwrap();
        let mean_radius = result
            .mesh
            .vertices
            .iter()
            .map(|v| v.position.coords.norm())
            .sum::<f64>()
            / result.mesh.vertex_count() as f64;
        assert_relative_eq!(mean_radius, 0.5, epsilon = 0.02);
    }
}
