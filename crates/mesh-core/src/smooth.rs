//! Vertex smoothing with fixed topology.
//!
//! Every method is a Jacobi-style update: new positions for a pass are computed
//! from the previous pass only (in parallel, one output slot per vertex), then
//! swapped in. Faces are never touched.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::adjacency::MeshAdjacency;
use crate::error::{MeshError, MeshResult};
use crate::math::{cotangent, try_normalize};
use crate::tracing_ext::OperationTimer;
use crate::Mesh;

/// Smoothing method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(rename_all = "snake_case"))]
pub enum SmoothMethod {
    /// Uniform 1-ring averaging. Shrinks the surface.
    #[default]
    Laplacian,

    /// A λ pass followed by a μ pass per iteration; cancels most shrinkage.
    Taubin,

    /// 1-ring averaging weighted by `cot α + cot β` of the angles opposite each edge.
    Cotangent,

    /// Feature-preserving filter moving vertices along their normal.
    Bilateral,
}

/// Parameters for [`smooth_mesh`].
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(default))]
pub struct SmoothParams {
    /// Smoothing method.
    pub method: SmoothMethod,

    /// Number of iterations.
    pub iterations: usize,

    /// Step factor toward the neighbour average, in `(0, 1]`.
    pub lambda: f64,

    /// Taubin's negative step. Must satisfy `mu < 0` and `|mu| > lambda`.
    pub mu: f64,

    /// Keep vertices on boundary or non-manifold edges in place.
    pub preserve_boundary: bool,

    /// Upper clamp for each cotangent weight.
    pub cotangent_clamp: f64,

    /// Bilateral spatial sigma. Defaults to the mean edge length.
    pub sigma_spatial: Option<f64>,

    /// Bilateral range sigma. Defaults to half the mean edge length.
    pub sigma_range: Option<f64>,
}

impl Default for SmoothParams {
    fn default() -> Self {
        Self {
            method: SmoothMethod::Laplacian,
            iterations: 10,
            lambda: 0.5,
            mu: -0.53,
            preserve_boundary: true,
            cotangent_clamp: 1e3,
            sigma_spatial: None,
            sigma_range: None,
        }
    }
}

impl SmoothParams {
    /// Uniform Laplacian smoothing.
    pub fn laplacian(iterations: usize, lambda: f64) -> Self {
        Self {
            method: SmoothMethod::Laplacian,
            iterations,
            lambda,
            ..Default::default()
        }
    }

    /// Taubin λ|μ smoothing.
    pub fn taubin(iterations: usize, lambda: f64, mu: f64) -> Self {
        Self {
            method: SmoothMethod::Taubin,
            iterations,
            lambda,
            mu,
            ..Default::default()
        }
    }

    /// Cotangent-weighted smoothing.
    pub fn cotangent(iterations: usize, lambda: f64) -> Self {
        Self {
            method: SmoothMethod::Cotangent,
            iterations,
            lambda,
            ..Default::default()
        }
    }

    /// Bilateral filtering with explicit sigmas.
    pub fn bilateral(iterations: usize, sigma_spatial: f64, sigma_range: f64) -> Self {
        Self {
            method: SmoothMethod::Bilateral,
            iterations,
            sigma_spatial: Some(sigma_spatial),
            sigma_range: Some(sigma_range),
            ..Default::default()
        }
    }

    fn validate(&self) -> MeshResult<()> {
        if !(self.lambda > 0.0 && self.lambda <= 1.0) {
            return Err(MeshError::invalid_parameter("lambda", self.lambda, "in (0, 1]"));
        }
        if self.method == SmoothMethod::Taubin && !(self.mu < 0.0 && -self.mu > self.lambda) {
            return Err(MeshError::invalid_parameter(
                "mu",
                self.mu,
                "negative with |mu| > lambda",
            ));
        }
        if !(self.cotangent_clamp > 0.0) {
            return Err(MeshError::invalid_parameter(
                "cotangent_clamp",
                self.cotangent_clamp,
                "> 0",
            ));
        }
        for (name, sigma) in [
            ("sigma_spatial", self.sigma_spatial),
            ("sigma_range", self.sigma_range),
        ] {
            match sigma {
                Some(s) if !(s > 0.0 && s.is_finite()) => {
                    return Err(MeshError::invalid_parameter(name, s, "finite and > 0"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Result of smoothing.
#[derive(Debug, Clone)]
pub struct SmoothResult {
    /// Smoothed mesh (same faces as the input).
    pub mesh: Mesh,

    /// Average displacement per vertex.
    pub average_displacement: f64,

    /// Maximum displacement.
    pub max_displacement: f64,

    /// Number of iterations performed.
    pub iterations_performed: usize,
}

/// Smooth vertex positions of `mesh`.
///
/// Works on a private copy; the input is untouched. Isolated vertices never move.
pub fn smooth_mesh(mesh: &Mesh, params: &SmoothParams) -> MeshResult<SmoothResult> {
    params.validate()?;
    mesh.validate()?;
    let _timer = OperationTimer::for_mesh("smooth_mesh", mesh);

    let adj = MeshAdjacency::build(mesh);
    let frozen = if params.preserve_boundary {
        adj.boundary_vertices()
    } else {
        vec![false; mesh.vertices.len()]
    };

    let original: Vec<Point3<f64>> = mesh.positions();
    let mut positions = original.clone();

    let (sigma_spatial, sigma_range) = if params.method == SmoothMethod::Bilateral {
        let mean_edge = mean_edge_length(&adj, &positions);
        (
            params.sigma_spatial.unwrap_or(mean_edge),
            params.sigma_range.unwrap_or(0.5 * mean_edge),
        )
    } else {
        (0.0, 0.0)
    };

    for iteration in 0..params.iterations {
        match params.method {
            SmoothMethod::Laplacian => {
                positions = uniform_pass(&adj, &positions, &frozen, params.lambda);
            }
            SmoothMethod::Taubin => {
                positions = uniform_pass(&adj, &positions, &frozen, params.lambda);
                positions = uniform_pass(&adj, &positions, &frozen, params.mu);
            }
            SmoothMethod::Cotangent => {
                let weights = cotangent_weights(mesh, &adj, &positions, params.cotangent_clamp);
                positions = weighted_pass(&adj, &positions, &frozen, &weights, params.lambda);
            }
            SmoothMethod::Bilateral => {
                positions = bilateral_pass(
                    mesh,
                    &adj,
                    &positions,
                    &frozen,
                    sigma_spatial,
                    sigma_range,
                );
            }
        }
        debug!(iteration, method = ?params.method, "Smoothing pass");
    }

    let displacements: Vec<f64> = original
        .iter()
        .zip(&positions)
        .map(|(a, b)| (b - a).norm())
        .collect();
    let max_displacement = displacements.iter().copied().fold(0.0, f64::max);
    let average_displacement = if displacements.is_empty() {
        0.0
    } else {
        displacements.iter().sum::<f64>() / displacements.len() as f64
    };

    let mut result = mesh.clone();
    for (vertex, p) in result.vertices.iter_mut().zip(positions) {
        vertex.position = p;
        vertex.normal = None;
    }

    info!(
        method = ?params.method,
        iterations = params.iterations,
        avg_displacement = average_displacement,
        max_displacement,
        "Smoothing complete"
    );

    Ok(SmoothResult {
        mesh: result,
        average_displacement,
        max_displacement,
        iterations_performed: params.iterations,
    })
}

/// `v + factor * (mean(neighbours) - v)` for every free vertex.
fn uniform_pass(
    adj: &MeshAdjacency,
    positions: &[Point3<f64>],
    frozen: &[bool],
    factor: f64,
) -> Vec<Point3<f64>> {
    (0..positions.len())
        .into_par_iter()
        .map(|v| {
            let p = positions[v];
            let neighbors = adj.neighbors(v as u32);
            if frozen[v] || neighbors.is_empty() {
                return p;
            }
            let sum: Vector3<f64> = neighbors
                .iter()
                .map(|&w| positions[w as usize].coords)
                .sum();
            let mean = sum / neighbors.len() as f64;
            p + (mean - p.coords) * factor
        })
        .collect()
}

/// Per-edge `cot α + cot β`, clamped to `[0, clamp]`.
fn cotangent_weights(
    mesh: &Mesh,
    adj: &MeshAdjacency,
    positions: &[Point3<f64>],
    clamp: f64,
) -> Vec<f64> {
    adj.edges()
        .par_iter()
        .enumerate()
        .map(|(edge_id, key)| {
            let (a, b) = key.vertices();
            let pa = positions[a as usize];
            let pb = positions[b as usize];
            let sum: f64 = adj
                .faces_of_edge_id(edge_id as u32)
                .iter()
                .filter_map(|&f| {
                    let o = mesh.faces[f as usize]
                        .iter()
                        .copied()
                        .find(|&v| v != a && v != b)?;
                    let po = positions[o as usize];
                    cotangent(&(pa - po), &(pb - po))
                })
                .sum();
            sum.clamp(0.0, clamp)
        })
        .collect()
}

fn weighted_pass(
    adj: &MeshAdjacency,
    positions: &[Point3<f64>],
    frozen: &[bool],
    weights: &[f64],
    factor: f64,
) -> Vec<Point3<f64>> {
    (0..positions.len())
        .into_par_iter()
        .map(|v| {
            let p = positions[v];
            if frozen[v] {
                return p;
            }
            let mut total = 0.0;
            let mut sum = Vector3::zeros();
            for &w in adj.neighbors(v as u32) {
                let Some(e) = adj.edge_id(v as u32, w) else {
                    continue;
                };
                let weight = weights[e as usize];
                total += weight;
                sum += (positions[w as usize] - p) * weight;
            }
            if total <= 0.0 {
                return p;
            }
            p + sum * (factor / total)
        })
        .collect()
}

/// Area-weighted vertex normals for the current positions.
fn vertex_normals(mesh: &Mesh, positions: &[Point3<f64>]) -> Vec<Option<Vector3<f64>>> {
    let face_normals: Vec<Vector3<f64>> = mesh
        .faces
        .par_iter()
        .map(|&[a, b, c]| {
            crate::math::triangle_normal_raw(
                &positions[a as usize],
                &positions[b as usize],
                &positions[c as usize],
            )
        })
        .collect();
    let mut accum = vec![Vector3::zeros(); positions.len()];
    for (face, n) in mesh.faces.iter().zip(&face_normals) {
        for &v in face {
            accum[v as usize] += n;
        }
    }
    accum.iter().map(try_normalize).collect()
}

/// One bilateral pass: `v + n * Σ(w_c w_s h) / Σ(w_c w_s)` with
/// `t = |q - v|`, `h = n · (q - v)`, `w_c = exp(-t² / 2σc²)`, `w_s = exp(-h² / 2σs²)`.
fn bilateral_pass(
    mesh: &Mesh,
    adj: &MeshAdjacency,
    positions: &[Point3<f64>],
    frozen: &[bool],
    sigma_spatial: f64,
    sigma_range: f64,
) -> Vec<Point3<f64>> {
    let normals = vertex_normals(mesh, positions);
    let two_sc2 = 2.0 * sigma_spatial * sigma_spatial;
    let two_sr2 = 2.0 * sigma_range * sigma_range;

    (0..positions.len())
        .into_par_iter()
        .map(|v| {
            let p = positions[v];
            let neighbors = adj.neighbors(v as u32);
            let Some(n) = normals[v] else {
                return p;
            };
            if frozen[v] || neighbors.is_empty() {
                return p;
            }
            let mut sum = 0.0;
            let mut norm = 0.0;
            for &w in neighbors {
                let d = positions[w as usize] - p;
                let t = d.norm();
                let h = n.dot(&d);
                let weight = (-t * t / two_sc2).exp() * (-h * h / two_sr2).exp();
                sum += weight * h;
                norm += weight;
            }
            if norm <= f64::MIN_POSITIVE {
                return p;
            }
            p + n * (sum / norm)
        })
        .collect()
}

fn mean_edge_length(adj: &MeshAdjacency, positions: &[Point3<f64>]) -> f64 {
    let edges = adj.edges();
    if edges.is_empty() {
        return 1.0;
    }
    let total: f64 = edges
        .iter()
        .map(|key| {
            let (a, b) = key.vertices();
            (positions[a as usize] - positions[b as usize]).norm()
        })
        .sum();
    let mean = total / edges.len() as f64;
    if mean > 0.0 { mean } else { 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// `n × n` vertex grid on `[0, 1]²` with heights from `z`.
    fn grid_mesh(n: usize, z: impl Fn(usize, usize) -> f64) -> Mesh {
        let mut positions = Vec::new();
        for j in 0..n {
            for i in 0..n {
                let s = (n - 1) as f64;
                positions.push(Point3::new(i as f64 / s, j as f64 / s, z(i, j)));
            }
        }
        let mut faces = Vec::new();
        let idx = |i: usize, j: usize| (j * n + i) as u32;
        for j in 0..n - 1 {
            for i in 0..n - 1 {
                faces.push([idx(i, j), idx(i + 1, j), idx(i + 1, j + 1)]);
                faces.push([idx(i, j), idx(i + 1, j + 1), idx(i, j + 1)]);
            }
        }
        Mesh::from_parts(positions, faces)
    }

    fn octahedron() -> Mesh {
        Mesh::from_parts(
            [
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(-1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, -1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
                Point3::new(0.0, 0.0, -1.0),
            ],
            vec![
                [0, 2, 4],
                [2, 1, 4],
                [1, 3, 4],
                [3, 0, 4],
                [2, 0, 5],
                [1, 2, 5],
                [3, 1, 5],
                [0, 3, 5],
            ],
        )
    }

    fn noise(i: usize, j: usize) -> f64 {
        // Deterministic pseudo-noise in [-0.02, 0.02].
        let h = (i * 7919 + j * 104_729) % 1000;
        (h as f64 / 1000.0 - 0.5) * 0.04
    }

    fn roughness(mesh: &Mesh) -> f64 {
        mesh.vertices.iter().map(|v| v.position.z.abs()).sum()
    }

    #[test]
    fn test_flat_grid_stays_flat() {
        let mesh = grid_mesh(6, |_, _| 0.0);
        for method in [
            SmoothMethod::Laplacian,
            SmoothMethod::Taubin,
            SmoothMethod::Cotangent,
            SmoothMethod::Bilateral,
        ] {
            let params = SmoothParams {
                method,
                iterations: 3,
                ..Default::default()
            };
            let result = smooth_mesh(&mesh, &params).unwrap();
            assert!(
                result.mesh.vertices.iter().all(|v| v.position.z.abs() < 1e-12),
                "{method:?}"
            );
            assert_eq!(result.mesh.faces, mesh.faces);
        }
    }

    #[test]
    fn test_laplacian_reduces_noise_and_freezes_boundary() {
        let mesh = grid_mesh(10, noise);
        let result = smooth_mesh(&mesh, &SmoothParams::laplacian(5, 0.5)).unwrap();
        assert!(roughness(&result.mesh) < roughness(&mesh));
        // Corner and edge vertices are on the boundary.
        assert_eq!(result.mesh.vertices[0].position, mesh.vertices[0].position);
        assert_eq!(result.mesh.vertices[5].position, mesh.vertices[5].position);
        assert!(result.max_displacement > 0.0);
    }

    #[test]
    fn test_laplacian_octahedron_shrinks_exactly() {
        let result = smooth_mesh(&octahedron(), &SmoothParams::laplacian(1, 0.5)).unwrap();
        assert_relative_eq!(
            result.mesh.vertices[0].position,
            Point3::new(0.5, 0.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_taubin_shrinks_less_than_laplacian() {
        let mesh = octahedron();
        let lap = smooth_mesh(&mesh, &SmoothParams::laplacian(1, 0.5)).unwrap();
        let taubin = smooth_mesh(&mesh, &SmoothParams::taubin(1, 0.5, -0.53)).unwrap();
        // λ pass to 0.5, then μ pass pushes out by 1.53.
        assert_relative_eq!(taubin.mesh.vertices[0].position.x, 0.765, epsilon = 1e-12);
        assert!(taubin.mesh.volume() > lap.mesh.volume());
    }

    #[test]
    fn test_cotangent_pulls_spike_down() {
        let mesh = grid_mesh(5, |i, j| if (i, j) == (2, 2) { 0.3 } else { 0.0 });
        let result = smooth_mesh(&mesh, &SmoothParams::cotangent(1, 1.0)).unwrap();
        // Every neighbour sits at z = 0, so a full step lands on the plane.
        assert!(result.mesh.vertices[12].position.z.abs() < 1e-9);
    }

    #[test]
    fn test_bilateral_removes_bump_along_normal() {
        let mesh = grid_mesh(5, |i, j| if (i, j) == (2, 2) { 0.05 } else { 0.0 });
        let result = smooth_mesh(&mesh, &SmoothParams::bilateral(1, 0.25, 0.1)).unwrap();
        let centre = result.mesh.vertices[12].position;
        assert!(centre.z.abs() < 1e-6);
        // Moves along the (vertical) normal only.
        assert_relative_eq!(centre.x, 0.5, epsilon = 1e-9);
        assert_relative_eq!(centre.y, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let mesh = octahedron();
        let result = smooth_mesh(&mesh, &SmoothParams::laplacian(0, 0.5)).unwrap();
        assert_eq!(result.mesh, mesh);
        assert_eq!(result.max_displacement, 0.0);
    }

    #[test]
    fn test_parameter_validation() {
        let mesh = octahedron();
        assert!(smooth_mesh(&mesh, &SmoothParams::laplacian(1, 0.0)).is_err());
        assert!(smooth_mesh(&mesh, &SmoothParams::laplacian(1, 1.5)).is_err());
        assert!(matches!(
            smooth_mesh(&mesh, &SmoothParams::taubin(1, 0.5, -0.4)),
            Err(MeshError::InvalidParameter { name: "mu", .. })
        ));
        assert!(smooth_mesh(&mesh, &SmoothParams::taubin(1, 0.5, 0.6)).is_err());
        assert!(smooth_mesh(&mesh, &SmoothParams::bilateral(1, -1.0, 0.1)).is_err());
    }
}
