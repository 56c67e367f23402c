//! Subcommand implementations. Each module exposes a `run` entry point.

pub mod boolean;
pub mod call;
pub mod decimate;
pub mod delaunay;
pub mod info;
pub mod isosurface;
pub mod pipeline;
pub mod register;
pub mod repair;
pub mod smooth;
pub mod subdivide;
pub mod validate;
