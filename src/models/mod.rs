//! Readers for the Wavefront source formats.

/// Geometry and face/material assignments (`.obj`).
pub mod obj;
/// Material libraries (`.mtl`).
pub mod mtl;
