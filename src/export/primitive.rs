//! Per-material face grouping and vertex welding.
//!
//! A mesh's faces are split into one [`Primitive`] per material, and each
//! primitive gets its own pool of unique vertices. Two corners weld only when
//! every attribute is bit-for-bit identical; the lookup is keyed on the raw
//! bit patterns, so unequal vertices can never share an index.

use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;
use rootcause::Report;

use crate::error::{ConvertError, ConvertResult};
use crate::models::obj::{Corner, Face, ObjMesh, ObjModel};

/// A per-vertex attribute stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Position,
    Normal,
    Color,
    TexCoord,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Attribute::Position => "position",
            Attribute::Normal => "normal",
            Attribute::Color => "color",
            Attribute::TexCoord => "texcoord",
        })
    }
}

/// Which optional attributes every vertex of a mesh carries.
///
/// Decided once per model from the presence of the global attribute arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VertexLayout {
    pub normals: bool,
    pub colors: bool,
    pub texcoords: bool,
}

impl VertexLayout {
    pub fn of(model: &ObjModel) -> Self {
        Self {
            normals: model.has_normals(),
            colors: model.has_colors(),
            texcoords: model.has_texcoords(),
        }
    }
}

/// One welded vertex. Optional attributes are `Some` exactly when the
/// primitive's [`VertexLayout`] enables them.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceVertex {
    pub position: [f32; 3],
    pub normal: Option<[f32; 3]>,
    /// Clamped to `[0, 1]`.
    pub color: Option<[f32; 3]>,
    /// V is flipped (`1 - v`) relative to the OBJ convention.
    pub uv: Option<[f32; 2]>,
}

impl SourceVertex {
    fn key(&self) -> VertexKey {
        VertexKey {
            position: bits(self.position),
            normal: self.normal.map(bits),
            color: self.color.map(bits),
            uv: self.uv.map(bits),
        }
    }
}

fn bits<const N: usize>(values: [f32; N]) -> [u32; N] {
    values.map(f32::to_bits)
}

/// Exact-equality lookup key for a [`SourceVertex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct VertexKey {
    position: [u32; 3],
    normal: Option<[u32; 3]>,
    color: Option<[u32; 3]>,
    uv: Option<[u32; 2]>,
}

/// A subset of a mesh sharing one material, with its own vertex pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    /// `None` groups the faces that have no material assigned.
    pub material: Option<usize>,
    pub layout: VertexLayout,
    pub vertices: Vec<SourceVertex>,
    /// Every index is `< vertices.len()`.
    pub triangles: Vec<[u32; 3]>,
}

impl Primitive {
    pub fn new(material: Option<usize>, layout: VertexLayout) -> Self {
        Self {
            material,
            layout,
            vertices: Vec::new(),
            triangles: Vec::new(),
        }
    }

    pub fn index_count(&self) -> usize {
        self.triangles.len() * 3
    }
}

/// Split faces into one empty primitive per distinct material, in order of
/// first occurrence.
pub fn group_faces(faces: &[Face], layout: VertexLayout) -> Vec<Primitive> {
    faces
        .iter()
        .map(|face| face.material)
        .unique()
        .map(|material| Primitive::new(material, layout))
        .collect()
}

/// Welds vertices into a single primitive's pool.
#[derive(Debug, Default)]
pub struct VertexWelder {
    lookup: HashMap<VertexKey, u32>,
}

impl VertexWelder {
    /// Pool index for `vertex`, appending it if no identical vertex exists yet.
    pub fn weld(&mut self, pool: &mut Vec<SourceVertex>, vertex: SourceVertex) -> u32 {
        *self.lookup.entry(vertex.key()).or_insert_with(|| {
            pool.push(vertex);
            (pool.len() - 1) as u32
        })
    }
}

struct OutOfRange {
    attribute: Attribute,
    index: Option<usize>,
    len: usize,
}

fn fetch<T: Copy>(
    values: &[T],
    index: Option<usize>,
    attribute: Attribute,
) -> Result<T, OutOfRange> {
    index
        .and_then(|i| values.get(i).copied())
        .ok_or(OutOfRange {
            attribute,
            index,
            len: values.len(),
        })
}

fn corner_vertex(
    model: &ObjModel,
    layout: VertexLayout,
    corner: &Corner,
) -> Result<SourceVertex, OutOfRange> {
    let position = fetch(&model.positions, Some(corner.position), Attribute::Position)?;

    let normal = layout
        .normals
        .then(|| fetch(&model.normals, corner.normal, Attribute::Normal))
        .transpose()?;

    let color = layout
        .colors
        .then(|| fetch(&model.colors, Some(corner.position), Attribute::Color))
        .transpose()?
        .map(|rgb| rgb.map(|c| c.clamp(0.0, 1.0)));

    let uv = layout
        .texcoords
        .then(|| fetch(&model.texcoords, corner.texcoord, Attribute::TexCoord))
        .transpose()?
        .map(|[u, v]| [u, 1.0 - v]);

    Ok(SourceVertex {
        position,
        normal,
        color,
        uv,
    })
}

/// Fill `primitive` from the faces of `mesh` that use its material.
pub fn weld_primitive(
    primitive: &mut Primitive,
    model: &ObjModel,
    mesh: &ObjMesh,
) -> ConvertResult<()> {
    let mut welder = VertexWelder::default();

    for (face_idx, face) in mesh.faces.iter().enumerate() {
        if face.material != primitive.material {
            continue;
        }

        let mut triangle = [0u32; 3];
        for (slot, corner) in triangle.iter_mut().zip(&face.corners) {
            let vertex = corner_vertex(model, primitive.layout, corner).map_err(|oor| {
                Report::new(ConvertError::AttributeIndexOutOfRange {
                    mesh: mesh.name.clone(),
                    face: face_idx,
                    attribute: oor.attribute,
                    index: oor.index,
                    len: oor.len,
                })
            })?;
            *slot = welder.weld(&mut primitive.vertices, vertex);
        }
        primitive.triangles.push(triangle);
    }

    Ok(())
}

/// Group and weld every face of `mesh`. A mesh without faces yields no
/// primitives.
pub fn build_primitives(model: &ObjModel, mesh: &ObjMesh) -> ConvertResult<Vec<Primitive>> {
    let mut primitives = group_faces(&mesh.faces, VertexLayout::of(model));
    for primitive in &mut primitives {
        weld_primitive(primitive, model, mesh)?;
    }
    Ok(primitives)
}
