//! Wavefront OBJ reader.
//!
//! Produces an [`ObjModel`]: global attribute arrays plus a list of meshes
//! whose faces have already been triangulated and whose corner indices have
//! been rebased to zero. Corner indices are *not* bounds-checked here; the
//! deduplication pass reports out-of-range references with mesh and face
//! context.

use std::collections::HashMap;

use rootcause::Report;
use thiserror::Error;
use tracing::{debug, warn};
use winnow::Parser;
use winnow::ascii::{dec_int, float, space0};
use winnow::combinator::{opt, preceded, repeat, terminated};
use winnow::error::{ContextError, ErrMode};

/// Common result type for winnow parsers.
type WResult<T> = Result<T, ErrMode<ContextError>>;

#[derive(Debug, Error)]
pub enum ObjError {
    #[error("line {line}: {detail}")]
    Parse { line: usize, detail: String },
    #[error("line {line}: index {index} does not refer to an existing {kind}")]
    InvalidIndex {
        line: usize,
        kind: &'static str,
        index: i64,
    },
    #[error("line {line}: expected {expected} values, found {found}")]
    WrongArity {
        line: usize,
        expected: &'static str,
        found: usize,
    },
}

/// A parsed OBJ file.
#[derive(Debug, Clone, Default)]
pub struct ObjModel {
    pub positions: Vec<[f32; 3]>,
    /// Per-position vertex colors. Empty unless every `v` record carried one.
    pub colors: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub texcoords: Vec<[f32; 2]>,
    pub meshes: Vec<ObjMesh>,
    /// Material names in the order [`Face::material`] indexes them.
    pub material_names: Vec<String>,
    /// `mtllib` references, in declaration order.
    pub material_libs: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjMesh {
    pub name: String,
    pub faces: Vec<Face>,
}

/// A triangle. `material` is `None` for faces declared before any `usemtl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Face {
    pub material: Option<usize>,
    pub corners: [Corner; 3],
}

/// Zero-based attribute indices for one face corner.
///
/// Vertex colors share the position index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Corner {
    pub position: usize,
    pub texcoord: Option<usize>,
    pub normal: Option<usize>,
}

impl Corner {
    pub fn new(position: usize, texcoord: Option<usize>, normal: Option<usize>) -> Self {
        Self {
            position,
            texcoord,
            normal,
        }
    }
}

impl ObjModel {
    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    pub fn has_colors(&self) -> bool {
        !self.colors.is_empty()
    }

    pub fn has_texcoords(&self) -> bool {
        !self.texcoords.is_empty()
    }

    /// Re-point every face's material at `library`, which becomes the new
    /// `material_names`.
    ///
    /// Names the library does not define fall back to "no material".
    pub fn bind_materials<S: AsRef<str>>(&mut self, library: &[S]) {
        let mut by_name: HashMap<&str, usize> = HashMap::with_capacity(library.len());
        for (idx, name) in library.iter().enumerate() {
            by_name.entry(name.as_ref()).or_insert(idx);
        }

        let remap: Vec<Option<usize>> = self
            .material_names
            .iter()
            .map(|name| {
                let found = by_name.get(name.as_str()).copied();
                if found.is_none() {
                    warn!("material '{name}' is not defined by any material library");
                }
                found
            })
            .collect();

        for mesh in &mut self.meshes {
            for face in &mut mesh.faces {
                face.material = face.material.and_then(|local| remap[local]);
            }
        }

        self.material_names = library.iter().map(|n| n.as_ref().to_string()).collect();
    }
}

struct RawCorner {
    position: i64,
    texcoord: Option<i64>,
    normal: Option<i64>,
}

fn number(input: &mut &str) -> WResult<f32> {
    preceded(space0, float).parse_next(input)
}

fn numbers(input: &mut &str) -> WResult<Vec<f32>> {
    terminated(repeat(1.., number), space0).parse_next(input)
}

/// `v`, `v/vt`, `v//vn` or `v/vt/vn`.
fn corner(input: &mut &str) -> WResult<RawCorner> {
    let position: i64 = preceded(space0, dec_int).parse_next(input)?;
    let (texcoord, normal): (Option<i64>, Option<i64>) = opt(preceded(
        '/',
        (opt(dec_int), opt(preceded('/', dec_int))),
    ))
    .parse_next(input)?
    .unwrap_or((None, None));

    Ok(RawCorner {
        position,
        texcoord,
        normal,
    })
}

fn corners(input: &mut &str) -> WResult<Vec<RawCorner>> {
    terminated(repeat(3.., corner), space0).parse_next(input)
}

fn parse_record<'s, O>(
    line: usize,
    input: &'s str,
    mut parser: impl Parser<&'s str, O, ErrMode<ContextError>>,
) -> Result<O, Report<ObjError>> {
    parser.parse(input).map_err(|e| {
        Report::new(ObjError::Parse {
            line,
            detail: e.to_string(),
        })
    })
}

/// Rebase a 1-based (or negative, relative) OBJ index against `count`
/// elements declared so far.
fn resolve_index(raw: i64, count: usize) -> Option<usize> {
    match raw {
        0 => None,
        r if r > 0 => Some(r as usize - 1),
        r => count.checked_sub(r.unsigned_abs() as usize),
    }
}

fn triple(line: usize, values: &[f32]) -> Result<[f32; 3], Report<ObjError>> {
    match values {
        [x, y, z, ..] => Ok([*x, *y, *z]),
        _ => Err(Report::new(ObjError::WrongArity {
            line,
            expected: "3",
            found: values.len(),
        })),
    }
}

/// Parse the text of an OBJ file.
pub fn parse_obj(text: &str) -> Result<ObjModel, Report<ObjError>> {
    let mut model = ObjModel::default();
    let mut mesh = ObjMesh::default();
    let mut current_material: Option<usize> = None;
    let mut material_ids: HashMap<String, usize> = HashMap::new();
    let mut every_vertex_colored = true;

    for (line_idx, raw_line) in text.lines().enumerate() {
        let line = line_idx + 1;
        let content = raw_line.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }

        let (keyword, rest) = content
            .split_once(char::is_whitespace)
            .map(|(k, r)| (k, r.trim()))
            .unwrap_or((content, ""));

        match keyword {
            "v" => {
                let values = parse_record(line, rest, numbers)?;
                model.positions.push(triple(line, &values)?);
                match values.as_slice() {
                    [_, _, _, r, g, b] => model.colors.push([*r, *g, *b]),
                    _ => every_vertex_colored = false,
                }
            }
            "vn" => {
                let values = parse_record(line, rest, numbers)?;
                model.normals.push(triple(line, &values)?);
            }
            "vt" => {
                let values = parse_record(line, rest, numbers)?;
                let uv = match values.as_slice() {
                    [u] => [*u, 0.0],
                    [u, v, ..] => [*u, *v],
                    [] => {
                        return Err(Report::new(ObjError::WrongArity {
                            line,
                            expected: "1-3",
                            found: 0,
                        }));
                    }
                };
                model.texcoords.push(uv);
            }
            "f" => {
                let raw = parse_record(line, rest, corners)?;
                let resolved = raw
                    .iter()
                    .map(|c| resolve_corner(&model, line, c))
                    .collect::<Result<Vec<_>, _>>()?;

                // Fan triangulation around the first corner.
                for pair in resolved[1..].windows(2) {
                    mesh.faces.push(Face {
                        material: current_material,
                        corners: [resolved[0], pair[0], pair[1]],
                    });
                }
            }
            "o" | "g" => {
                if !mesh.faces.is_empty() {
                    model.meshes.push(std::mem::take(&mut mesh));
                }
                mesh.name = rest.to_string();
            }
            "usemtl" => {
                let next_id = model.material_names.len();
                let id = *material_ids.entry(rest.to_string()).or_insert_with(|| {
                    model.material_names.push(rest.to_string());
                    next_id
                });
                current_material = Some(id);
            }
            "mtllib" => {
                model
                    .material_libs
                    .extend(rest.split_whitespace().map(str::to_string));
            }
            _ => {
                debug!("line {line}: ignoring '{keyword}' record");
            }
        }
    }

    if !mesh.faces.is_empty() {
        model.meshes.push(mesh);
    }

    if !every_vertex_colored {
        model.colors.clear();
    }

    Ok(model)
}

fn resolve_corner(
    model: &ObjModel,
    line: usize,
    corner: &RawCorner,
) -> Result<Corner, Report<ObjError>> {
    let invalid = |kind: &'static str, index: i64| {
        Report::new(ObjError::InvalidIndex { line, kind, index })
    };

    let position = resolve_index(corner.position, model.positions.len())
        .ok_or_else(|| invalid("position", corner.position))?;
    let texcoord = corner
        .texcoord
        .map(|raw| {
            resolve_index(raw, model.texcoords.len()).ok_or_else(|| invalid("texcoord", raw))
        })
        .transpose()?;
    let normal = corner
        .normal
        .map(|raw| resolve_index(raw, model.normals.len()).ok_or_else(|| invalid("normal", raw)))
        .transpose()?;

    Ok(Corner {
        position,
        texcoord,
        normal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = "\
# a unit quad
mtllib scene.mtl
o Quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
usemtl red
f 1/1/1 2/2/1 3/3/1 4/4/1
";

    #[test]
    fn test_parse_quad() {
        let model = parse_obj(QUAD).unwrap();
        assert_eq!(model.positions.len(), 4);
        assert_eq!(model.texcoords.len(), 4);
        assert_eq!(model.normals.len(), 1);
        assert!(!model.has_colors());
        assert_eq!(model.material_libs, vec!["scene.mtl".to_string()]);
        assert_eq!(model.material_names, vec!["red".to_string()]);

        assert_eq!(model.meshes.len(), 1);
        let mesh = &model.meshes[0];
        assert_eq!(mesh.name, "Quad");
        // Quad is fan-triangulated into two faces.
        assert_eq!(mesh.faces.len(), 2);
        assert_eq!(mesh.faces[0].material, Some(0));
        assert_eq!(
            mesh.faces[1].corners,
            [
                Corner::new(0, Some(0), Some(0)),
                Corner::new(2, Some(2), Some(0)),
                Corner::new(3, Some(3), Some(0)),
            ]
        );
    }

    #[test]
    fn test_corner_forms() {
        let model = parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2 -1//-1\n").unwrap();
        let face = model.meshes[0].faces[0];
        assert_eq!(face.material, None);
        assert_eq!(face.corners[0], Corner::new(0, None, Some(0)));
        assert_eq!(face.corners[1], Corner::new(1, None, None));
        assert_eq!(face.corners[2], Corner::new(2, None, Some(0)));
    }

    #[test]
    fn test_vertex_colors_require_every_vertex() {
        let colored = parse_obj("v 0 0 0 1 0 0\nv 1 0 0 0 1 0\n").unwrap();
        assert_eq!(colored.colors, vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);

        let partial = parse_obj("v 0 0 0 1 0 0\nv 1 0 0\n").unwrap();
        assert!(partial.colors.is_empty());
    }

    #[test]
    fn test_groups_split_meshes() {
        let text = "\
v 0 0 0
v 1 0 0
v 0 1 0
g first
f 1 2 3
g unused
g second
usemtl a
f 1 2 3
usemtl b
f 3 2 1
";
        let model = parse_obj(text).unwrap();
        let names: Vec<_> = model.meshes.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
        assert_eq!(model.meshes[1].faces[0].material, Some(0));
        assert_eq!(model.meshes[1].faces[1].material, Some(1));
    }

    #[test]
    fn test_bind_materials() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl b\nf 1 2 3\nusemtl missing\nf 1 2 3\n";
        let mut model = parse_obj(text).unwrap();
        model.bind_materials(&["a", "b"]);
        assert_eq!(model.material_names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(model.meshes[0].faces[0].material, Some(1));
        assert_eq!(model.meshes[0].faces[1].material, None);
    }

    #[test]
    fn test_bind_materials_first_definition_wins() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl dup\nf 1 2 3\n";
        let mut model = parse_obj(text).unwrap();
        model.bind_materials(&["dup", "other", "dup"]);
        assert_eq!(model.meshes[0].faces[0].material, Some(0));
    }

    #[test]
    fn test_malformed_records() {
        assert!(parse_obj("v 1 2\n").is_err());
        assert!(parse_obj("v 1 two 3\n").is_err());
        assert!(parse_obj("v 0 0 0\nf 1 1\n").is_err());
        // Relative index reaching before the first vertex.
        assert!(parse_obj("v 0 0 0\nf -1 -2 -3\n").is_err());
        // Zero is never a valid OBJ index.
        assert!(parse_obj("v 0 0 0\nf 0 1 1\n").is_err());
    }

    #[test]
    fn test_out_of_range_positive_index_is_deferred() {
        // Forward references parse; bounds are checked during welding.
        let model = parse_obj("v 0 0 0\nf 1 2 3\n").unwrap();
        assert_eq!(model.meshes[0].faces[0].corners[2].position, 2);
    }
}
