//! Conversion driver: source model and materials in, scene graph out.

use std::fs;
use std::path::Path;

use bon::Builder;
use rootcause::Report;
use rootcause::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{ConvertError, ConvertResult};
use crate::export::buffer::BufferPacker;
use crate::export::material::{SourceMaterial, convert_material};
use crate::export::primitive::{Primitive, build_primitives};
use crate::export::scene::{Mesh, MeshPrimitive, SceneGraph, SceneImage, assemble};
use crate::export::texture::{FileTextureLoader, TextureLoader};
use crate::models::mtl::{MaterialDef, parse_mtl};
use crate::models::obj::{ObjModel, parse_obj};

pub const DEFAULT_GENERATOR: &str = "obj2glb";

/// Output settings for a conversion run.
#[derive(Builder, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvertOptions {
    /// Quality for opaque (JPEG) textures, clamped to 1..=100.
    #[builder(default = 80)]
    pub jpeg_quality: u8,
    #[builder(default = true)]
    pub double_sided: bool,
    /// Written to the asset's `generator` field.
    #[builder(into, default = DEFAULT_GENERATOR.to_string())]
    pub generator: String,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Resolve and decode the textures of every material in `defs`, in order.
pub fn load_materials(
    defs: &[MaterialDef],
    loader: &mut impl TextureLoader,
) -> ConvertResult<Vec<SourceMaterial>> {
    let mut materials = Vec::with_capacity(defs.len());
    for def in defs {
        materials.push(SourceMaterial::load(def, loader)?);
    }
    Ok(materials)
}

#[cfg(feature = "rayon")]
fn weld_meshes(model: &ObjModel) -> ConvertResult<Vec<Vec<Primitive>>> {
    use rayon::prelude::*;

    model
        .meshes
        .par_iter()
        .map(|mesh| build_primitives(model, mesh))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn weld_meshes(model: &ObjModel) -> ConvertResult<Vec<Vec<Primitive>>> {
    model
        .meshes
        .iter()
        .map(|mesh| build_primitives(model, mesh))
        .collect()
}

/// Convert `model` into a scene graph.
///
/// `materials` must be in the order the model's face material ids index;
/// faces pointing past the end are treated as having no material.
///
/// The buffer holds every encoded texture first, followed by each
/// primitive's streams in mesh order.
pub fn convert(
    model: &ObjModel,
    materials: Vec<SourceMaterial>,
    options: &ConvertOptions,
) -> ConvertResult<SceneGraph> {
    let mut textures = Vec::new();
    let mut approx = Vec::with_capacity(materials.len());
    for material in materials {
        approx.push(convert_material(material, &mut textures)?);
    }

    let welded = weld_meshes(model)?;

    let mut packer = BufferPacker::new();
    let quality = options.jpeg_quality.clamp(1, 100);

    let mut images = Vec::with_capacity(textures.len());
    for texture in &textures {
        let bytes = texture.encoded(quality).map_err(|err| {
            Report::new(ConvertError::TextureEncodeFailure {
                texture: texture.name.clone(),
                reason: err.to_string(),
            })
        })?;
        images.push(SceneImage {
            name: texture.name.clone(),
            width: texture.width(),
            height: texture.height(),
            format: texture.format,
            region: packer.append_blob(bytes),
        });
    }
    drop(textures);

    let mut meshes = Vec::with_capacity(welded.len());
    for (mesh, primitives) in model.meshes.iter().zip(welded) {
        let mut out = Vec::with_capacity(primitives.len());
        for primitive in &primitives {
            let material = primitive.material.filter(|&id| {
                let known = id < approx.len();
                if !known {
                    warn!("mesh '{}': material id {id} has no definition", mesh.name);
                }
                known
            });
            out.push(MeshPrimitive {
                material,
                accessors: packer.pack_primitive(primitive),
            });
        }
        debug!("mesh '{}': {} primitives", mesh.name, out.len());
        meshes.push(Mesh {
            name: mesh.name.clone(),
            primitives: out,
        });
    }

    Ok(assemble(meshes, approx, images, packer.finish()))
}

/// Read an OBJ file together with its material libraries and textures, and
/// convert it.
///
/// Material libraries and textures are looked up relative to the OBJ's
/// directory. A material library that cannot be read only produces a
/// warning; its materials' faces end up with no material.
pub fn convert_obj_file(path: &Path, options: &ConvertOptions) -> Result<SceneGraph, Report> {
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let text = fs::read_to_string(path).context("Could not read OBJ file")?;
    let mut model = parse_obj(&text).context("Failed to parse OBJ file")?;

    let mut defs = Vec::new();
    for lib in &model.material_libs {
        let lib_path = base_dir.join(lib);
        match fs::read_to_string(&lib_path) {
            Ok(text) => {
                defs.extend(parse_mtl(&text).context("Failed to parse material library")?);
            }
            Err(err) => warn!("material library {} not readable: {err}", lib_path.display()),
        }
    }
    let names: Vec<&str> = defs.iter().map(|def| def.name.as_str()).collect();
    model.bind_materials(&names);

    let mut loader = FileTextureLoader::new(&base_dir);
    let materials = load_materials(&defs, &mut loader).context("Failed to load textures")?;
    let scene = convert(&model, materials, options).context("Conversion failed")?;

    info!(
        "{}: {} meshes, {} materials, {} textures, {} buffer bytes",
        path.display(),
        scene.meshes.len(),
        scene.materials.len(),
        scene.images.len(),
        scene.buffer.data.len()
    );

    Ok(scene)
}
