//! Serialize a [`SceneGraph`] to glTF JSON and the GLB container.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Write;

use gltf_json as json;
use json::validation::Checked::Valid;
use json::validation::USize64;
use rootcause::Report;
use thiserror::Error;
use tracing::debug;

use crate::export::buffer::{Accessor, BufferTarget, ComponentType, ElementShape};
use crate::export::convert::ConvertOptions;
use crate::export::material::ApproxMaterial;
use crate::export::scene::{Filter, MeshPrimitive, Node, SceneGraph};

const EMISSIVE_STRENGTH_EXTENSION: &str = "KHR_materials_emissive_strength";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("glTF serialization error: {0}")]
    Serialize(String),
    #[error("I/O error: {0}")]
    Io(String),
}

fn index<T>(i: usize) -> json::Index<T> {
    json::Index::new(i as u32)
}

fn buffer_view(region: &crate::export::buffer::BufferRegion) -> json::buffer::View {
    json::buffer::View {
        buffer: json::Index::new(0),
        byte_length: USize64::from(region.length),
        byte_offset: Some(USize64::from(region.offset)),
        byte_stride: None,
        target: region.target.map(|target| {
            Valid(match target {
                BufferTarget::ArrayBuffer => json::buffer::Target::ArrayBuffer,
                BufferTarget::ElementArrayBuffer => json::buffer::Target::ElementArrayBuffer,
            })
        }),
        name: None,
        extensions: Default::default(),
        extras: Default::default(),
    }
}

fn accessor(accessor: &Accessor) -> json::Accessor {
    let component_type = match accessor.component_type {
        ComponentType::U32 => json::accessor::ComponentType::U32,
        ComponentType::F32 => json::accessor::ComponentType::F32,
    };
    let type_ = match accessor.shape {
        ElementShape::Scalar => json::accessor::Type::Scalar,
        ElementShape::Vec2 => json::accessor::Type::Vec2,
        ElementShape::Vec3 => json::accessor::Type::Vec3,
    };
    let (min, max) = match &accessor.bounds {
        Some(bounds) => (
            Some(json::Value::from(bounds.min.clone())),
            Some(json::Value::from(bounds.max.clone())),
        ),
        None => (None, None),
    };

    json::Accessor {
        buffer_view: Some(index(accessor.region)),
        byte_offset: Some(USize64(0)),
        count: USize64::from(accessor.count),
        component_type: Valid(json::accessor::GenericComponentType(component_type)),
        type_: Valid(type_),
        min,
        max,
        name: None,
        normalized: false,
        sparse: None,
        extensions: Default::default(),
        extras: Default::default(),
    }
}

fn texture_info(texture: usize) -> json::texture::Info {
    json::texture::Info {
        index: index(texture),
        tex_coord: 0,
        extensions: None,
        extras: Default::default(),
    }
}

fn material(material: &ApproxMaterial, double_sided: bool) -> json::Material {
    let extensions = material
        .has_emissive_strength()
        .then(|| json::extensions::material::Material {
            emissive_strength: Some(json::extensions::material::EmissiveStrength {
                emissive_strength: json::extensions::material::EmissiveStrengthFactor(
                    material.emissive_strength,
                ),
            }),
            ..Default::default()
        });

    json::Material {
        name: Some(material.name.clone()),
        alpha_mode: Valid(if material.blending {
            json::material::AlphaMode::Blend
        } else {
            json::material::AlphaMode::Opaque
        }),
        double_sided,
        pbr_metallic_roughness: json::material::PbrMetallicRoughness {
            base_color_factor: json::material::PbrBaseColorFactor(material.base_color_factor),
            base_color_texture: material.base_color_texture.map(texture_info),
            metallic_factor: json::material::StrengthFactor(material.metallic_factor),
            roughness_factor: json::material::StrengthFactor(material.roughness_factor),
            ..Default::default()
        },
        normal_texture: material
            .normal_texture
            .map(|texture| json::material::NormalTexture {
                index: index(texture),
                scale: 1.0,
                tex_coord: 0,
                extensions: None,
                extras: Default::default(),
            }),
        emissive_texture: material.emissive_texture.map(texture_info),
        emissive_factor: json::material::EmissiveFactor(material.emissive_factor),
        extensions,
        ..Default::default()
    }
}

fn primitive(primitive: &MeshPrimitive) -> json::mesh::Primitive {
    let ids = &primitive.accessors;
    let mut attributes = BTreeMap::new();
    attributes.insert(Valid(json::mesh::Semantic::Positions), index(ids.position));
    if let Some(normal) = ids.normal {
        attributes.insert(Valid(json::mesh::Semantic::Normals), index(normal));
    }
    if let Some(color) = ids.color {
        attributes.insert(Valid(json::mesh::Semantic::Colors(0)), index(color));
    }
    if let Some(uv) = ids.texcoord {
        attributes.insert(Valid(json::mesh::Semantic::TexCoords(0)), index(uv));
    }

    json::mesh::Primitive {
        attributes,
        indices: Some(index(ids.indices)),
        material: primitive.material.map(index),
        mode: Valid(json::mesh::Mode::Triangles),
        targets: None,
        extensions: Default::default(),
        extras: Default::default(),
    }
}

fn node(node: &Node) -> json::Node {
    json::Node {
        name: Some(node.name.clone()),
        mesh: node.mesh.map(index),
        children: (!node.children.is_empty())
            .then(|| node.children.iter().copied().map(index).collect()),
        translation: (node.translation != [0.0; 3]).then_some(node.translation),
        rotation: (node.rotation != [0.0, 0.0, 0.0, 1.0])
            .then_some(json::scene::UnitQuaternion(node.rotation)),
        scale: (node.scale != [1.0; 3]).then_some(node.scale),
        ..Default::default()
    }
}

fn mag_filter(filter: Filter) -> json::texture::MagFilter {
    match filter {
        Filter::Linear | Filter::LinearMipmapLinear => json::texture::MagFilter::Linear,
    }
}

fn min_filter(filter: Filter) -> json::texture::MinFilter {
    match filter {
        Filter::Linear => json::texture::MinFilter::Linear,
        Filter::LinearMipmapLinear => json::texture::MinFilter::LinearMipmapLinear,
    }
}

/// Build the glTF document for `scene`. Buffer views, accessors, images,
/// textures, materials, meshes and nodes keep the scene graph's indices.
pub fn to_root(scene: &SceneGraph, options: &ConvertOptions) -> json::Root {
    let mut root = json::Root::default();
    root.asset = json::Asset {
        version: "2.0".to_string(),
        generator: Some(options.generator.clone()),
        ..Default::default()
    };

    if !scene.buffer.data.is_empty() {
        root.push(json::Buffer {
            byte_length: USize64::from(scene.buffer.data.len()),
            uri: None,
            name: None,
            extensions: Default::default(),
            extras: Default::default(),
        });
    }
    for region in &scene.buffer.regions {
        root.push(buffer_view(region));
    }
    for acc in &scene.buffer.accessors {
        root.push(accessor(acc));
    }

    if !scene.images.is_empty() {
        let sampler = root.push(json::texture::Sampler {
            mag_filter: Some(Valid(mag_filter(scene.sampler.mag_filter))),
            min_filter: Some(Valid(min_filter(scene.sampler.min_filter))),
            wrap_s: Valid(json::texture::WrappingMode::Repeat),
            wrap_t: Valid(json::texture::WrappingMode::Repeat),
            name: None,
            extensions: Default::default(),
            extras: Default::default(),
        });

        for image in &scene.images {
            let source = root.push(json::Image {
                buffer_view: Some(index(image.region)),
                mime_type: Some(json::image::MimeType(image.format.mime_type().to_string())),
                uri: None,
                name: Some(image.name.clone()),
                extensions: Default::default(),
                extras: Default::default(),
            });
            root.push(json::Texture {
                source,
                sampler: Some(sampler),
                name: Some(image.name.clone()),
                extensions: Default::default(),
                extras: Default::default(),
            });
        }
    }

    for mat in &scene.materials {
        root.push(material(mat, options.double_sided));
    }
    if scene.materials.iter().any(ApproxMaterial::has_emissive_strength) {
        root.extensions_used
            .push(EMISSIVE_STRENGTH_EXTENSION.to_string());
    }

    for mesh in &scene.meshes {
        root.push(json::Mesh {
            primitives: mesh.primitives.iter().map(primitive).collect(),
            weights: None,
            name: Some(mesh.name.clone()),
            extensions: Default::default(),
            extras: Default::default(),
        });
    }

    for n in &scene.nodes {
        root.push(node(n));
    }

    let gltf_scene = root.push(json::Scene {
        nodes: vec![index(scene.root)],
        name: Some(scene.name.clone()),
        extensions: Default::default(),
        extras: Default::default(),
    });
    root.scene = Some(gltf_scene);

    root
}

/// Write `scene` as a GLB binary.
pub fn write_glb(
    scene: &SceneGraph,
    options: &ConvertOptions,
    writer: &mut impl Write,
) -> Result<(), Report<ExportError>> {
    let root = to_root(scene, options);

    let json_string = json::serialize::to_string(&root)
        .map_err(|e| Report::new(ExportError::Serialize(e.to_string())))?;
    debug!(
        "GLB: {} bytes of JSON, {} bytes of binary",
        json_string.len(),
        scene.buffer.data.len()
    );

    let glb = gltf::binary::Glb {
        header: gltf::binary::Header {
            magic: *b"glTF",
            version: 2,
            length: 0, // to_writer computes this
        },
        json: Cow::Owned(json_string.into_bytes()),
        bin: if scene.buffer.data.is_empty() {
            None
        } else {
            Some(Cow::Borrowed(scene.buffer.data.as_slice()))
        },
    };

    glb.to_writer(writer)
        .map_err(|e| Report::new(ExportError::Io(e.to_string())))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use image::RgbImage;

    use super::*;
    use crate::export::convert::{convert, load_materials};
    use crate::export::texture::{SourceImage, TextureError, texture_name};
    use crate::models::mtl::parse_mtl;
    use crate::models::obj::parse_obj;

    const OBJ: &str = "\
o Panel
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
usemtl Lamp
f 1/1/1 2/2/1 3/3/1 4/4/1
";

    const MTL: &str = "\
newmtl Lamp
Kd 0.5 0.5 0.5
Ks 0.5 0.5 0.5
Ke 4 2 0
Ns 100
map_Kd lamp.png
map_Ke lamp_glow.png
";

    fn lamp_scene() -> SceneGraph {
        let mut model = parse_obj(OBJ).unwrap();
        let defs = parse_mtl(MTL).unwrap();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        model.bind_materials(&names);

        let mut loader = |reference: &str| -> Result<SourceImage, Report<TextureError>> {
            Ok(SourceImage::new(
                texture_name(reference),
                RgbImage::from_pixel(8, 8, image::Rgb([250, 240, 200])),
            ))
        };
        let materials = load_materials(&defs, &mut loader).unwrap();
        convert(&model, materials, &ConvertOptions::default()).unwrap()
    }

    #[test]
    fn test_root_structure() {
        let scene = lamp_scene();
        let root = to_root(&scene, &ConvertOptions::default());

        assert_eq!(root.asset.generator.as_deref(), Some("obj2glb"));
        assert_eq!(root.buffers.len(), 1);
        assert_eq!(root.buffer_views.len(), scene.buffer.regions.len());
        assert_eq!(root.accessors.len(), scene.buffer.accessors.len());
        assert_eq!(root.images.len(), 2);
        assert_eq!(root.textures.len(), 2);
        assert_eq!(root.samplers.len(), 1);
        assert_eq!(root.meshes.len(), 1);
        assert_eq!(root.nodes.len(), 2);
        assert_eq!(root.extensions_used, vec![EMISSIVE_STRENGTH_EXTENSION.to_string()]);

        let material = &root.materials[0];
        assert!(material.double_sided);
        assert!(matches!(
            material.alpha_mode,
            Valid(json::material::AlphaMode::Opaque)
        ));
        assert_eq!(material.emissive_factor.0, [1.0, 0.5, 0.0]);

        let root_node = &root.nodes[0];
        assert_eq!(root_node.name.as_deref(), Some("scene"));
        assert_eq!(root_node.children.as_ref().map(Vec::len), Some(1));
        assert!(root_node.translation.is_none());
    }

    #[test]
    fn test_single_sided_option() {
        let scene = lamp_scene();
        let options = ConvertOptions::builder().double_sided(false).build();
        let root = to_root(&scene, &options);
        assert!(!root.materials[0].double_sided);
    }

    #[test]
    fn test_glb_reads_back() {
        let scene = lamp_scene();
        let mut bytes = Vec::new();
        write_glb(&scene, &ConvertOptions::default(), &mut bytes).unwrap();
        assert_eq!(&bytes[..4], b"glTF");

        let gltf = gltf::Gltf::from_slice(&bytes).unwrap();
        assert_eq!(gltf.blob.as_ref().map(Vec::len), Some(scene.buffer.data.len()));

        let document = &gltf.document;
        let scene_def = document.default_scene().unwrap();
        assert_eq!(scene_def.name(), Some("Scene"));

        let mesh = document.meshes().next().unwrap();
        assert_eq!(mesh.name(), Some("Panel"));
        let prim = mesh.primitives().next().unwrap();
        assert_eq!(prim.mode(), gltf::mesh::Mode::Triangles);
        assert_eq!(prim.indices().unwrap().count(), 6);
        assert_eq!(prim.indices().unwrap().data_type(), gltf::accessor::DataType::U32);
        assert!(prim.get(&gltf::Semantic::Normals).is_some());
        assert!(prim.get(&gltf::Semantic::TexCoords(0)).is_some());
        assert!(prim.get(&gltf::Semantic::Colors(0)).is_none());
        assert_eq!(prim.get(&gltf::Semantic::Positions).unwrap().count(), 4);

        let material = prim.material();
        assert_eq!(material.name(), Some("Lamp"));
        assert_eq!(material.alpha_mode(), gltf::material::AlphaMode::Opaque);
        assert_eq!(material.emissive_strength(), Some(4.0));
        let pbr = material.pbr_metallic_roughness();
        assert_eq!(pbr.metallic_factor(), 0.5);
        assert_eq!(pbr.base_color_texture().map(|t| t.texture().index()), Some(0));
        assert_eq!(material.emissive_texture().map(|t| t.texture().index()), Some(1));

        let texture = document.textures().next().unwrap();
        assert_eq!(texture.sampler().mag_filter(), Some(gltf::texture::MagFilter::Linear));
        assert_eq!(
            texture.sampler().min_filter(),
            Some(gltf::texture::MinFilter::LinearMipmapLinear)
        );
        match texture.source().source() {
            gltf::image::Source::View { mime_type, .. } => assert_eq!(mime_type, "image/jpeg"),
            gltf::image::Source::Uri { .. } => panic!("image should be embedded"),
        }
    }

    #[test]
    fn test_empty_scene() {
        let model = parse_obj("").unwrap();
        let scene = convert(&model, Vec::new(), &ConvertOptions::default()).unwrap();
        let mut bytes = Vec::new();
        write_glb(&scene, &ConvertOptions::default(), &mut bytes).unwrap();

        let gltf = gltf::Gltf::from_slice(&bytes).unwrap();
        assert!(gltf.blob.is_none());
        assert_eq!(gltf.document.nodes().count(), 1);
        assert_eq!(gltf.document.meshes().count(), 0);
    }
}
