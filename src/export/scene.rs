//! Abstract scene graph handed to the container writer.

use tracing::debug;

use crate::export::buffer::{PackedBuffer, PrimitiveAccessors};
use crate::export::material::ApproxMaterial;
use crate::export::texture::ImageFormat;

/// Name of the node every mesh node hangs under.
pub const ROOT_NODE_NAME: &str = "scene";
/// Name of the single scene.
pub const SCENE_NAME: &str = "Scene";

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    pub name: String,
    pub translation: [f32; 3],
    /// Quaternion, `[x, y, z, w]`.
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
    pub children: Vec<usize>,
    pub mesh: Option<usize>,
}

impl Node {
    /// A node at the identity transform.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
            children: Vec::new(),
            mesh: None,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.translation == [0.0; 3]
            && self.rotation == [0.0, 0.0, 0.0, 1.0]
            && self.scale == [1.0; 3]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeshPrimitive {
    /// Index into [`SceneGraph::materials`].
    pub material: Option<usize>,
    pub accessors: PrimitiveAccessors,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mesh {
    pub name: String,
    pub primitives: Vec<MeshPrimitive>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Filter {
    Linear,
    LinearMipmapLinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sampler {
    pub mag_filter: Filter,
    pub min_filter: Filter,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            mag_filter: Filter::Linear,
            min_filter: Filter::LinearMipmapLinear,
        }
    }
}

/// An encoded texture image stored in the packed buffer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SceneImage {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    /// Index into [`PackedBuffer::regions`] holding the encoded bytes.
    pub region: usize,
}

/// The converted model: one scene, one root node, one child node per
/// non-empty mesh.
///
/// Material texture slots index `images`; every image is sampled with
/// `sampler`.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneGraph {
    pub name: String,
    pub root: usize,
    pub nodes: Vec<Node>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<ApproxMaterial>,
    pub images: Vec<SceneImage>,
    pub sampler: Sampler,
    pub buffer: PackedBuffer,
}

impl SceneGraph {
    /// Encoded payload of `image`.
    pub fn image_bytes(&self, image: &SceneImage) -> &[u8] {
        let region = &self.buffer.regions[image.region];
        &self.buffer.data[region.offset..region.offset + region.length]
    }
}

/// Compose the scene graph. Meshes without primitives get neither a mesh
/// nor a node.
pub fn assemble(
    meshes: Vec<Mesh>,
    materials: Vec<ApproxMaterial>,
    images: Vec<SceneImage>,
    buffer: PackedBuffer,
) -> SceneGraph {
    let mut nodes = vec![Node::new(ROOT_NODE_NAME)];
    let mut kept = Vec::with_capacity(meshes.len());

    for mesh in meshes {
        if mesh.primitives.is_empty() {
            debug!("skipping mesh '{}' with no faces", mesh.name);
            continue;
        }

        let mut node = Node::new(mesh.name.clone());
        node.mesh = Some(kept.len());
        nodes.push(node);
        kept.push(mesh);
    }

    nodes[0].children = (1..nodes.len()).collect();

    SceneGraph {
        name: SCENE_NAME.to_string(),
        root: 0,
        nodes,
        meshes: kept,
        materials,
        images,
        sampler: Sampler::default(),
        buffer,
    }
}
