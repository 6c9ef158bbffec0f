//! Flat binary buffer packing with aligned regions and accessor metadata.

use tracing::debug;

use crate::export::primitive::Primitive;

/// How a region is bound when uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BufferTarget {
    /// Vertex attribute stream.
    ArrayBuffer,
    /// Index stream.
    ElementArrayBuffer,
}

/// A byte range of the packed buffer. `target` is `None` for opaque blobs
/// such as encoded images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferRegion {
    /// Always a multiple of 4.
    pub offset: usize,
    /// Unpadded payload length.
    pub length: usize,
    pub target: Option<BufferTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ComponentType {
    U32,
    F32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ElementShape {
    Scalar,
    Vec2,
    Vec3,
}

impl ElementShape {
    pub fn components(self) -> usize {
        match self {
            ElementShape::Scalar => 1,
            ElementShape::Vec2 => 2,
            ElementShape::Vec3 => 3,
        }
    }
}

/// Per-component minimum and maximum of an accessor's elements.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

/// Typed view of one [`BufferRegion`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Accessor {
    /// Index into [`PackedBuffer::regions`].
    pub region: usize,
    pub component_type: ComponentType,
    pub shape: ElementShape,
    pub count: usize,
    /// Present for position and index accessors.
    pub bounds: Option<Bounds>,
}

/// Accessor indices for one packed primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrimitiveAccessors {
    pub indices: usize,
    pub position: usize,
    pub normal: Option<usize>,
    pub color: Option<usize>,
    pub texcoord: Option<usize>,
}

/// The finished buffer and its descriptors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackedBuffer {
    /// Length is a multiple of 4.
    pub data: Vec<u8>,
    pub regions: Vec<BufferRegion>,
    pub accessors: Vec<Accessor>,
}

/// Appends byte streams into one growing buffer.
///
/// Regions come out in append order, so their offsets are strictly
/// increasing and never overlap.
#[derive(Debug, Default)]
pub struct BufferPacker {
    data: Vec<u8>,
    regions: Vec<BufferRegion>,
    accessors: Vec<Accessor>,
}

fn pad_to_4(data: &mut Vec<u8>) {
    while data.len() % 4 != 0 {
        data.push(0);
    }
}

fn bounding_coords(points: impl Iterator<Item = [f32; 3]>) -> ([f32; 3], [f32; 3]) {
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for p in points {
        for i in 0..3 {
            min[i] = f32::min(min[i], p[i]);
            max[i] = f32::max(max[i], p[i]);
        }
    }
    (min, max)
}

fn float_bytes<const N: usize>(items: impl Iterator<Item = [f32; N]>) -> Vec<u8> {
    items
        .flat_map(|item| item.into_iter().flat_map(f32::to_le_bytes))
        .collect()
}

impl BufferPacker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn regions(&self) -> &[BufferRegion] {
        &self.regions
    }

    pub fn accessors(&self) -> &[Accessor] {
        &self.accessors
    }

    /// Copy `bytes` into the buffer at the current (aligned) end and pad the
    /// buffer back to a multiple of 4. Returns the new region's index.
    ///
    /// `bytes` must not be empty: an empty region would share its offset
    /// with the next one.
    pub fn append(&mut self, bytes: &[u8], target: Option<BufferTarget>) -> usize {
        debug_assert!(!bytes.is_empty(), "empty buffer region");
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        pad_to_4(&mut self.data);

        self.regions.push(BufferRegion {
            offset,
            length: bytes.len(),
            target,
        });
        self.regions.len() - 1
    }

    /// Record an accessor over `region`. Returns the accessor's index.
    pub fn append_accessor(
        &mut self,
        region: usize,
        component_type: ComponentType,
        shape: ElementShape,
        count: usize,
        bounds: Option<Bounds>,
    ) -> usize {
        self.accessors.push(Accessor {
            region,
            component_type,
            shape,
            count,
            bounds,
        });
        self.accessors.len() - 1
    }

    /// Pack an encoded image as an opaque region.
    pub fn append_blob(&mut self, bytes: &[u8]) -> usize {
        self.append(bytes, None)
    }

    fn append_floats<const N: usize>(
        &mut self,
        items: impl Iterator<Item = [f32; N]>,
        count: usize,
        shape: ElementShape,
        bounds: Option<Bounds>,
    ) -> usize {
        let region = self.append(&float_bytes(items), Some(BufferTarget::ArrayBuffer));
        self.append_accessor(region, ComponentType::F32, shape, count, bounds)
    }

    /// Pack a welded primitive as indices, positions, normals, colors, then
    /// UVs. Optional streams are written only when the primitive's layout
    /// carries them.
    pub fn pack_primitive(&mut self, primitive: &Primitive) -> PrimitiveAccessors {
        let vertices = &primitive.vertices;
        let count = vertices.len();

        let index_bytes: Vec<u8> = primitive
            .triangles
            .iter()
            .flatten()
            .flat_map(|i| i.to_le_bytes())
            .collect();
        let region = self.append(&index_bytes, Some(BufferTarget::ElementArrayBuffer));
        let indices = self.append_accessor(
            region,
            ComponentType::U32,
            ElementShape::Scalar,
            primitive.index_count(),
            Some(Bounds {
                min: vec![0.0],
                max: vec![count.saturating_sub(1) as f64],
            }),
        );

        let (min, max) = bounding_coords(vertices.iter().map(|v| v.position));
        let position = self.append_floats(
            vertices.iter().map(|v| v.position),
            count,
            ElementShape::Vec3,
            Some(Bounds {
                min: min.map(f64::from).to_vec(),
                max: max.map(f64::from).to_vec(),
            }),
        );

        let layout = primitive.layout;
        let normal = layout.normals.then(|| {
            self.append_floats(
                vertices.iter().map(|v| v.normal.unwrap_or_default()),
                count,
                ElementShape::Vec3,
                None,
            )
        });
        let color = layout.colors.then(|| {
            self.append_floats(
                vertices.iter().map(|v| v.color.unwrap_or_default()),
                count,
                ElementShape::Vec3,
                None,
            )
        });
        let texcoord = layout.texcoords.then(|| {
            self.append_floats(
                vertices.iter().map(|v| v.uv.unwrap_or_default()),
                count,
                ElementShape::Vec2,
                None,
            )
        });

        debug!(
            "packed primitive: {count} vertices, {} indices, buffer now {} bytes",
            primitive.index_count(),
            self.data.len()
        );

        PrimitiveAccessors {
            indices,
            position,
            normal,
            color,
            texcoord,
        }
    }

    pub fn finish(self) -> PackedBuffer {
        PackedBuffer {
            data: self.data,
            regions: self.regions,
            accessors: self.accessors,
        }
    }
}
