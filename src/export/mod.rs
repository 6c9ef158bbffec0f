//! OBJ to glTF conversion.
//!
//! The pipeline runs leaf-first: [`primitive`] groups and welds faces,
//! [`material`] approximates materials and plans their textures,
//! [`texture`] composites and encodes them, [`buffer`] packs everything into
//! one binary buffer, and [`scene`] assembles the result. [`convert`] drives
//! the whole run and [`gltf_export`] writes it out as GLB.

pub mod buffer;
pub mod convert;
pub mod gltf_export;
pub mod material;
pub mod primitive;
pub mod scene;
pub mod texture;
