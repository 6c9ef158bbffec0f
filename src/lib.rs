/// Fatal conversion errors
pub mod error;
/// The conversion pipeline and GLB writer
pub mod export;
/// Wavefront OBJ/MTL readers
pub mod models;

pub use export::convert::{ConvertOptions, convert, convert_obj_file, load_materials};
pub use export::gltf_export::write_glb;
