use rootcause::Report;
use thiserror::Error;

use crate::export::material::TextureSlot;
use crate::export::primitive::Attribute;

/// Fatal conditions that abort a conversion run.
///
/// Recoverable conditions (degenerate shininess, empty meshes) never show up
/// here; they are corrected in place and reported through `tracing`.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("failed to decode {slot} texture '{path}' of material '{material}': {reason}")]
    TextureDecodeFailure {
        material: String,
        slot: TextureSlot,
        path: String,
        reason: String,
    },
    #[error("failed to encode texture '{texture}': {reason}")]
    TextureEncodeFailure { texture: String, reason: String },
    #[error(
        "material '{material}': color image '{color}' is {}x{} but alpha mask '{mask}' is {}x{}",
        .color_size.0, .color_size.1, .mask_size.0, .mask_size.1
    )]
    TextureDimensionMismatch {
        material: String,
        color: String,
        color_size: (u32, u32),
        mask: String,
        mask_size: (u32, u32),
    },
    #[error(
        "mesh '{mesh}', face {face}: {attribute} index {} out of range (count: {len})",
        .index.map_or_else(|| "<missing>".to_string(), |i| i.to_string())
    )]
    AttributeIndexOutOfRange {
        mesh: String,
        face: usize,
        attribute: Attribute,
        index: Option<usize>,
        len: usize,
    },
}

pub type ConvertResult<T> = Result<T, Report<ConvertError>>;
