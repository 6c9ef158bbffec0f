//! Blinn-Phong to metallic-roughness material approximation.
//!
//! The mapping is a heuristic aimed at the common "diffuse + specular +
//! shininess" material found in OBJ/MTL exports. It is monotonic and keeps
//! every factor within glTF's valid ranges, but it is not physically exact.

use std::fmt;

use rootcause::Report;
use tracing::{debug, warn};

use crate::error::{ConvertError, ConvertResult};
use crate::export::texture::{Composite, OutputTexture, SourceImage, TextureLoader};
use crate::models::mtl::MaterialDef;

/// Texture inputs a source material may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSlot {
    Diffuse,
    Specular,
    Emissive,
    Alpha,
    Normal,
}

impl fmt::Display for TextureSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TextureSlot::Diffuse => "diffuse",
            TextureSlot::Specular => "specular",
            TextureSlot::Emissive => "emissive",
            TextureSlot::Alpha => "alpha",
            TextureSlot::Normal => "normal",
        })
    }
}

/// Decoded source textures, one optional image per slot.
#[derive(Debug, Clone, Default)]
pub struct SourceTextures {
    pub diffuse: Option<SourceImage>,
    pub specular: Option<SourceImage>,
    pub emissive: Option<SourceImage>,
    pub alpha: Option<SourceImage>,
    pub normal: Option<SourceImage>,
}

/// A legacy material with its textures decoded.
#[derive(Debug, Clone)]
pub struct SourceMaterial {
    pub name: String,
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub emission: [f32; 3],
    pub shininess: f32,
    pub textures: SourceTextures,
}

impl SourceMaterial {
    /// Material parameters from `def`, without any textures.
    pub fn untextured(def: &MaterialDef) -> Self {
        Self {
            name: def.name.clone(),
            diffuse: def.diffuse,
            specular: def.specular,
            emission: def.emission,
            shininess: def.shininess,
            textures: SourceTextures::default(),
        }
    }

    /// Resolve and decode every texture `def` references.
    pub fn load(def: &MaterialDef, loader: &mut impl TextureLoader) -> ConvertResult<Self> {
        let mut load_slot = |slot: TextureSlot, reference: Option<&str>| {
            reference
                .map(|path| {
                    loader.load(path).map_err(|err| {
                        Report::new(ConvertError::TextureDecodeFailure {
                            material: def.name.clone(),
                            slot,
                            path: path.to_string(),
                            reason: err.to_string(),
                        })
                    })
                })
                .transpose()
        };

        let textures = SourceTextures {
            diffuse: load_slot(TextureSlot::Diffuse, def.diffuse_texture.as_deref())?,
            specular: load_slot(TextureSlot::Specular, def.specular_texture.as_deref())?,
            emissive: load_slot(TextureSlot::Emissive, def.emissive_texture.as_deref())?,
            alpha: load_slot(TextureSlot::Alpha, def.alpha_texture.as_deref())?,
            normal: load_slot(TextureSlot::Normal, def.normal_map())?,
        };

        Ok(Self {
            textures,
            ..Self::untextured(def)
        })
    }
}

/// A metallic-roughness material.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ApproxMaterial {
    pub name: String,
    /// Set when the base color texture carries a meaningful alpha channel.
    pub blending: bool,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    /// Alpha is always 1.0; transparency lives in the texture.
    pub base_color_factor: [f32; 4],
    pub emissive_factor: [f32; 3],
    /// `>= 1.0`; only values above 1.0 are worth emitting.
    pub emissive_strength: f32,
    pub base_color_texture: Option<usize>,
    pub emissive_texture: Option<usize>,
    pub normal_texture: Option<usize>,
}

impl ApproxMaterial {
    pub fn has_emissive_strength(&self) -> bool {
        self.emissive_strength > 1.0
    }
}

fn length(v: [f32; 3]) -> f32 {
    v.iter().map(|c| c * c).sum::<f32>().sqrt()
}

/// `|specular| / (|specular| + |diffuse|)`, or 0 for a black material.
pub fn metallic_factor(diffuse: [f32; 3], specular: [f32; 3]) -> f32 {
    let diffuse = length(diffuse);
    let specular = length(specular);
    if specular + diffuse > 0.0 {
        specular / (specular + diffuse)
    } else {
        0.0
    }
}

pub fn base_color_factor(diffuse: [f32; 3], specular: [f32; 3]) -> [f32; 4] {
    let [r, g, b] = std::array::from_fn(|i| (diffuse[i] + specular[i]).clamp(0.0, 1.0));
    [r, g, b, 1.0]
}

/// Split an emission color into a `[0, 1]` factor and a strength `>= 1`
/// such that `factor * strength` reproduces the (non-negative) input.
pub fn normalize_emission(emission: [f32; 3]) -> ([f32; 3], f32) {
    let emission = emission.map(|c| c.max(0.0));
    let strength = emission.iter().copied().fold(1.0f32, f32::max);
    (emission.map(|c| c / strength), strength)
}

/// Map a Blinn-Phong specular exponent onto a GGX-style roughness.
///
/// Returns `None` when the exponent makes the mapping non-finite
/// (`shininess <= -3` or NaN).
pub fn roughness_from_shininess(shininess: f32) -> Option<f32> {
    let denominator = 2f32.powf((shininess + 3.0) * 0.5) - 1.0;
    if !(denominator > 0.0) {
        return None;
    }
    let r4 = 3.0 / denominator;
    r4.is_finite().then(|| r4.sqrt().sqrt().clamp(0.0, 1.0))
}

/// Factor-only approximation of `material`; texture slots are left empty.
pub fn approximate(material: &SourceMaterial) -> ApproxMaterial {
    let roughness_factor = roughness_from_shininess(material.shininess).unwrap_or_else(|| {
        warn!(
            "material '{}': shininess {} has no finite roughness, using 1.0",
            material.name, material.shininess
        );
        1.0
    });
    let (emissive_factor, emissive_strength) = normalize_emission(material.emission);

    ApproxMaterial {
        name: material.name.clone(),
        blending: false,
        metallic_factor: metallic_factor(material.diffuse, material.specular),
        roughness_factor,
        base_color_factor: base_color_factor(material.diffuse, material.specular),
        emissive_factor,
        emissive_strength,
        base_color_texture: None,
        emissive_texture: None,
        normal_texture: None,
    }
}

/// Output textures a material needs, before compositing.
#[derive(Debug, Default)]
pub struct TexturePlan {
    pub base_color: Option<Composite>,
    pub emissive: Option<Composite>,
    pub normal: Option<Composite>,
}

/// Decide which output texture each slot gets.
///
/// | diffuse | alpha mask | base color slot           |
/// |---------|------------|---------------------------|
/// | yes     | yes        | diffuse RGB + mask alpha  |
/// | yes     | no         | diffuse RGB, opaque       |
/// | no      | yes        | white RGB + mask alpha    |
/// | no      | no         | none (factor only)        |
///
/// Emissive and normal maps become opaque textures on their own. Specular
/// maps have no metallic-roughness counterpart and are dropped.
pub fn plan_textures(textures: SourceTextures) -> TexturePlan {
    let base_color = match (textures.diffuse, textures.alpha) {
        (Some(color), Some(mask)) => Some(Composite::ColorWithMask { color, mask }),
        (Some(color), None) => Some(Composite::Opaque(color)),
        (None, Some(mask)) => Some(Composite::MaskOnly(mask)),
        (None, None) => None,
    };

    if let Some(specular) = &textures.specular {
        debug!("specular map '{}' has no output slot", specular.name);
    }

    TexturePlan {
        base_color,
        emissive: textures.emissive.map(Composite::Opaque),
        normal: textures.normal.map(Composite::Opaque),
    }
}

/// Approximate `material` and composite its textures, appending them to
/// `textures`. Source images are consumed and released here.
pub fn convert_material(
    material: SourceMaterial,
    textures: &mut Vec<OutputTexture>,
) -> ConvertResult<ApproxMaterial> {
    let mut approx = approximate(&material);
    let plan = plan_textures(material.textures);

    let mut push = |composite: Composite| -> ConvertResult<(usize, bool)> {
        let has_alpha = composite.has_alpha();
        textures.push(composite.composite(&material.name)?);
        Ok((textures.len() - 1, has_alpha))
    };

    if let Some(composite) = plan.base_color {
        let (index, has_alpha) = push(composite)?;
        approx.base_color_texture = Some(index);
        approx.blending = has_alpha;
    }
    if let Some(composite) = plan.emissive {
        approx.emissive_texture = Some(push(composite)?.0);
    }
    if let Some(composite) = plan.normal {
        approx.normal_texture = Some(push(composite)?.0);
    }

    Ok(approx)
}

#[cfg(test)]
mod tests {
    use image::RgbImage;

    use super::*;
    use crate::export::texture::ImageFormat;

    fn image(name: &str, width: u32, height: u32, rgb: [u8; 3]) -> SourceImage {
        SourceImage::new(name, RgbImage::from_pixel(width, height, image::Rgb(rgb)))
    }

    fn material(diffuse: [f32; 3], specular: [f32; 3], shininess: f32) -> SourceMaterial {
        SourceMaterial {
            name: "test".to_string(),
            diffuse,
            specular,
            emission: [0.0; 3],
            shininess,
            textures: SourceTextures::default(),
        }
    }

    #[test]
    fn test_metallic_factor() {
        assert_eq!(metallic_factor([0.0; 3], [0.0; 3]), 0.0);
        assert_eq!(metallic_factor([0.8, 0.2, 0.2], [0.0; 3]), 0.0);
        assert_eq!(metallic_factor([0.0; 3], [0.5, 0.5, 0.5]), 1.0);
        assert!((metallic_factor([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_base_color_clamps() {
        assert_eq!(
            base_color_factor([0.75, 0.5, -0.5], [0.5, 0.25, 0.0]),
            [1.0, 0.75, 0.0, 1.0]
        );
    }

    #[test]
    fn test_emission_normalization() {
        let samples = [
            [0.0, 0.0, 0.0],
            [0.5, 0.2, 0.1],
            [1.0, 1.0, 1.0],
            [3.0, 1.5, 0.0],
            [10.0, 20.0, 5.0],
        ];
        for emission in samples {
            let (factor, strength) = normalize_emission(emission);
            assert!(strength >= 1.0);
            for i in 0..3 {
                assert!((0.0..=1.0).contains(&factor[i]), "{emission:?} -> {factor:?}");
                assert!((factor[i] * strength - emission[i]).abs() < 1e-5);
            }
        }

        let (factor, strength) = normalize_emission([4.0, 2.0, 1.0]);
        assert_eq!(strength, 4.0);
        assert_eq!(factor, [1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_roughness_reference_values() {
        // 3 / (2^17.5 - 1), fourth root.
        let r = roughness_from_shininess(32.0).unwrap();
        assert!((r - 0.063427).abs() < 1e-4, "{r}");
        // Low exponents saturate at fully rough.
        assert_eq!(roughness_from_shininess(0.0), Some(1.0));
        // Huge exponents saturate at perfectly smooth.
        assert_eq!(roughness_from_shininess(1.0e6), Some(0.0));
    }

    #[test]
    fn test_roughness_monotonic() {
        let shininess: Vec<f32> = (0..400).map(|i| -2.9 + i as f32 * 2.5).collect();
        let roughness: Vec<f32> = shininess
            .iter()
            .map(|&s| roughness_from_shininess(s).unwrap())
            .collect();
        for pair in roughness.windows(2) {
            assert!(pair[0] >= pair[1], "{pair:?}");
        }
    }

    #[test]
    fn test_degenerate_shininess() {
        assert_eq!(roughness_from_shininess(-3.0), None);
        assert_eq!(roughness_from_shininess(-10.0), None);
        assert_eq!(roughness_from_shininess(f32::NAN), None);

        let approx = approximate(&material([0.5; 3], [0.0; 3], -3.0));
        assert_eq!(approx.roughness_factor, 1.0);
    }

    #[test]
    fn test_approximate_factors() {
        let mut source = material([0.8, 0.2, 0.2], [0.0; 3], 32.0);
        source.emission = [2.0, 1.0, 0.0];
        let approx = approximate(&source);
        assert_eq!(approx.metallic_factor, 0.0);
        assert_eq!(approx.base_color_factor, [0.8, 0.2, 0.2, 1.0]);
        assert_eq!(approx.emissive_factor, [1.0, 0.5, 0.0]);
        assert_eq!(approx.emissive_strength, 2.0);
        assert!(approx.has_emissive_strength());
        assert!(!approx.blending);
    }

    #[test]
    fn test_decision_table() {
        let plan = |diffuse: bool, alpha: bool| {
            plan_textures(SourceTextures {
                diffuse: diffuse.then(|| image("d", 1, 1, [1, 2, 3])),
                alpha: alpha.then(|| image("a", 1, 1, [9, 9, 9])),
                ..Default::default()
            })
            .base_color
        };

        assert!(matches!(plan(true, true), Some(Composite::ColorWithMask { .. })));
        assert!(matches!(plan(true, false), Some(Composite::Opaque(_))));
        assert!(matches!(plan(false, true), Some(Composite::MaskOnly(_))));
        assert!(plan(false, false).is_none());
    }

    #[test]
    fn test_specular_map_has_no_slot() {
        let plan = plan_textures(SourceTextures {
            specular: Some(image("s", 1, 1, [0; 3])),
            ..Default::default()
        });
        assert!(plan.base_color.is_none());
        assert!(plan.emissive.is_none());
        assert!(plan.normal.is_none());
    }

    #[test]
    fn test_convert_material_slots() {
        let mut source = material([1.0; 3], [0.0; 3], 10.0);
        source.textures = SourceTextures {
            diffuse: Some(image("color", 2, 2, [10, 20, 30])),
            alpha: Some(image("mask", 2, 2, [128, 0, 0])),
            emissive: Some(image("glow", 4, 4, [255, 0, 0])),
            normal: Some(image("bumps", 8, 8, [128, 128, 255])),
            specular: None,
        };

        let mut textures = vec![
            Composite::Opaque(image("existing", 1, 1, [0; 3]))
                .composite("other")
                .unwrap(),
        ];
        let approx = convert_material(source, &mut textures).unwrap();

        assert!(approx.blending);
        assert_eq!(approx.base_color_texture, Some(1));
        assert_eq!(approx.emissive_texture, Some(2));
        assert_eq!(approx.normal_texture, Some(3));
        assert_eq!(textures[1].format, ImageFormat::Png);
        assert_eq!(textures[2].format, ImageFormat::Jpeg);
        assert_eq!(textures[3].name, "bumps");
    }

    #[test]
    fn test_opaque_diffuse_does_not_blend() {
        let mut source = material([1.0; 3], [0.0; 3], 10.0);
        source.textures.diffuse = Some(image("color", 2, 2, [10, 20, 30]));

        let mut textures = Vec::new();
        let approx = convert_material(source, &mut textures).unwrap();
        assert!(!approx.blending);
        assert_eq!(textures[0].format, ImageFormat::Jpeg);
    }

    #[test]
    fn test_mismatched_mask_is_fatal() {
        let mut source = material([1.0; 3], [0.0; 3], 10.0);
        source.textures.diffuse = Some(image("color", 2, 2, [10, 20, 30]));
        source.textures.alpha = Some(image("mask", 3, 2, [255, 0, 0]));

        let err = convert_material(source, &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConvertError::TextureDimensionMismatch { .. }
        ));
    }
}
