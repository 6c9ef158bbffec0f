//! Texture loading, compositing and encoding for glTF export.

use std::cell::OnceCell;
use std::path::PathBuf;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};
use rootcause::Report;
use thiserror::Error;
use tracing::debug;

use crate::error::{ConvertError, ConvertResult};

#[derive(Debug, Error)]
pub enum TextureError {
    #[error("texture file not found: {0}")]
    NotFound(String),
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode PNG: {0}")]
    PngEncode(String),
    #[error("failed to encode JPEG: {0}")]
    JpegEncode(String),
}

/// A decoded 3-channel source image.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub name: String,
    pub pixels: RgbImage,
}

impl SourceImage {
    pub fn new(name: impl Into<String>, pixels: RgbImage) -> Self {
        Self {
            name: name.into(),
            pixels,
        }
    }
}

/// Container format of an output texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

/// How one output texture is built from source images.
#[derive(Debug, Clone)]
pub enum Composite {
    /// RGB with full opacity.
    Opaque(SourceImage),
    /// RGB from `color`, alpha from the first channel of `mask`.
    ColorWithMask { color: SourceImage, mask: SourceImage },
    /// White RGB, alpha from the first channel of the mask.
    MaskOnly(SourceImage),
}

impl Composite {
    pub fn has_alpha(&self) -> bool {
        !matches!(self, Composite::Opaque(_))
    }

    /// PNG when the alpha channel matters, JPEG otherwise.
    pub fn format(&self) -> ImageFormat {
        if self.has_alpha() {
            ImageFormat::Png
        } else {
            ImageFormat::Jpeg
        }
    }

    /// Build the RGBA image. Source images are consumed.
    pub fn composite(self, material: &str) -> ConvertResult<OutputTexture> {
        let format = self.format();
        let (name, pixels) = match self {
            Composite::Opaque(image) => {
                let src = &image.pixels;
                let pixels = RgbaImage::from_fn(src.width(), src.height(), |x, y| {
                    let [r, g, b] = src.get_pixel(x, y).0;
                    Rgba([r, g, b, 255])
                });
                (image.name, pixels)
            }
            Composite::ColorWithMask { color, mask } => {
                if color.pixels.dimensions() != mask.pixels.dimensions() {
                    return Err(Report::new(ConvertError::TextureDimensionMismatch {
                        material: material.to_string(),
                        color: color.name,
                        color_size: color.pixels.dimensions(),
                        mask: mask.name,
                        mask_size: mask.pixels.dimensions(),
                    }));
                }
                let (width, height) = color.pixels.dimensions();
                let pixels = RgbaImage::from_fn(width, height, |x, y| {
                    let [r, g, b] = color.pixels.get_pixel(x, y).0;
                    Rgba([r, g, b, mask.pixels.get_pixel(x, y).0[0]])
                });
                (color.name, pixels)
            }
            Composite::MaskOnly(mask) => {
                let src = &mask.pixels;
                let pixels = RgbaImage::from_fn(src.width(), src.height(), |x, y| {
                    Rgba([255, 255, 255, src.get_pixel(x, y).0[0]])
                });
                (mask.name, pixels)
            }
        };

        debug!(
            "material '{material}': composited {} {}x{} texture '{name}'",
            format.mime_type(),
            pixels.width(),
            pixels.height()
        );

        Ok(OutputTexture::new(name, pixels, format))
    }
}

/// A composited RGBA texture, encoded on first use.
#[derive(Debug, Clone)]
pub struct OutputTexture {
    pub name: String,
    pub pixels: RgbaImage,
    pub format: ImageFormat,
    encoded: OnceCell<Vec<u8>>,
}

impl OutputTexture {
    pub fn new(name: impl Into<String>, pixels: RgbaImage, format: ImageFormat) -> Self {
        Self {
            name: name.into(),
            pixels,
            format,
            encoded: OnceCell::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn is_encoded(&self) -> bool {
        self.encoded.get().is_some()
    }

    /// The encoded container bytes. Encoding happens once; later calls return
    /// the cached payload.
    ///
    /// JPEG output drops the alpha channel, which is always opaque for
    /// textures that select JPEG.
    pub fn encoded(&self, jpeg_quality: u8) -> Result<&[u8], Report<TextureError>> {
        if let Some(bytes) = self.encoded.get() {
            return Ok(bytes.as_slice());
        }

        let (width, height) = self.pixels.dimensions();
        let mut buf = Vec::new();
        match self.format {
            ImageFormat::Png => {
                PngEncoder::new(&mut buf)
                    .write_image(self.pixels.as_raw(), width, height, ExtendedColorType::Rgba8)
                    .map_err(|e| Report::new(TextureError::PngEncode(e.to_string())))?;
            }
            ImageFormat::Jpeg => {
                let rgb = RgbImage::from_fn(width, height, |x, y| {
                    let [r, g, b, _] = self.pixels.get_pixel(x, y).0;
                    Rgb([r, g, b])
                });
                JpegEncoder::new_with_quality(&mut buf, jpeg_quality)
                    .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                    .map_err(|e| Report::new(TextureError::JpegEncode(e.to_string())))?;
            }
        }

        Ok(self.encoded.get_or_init(|| buf).as_slice())
    }
}

/// Resolves a material's texture reference to a decoded image.
pub trait TextureLoader {
    fn load(&mut self, reference: &str) -> Result<SourceImage, Report<TextureError>>;
}

impl<F> TextureLoader for F
where
    F: FnMut(&str) -> Result<SourceImage, Report<TextureError>>,
{
    fn load(&mut self, reference: &str) -> Result<SourceImage, Report<TextureError>> {
        self(reference)
    }
}

/// Image name for a texture reference: the file stem, accepting either path
/// separator.
///
/// E.g. `textures\brick_d.jpg` → `brick_d`.
pub fn texture_name(reference: &str) -> String {
    let file = reference.rsplit(['/', '\\']).next().unwrap_or(reference);
    file.rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(file)
        .to_string()
}

/// Loads textures from disk.
///
/// A reference is tried as given first, then relative to `base_dir`
/// (normally the directory holding the model).
#[derive(Debug, Clone)]
pub struct FileTextureLoader {
    base_dir: PathBuf,
}

impl FileTextureLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(reference);
        if direct.is_file() {
            return Some(direct);
        }
        let relative = self.base_dir.join(reference);
        relative.is_file().then_some(relative)
    }
}

impl TextureLoader for FileTextureLoader {
    fn load(&mut self, reference: &str) -> Result<SourceImage, Report<TextureError>> {
        let path = self
            .resolve(reference)
            .ok_or_else(|| Report::new(TextureError::NotFound(reference.to_string())))?;

        let decoded = image::open(&path)
            .map_err(|e| Report::new(TextureError::Decode(e.to_string())))?;
        debug!(
            "loaded texture {} ({}x{})",
            path.display(),
            decoded.width(),
            decoded.height()
        );

        Ok(SourceImage::new(texture_name(reference), decoded.to_rgb8()))
    }
}
