//! Wavefront MTL material library reader.

use rootcause::Report;
use thiserror::Error;
use tracing::debug;
use winnow::Parser;
use winnow::ascii::{float, space0};
use winnow::combinator::{preceded, repeat, terminated};
use winnow::error::{ContextError, ErrMode};

type WResult<T> = Result<T, ErrMode<ContextError>>;

#[derive(Debug, Error)]
pub enum MtlError {
    #[error("line {line}: {detail}")]
    Parse { line: usize, detail: String },
    #[error("line {line}: '{keyword}' appears before any 'newmtl'")]
    NoCurrentMaterial { line: usize, keyword: String },
}

/// Legacy Blinn-Phong material parameters as declared in an MTL file.
///
/// Texture fields hold file references exactly as written; resolving and
/// decoding them is the texture loader's job.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDef {
    pub name: String,
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub emission: [f32; 3],
    pub shininess: f32,
    pub diffuse_texture: Option<String>,
    pub specular_texture: Option<String>,
    pub emissive_texture: Option<String>,
    pub alpha_texture: Option<String>,
    pub normal_texture: Option<String>,
    /// `map_Bump`/`bump`. Height maps are recorded but never loaded.
    pub bump_texture: Option<String>,
}

impl MaterialDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            diffuse: [0.0; 3],
            specular: [0.0; 3],
            emission: [0.0; 3],
            shininess: 0.0,
            diffuse_texture: None,
            specular_texture: None,
            emissive_texture: None,
            alpha_texture: None,
            normal_texture: None,
            bump_texture: None,
        }
    }

    /// The reference to use for the normal-map slot. Only `norm` feeds it.
    pub fn normal_map(&self) -> Option<&str> {
        self.normal_texture.as_deref()
    }
}

fn number(input: &mut &str) -> WResult<f32> {
    preceded(space0, float).parse_next(input)
}

fn numbers(input: &mut &str) -> WResult<Vec<f32>> {
    terminated(repeat(1.., number), space0).parse_next(input)
}

fn parse_numbers(line: usize, input: &str) -> Result<Vec<f32>, Report<MtlError>> {
    numbers.parse(input).map_err(|e| {
        Report::new(MtlError::Parse {
            line,
            detail: e.to_string(),
        })
    })
}

/// `Kd 0.5` is shorthand for `Kd 0.5 0.5 0.5`.
fn parse_color(line: usize, input: &str) -> Result<[f32; 3], Report<MtlError>> {
    match parse_numbers(line, input)?.as_slice() {
        [v] => Ok([*v; 3]),
        [r, g, b] => Ok([*r, *g, *b]),
        other => Err(Report::new(MtlError::Parse {
            line,
            detail: format!("expected 1 or 3 color components, found {}", other.len()),
        })),
    }
}

/// Texture statements may carry option flags (`-bm 0.5 normal.png`); the
/// file reference is the final token.
fn texture_reference(input: &str) -> Option<String> {
    input.split_whitespace().last().map(str::to_string)
}

/// Parse the text of an MTL file.
pub fn parse_mtl(text: &str) -> Result<Vec<MaterialDef>, Report<MtlError>> {
    let mut materials: Vec<MaterialDef> = Vec::new();

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

        if keyword == "newmtl" {
            materials.push(MaterialDef::new(rest));
            continue;
        }

        let Some(material) = materials.last_mut() else {
            return Err(Report::new(MtlError::NoCurrentMaterial {
                line,
                keyword: keyword.to_string(),
            }));
        };

        match keyword {
            "Kd" => material.diffuse = parse_color(line, rest)?,
            "Ks" => material.specular = parse_color(line, rest)?,
            "Ke" => material.emission = parse_color(line, rest)?,
            "Ns" => {
                material.shininess = match parse_numbers(line, rest)?.as_slice() {
                    [ns] => *ns,
                    other => {
                        return Err(Report::new(MtlError::Parse {
                            line,
                            detail: format!("expected 1 shininess value, found {}", other.len()),
                        }));
                    }
                }
            }
            "map_Kd" => material.diffuse_texture = texture_reference(rest),
            "map_Ks" => material.specular_texture = texture_reference(rest),
            "map_Ke" => material.emissive_texture = texture_reference(rest),
            "map_d" => material.alpha_texture = texture_reference(rest),
            "norm" => material.normal_texture = texture_reference(rest),
            "map_Bump" | "map_bump" | "bump" => material.bump_texture = texture_reference(rest),
            _ => debug!("line {line}: ignoring '{keyword}' in material '{}'", material.name),
        }
    }

    Ok(materials)
}
