use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use rootcause::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use obj2glb::{ConvertOptions, convert_obj_file, write_glb};

/// Convert a Wavefront OBJ model into a single GLB asset
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source .obj file
    input: PathBuf,

    /// Destination .glb file
    output: PathBuf,

    /// JPEG quality for opaque textures
    #[clap(long, default_value_t = 80, value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Emit single-sided materials
    #[clap(long)]
    single_sided: bool,

    /// Log per-mesh and per-texture details. `RUST_LOG` takes precedence.
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Report> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let options = ConvertOptions::builder()
        .jpeg_quality(args.jpeg_quality)
        .double_sided(!args.single_sided)
        .build();

    let scene = convert_obj_file(&args.input, &options)?;

    let file = File::create(&args.output).context("Could not create output file")?;
    let mut writer = BufWriter::new(file);
    write_glb(&scene, &options, &mut writer).context("Failed to write GLB")?;
    writer.flush().context("Failed to flush GLB")?;

    info!("wrote {}", args.output.display());

    Ok(())
}
