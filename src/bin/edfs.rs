//! CLI entry point (spec.md §6): `edfs [-o <opt>]... <image-file> <mountpoint>`.
//!
//! Mirrors `edfuse.c`'s argument shape — an image file and a mountpoint,
//! plus libfuse-style `-o` passthrough options — but parsed with `clap`
//! instead of hand-rolled `getopt`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use edfs::ops::EdfsCore;

#[derive(Parser, Debug)]
#[command(name = "edfs", about = "Mount an EdFS image as a FUSE filesystem")]
struct Cli {
    /// Mount option, passed through to the FUSE session. May be repeated.
    #[arg(short = 'o', long = "option", value_name = "OPT")]
    options: Vec<String>,

    /// Path to the EdFS image file to mount.
    image: PathBuf,

    /// Directory to mount the filesystem at.
    mountpoint: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let core = match EdfsCore::open(&cli.image) {
        Ok(core) => core,
        Err(e) => {
            error!("failed to open image {}: {e}", cli.image.display());
            return ExitCode::FAILURE;
        }
    };

    match edfs::fuse_host::mount(core, &cli.mountpoint, &cli.options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("mount of {} failed: {e}", cli.mountpoint.display());
            ExitCode::FAILURE
        }
    }
}
