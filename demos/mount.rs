//! Serve a disksimfs session through FUSE.
//!
//! cargo run --features fuse --example mount -- /mnt/slow -o read_delay=50

use std::path::PathBuf;

use clap::Parser;
use disksimfs::{fuse, DisksimFsType};

#[derive(Parser)]
#[command(about = "Mount an in-memory filesystem with injected I/O latency")]
struct Args {
    /// Directory to mount on
    mountpoint: PathBuf,
    /// Mount options, e.g. `mode=700,read_delay=50,write_delay=20`
    #[arg(short = 'o', long, default_value = "")]
    options: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let sb = DisksimFsType::default().mount(&args.options)?;
    fuse::mount(sb, &args.mountpoint)?;
    Ok(())
}
