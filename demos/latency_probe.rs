//! Mount an in-memory session, time a batch of reads and writes against it
//! and print the session counters as JSON.
//!
//! cargo run --example latency_probe -- -o read_delay=20,write_delay=5 -n 10

use std::time::Instant;

use clap::Parser;
use disksimfs::{DisksimFsType, Owner};
use log::info;

#[derive(Parser)]
#[command(about = "Measure the latency injected by a disksimfs session")]
struct Args {
    /// Mount options, e.g. `mode=700,read_delay=50,write_delay=20`
    #[arg(short = 'o', long, default_value = "")]
    options: String,
    /// Number of write/read pairs
    #[arg(short = 'n', long, default_value_t = 5)]
    iterations: u32,
    /// Bytes per request
    #[arg(short = 's', long, default_value_t = 4096)]
    size: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let fs = DisksimFsType::default();
    let sb = fs.mount(&args.options)?;
    info!("mounted with options `{}`", sb.show_options());

    let root = sb.root()?;
    let file = sb.create(&root, "probe", 0o644, Owner::ROOT)?;
    let payload = vec![0xa5u8; args.size];

    let start = Instant::now();
    for i in 0..args.iterations as u64 {
        sb.write(&file, i * args.size as u64, &payload)?;
    }
    let write_elapsed = start.elapsed();

    let start = Instant::now();
    for i in 0..args.iterations as u64 {
        sb.read(&file, i * args.size as u64, args.size)?;
    }
    let read_elapsed = start.elapsed();

    let per_op = |total: std::time::Duration| total.as_secs_f64() * 1000.0 / args.iterations.max(1) as f64;
    println!(
        "writes: {} in {:?} ({:.2} ms/op)",
        args.iterations,
        write_elapsed,
        per_op(write_elapsed)
    );
    println!(
        "reads:  {} in {:?} ({:.2} ms/op)",
        args.iterations,
        read_elapsed,
        per_op(read_elapsed)
    );
    println!("{}", sb.stats().to_json()?);

    fs.kill_sb(&sb);
    Ok(())
}
