//! walblock Simulation Binary
//!
//! Drives a randomized write/discard/flush/read workload against a walblock
//! device backed by memory or files and verifies every read against a model.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{fmt, EnvFilter};
use walblock::{BlockDevice, Config, FileDevice, MemoryDevice, ReadStrategyKind, WalDevice, WriteFlags, SECTOR_SIZE};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    Fast,
    DeviceThrough,
}

/// walblock workload simulator
#[derive(Parser, Debug)]
#[command(name = "walblock-sim")]
#[command(about = "Randomized workload against a write-ahead-logged block device")]
#[command(version)]
struct Args {
    /// Directory for file-backed devices (in-memory devices if omitted)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Data device size in MiB
    #[arg(long, default_value = "16")]
    data_mb: u64,

    /// Log device size in MiB
    #[arg(long, default_value = "8")]
    log_mb: u64,

    /// Number of operations
    #[arg(short, long, default_value = "10000")]
    ops: usize,

    /// Largest write in sectors
    #[arg(long, default_value = "64")]
    max_sectors: u32,

    /// RNG seed
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Read strategy
    #[arg(long, value_enum, default_value = "fast")]
    strategy: Strategy,

    /// Per-logpack budget in physical blocks
    #[arg(long, default_value = "256")]
    max_logpack_pb: u32,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,walblock=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::info!("walblock-sim v{}", walblock::VERSION);

    if let Err(e) = run(&args) {
        tracing::error!("simulation failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> walblock::Result<()> {
    let data_sectors = args.data_mb * 1024 * 1024 / SECTOR_SIZE as u64;
    let log_sectors = args.log_mb * 1024 * 1024 / SECTOR_SIZE as u64;

    let (log, data): (Arc<dyn BlockDevice>, Arc<dyn BlockDevice>) = match &args.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            tracing::info!("File devices in {}", dir.display());
            (
                Arc::new(FileDevice::create(&dir.join("log.img"), log_sectors)?),
                Arc::new(FileDevice::create(&dir.join("data.img"), data_sectors)?),
            )
        }
        None => (
            Arc::new(MemoryDevice::new(log_sectors)),
            Arc::new(MemoryDevice::new(data_sectors)),
        ),
    };

    let strategy = match args.strategy {
        Strategy::Fast => ReadStrategyKind::Fast,
        Strategy::DeviceThrough => ReadStrategyKind::DeviceThrough,
    };
    let config = Config::builder()
        .read_strategy(strategy)
        .max_logpack_pb(args.max_logpack_pb)
        .build();
    let device = WalDevice::open(config, log, data)?;

    let max_sectors = u64::from(args.max_sectors)
        .min(device.max_write_sectors())
        .min(data_sectors)
        .max(1);
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut model = vec![0u8; data_sectors as usize * SECTOR_SIZE];
    let mut mismatches = 0usize;

    for op in 0..args.ops {
        let sectors = rng.gen_range(1..=max_sectors);
        let pos = rng.gen_range(0..=data_sectors - sectors);
        let range = pos as usize * SECTOR_SIZE..(pos + sectors) as usize * SECTOR_SIZE;
        match rng.gen_range(0..100) {
            0..=59 => {
                let fill: u8 = rng.gen();
                let buf = vec![fill; range.len()];
                let flags = WriteFlags {
                    flush: false,
                    fua: rng.gen_bool(0.05),
                };
                device.write_with_flags(pos, &buf, flags)?;
                model[range].copy_from_slice(&buf);
            }
            60..=64 => {
                device.discard(pos, sectors as u32)?;
                model[range].fill(0);
            }
            65..=69 => device.flush()?,
            _ => {
                let got = device.read(pos, sectors as u32)?;
                if got[..] != model[range] {
                    mismatches += 1;
                    tracing::warn!(op, pos, sectors, "read mismatch");
                }
            }
        }
    }

    let stats = device.stats();
    tracing::info!(
        ops = args.ops,
        mismatches,
        packs = stats.pipeline.packs_created,
        latest_lsid = stats.pipeline.latest_lsid,
        acked = stats.pipeline.writes_acked,
        delayed = stats.pipeline.writes_delayed,
        copied_sectors = stats.pipeline.copied_sectors,
        overwritten = stats.pending.overwritten,
        stops = stats.pending.stops,
        "workload finished"
    );
    device.close()?;

    if mismatches > 0 {
        return Err(walblock::WalError::Corruption(format!(
            "{mismatches} reads disagreed with the model"
        )));
    }
    tracing::info!("all reads verified");
    Ok(())
}
