//! `zbdctl` — a small inspection/demonstration CLI over `zbd_core`.
//!
//! This is a harness for exercising the Zoned Block Device adaptation core,
//! analogous to `blkzone report` plus a synthetic-workload driver. It is
//! explicitly not the "upstream workload generator" the library treats as an
//! external collaborator.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};
use zbd_core::io::BufferPool;
#[cfg(target_os = "linux")]
use zbd_core::zbd::backend::LinuxZoneBackend;
use zbd_core::zbd::backend::{FakeZoneBackend, ZoneIoctlBackend};
use zbd_core::zbd::{AdjustOutcome, Direction, IoUnit, NoopQuiesce, Workload, ZoneTable};

#[derive(Parser)]
#[command(name = "zbdctl")]
#[command(about = "Inspect and exercise the zoned block device I/O adaptation core")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (equivalent to RUST_LOG=debug)
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the zone layout of a device, or a synthetic device for
    /// demonstration when `--synthetic` is given.
    Inspect {
        /// Path to a zoned block device (real devices require root and
        /// Linux; ignored if `--synthetic` is given).
        device: Option<PathBuf>,

        /// Build a synthetic zoned device instead of probing `device`:
        /// `<nr_zones>:<zone_size_sectors>`.
        #[arg(long, value_name = "NR_ZONES:ZONE_SIZE_SECTORS")]
        synthetic: Option<String>,

        /// Print the zone table as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Reset a contiguous span of zones on a synthetic device and print the
    /// resulting write pointers.
    Reset {
        /// `<nr_zones>:<zone_size_sectors>` describing the synthetic device.
        #[arg(long, value_name = "NR_ZONES:ZONE_SIZE_SECTORS", default_value = "8:1024")]
        synthetic: String,

        /// First zone index to reset.
        #[arg(long, default_value_t = 0)]
        from_zone: u64,

        /// Number of zones to reset, starting at `from_zone`.
        #[arg(long, default_value_t = 1)]
        count: u64,
    },

    /// Drive a synthetic workload of read/write/trim candidates through
    /// `adjust_block` from several threads at once, demonstrating the
    /// zone-granularity locking protocol.
    Bench {
        /// `<nr_zones>:<zone_size_sectors>` describing the synthetic device.
        #[arg(long, value_name = "NR_ZONES:ZONE_SIZE_SECTORS", default_value = "64:2048")]
        synthetic: String,

        /// Number of worker threads; defaults to the host's logical CPU count.
        #[arg(long)]
        threads: Option<usize>,

        /// How long to run, in seconds.
        #[arg(long, default_value_t = 2)]
        duration_secs: u64,

        /// Minimum block size, in bytes, for generated requests.
        #[arg(long, default_value_t = 4096)]
        min_bs: u64,

        /// Percentage (0-100) of generated requests that are writes; the
        /// remainder are split between reads and trims.
        #[arg(long, default_value_t = 60)]
        write_pct: u8,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    match &cli.command {
        Commands::Inspect { device, synthetic, json } => inspect(device.as_deref(), synthetic.as_deref(), *json),
        Commands::Reset { synthetic, from_zone, count } => reset_zones(synthetic, *from_zone, *count),
        Commands::Bench {
            synthetic,
            threads,
            duration_secs,
            min_bs,
            write_pct,
        } => bench(synthetic, *threads, *duration_secs, *min_bs, *write_pct),
    }
}

/// Parse `<nr_zones>:<zone_size_sectors>` into a `FakeZoneBackend`.
fn parse_synthetic(spec: &str) -> Result<FakeZoneBackend> {
    let (nr_zones, zone_size) = spec
        .split_once(':')
        .context("expected <nr_zones>:<zone_size_sectors>")?;
    let nr_zones: u64 = nr_zones.parse().context("nr_zones must be an integer")?;
    let zone_size: u64 = zone_size.parse().context("zone_size_sectors must be an integer")?;
    Ok(FakeZoneBackend::new_zoned(zone_size, nr_zones))
}

fn build_table(backend: &dyn ZoneIoctlBackend) -> Result<ZoneTable> {
    Ok(zbd_core::zbd::builder::build_zone_table(backend, 0)?)
}

fn inspect(device: Option<&std::path::Path>, synthetic: Option<&str>, json: bool) -> Result<()> {
    let table = if let Some(spec) = synthetic {
        let backend = parse_synthetic(spec)?;
        build_table(&backend)?
    } else {
        let device = device.context("either a device path or --synthetic is required")?;
        probe_real_device(device)?
    };

    if json {
        print_table_json(&table)?;
    } else {
        print_table(&table);
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn probe_real_device(device: &std::path::Path) -> Result<ZoneTable> {
    let path_str = device.to_string_lossy();
    let handle = zbd_core::io::device::open_device(&path_str, false)
        .with_context(|| format!("opening {}", device.display()))?;
    let backend = LinuxZoneBackend::new(handle.raw_fd(), &path_str)?;
    build_table(&backend)
}

#[cfg(not(target_os = "linux"))]
fn probe_real_device(device: &std::path::Path) -> Result<ZoneTable> {
    anyhow::bail!(
        "probing a real device ({}) requires Linux; use --synthetic for a demonstration",
        device.display()
    )
}

fn print_table(table: &ZoneTable) {
    println!(
        "model: {:?}  zone_size: {} sectors  nr_zones: {}",
        table.model, table.zone_size, table.nr_zones
    );
    println!("{:<8} {:<12} {:<14} {:<10} {:<12}", "zone", "start", "type", "cond", "wp");
    println!("{}", "-".repeat(60));
    for (i, zone) in table.zones().iter().enumerate() {
        let state = zone.lock();
        println!(
            "{:<8} {:<12} {:<14} {:<10} {:<12}",
            i,
            zone.start,
            format!("{:?}", state.zone_type),
            format!("{:?}", state.cond),
            state.wp
        );
    }
    println!("sentinel start: {}", table.sentinel().start);
}

fn print_table_json(table: &ZoneTable) -> Result<()> {
    #[derive(serde::Serialize)]
    struct ZoneRow {
        index: u64,
        start: u64,
        wp: u64,
        zone_type: zbd_core::zbd::ZoneType,
        cond: zbd_core::zbd::ZoneCondition,
    }
    #[derive(serde::Serialize)]
    struct TableDump {
        model: zbd_core::zbd::ZoneModel,
        zone_size: u64,
        nr_zones: u64,
        sentinel_start: u64,
        zones: Vec<ZoneRow>,
    }

    let zones = table
        .zones()
        .iter()
        .enumerate()
        .map(|(i, z)| {
            let state = z.lock();
            ZoneRow {
                index: i as u64,
                start: z.start,
                wp: state.wp,
                zone_type: state.zone_type,
                cond: state.cond,
            }
        })
        .collect();

    let dump = TableDump {
        model: table.model,
        zone_size: table.zone_size,
        nr_zones: table.nr_zones,
        sentinel_start: table.sentinel().start,
        zones,
    };
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}

fn reset_zones(synthetic: &str, from_zone: u64, count: u64) -> Result<()> {
    let backend = parse_synthetic(synthetic)?;
    let table = build_table(&backend)?;

    if from_zone + count > table.nr_zones {
        anyhow::bail!(
            "requested range [{}, {}) exceeds nr_zones={}",
            from_zone,
            from_zone + count,
            table.nr_zones
        );
    }

    // Dirty the zones first so the reset has something visible to do.
    for i in from_zone..from_zone + count {
        let zone = table.zone(i);
        let mut state = zone.lock();
        state.wp = zone.start + table.zone_size / 2;
    }

    zbd_core::zbd::reset::reset_zones(&table, &backend, from_zone, from_zone + count, true, true, 8)?;

    for i in from_zone..from_zone + count {
        let zone = table.zone(i);
        println!("zone {} wp={} (start={})", i, zone.lock().wp, zone.start);
    }
    Ok(())
}

fn bench(synthetic: &str, threads: Option<usize>, duration_secs: u64, min_bs: u64, write_pct: u8) -> Result<()> {
    let job_id = uuid::Uuid::new_v4();
    let started_at = chrono::Utc::now();

    let backend = Arc::new(parse_synthetic(synthetic)?);
    let table = Arc::new(build_table(backend.as_ref())?);
    let nr_threads = threads.unwrap_or_else(num_cpus::get).max(1);
    let deadline = Instant::now() + Duration::from_secs(duration_secs);

    println!(
        "bench {job_id}: {} threads, {} zones x {} sectors, {}s, {}% writes, started {}",
        nr_threads,
        table.nr_zones,
        table.zone_size,
        duration_secs,
        write_pct,
        started_at.to_rfc3339()
    );

    let accepted = Arc::new(AtomicU64::new(0));
    let eofs = Arc::new(AtomicU64::new(0));
    let start_barrier = Arc::new(Barrier::new(nr_threads));
    // One buffer per in-flight request, sized for the largest candidate
    // buflen (`min_bs * 4`); each worker only ever holds one at a time.
    let buffer_pool = Arc::new(BufferPool::direct_io_pool((min_bs * 4) as usize, nr_threads));

    let mut handles = Vec::with_capacity(nr_threads);
    for worker_id in 0..nr_threads {
        let table = Arc::clone(&table);
        let backend = Arc::clone(&backend);
        let accepted = Arc::clone(&accepted);
        let eofs = Arc::clone(&eofs);
        let start_barrier = Arc::clone(&start_barrier);
        let buffer_pool = Arc::clone(&buffer_pool);
        handles.push(std::thread::spawn(move || {
            start_barrier.wait();
            let mut rng = rand::thread_rng();
            let zone_size_bytes = table.zone_size << 9;
            let device_bytes = (table.nr_zones * zone_size_bytes).max(1);

            while Instant::now() < deadline {
                let direction = match rng.gen_range(0..100) {
                    n if n < write_pct => Direction::Write,
                    n if n < write_pct.saturating_add(10) => Direction::Trim,
                    _ => Direction::Read,
                };
                let offset = rng.gen_range(0..device_bytes);
                let buflen = min_bs * rng.gen_range(1..=4u64);

                let mut io = IoUnit::new(direction, offset, buflen, Workload::Random, min_bs);

                // Trims carry no payload; reads and writes each claim a
                // buffer from the pool for the duration of the request.
                let mut buffer = if direction != Direction::Trim {
                    match buffer_pool.acquire() {
                        Ok(b) => Some(b),
                        Err(e) => {
                            tracing::warn!(worker_id, error = %e, "buffer pool exhausted");
                            None
                        }
                    }
                } else {
                    None
                };

                if direction == Direction::Write {
                    if let Some(buf) = buffer.as_mut() {
                        buf.fill(&io.offset.to_le_bytes());
                    }
                }

                match zbd_core::zbd::adjuster::adjust_block(&table, backend.as_ref(), &NoopQuiesce, &mut io, false) {
                    Ok(AdjustOutcome::ConventionalAccept) => {
                        if direction == Direction::Read {
                            if let Some(buf) = buffer.as_mut() {
                                buf.zero();
                            }
                        }
                        accepted.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(AdjustOutcome::SequentialReservation(reservation)) => {
                        if direction == Direction::Read {
                            if let Some(buf) = buffer.as_mut() {
                                buf.zero();
                            }
                        }
                        accepted.fetch_add(1, Ordering::Relaxed);
                        // Simulate the I/O engine: completion always succeeds
                        // in this demonstration harness.
                        reservation.complete(direction, io.offset, io.buflen, true);
                    }
                    Ok(AdjustOutcome::Eof) => {
                        eofs.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::warn!(worker_id, error = %e, "adjust_block failed");
                    }
                }
            }
        }));
    }

    for h in handles {
        let _ = h.join();
    }

    let finished_at = chrono::Utc::now();
    println!(
        "bench {job_id} done: {} accepted, {} eof, elapsed {}ms",
        accepted.load(Ordering::Relaxed),
        eofs.load(Ordering::Relaxed),
        (finished_at - started_at).num_milliseconds()
    );
    Ok(())
}
