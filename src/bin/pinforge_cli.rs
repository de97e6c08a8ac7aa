use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pinforge::backend::{SimEvent, SimHostDevice};
use pinforge::logging::{self, LogLevel, LoggingConfig};
use pinforge::{CachingHostAllocator, HostAllocatorConfig, HostAllocatorMetrics, HostPtr};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Parser, Debug)]
#[command(name = "pinforge-cli", version)]
#[command(about = "Exercise the pinned host memory cache", long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Alignment of fresh allocations in bytes
    #[arg(long, default_value_t = HostAllocatorConfig::DEFAULT_ALIGNMENT)]
    alignment: usize,

    /// Do not drain the cache before retrying a failed allocation
    #[arg(long)]
    no_drain_before_retry: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Hammer the allocator from several threads and report pool statistics
    Stress {
        #[command(flatten)]
        workload: WorkloadArgs,
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a workload and print Prometheus metrics
    Metrics {
        #[command(flatten)]
        workload: WorkloadArgs,
    },
    /// Allocate, check and release pinned memory on a real HIP device
    #[cfg(feature = "rocm")]
    HipSmoke {
        /// HIP device ordinal
        #[arg(long, default_value_t = 0)]
        device: i32,
        /// Bytes per allocation
        #[arg(long, default_value_t = 1 << 20)]
        size: usize,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct WorkloadArgs {
    /// Worker threads
    #[arg(long, default_value_t = 4)]
    threads: usize,
    /// Operations per thread
    #[arg(long, default_value_t = 10_000)]
    iterations: usize,
    /// Largest request in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    max_size: usize,
    /// Fraction of allocations that get an in-flight completion event
    #[arg(long, default_value_t = 0.25)]
    event_ratio: f64,
    /// Device capacity in bytes (0 = unbounded)
    #[arg(long, default_value_t = 0)]
    capacity: usize,
    /// RNG seed
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = LogLevel::parse(&cli.log_level)
        .with_context(|| format!("unknown log level '{}'", cli.log_level))?;
    logging::init_with_config(&LoggingConfig::from_env().with_level(level))?;

    let config = HostAllocatorConfig::new()
        .with_alignment(cli.alignment)
        .with_drain_before_retry(!cli.no_drain_before_retry);

    match cli.command {
        Commands::Stress { workload, json } => {
            let allocator = sim_allocator(&workload, config)?;
            let report = run_workload(&allocator, &workload)?;
            let stats = allocator.stats();

            if json {
                let value = serde_json::json!({
                    "elapsed_ms": report.elapsed_ms,
                    "operations": report.operations,
                    "failed_allocations": report.failed_allocations,
                    "stats": stats,
                    "hit_rate": stats.hit_rate(),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!(
                    "{} operations in {:.1} ms ({} failed allocations)",
                    report.operations, report.elapsed_ms, report.failed_allocations
                );
                println!("hit rate:          {:.1}%", stats.hit_rate() * 100.0);
                println!("cache hits/misses: {}/{}", stats.cache_hits, stats.cache_misses);
                println!("fresh allocations: {}", stats.fresh_allocations);
                println!("retries/failures:  {}/{}", stats.retries, stats.allocation_failures);
                println!("drains/freed:      {}/{}", stats.drains, stats.blocks_freed);
                println!(
                    "tracked after drain: {} blocks, {} bytes",
                    stats.tracked_blocks, stats.tracked_bytes
                );
            }
        }
        Commands::Metrics { workload } => {
            let allocator = sim_allocator(&workload, config)?;
            run_workload(&allocator, &workload)?;

            let metrics = HostAllocatorMetrics::new();
            metrics.observe(&allocator.stats());
            print!("{}", metrics.encode()?);
        }
        #[cfg(feature = "rocm")]
        Commands::HipSmoke { device, size } => hip_smoke(device, size, config)?,
    }

    Ok(())
}

fn sim_allocator(
    workload: &WorkloadArgs,
    config: HostAllocatorConfig,
) -> Result<CachingHostAllocator<SimHostDevice>> {
    if workload.max_size == 0 {
        bail!("--max-size must be at least 1");
    }
    if !(0.0..=1.0).contains(&workload.event_ratio) {
        bail!("--event-ratio must be within [0, 1]");
    }
    let device = SimHostDevice::with_capacity(workload.capacity);
    Ok(CachingHostAllocator::with_config(device, config)?)
}

struct WorkloadReport {
    operations: usize,
    failed_allocations: usize,
    elapsed_ms: f64,
}

/// Mixed allocate / record / release traffic, then a final drain
///
/// Every address a worker holds is registered in a shared set; seeing an
/// address that another worker still holds aborts the run.
fn run_workload(
    allocator: &CachingHostAllocator<SimHostDevice>,
    workload: &WorkloadArgs,
) -> Result<WorkloadReport> {
    let holders: Mutex<HashSet<usize>> = Mutex::new(HashSet::new());
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    std::thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::with_capacity(workload.threads);
        for worker in 0..workload.threads {
            let holders = &holders;
            let failed = &failed;
            handles.push(scope.spawn(move || -> Result<()> {
                let mut rng = StdRng::seed_from_u64(workload.seed.wrapping_add(worker as u64));
                let mut held: Vec<HostPtr> = Vec::new();
                let mut in_flight: VecDeque<SimEvent> = VecDeque::new();

                for _ in 0..workload.iterations {
                    if held.is_empty() || rng.gen_bool(0.5) {
                        let size = rng.gen_range(1..=workload.max_size);
                        match allocator.allocate(size) {
                            Ok(ptr) => {
                                let fresh = holders
                                    .lock()
                                    .map_err(|e| anyhow::anyhow!("holder set poisoned: {}", e))?
                                    .insert(ptr.addr());
                                if !fresh {
                                    bail!("{:?} handed to two holders at once", ptr);
                                }
                                if rng.gen_bool(workload.event_ratio) {
                                    let event = SimEvent::new();
                                    allocator.record_completion(ptr, event.clone());
                                    in_flight.push_back(event);
                                }
                                held.push(ptr);
                            }
                            Err(e) => {
                                tracing::debug!("worker {}: {}", worker, e);
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    } else {
                        let ptr = held.swap_remove(rng.gen_range(0..held.len()));
                        holders
                            .lock()
                            .map_err(|e| anyhow::anyhow!("holder set poisoned: {}", e))?
                            .remove(&ptr.addr());
                        allocator.release(ptr);
                    }

                    // Device work finishes in submission order, a few steps behind
                    if in_flight.len() > 4 {
                        if let Some(event) = in_flight.pop_front() {
                            event.complete();
                        }
                    }
                }

                for event in in_flight {
                    event.complete();
                }
                for ptr in held {
                    holders
                        .lock()
                        .map_err(|e| anyhow::anyhow!("holder set poisoned: {}", e))?
                        .remove(&ptr.addr());
                    allocator.release(ptr);
                }
                Ok(())
            }));
        }

        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => bail!("worker thread panicked"),
            }
        }
        Ok(())
    })?;

    allocator.drain();

    Ok(WorkloadReport {
        operations: workload.threads * workload.iterations,
        failed_allocations: failed.load(Ordering::Relaxed),
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}

#[cfg(feature = "rocm")]
fn hip_smoke(device: i32, size: usize, config: HostAllocatorConfig) -> Result<()> {
    use pinforge::backend::HipHostDevice;

    let allocator = CachingHostAllocator::with_config(HipHostDevice::new(device)?, config)?;

    let first = allocator.allocate(size)?;
    if !allocator.is_pinned(first) {
        bail!("{:?} is not reported as pinned host memory", first);
    }
    allocator.release(first);

    let second = allocator.allocate(size)?;
    println!(
        "pinned {} bytes at {:?}; reuse {}",
        size,
        first,
        if second == first { "ok" } else { "missed" }
    );
    allocator.release(second);
    allocator.drain();
    println!("{:?}", allocator.stats());
    Ok(())
}
