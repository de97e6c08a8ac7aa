//! Host Allocator Benchmark Suite
//!
//! Measures the caching allocator against the simulated device:
//! - cache hit vs fresh allocation latency
//! - best-fit lookup with a populated free index
//! - event sweep cost as the number of pending blocks grows
//!
//! Run with: `cargo bench --bench host_alloc_bench`

use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pinforge::backend::{SimEvent, SimHostDevice};
use pinforge::CachingHostAllocator;

// ============================================================================
// Benchmark Harness
// ============================================================================

struct Benchmark {
    name: String,
    iterations: usize,
    warmup_iterations: usize,
}

impl Benchmark {
    fn new(name: &str, iterations: usize) -> Self {
        Benchmark {
            name: name.to_string(),
            iterations,
            warmup_iterations: iterations.min(10),
        }
    }

    fn run_time<F, R>(&self, mut f: F) -> BenchmarkResult
    where
        F: FnMut() -> R,
    {
        for _ in 0..self.warmup_iterations {
            black_box(f());
        }

        let mut durations = Vec::with_capacity(self.iterations);
        for _ in 0..self.iterations {
            let start = Instant::now();
            black_box(f());
            durations.push(start.elapsed());
        }

        BenchmarkResult {
            name: self.name.clone(),
            durations,
        }
    }
}

struct BenchmarkResult {
    name: String,
    durations: Vec<Duration>,
}

impl BenchmarkResult {
    fn report(&self) {
        if self.durations.is_empty() {
            return;
        }
        let mut sorted = self.durations.clone();
        sorted.sort();

        let total: Duration = sorted.iter().sum();
        let avg = total / sorted.len() as u32;
        let p50 = sorted[sorted.len() / 2];
        let p99 = sorted[(sorted.len() * 99) / 100];

        println!("\n=== {} ===", self.name);
        println!("Iterations: {}", sorted.len());
        println!("Average: {:?}", avg);
        println!("Min:     {:?}", sorted[0]);
        println!("P50:     {:?}", p50);
        println!("P99:     {:?}", p99);
        println!(
            "Throughput: {:.2} ops/sec",
            1_000_000_000.0 / avg.as_nanos().max(1) as f64
        );
    }
}

type SimAllocator = CachingHostAllocator<Arc<SimHostDevice>>;

fn sim_allocator() -> (Arc<SimHostDevice>, SimAllocator) {
    let device = Arc::new(SimHostDevice::new().with_quarantine(0));
    let alloc = CachingHostAllocator::new(Arc::clone(&device));
    (device, alloc)
}

// ============================================================================
// Allocation Paths
// ============================================================================

fn benchmark_cache_hit_vs_fresh() {
    println!("\n[Cache Hit vs Fresh Allocation]");

    for &size in &[4 << 10, 1 << 20, 16 << 20] {
        let (_device, alloc) = sim_allocator();
        let warm = alloc.allocate(size).unwrap();
        alloc.release(warm);

        Benchmark::new(&format!("cache hit {} KiB", size >> 10), 10_000)
            .run_time(|| {
                let ptr = alloc.allocate(size).unwrap();
                alloc.release(ptr);
            })
            .report();

        Benchmark::new(&format!("fresh {} KiB", size >> 10), 1_000)
            .run_time(|| {
                let ptr = alloc.allocate(size).unwrap();
                alloc.release(ptr);
                alloc.drain();
            })
            .report();
    }
}

fn benchmark_best_fit_lookup() {
    println!("\n[Best-Fit Lookup]");

    for &cached in &[16usize, 256, 4096] {
        let (_device, alloc) = sim_allocator();
        let ptrs: Vec<_> = (0..cached)
            .map(|i| alloc.allocate(512 * (i + 1)).unwrap())
            .collect();
        for ptr in ptrs {
            alloc.release(ptr);
        }

        let request = 512 * cached / 2;
        Benchmark::new(&format!("best fit among {} cached", cached), 10_000)
            .run_time(|| {
                let ptr = alloc.allocate(request).unwrap();
                alloc.release(ptr);
            })
            .report();
    }
}

// ============================================================================
// Event Sweep
// ============================================================================

fn benchmark_event_sweep() {
    println!("\n[Event Sweep]");

    for &pending in &[16usize, 256, 4096] {
        let (_device, alloc) = sim_allocator();
        let event = SimEvent::new();
        for _ in 0..pending {
            let ptr = alloc.allocate(4096).unwrap();
            alloc.record_completion(ptr, event.clone());
            alloc.release(ptr);
        }

        Benchmark::new(&format!("sweep with {} pending blocks", pending), 1_000)
            .run_time(|| alloc.process_events())
            .report();

        event.complete();
        let start = Instant::now();
        alloc.process_events();
        println!("Retire {} blocks: {:?}", pending, start.elapsed());
        assert_eq!(alloc.stats().cached_blocks, pending);
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    println!("====================================");
    println!("pinforge Host Allocator Benchmarks");
    println!("====================================");

    benchmark_cache_hit_vs_fresh();
    benchmark_best_fit_lookup();
    benchmark_event_sweep();

    println!("\n====================================");
    println!("Benchmark Complete");
    println!("====================================");
}
