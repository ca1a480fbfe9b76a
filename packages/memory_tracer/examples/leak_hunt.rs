//! Hunts a slowly growing cache with checkpoint reports.
//!
//! A "request handler" caches every response it produces, so memory grows with each batch of
//! requests. The cumulative report points at the cache, the incremental report shows how much
//! each batch added and the detailed report shows the call stack that holds the memory.
//!
//! Set `MEMORY_TRACER_DISABLED=1` to run the same code without tracing.
//!
//! Run with: `cargo run --example leak_hunt`

use std::collections::HashMap;
use std::hint::black_box;

use memory_tracer::{Allocator, MemoryTracer, StatisticDiff, TracerConfig};
use tracing_subscriber::filter::LevelFilter;

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

const BATCHES: u64 = 3;
const REQUESTS_PER_BATCH: u64 = 200;

struct Handler {
    cache: HashMap<u64, Vec<u8>>,
}

impl Handler {
    fn handle(&mut self, request: u64) -> usize {
        let response = render(request);
        let len = response.len();

        // Nothing ever evicts from the cache.
        self.cache.insert(request, response);
        len
    }
}

fn render(request: u64) -> Vec<u8> {
    format!("response to request {request}")
        .into_bytes()
        .into_iter()
        .cycle()
        .take(4096)
        .collect()
}

fn main() -> memory_tracer::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .with_target(false)
        .init();

    let config = TracerConfig::new()
        .top_n(5)
        .traceback_limit(1)
        .frame_depth(10)
        .with_env_overrides();

    let mut tracer = MemoryTracer::new(config);
    let mut scope = tracer.scope()?;

    let mut handler = Handler {
        cache: HashMap::new(),
    };

    for batch in 0..BATCHES {
        let first = batch.saturating_mul(REQUESTS_PER_BATCH);
        let mut served = 0_usize;

        for request in first..first.saturating_add(REQUESTS_PER_BATCH) {
            served = served.saturating_add(handler.handle(request));
        }

        println!("batch {batch} served {served} bytes");

        if let Some(checkpoint) = scope.update()? {
            let growth = checkpoint
                .incremental()
                .rows()
                .first()
                .map_or(0, StatisticDiff::size_diff);
            println!("largest growth since previous checkpoint: {growth} bytes");
        }
    }

    drop(scope);
    black_box(handler);
    Ok(())
}
