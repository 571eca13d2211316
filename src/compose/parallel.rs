use std::sync::OnceLock;

/// Below this many destination pixels a replay runs on the calling thread.
const PARALLEL_MIN_PIXELS: usize = 256 * 1024;

#[inline]
pub(crate) fn replay_workers() -> usize {
    static WORKERS: OnceLock<usize> = OnceLock::new();
    *WORKERS.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

#[inline(always)]
pub(crate) fn should_parallelize(pixel_count: usize) -> bool {
    replay_workers() > 1 && pixel_count >= PARALLEL_MIN_PIXELS
}

/// Run `job` inside the shared replay pool, or inline when the machine has
/// a single core or the pool could not be built.
#[inline]
pub(crate) fn install_replay_pool<F>(job: F)
where
    F: FnOnce() + Send,
{
    static POOL: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
    if let Some(pool) = POOL
        .get_or_init(|| {
            let workers = replay_workers();
            if workers <= 1 {
                return None;
            }
            rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|index| format!("snow-mirror-replay-{index}"))
                .build()
                .ok()
        })
        .as_ref()
    {
        pool.install(job);
    } else {
        job();
    }
}
