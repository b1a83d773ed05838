use std::panic;
use std::sync::Mutex;
use std::thread;

/// Run `work` over `jobs` on up to `workers` scoped threads.
///
/// Results come back in no particular order; callers that need ordering sort
/// afterwards. With one worker the jobs run inline, in order. A panic in `work`
/// is re-raised on the calling thread once every worker has stopped.
pub fn run_jobs<J, R, F>(jobs: Vec<J>, workers: usize, work: F) -> Vec<R>
where
    J: Send,
    R: Send,
    F: Fn(J) -> R + Sync,
{
    let threads = workers.min(jobs.len());
    if threads <= 1 {
        return jobs.into_iter().map(work).collect();
    }
    let total = jobs.len();
    let queue = Mutex::new(jobs.into_iter());
    let next_job = || queue.lock().ok().and_then(|mut queue| queue.next());
    let mut results = Vec::with_capacity(total);
    let mut panicked = None;
    thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    while let Some(job) = next_job() {
                        done.push(work(job));
                    }
                    done
                })
            })
            .collect();
        for handle in handles {
            match handle.join() {
                Ok(done) => results.extend(done),
                Err(payload) => {
                    tracing::error!("worker thread panicked");
                    if panicked.is_none() {
                        panicked = Some(payload);
                    }
                }
            }
        }
    });
    if let Some(payload) = panicked {
        panic::resume_unwind(payload);
    }
    results
}
