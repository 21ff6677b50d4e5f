use super::{Progress, TaskError};
use crate::sandbox::panic_message;
use std::ops::Range;
use std::thread;
use tracing::{info, warn};

/// A worker's share of an `execute` call.
///
/// Each instance is driven by exactly one worker thread and only ever sees
/// its own shard, so implementations need no synchronization of their own.
pub trait Task: Send {
    type Input: Sync;
    type Output: Send;

    fn run(
        &mut self,
        shard: &[Self::Input],
        storage: &mut Vec<Self::Output>,
        progress: &Progress,
    ) -> Result<(), TaskError>;
}

/// Splits `len` items into `workers` contiguous ranges whose sizes differ by
/// at most one. The first `len % workers` ranges get the extra item. Ranges
/// are empty only when there are more workers than items.
pub fn shard_bounds(len: usize, workers: usize) -> Vec<Range<usize>> {
    if workers == 0 {
        return Vec::new();
    }
    let base = len / workers;
    let extra = len % workers;

    let mut start = 0;
    (0..workers)
        .map(|shard| {
            let size = base + usize::from(shard < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// Partitions an input slice across task instances, runs them in parallel
/// and concatenates their outputs in shard order.
pub struct TaskExecutor<'a, T: Task> {
    description: String,
    input: &'a [T::Input],
    tasks: Vec<T>,
    show_progress: bool,
}

impl<'a, T: Task> TaskExecutor<'a, T> {
    pub fn new(description: impl Into<String>, input: &'a [T::Input], tasks: Vec<T>) -> Self {
        Self {
            description: description.into(),
            input,
            tasks,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Runs every task against its shard and appends the merged results to
    /// `output`. If any task fails or panics, nothing is appended.
    pub fn execute(self, output: &mut Vec<T::Output>) -> Result<(), TaskError> {
        let Self {
            description,
            input,
            tasks,
            show_progress,
        } = self;

        if input.is_empty() {
            return Ok(());
        }
        if tasks.is_empty() {
            return Err(TaskError::NoWorkers(input.len()));
        }

        let bounds = shard_bounds(input.len(), tasks.len());
        let progress = Progress::new(input.len());
        info!(
            task = %description,
            items = input.len(),
            workers = bounds.iter().filter(|range| !range.is_empty()).count(),
            "Starting parallel execution"
        );

        let shard_results = thread::scope(|scope| {
            let reporter = if show_progress {
                let progress = &progress;
                let description = description.as_str();
                thread::Builder::new()
                    .name("progress".to_string())
                    .spawn_scoped(scope, move || progress.report(description))
                    .map_err(|e| warn!(error = %e, "Failed to start progress reporter"))
                    .ok()
            } else {
                None
            };

            let mut handles = Vec::with_capacity(bounds.len());
            let mut spawn_error = None;
            for (index, (mut task, range)) in tasks.into_iter().zip(bounds).enumerate() {
                if range.is_empty() {
                    continue;
                }
                let shard = &input[range];
                let progress = &progress;
                let spawned = thread::Builder::new()
                    .name(format!("{description}-{index}"))
                    .spawn_scoped(scope, move || {
                        let mut storage = Vec::with_capacity(shard.len());
                        task.run(shard, &mut storage, progress).map(|()| storage)
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        spawn_error = Some(TaskError::Spawn(e));
                        break;
                    }
                }
            }

            let mut results: Vec<Result<Vec<T::Output>, TaskError>> = handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|payload| {
                        Err(TaskError::WorkerPanicked(panic_message(payload.as_ref())))
                    })
                })
                .collect();
            if let Some(e) = spawn_error {
                results.push(Err(e));
            }

            progress.finish();
            if let Some(reporter) = reporter {
                let _ = reporter.join();
            }
            results
        });

        let shards = shard_results.into_iter().collect::<Result<Vec<_>, _>>()?;
        let before = output.len();
        output.extend(shards.into_iter().flatten());
        info!(
            task = %description,
            results = output.len() - before,
            "Finished parallel execution"
        );
        Ok(())
    }
}
