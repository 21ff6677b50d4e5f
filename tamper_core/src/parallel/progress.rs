use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Shared counter of processed input items. Purely informational.
#[derive(Debug)]
pub struct Progress {
    done: AtomicUsize,
    total: usize,
    finished: AtomicBool,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            done: AtomicUsize::new(0),
            total,
            finished: AtomicBool::new(false),
        }
    }

    pub fn increment(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn line(&self, description: &str) -> String {
        format!("\r{}: {}/{}   ", description, self.done(), self.total)
    }

    /// Redraws the progress line on stderr until [`Progress::finish`] is called.
    pub(crate) fn report(&self, description: &str) {
        let mut stderr = std::io::stderr();
        while !self.is_finished() {
            let _ = write!(stderr, "{}", self.line(description));
            let _ = stderr.flush();
            std::thread::sleep(REFRESH_INTERVAL);
        }
        let _ = writeln!(stderr, "{}", self.line(description));
    }
}
