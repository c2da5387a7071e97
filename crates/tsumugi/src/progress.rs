/// Receives `(completed, total)` after every segment that reaches the disk.
///
/// Called from worker tasks, possibly from several of them at the same time. Counts of
/// concurrent calls may arrive out of order.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, completed: usize, total: usize);
}

impl<F> ProgressReporter for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn report(&self, completed: usize, total: usize) {
        self(completed, total)
    }
}
