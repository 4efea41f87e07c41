//! Progress reporting for blocking waits

/// Receives progress while the caller waits for tiles
pub trait LoadingListener {
    fn set_label(&mut self, _label: &str) {}

    /// Total amount of work the progress counts toward
    fn set_progress_range(&mut self, _range: usize) {}

    fn set_progress(&mut self, _value: usize) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLoadingListener;

impl LoadingListener for NoopLoadingListener {}
