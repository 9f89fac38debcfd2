use std::path::PathBuf;

/// Groups completed paths into progress batches.
///
/// Fresh extractions weigh more than cache reuses, so a run dominated by
/// either emits batches at a similar rate.
#[derive(Debug)]
pub struct ProgressBatcher {
    threshold: u32,
    fresh_weight: u32,
    reuse_weight: u32,
    weight: u32,
    pending: Vec<PathBuf>,
}

impl ProgressBatcher {
    pub fn new(threshold: u32, fresh_weight: u32, reuse_weight: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            fresh_weight: fresh_weight.max(1),
            reuse_weight: reuse_weight.max(1),
            weight: 0,
            pending: Vec::new(),
        }
    }

    /// Add one completion; returns a batch once the threshold is reached.
    pub fn record(&mut self, path: PathBuf, fresh: bool) -> Option<Vec<PathBuf>> {
        self.pending.push(path);
        self.weight = self.weight.saturating_add(if fresh {
            self.fresh_weight
        } else {
            self.reuse_weight
        });
        if self.weight >= self.threshold {
            self.flush()
        } else {
            None
        }
    }

    /// Whatever is pending, if anything.
    pub fn flush(&mut self) -> Option<Vec<PathBuf>> {
        self.weight = 0;
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}
