use tokio_util::sync::CancellationToken;

use crate::converters::reference::RefTracker;
use crate::error::SerializationError;
use crate::options::SerializerOptions;

/// Mutable state threaded through every converter call of one top-level
/// operation: the remaining depth budget, the async flush threshold, the
/// optional reference tracker and the cancellation token.
pub struct SerializationContext {
    remaining_depth: i32,
    unflushed_bytes_threshold: usize,
    pub(crate) ref_tracker: Option<RefTracker>,
    cancel: CancellationToken,
}

impl SerializationContext {
    pub(crate) fn new(options: &SerializerOptions, cancel: CancellationToken) -> Self {
        SerializationContext {
            remaining_depth: options.max_depth,
            unflushed_bytes_threshold: options.unflushed_bytes_threshold,
            ref_tracker: None,
            cancel,
        }
    }

    /// Spends one level of the depth budget. Aggregate converters call this
    /// on entry and [`depth_unstep`](Self::depth_unstep) on exit.
    #[inline]
    pub fn depth_step(&mut self) -> anyhow::Result<()> {
        if self.remaining_depth <= 0 {
            return Err(SerializationError::DepthExceeded.into());
        }
        self.remaining_depth -= 1;
        Ok(())
    }

    #[inline]
    pub fn depth_unstep(&mut self) {
        self.remaining_depth += 1;
    }

    pub fn unflushed_bytes_threshold(&self) -> usize {
        self.unflushed_bytes_threshold
    }

    /// Checked at element boundaries in async aggregate converters.
    #[inline]
    pub fn ensure_not_cancelled(&self) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SerializationError::Cancelled.into());
        }
        Ok(())
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
