use std::sync::Mutex;
use std::time::Duration;

use crate::locked;

/// A deferred callback, boxed for queueing.
pub type TimeoutCallback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot scheduling on the host's main loop.
pub trait Timeouts: Send + Sync {
    /// Runs `callback` once, roughly `delay` after the call.
    fn set_timeout(&self, delay: Duration, callback: TimeoutCallback);
}

/// Scheduler backed by the ambient Tokio runtime.
///
/// Must be used inside a runtime; the callback runs on a spawned task
/// after the delay.
#[derive(Default, Clone, Copy)]
pub struct TokioTimeouts;

impl TokioTimeouts {
    pub fn new() -> Self {
        Self
    }
}

impl Timeouts for TokioTimeouts {
    fn set_timeout(&self, delay: Duration, callback: TimeoutCallback) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
    }
}

/// Scheduler for hosts that pump their own loop: callbacks queue up and
/// run when the host fires them.
#[derive(Default)]
pub struct ManualTimeouts {
    queue: Mutex<Vec<(Duration, TimeoutCallback)>>,
}

impl ManualTimeouts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callbacks waiting to fire.
    pub fn pending(&self) -> usize {
        locked(&self.queue).len()
    }

    /// Delay requested for the oldest pending callback.
    pub fn next_delay(&self) -> Option<Duration> {
        locked(&self.queue).first().map(|(delay, _)| *delay)
    }

    /// Fires the oldest pending callback, reporting whether one ran.
    pub fn fire_next(&self) -> bool {
        // The queue lock is released before the callback runs, so a
        // callback may schedule further timeouts
        let next = {
            let mut queue = locked(&self.queue);
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        };
        match next {
            Some((_, callback)) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Fires every pending callback in schedule order, including ones
    /// scheduled while firing.
    pub fn fire_all(&self) {
        while self.fire_next() {}
    }
}

impl Timeouts for ManualTimeouts {
    fn set_timeout(&self, delay: Duration, callback: TimeoutCallback) {
        locked(&self.queue).push((delay, callback));
    }
}
