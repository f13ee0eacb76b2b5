// src/scheduler.rs
// Coalesced work: one pending payload, at most one animation frame requested

/// Anything that can request a single animation-frame callback.
pub trait FrameScheduler {
    fn request_frame(&mut self);
}

/// Pending payload plus a scheduled flag. New events overwrite (or merge into)
/// the pending payload; only the first push after a frame requests a new one.
#[derive(Debug)]
pub struct CoalescedTask<T> {
    pending: Option<T>,
    scheduled: bool,
}

impl<T> Default for CoalescedTask<T> {
    fn default() -> Self {
        Self {
            pending: None,
            scheduled: false,
        }
    }
}

impl<T> CoalescedTask<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this push requested a frame.
    pub fn push(&mut self, payload: T, scheduler: &mut dyn FrameScheduler) -> bool {
        self.pending = Some(payload);
        self.schedule(scheduler)
    }

    /// Like `push`, but folds the new payload into a pending one.
    pub fn push_merge<F>(&mut self, payload: T, scheduler: &mut dyn FrameScheduler, merge: F) -> bool
    where
        F: FnOnce(T, T) -> T,
    {
        self.pending = Some(match self.pending.take() {
            Some(existing) => merge(existing, payload),
            None => payload,
        });
        self.schedule(scheduler)
    }

    fn schedule(&mut self, scheduler: &mut dyn FrameScheduler) -> bool {
        if self.scheduled {
            return false;
        }
        self.scheduled = true;
        scheduler.request_frame();
        true
    }

    /// Called from the frame callback. Clears the scheduled flag so the next
    /// push schedules again.
    pub fn take(&mut self) -> Option<T> {
        self.scheduled = false;
        self.pending.take()
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&T> {
        self.pending.as_ref()
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Default)]
    pub(crate) struct CountingScheduler {
        pub requests: usize,
    }

    impl FrameScheduler for CountingScheduler {
        fn request_frame(&mut self) {
            self.requests += 1;
        }
    }

    #[test]
    fn test_burst_requests_a_single_frame() {
        let mut sched = CountingScheduler::default();
        let mut task = CoalescedTask::new();

        assert!(task.push(1, &mut sched));
        assert!(!task.push(2, &mut sched));
        assert!(!task.push(3, &mut sched));
        assert_eq!(sched.requests, 1);

        assert_eq!(task.take(), Some(3));
        assert_eq!(task.take(), None);

        assert!(task.push(4, &mut sched));
        assert_eq!(sched.requests, 2);
    }

    #[test]
    fn test_merge_accumulates() {
        let mut sched = CountingScheduler::default();
        let mut task = CoalescedTask::new();
        task.push_merge(10.0, &mut sched, |a, b| a + b);
        task.push_merge(-4.0, &mut sched, |a, b| a + b);
        assert_eq!(sched.requests, 1);
        assert_eq!(task.take(), Some(6.0));
    }

    #[test]
    fn test_cancel_keeps_frame_but_drops_payload() {
        let mut sched = CountingScheduler::default();
        let mut task = CoalescedTask::new();
        task.push("a", &mut sched);
        task.cancel();
        assert!(task.is_scheduled());
        assert_eq!(task.take(), None);
        assert!(!task.is_scheduled());
    }
}
