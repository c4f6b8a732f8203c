use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Work executed by a blocked thread on behalf of the controller.
pub type Work = Box<dyn FnOnce() + Send>;

/// Reason a work item was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// The thread is not blocked.
    NotBlocked,
    /// The thread is still running a previous work item.
    Working,
}

#[derive(Default)]
struct BlockState {
    blocked: bool,
    working: bool,
    released: bool,
    work: Option<Work>,
}

/// Blocking primitive of a traced thread.
///
/// Only the owning thread blocks itself. Other threads release it, or hand it
/// a single work item to run before it blocks again.
#[derive(Default)]
pub struct Blocker {
    state: Mutex<BlockState>,
    cond: Condvar,
}

impl Blocker {
    /// Blocks the calling thread until it is released.
    ///
    /// `on_blocked` runs once the thread is marked blocked, before any other
    /// thread can release it. Returning `false` from it cancels the block.
    pub fn block<F>(&self, on_blocked: F)
    where
        F: FnOnce() -> bool,
    {
        let mut state = self.lock();

        state.blocked = true;
        state.released = false;

        if !on_blocked() {
            state.blocked = false;
            return;
        }

        loop {
            state = self
                .cond
                .wait_while(state, |s| !s.released && s.work.is_none())
                .unwrap_or_else(PoisonError::into_inner);

            let Some(work) = state.work.take() else {
                break;
            };

            state.working = true;
            drop(state);

            work();

            state = self.lock();
            state.working = false;
        }

        state.released = false;
        state.blocked = false;
    }

    /// Releases the blocked thread.
    ///
    /// Returns whether the thread was blocked.
    pub fn unblock(&self) -> bool {
        let mut state = self.lock();

        if !state.blocked {
            return false;
        }

        state.released = true;
        self.cond.notify_all();
        true
    }

    /// Hands a work item to the blocked thread.
    pub fn schedule(&self, work: Work) -> Result<(), ScheduleError> {
        let mut state = self.lock();

        if state.working || state.work.is_some() {
            return Err(ScheduleError::Working);
        }

        if !state.blocked {
            return Err(ScheduleError::NotBlocked);
        }

        state.work = Some(work);
        self.cond.notify_all();
        Ok(())
    }

    /// Returns whether the thread is blocked.
    pub fn is_blocked(&self) -> bool {
        self.lock().blocked
    }

    /// Returns whether the thread is running a work item.
    pub fn is_working(&self) -> bool {
        let state = self.lock();
        state.working || state.work.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, BlockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::{Blocker, ScheduleError};

    fn wait_blocked(blocker: &Blocker) {
        while !blocker.is_blocked() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn runs_work_then_blocks_again() {
        let blocker = Arc::new(Blocker::default());
        let (tx, rx) = mpsc::channel();

        let thread = {
            let blocker = blocker.clone();
            std::thread::spawn(move || blocker.block(|| true))
        };

        wait_blocked(&blocker);

        for i in 0..3 {
            let tx = tx.clone();
            blocker.schedule(Box::new(move || tx.send(i).unwrap())).unwrap();
            assert_eq!(rx.recv().unwrap(), i);

            while blocker.is_working() {
                std::thread::sleep(Duration::from_millis(1));
            }
            assert!(blocker.is_blocked());
        }

        assert!(blocker.unblock());
        thread.join().unwrap();

        assert!(!blocker.is_blocked());
        assert!(!blocker.unblock());
    }

    #[test]
    fn refuses_reentrant_work() {
        let blocker = Arc::new(Blocker::default());
        let (started_tx, started_rx) = mpsc::channel();
        let (finish_tx, finish_rx) = mpsc::channel::<()>();

        let thread = {
            let blocker = blocker.clone();
            std::thread::spawn(move || blocker.block(|| true))
        };

        wait_blocked(&blocker);

        blocker
            .schedule(Box::new(move || {
                started_tx.send(()).unwrap();
                finish_rx.recv().unwrap();
            }))
            .unwrap();

        started_rx.recv().unwrap();
        assert_eq!(
            blocker.schedule(Box::new(|| {})),
            Err(ScheduleError::Working)
        );

        finish_tx.send(()).unwrap();
        blocker.unblock();
        thread.join().unwrap();

        assert_eq!(
            blocker.schedule(Box::new(|| {})),
            Err(ScheduleError::NotBlocked)
        );
    }

    #[test]
    fn cancelled_block_returns_immediately() {
        let blocker = Blocker::default();
        blocker.block(|| false);
        assert!(!blocker.is_blocked());
    }
}
