//! Reader/writer monitor guarding one index
//!
//! The monitor state is a single counter: negative while a writer is active,
//! zero when idle and positive for the number of active readers. There is no
//! writer priority, so a steady stream of readers can keep a writer waiting.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{trace, warn};

/// Counter value while a writer holds the monitor
const WRITING: i32 = -1;

/// Single-writer, many-reader monitor
#[derive(Debug, Default)]
pub struct ReadWriteMonitor {
    status: Mutex<i32>,
    changed: Condvar,
}

impl ReadWriteMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, i32> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_while<'a>(
        &self,
        guard: MutexGuard<'a, i32>,
        condition: impl FnMut(&mut i32) -> bool,
    ) -> MutexGuard<'a, i32> {
        self.changed
            .wait_while(guard, condition)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block while a writer is active, then register as a reader
    pub fn enter_read(&self) {
        let mut status = self.wait_while(self.lock(), |status| *status < 0);
        *status += 1;
        trace!(readers = *status, "Monitor: entered read");
    }

    /// Block until no reader or writer is active, then become the writer
    pub fn enter_write(&self) {
        let mut status = self.wait_while(self.lock(), |status| *status != 0);
        *status = WRITING;
        trace!("Monitor: entered write");
    }

    /// Leave a read section, waking waiters when the last reader leaves
    pub fn exit_read(&self) {
        let mut status = self.lock();
        if *status <= 0 {
            warn!(status = *status, "Monitor: exit_read without a read section");
            return;
        }
        *status -= 1;
        if *status == 0 {
            self.changed.notify_all();
        }
        trace!(readers = *status, "Monitor: exited read");
    }

    /// Leave the write section and wake every waiter
    pub fn exit_write(&self) {
        let mut status = self.lock();
        if *status >= 0 {
            warn!(status = *status, "Monitor: exit_write without the write section");
            return;
        }
        *status = 0;
        self.changed.notify_all();
        trace!("Monitor: exited write");
    }

    /// Turn the write section into a read section without letting another
    /// writer in between
    pub fn exit_write_enter_read(&self) {
        let mut status = self.lock();
        if *status >= 0 {
            warn!(status = *status, "Monitor: downgrade without the write section");
            return;
        }
        *status = 1;
        // Other readers may join now
        self.changed.notify_all();
        trace!("Monitor: downgraded write to read");
    }

    /// Upgrade to writer if the caller is the only reader
    ///
    /// Returns false, still holding the read section, when other readers are
    /// active.
    pub fn exit_read_enter_write(&self) -> bool {
        let mut status = self.lock();
        if *status == 1 {
            *status = WRITING;
            trace!("Monitor: upgraded read to write");
            true
        } else {
            false
        }
    }

    /// Raw counter value, for diagnostics
    pub fn status(&self) -> i32 {
        *self.lock()
    }

    /// Enter a read section released when the guard drops
    pub fn read(&self) -> ReadGuard<'_> {
        self.enter_read();
        ReadGuard { monitor: self }
    }

    /// Enter the write section released when the guard drops
    pub fn write(&self) -> WriteGuard<'_> {
        self.enter_write();
        WriteGuard { monitor: self }
    }
}

/// Held read section
#[derive(Debug)]
pub struct ReadGuard<'a> {
    monitor: &'a ReadWriteMonitor,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.monitor.exit_read();
    }
}

/// Held write section
#[derive(Debug)]
pub struct WriteGuard<'a> {
    monitor: &'a ReadWriteMonitor,
}

impl<'a> WriteGuard<'a> {
    /// Downgrade to a read section atomically
    pub fn downgrade(self) -> ReadGuard<'a> {
        let monitor = self.monitor;
        std::mem::forget(self);
        monitor.exit_write_enter_read();
        ReadGuard { monitor }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.monitor.exit_write();
    }
}
