//! Per-file parse watchdog
//!
//! Armed before a document is parsed; if the parse outlives the timeout the
//! watchdog cancels the token the parser polls. Only that file is affected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Watchdog {
    disarm: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    /// Cancel `token` unless disarmed within `timeout`
    pub fn arm(timeout: Duration, token: CancellationToken, label: &str) -> Self {
        let (disarm, disarmed) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));

        let thread = {
            let fired = Arc::clone(&fired);
            let label = label.to_string();
            thread::Builder::new()
                .name("parse-watchdog".to_string())
                .spawn(move || {
                    if let Err(RecvTimeoutError::Timeout) = disarmed.recv_timeout(timeout) {
                        debug!("Watchdog fired after {:?} for {}", timeout, label);
                        fired.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                })
        };

        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(err) => {
                warn!("Could not start parse watchdog for {}: {}", label, err);
                None
            }
        };

        Self {
            disarm: Some(disarm),
            thread,
            fired,
        }
    }

    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Stop the watchdog; returns whether it fired
    pub fn disarm(mut self) -> bool {
        self.stop();
        self.fired()
    }

    fn stop(&mut self) {
        // Dropping the sender wakes the watchdog thread
        self.disarm.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("Parse watchdog thread panicked");
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_fires_after_timeout() {
        let token = CancellationToken::new();
        let watchdog = Watchdog::arm(Duration::from_millis(20), token.clone(), "slow.cpp");

        let start = Instant::now();
        while !token.is_cancelled() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(token.is_cancelled());
        assert!(watchdog.disarm());
    }

    #[test]
    fn test_disarm_before_timeout() {
        let token = CancellationToken::new();
        let watchdog = Watchdog::arm(Duration::from_secs(30), token.clone(), "fast.cpp");

        let start = Instant::now();
        assert!(!watchdog.disarm());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!token.is_cancelled());
    }
}
