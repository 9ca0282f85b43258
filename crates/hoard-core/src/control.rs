use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use tracing::debug;

/// Pause/stop token shared between a run's worker and whoever controls it.
///
/// The worker calls [`RunControl::checkpoint`] at folder and file boundaries only,
/// never inside a byte copy.
#[derive(Debug, Default)]
pub struct RunControl {
    stopped: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl RunControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pause(&self) {
        let mut paused = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        *paused = true;
        debug!("Run paused");
    }

    pub fn resume(&self) {
        let mut paused = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        *paused = false;
        self.resumed.notify_all();
        debug!("Run resumed");
    }

    /// Stop at the next checkpoint. Also releases a paused worker.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _paused = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        self.resumed.notify_all();
        debug!("Run stop requested");
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Block while paused. Returns `false` once a stop has been requested.
    pub fn checkpoint(&self) -> bool {
        let mut paused = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        while *paused && !self.is_stopped() {
            paused = self
                .resumed
                .wait(paused)
                .unwrap_or_else(|e| e.into_inner());
        }
        !self.is_stopped()
    }
}

/// Cooperative cancellation for checks and restores, polled once per item.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_checkpoint_passes_when_running() {
        let control = RunControl::new();
        assert!(control.checkpoint());
        control.stop();
        assert!(!control.checkpoint());
    }

    #[test]
    fn test_pause_blocks_until_resume() {
        let control = RunControl::new();
        control.pause();
        assert!(control.is_paused());

        let worker_control = control.clone();
        let worker = thread::spawn(move || worker_control.checkpoint());

        thread::sleep(Duration::from_millis(50));
        assert!(!worker.is_finished());

        control.resume();
        assert!(worker.join().unwrap());
    }

    #[test]
    fn test_stop_releases_paused_worker() {
        let control = RunControl::new();
        control.pause();

        let worker_control = control.clone();
        let worker = thread::spawn(move || worker_control.checkpoint());

        thread::sleep(Duration::from_millis(50));
        control.stop();
        assert!(!worker.join().unwrap());
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
