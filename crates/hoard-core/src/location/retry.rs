use std::io;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Bounded retry with linear backoff, shared by every location implementation.
///
/// Only whole operations are retried (listing a folder, reading metadata,
/// opening a stream); a byte copy that already started is never replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op`, retrying errors `is_retriable` accepts. `reconnect` runs before
    /// each retry; its own failure is logged and the retry proceeds anyway.
    pub fn run<T, F, P, R>(
        &self,
        what: &str,
        mut op: F,
        is_retriable: P,
        mut reconnect: R,
    ) -> io::Result<T>
    where
        F: FnMut() -> io::Result<T>,
        P: Fn(&io::Error) -> bool,
        R: FnMut() -> io::Result<()>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && is_retriable(&e) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        what, attempt, self.max_attempts, e
                    );
                    thread::sleep(self.backoff * attempt);
                    if let Err(reconnect_err) = reconnect() {
                        warn!("Reconnect before retrying {} failed: {}", what, reconnect_err);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Errors worth another attempt. Missing files and denied access are final.
pub fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
