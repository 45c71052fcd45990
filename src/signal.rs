//! Cooperative cancellation for a build invocation.
//!
//! A Ctrl+C (or SIGTERM) sets a shared `AtomicBool`. Nothing is torn down
//! from the signal handler itself: the archiver checks the flag between
//! files, and every poll loop sleeps through [`sleep_interruptibly`], which
//! wakes up early once the flag is set. The loop then issues its best-effort
//! server-side cancel and returns an "interrupted" outcome.
//!
//! # Usage
//!
//! ```rust,no_run
//! use sastbridge::signal::{install_handler, sleep_interruptibly};
//! use std::time::Duration;
//!
//! let handler = install_handler()?;
//! if sleep_interruptibly(Duration::from_secs(10), &handler).is_err() {
//!     // cancel the remote job, then propagate the interruption
//! }
//! # Ok::<(), sastbridge::signal::SignalError>(())
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Process exit status after an interrupt (128 + SIGINT).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Longest uninterrupted slice of a [`sleep_interruptibly`] call.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Shared shutdown flag for one build invocation.
///
/// Cloning shares the same flag.
#[derive(Debug, Clone)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandler {
    /// A handler with no shutdown pending.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether an interrupt arrived (or [`request_shutdown`](Self::request_shutdown) was called).
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Stop the run as if Ctrl+C had been pressed.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Get a clone of the shutdown flag for components that take a raw flag,
    /// such as the archiver.
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Clear a pending shutdown before the next run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// The OS interrupt hook could not be registered.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("Cannot hook Ctrl+C: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

/// Returned by [`sleep_interruptibly`] when the shutdown flag cut the sleep short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("interrupted")]
pub struct Interrupted;

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Hook Ctrl+C and SIGTERM to the process-wide shutdown flag.
///
/// Only the first call registers the OS hook; later calls (for example from
/// tests driving `run_app` repeatedly) reset and return the same handler.
///
/// # Errors
///
/// Returns [`SignalError`] if the OS hook cannot be registered and no
/// handler exists yet.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let flag = handler.get_flag();

    let installed = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let _ = writeln!(
            std::io::stderr(),
            "\nInterrupted. Cancelling remote work..."
        );
        let _ = std::io::stderr().flush();
        log::info!("Shutdown signal received");
    });

    match installed {
        Ok(()) => {
            let _ = GLOBAL_HANDLER.set(handler.clone());
            Ok(handler)
        }
        Err(ctrlc::Error::MultipleHandlers) => {
            log::debug!("Ctrl+C handler already registered, using unhooked handler");
            let fallback = GLOBAL_HANDLER.get_or_init(ShutdownHandler::new);
            fallback.reset();
            Ok(fallback.clone())
        }
        Err(e) => Err(SignalError::InstallFailed(e)),
    }
}

/// Sleep for `duration`, returning early with [`Interrupted`] once shutdown is requested.
///
/// The flag is checked before sleeping, so a zero duration still observes a
/// pending interruption.
///
/// # Errors
///
/// Returns [`Interrupted`] if the flag is set before or during the sleep.
pub fn sleep_interruptibly(duration: Duration, handler: &ShutdownHandler) -> Result<(), Interrupted> {
    let deadline = Instant::now() + duration;
    loop {
        if handler.is_shutdown_requested() {
            return Err(Interrupted);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
