//! Cancellation controller: `Active → Draining → Done`.
//!
//! Cancellation is cooperative. Draining means "stop scheduling"; sessions
//! already executing run to completion under their own deadlines.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::error::FanoutError;

/// Bumped by the SIGINT/SIGTERM handler.
static INTERRUPTS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Active,
    Draining,
    Done,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Phase::Active,
            1 => Phase::Draining,
            _ => Phase::Done,
        }
    }
}

/// Shared between the dispatcher and whoever delivers interrupts.
#[derive(Debug)]
pub struct CancellationController {
    phase: AtomicU8,
    signal: Option<&'static AtomicUsize>,
    signals_seen: AtomicUsize,
}

impl Default for CancellationController {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationController {
    /// A controller that only drains when [`interrupt`](Self::interrupt) is
    /// called.
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Active as u8),
            signal: None,
            signals_seen: AtomicUsize::new(0),
        }
    }

    /// A controller that also drains once the process receives SIGINT or
    /// SIGTERM. Requires [`install_interrupt_handler`] to have been called.
    pub fn with_process_signals() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Active as u8),
            signal: Some(&INTERRUPTS),
            signals_seen: AtomicUsize::new(INTERRUPTS.load(Ordering::SeqCst)),
        }
    }

    /// Move `Active → Draining`. Returns `true` if this call made the
    /// transition.
    pub fn interrupt(&self) -> bool {
        self.phase
            .compare_exchange(
                Phase::Active as u8,
                Phase::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Current phase, after folding in any pending process signal.
    pub fn poll(&self) -> Phase {
        if let Some(counter) = self.signal {
            let now = counter.load(Ordering::SeqCst);
            let seen = self.signals_seen.swap(now, Ordering::SeqCst);
            if now > seen {
                if self.interrupt() {
                    tracing::warn!("interrupt received; draining in-flight hosts");
                } else if self.phase() == Phase::Draining {
                    tracing::warn!("already draining; waiting for in-flight hosts to finish");
                }
            }
        }
        self.phase()
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_draining(&self) -> bool {
        self.poll() != Phase::Active
    }

    /// Mark the run finished. Returns `true` if it ended in drain mode.
    pub fn finish(&self) -> bool {
        let prev = self.phase.swap(Phase::Done as u8, Ordering::SeqCst);
        Phase::from_u8(prev) == Phase::Draining
    }
}

#[cfg(unix)]
extern "C" fn on_interrupt(_sig: libc::c_int) {
    INTERRUPTS.fetch_add(1, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the interrupt counter instead of terminating the
/// process.
#[cfg(unix)]
pub fn install_interrupt_handler() -> Result<(), FanoutError> {
    let handler = on_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for sig in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the handler only performs an atomic add, which is
        // async-signal-safe.
        let prev = unsafe { libc::signal(sig, handler) };
        if prev == libc::SIG_ERR {
            return Err(FanoutError::SignalHandlerFailed {
                detail: std::io::Error::last_os_error().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn install_interrupt_handler() -> Result<(), FanoutError> {
    Err(FanoutError::SignalHandlerFailed {
        detail: "interrupt handling is only supported on Unix".to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_active() {
        let c = CancellationController::new();
        assert_eq!(c.phase(), Phase::Active);
        assert!(!c.is_draining());
    }

    #[test]
    fn interrupt_transitions_once() {
        let c = CancellationController::new();
        assert!(c.interrupt());
        assert!(!c.interrupt(), "second interrupt is a no-op");
        assert_eq!(c.phase(), Phase::Draining);
        assert!(c.is_draining());
    }

    #[test]
    fn finish_reports_whether_run_drained() {
        let clean = CancellationController::new();
        assert!(!clean.finish());
        assert_eq!(clean.phase(), Phase::Done);

        let drained = CancellationController::new();
        drained.interrupt();
        assert!(drained.finish());
        assert_eq!(drained.phase(), Phase::Done);
    }

    #[test]
    fn interrupt_after_done_is_ignored() {
        let c = CancellationController::new();
        c.finish();
        assert!(!c.interrupt());
        assert_eq!(c.phase(), Phase::Done);
    }

    #[test]
    fn poll_folds_in_signal_counter() {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let c = CancellationController {
            phase: AtomicU8::new(Phase::Active as u8),
            signal: Some(&COUNTER),
            signals_seen: AtomicUsize::new(0),
        };
        assert_eq!(c.poll(), Phase::Active);

        COUNTER.fetch_add(1, Ordering::SeqCst);
        assert_eq!(c.poll(), Phase::Draining);

        COUNTER.fetch_add(1, Ordering::SeqCst);
        assert_eq!(c.poll(), Phase::Draining, "repeat signal keeps draining");
        assert_eq!(c.signals_seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn signals_before_construction_are_ignored() {
        static COUNTER: AtomicUsize = AtomicUsize::new(3);
        let c = CancellationController {
            phase: AtomicU8::new(Phase::Active as u8),
            signal: Some(&COUNTER),
            signals_seen: AtomicUsize::new(COUNTER.load(Ordering::SeqCst)),
        };
        assert_eq!(c.poll(), Phase::Active);
    }

    #[test]
    fn controller_is_shareable_across_threads() {
        let c = CancellationController::new();
        std::thread::scope(|s| {
            s.spawn(|| c.interrupt());
        });
        assert!(c.is_draining());
    }
}
