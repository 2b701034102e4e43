//! Cooperative stop flag shared by the readers and the control loop.

use crate::error::BenchError;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to one stop flag. Readers poll it once per iteration; there is no timeout.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Cancel this token when the process receives SIGINT or SIGTERM.
    pub fn cancel_on_signals(&self) -> Result<(), BenchError> {
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, self.flag.clone()).map_err(BenchError::Signal)?;
        }
        info!("SIGINT/SIGTERM stop the run");
        Ok(())
    }
}
