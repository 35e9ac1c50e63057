//! Controlled recovery for devices that can drop out between uses.
//!
//! A capture device may be closed underneath us (by another process, or by an
//! explicit `close`). Instead of silently rebuilding it on every call, callers hold
//! a [`RetryPolicy`] and go through [`recover_with`], which makes a bounded number
//! of recovery attempts and then reports the device as faulted.

use std::time::Duration;
use tracing::warn;

use crate::error::{JibError, JibResult};

/// Defines a policy for retrying a recovery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of recovery attempts.
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
}

impl RetryPolicy {
    /// Policy with `max_attempts` immediate attempts.
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_delay: Duration::ZERO,
        }
    }

    /// Policy that never recovers.
    pub fn never() -> Self {
        Self::attempts(0)
    }
}

impl Default for RetryPolicy {
    /// A single reopen attempt.
    fn default() -> Self {
        Self::attempts(1)
    }
}

/// Something that can try to bring itself back into a usable state.
pub trait Recoverable {
    /// Make one attempt to return to a usable state.
    fn recover(&mut self) -> JibResult<()>;
}

/// Try to recover `target` according to `policy`.
///
/// # Errors
/// `DeviceFault` carrying the last recovery error once every attempt has failed.
pub fn recover_with<T: Recoverable + ?Sized>(
    target: &mut T,
    policy: &RetryPolicy,
) -> JibResult<()> {
    let mut last_error = None;
    for attempt in 1..=policy.max_attempts {
        match target.recover() {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt, max_attempts = policy.max_attempts, %e, "recovery attempt failed");
                last_error = Some(e);
            }
        }
        if attempt < policy.max_attempts && !policy.backoff_delay.is_zero() {
            std::thread::sleep(policy.backoff_delay);
        }
    }
    Err(JibError::DeviceFault(match last_error {
        Some(e) => format!(
            "failed to recover after {} attempt(s): {e}",
            policy.max_attempts
        ),
        None => "device is closed and recovery is disabled".to_string(),
    }))
}
