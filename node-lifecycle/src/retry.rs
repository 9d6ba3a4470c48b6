// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded retry of update calls that Ironic rejects while it is busy.
//!
//! Ironic locks a node for the duration of any conductor-side work and
//! answers `409 Conflict` to concurrent updates. Those updates are
//! idempotent, so it is safe to simply resubmit them a little later.

use crate::sleep::Sleeper;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use slog::Logger;
use slog::debug;
use slog::warn;
use std::future::Future;
use std::time::Duration;

/// Total number of attempts, including the first one.
pub const MAX_ATTEMPTS: u32 = 5;

/// Wait before the second attempt; doubled after every busy failure.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(5);

/// Ceiling on a single wait. Never reached within [`MAX_ATTEMPTS`].
const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Errors that can tell whether they mean "busy, try again later".
pub trait BusyError {
    fn is_busy(&self) -> bool;
}

impl BusyError for ironic_client::Error {
    fn is_busy(&self) -> bool {
        ironic_client::Error::is_busy(self)
    }
}

/// The wait schedule between attempts: [`INITIAL_BACKOFF`], doubled after
/// every busy failure, with no jitter and no overall deadline.
///
/// The number of attempts is bounded by [`MAX_ATTEMPTS`], not by the policy.
pub fn busy_policy() -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: INITIAL_BACKOFF,
        initial_interval: INITIAL_BACKOFF,
        multiplier: 2.0,
        randomization_factor: 0.0,
        max_interval: MAX_BACKOFF,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

/// Runs `op` until it returns anything other than a busy error, giving up
/// after [`MAX_ATTEMPTS`] attempts.
///
/// Success and non-busy failures are returned as soon as they are seen. If
/// Ironic is still busy on the last attempt, that final busy error is
/// returned and the caller decides what it means.
pub async fn retry_while_busy<T, E, F, Fut>(
    log: &Logger,
    sleeper: &dyn Sleeper,
    operation: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: BusyError + std::fmt::Display,
{
    let mut policy = busy_policy();
    let mut attempt = 0;
    loop {
        let err = match op().await {
            Err(err) if err.is_busy() => err,
            result => return result,
        };

        attempt += 1;
        let wait = if attempt < MAX_ATTEMPTS {
            policy.next_backoff()
        } else {
            None
        };
        let Some(wait) = wait else {
            warn!(
                log, "ironic still busy, giving up";
                "operation" => operation,
                "attempts" => attempt,
                "error" => %err,
            );
            return Err(err);
        };

        debug!(
            log, "ironic is busy, will try again";
            "operation" => operation,
            "attempt" => attempt,
            "retry_in" => ?wait,
            "error" => %err,
        );
        sleeper.sleep(wait).await;
    }
}
