// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drive a node to a target power state.
//!
//! Ironic accepts a power state change asynchronously and reports
//! completion by clearing the node's `target_power_state`. We submit the
//! request and then poll for that field to clear, within a time budget.

use crate::api::ClientError;
use crate::api::NodeApi;
use crate::retry::retry_while_busy;
use crate::sleep::Sleeper;
use ironic_client::TargetPowerState;
use slog::Logger;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use std::time::Duration;
use thiserror::Error;

/// Time budget used when the caller does not supply one.
pub const DEFAULT_POWER_STATE_TIMEOUT_SECS: u64 = 300;

/// How often the node is polled while a power change is pending. Each poll
/// consumes this much of the time budget.
pub const POWER_STATE_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PowerError {
    #[error(
        "timed out after {timeout_secs}s waiting for power state change to \
         {target} ({polls} polls)"
    )]
    Timeout { target: TargetPowerState, timeout_secs: u64, polls: u32 },
    #[error("failed to read node state while waiting for power state change")]
    ReadState(#[source] ClientError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Submitting,
    Waiting { remaining_secs: u64, polls: u32 },
    Succeeded { polls: u32 },
    TimedOut { polls: u32 },
}

pub struct PowerStateOrchestrator<'a> {
    api: &'a dyn NodeApi,
    sleeper: &'a dyn Sleeper,
    log: Logger,
}

impl<'a> PowerStateOrchestrator<'a> {
    pub fn new(
        api: &'a dyn NodeApi,
        sleeper: &'a dyn Sleeper,
        log: &Logger,
    ) -> Self {
        let log = log.new(o!("component" => "PowerStateOrchestrator"));
        Self { api, sleeper, log }
    }

    /// Asks Ironic to move `node_id` to `target` and waits until Ironic
    /// reports the change as finished.
    ///
    /// `timeout_secs` of `None` or `Some(0)` means
    /// [`DEFAULT_POWER_STATE_TIMEOUT_SECS`]; a non-zero value is also passed
    /// on to Ironic as its own power state timeout.
    ///
    /// A failed submission (including Ironic staying busy through every
    /// retry) does not fail the call: we log it and wait for the node
    /// anyway, and the outcome of the wait decides.
    pub async fn change_power_state(
        &self,
        node_id: &str,
        target: TargetPowerState,
        timeout_secs: Option<u64>,
    ) -> Result<(), PowerError> {
        let log = self.log.new(o!(
            "node_id" => node_id.to_string(),
            "target_power_state" => target.to_string(),
        ));
        let requested_timeout = timeout_secs.filter(|secs| *secs != 0);
        let timeout_secs =
            requested_timeout.unwrap_or(DEFAULT_POWER_STATE_TIMEOUT_SECS);
        let poll_secs = POWER_STATE_POLL_INTERVAL.as_secs();

        let mut phase = Phase::Submitting;
        loop {
            phase = match phase {
                Phase::Submitting => {
                    let submitted = retry_while_busy(
                        &log,
                        self.sleeper,
                        "change power state",
                        || {
                            self.api.change_power_state(
                                node_id,
                                target,
                                requested_timeout,
                            )
                        },
                    )
                    .await;
                    match submitted {
                        Ok(()) => info!(log, "power state change submitted"),
                        Err(err) => warn!(
                            log,
                            "power state change submission failed, waiting \
                             for node anyway";
                            "error" => %err,
                        ),
                    }
                    Phase::Waiting {
                        remaining_secs: timeout_secs,
                        polls: 0,
                    }
                }
                Phase::Waiting { remaining_secs, polls } => {
                    let node = self
                        .api
                        .get_node(node_id)
                        .await
                        .map_err(PowerError::ReadState)?;
                    let polls = polls + 1;
                    if !node.power_transition_pending() {
                        Phase::Succeeded { polls }
                    } else {
                        debug!(
                            log, "power state change still pending";
                            "pending" => node.target_power_state.as_deref(),
                            "remaining_secs" => remaining_secs,
                        );
                        self.sleeper.sleep(POWER_STATE_POLL_INTERVAL).await;
                        let remaining_secs =
                            remaining_secs.saturating_sub(poll_secs);
                        if remaining_secs == 0 {
                            Phase::TimedOut { polls }
                        } else {
                            Phase::Waiting { remaining_secs, polls }
                        }
                    }
                }
                Phase::Succeeded { polls } => {
                    info!(log, "power state change complete"; "polls" => polls);
                    return Ok(());
                }
                Phase::TimedOut { polls } => {
                    warn!(
                        log, "timed out waiting for power state change";
                        "timeout_secs" => timeout_secs,
                    );
                    return Err(PowerError::Timeout {
                        target,
                        timeout_secs,
                        polls,
                    });
                }
            };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::Call;
    use crate::test_util::FakeIronic;
    use crate::test_util::NODE_ID;
    use crate::test_util::RecordingSleeper;
    use crate::test_util::busy;
    use crate::test_util::node;
    use crate::test_util::power_pending;
    use crate::test_util::test_log;
    use crate::test_util::upstream;
    use ironic_client::StatusCode;

    fn polls(fake: &FakeIronic) -> usize {
        fake.count(|c| matches!(c, Call::GetNode))
    }

    #[tokio::test]
    async fn succeeds_when_pending_target_clears() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        let fake = FakeIronic::new(node("available"));
        fake.push_snapshot(Ok(power_pending("power on")));
        fake.push_snapshot(Ok(power_pending("power on")));
        fake.push_snapshot(Ok(node("available")));

        PowerStateOrchestrator::new(&fake, &sleeper, &log)
            .change_power_state(NODE_ID, TargetPowerState::On, Some(300))
            .await
            .unwrap();

        assert_eq!(polls(&fake), 3);
        assert_eq!(sleeper.sleeps(), vec![POWER_STATE_POLL_INTERVAL; 2]);
        assert_eq!(
            fake.calls()[0],
            Call::ChangePowerState(TargetPowerState::On, Some(300))
        );
    }

    #[tokio::test]
    async fn times_out_when_pending_target_never_clears() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        let fake = FakeIronic::new(power_pending("power off"));

        let err = PowerStateOrchestrator::new(&fake, &sleeper, &log)
            .change_power_state(NODE_ID, TargetPowerState::Off, Some(10))
            .await
            .unwrap_err();

        match err {
            PowerError::Timeout { target, timeout_secs, polls } => {
                assert_eq!(target, TargetPowerState::Off);
                assert_eq!(timeout_secs, 10);
                assert_eq!(polls, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(polls(&fake), 2);
        assert_eq!(sleeper.sleeps(), vec![POWER_STATE_POLL_INTERVAL; 2]);
    }

    #[tokio::test]
    async fn huge_timeout_keeps_waiting() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        let fake = FakeIronic::new(node("available"));
        for _ in 0..3 {
            fake.push_snapshot(Ok(power_pending("power on")));
        }
        fake.push_snapshot(Ok(node("available")));

        PowerStateOrchestrator::new(&fake, &sleeper, &log)
            .change_power_state(NODE_ID, TargetPowerState::On, Some(u64::MAX))
            .await
            .unwrap();

        assert_eq!(polls(&fake), 4);
        assert_eq!(
            fake.calls()[0],
            Call::ChangePowerState(TargetPowerState::On, Some(u64::MAX))
        );
    }

    #[tokio::test]
    async fn budget_shorter_than_poll_interval_allows_one_poll() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        let fake = FakeIronic::new(power_pending("power off"));

        let err = PowerStateOrchestrator::new(&fake, &sleeper, &log)
            .change_power_state(NODE_ID, TargetPowerState::Off, Some(3))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PowerError::Timeout { timeout_secs: 3, polls: 1, .. }
        ));
        assert_eq!(polls(&fake), 1);
    }

    #[tokio::test]
    async fn zero_timeout_uses_default_and_is_not_forwarded() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        let fake = FakeIronic::new(power_pending("rebooting"));

        let err = PowerStateOrchestrator::new(&fake, &sleeper, &log)
            .change_power_state(NODE_ID, TargetPowerState::Rebooting, Some(0))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PowerError::Timeout { timeout_secs: 300, polls: 60, .. }
        ));
        assert_eq!(
            fake.calls()[0],
            Call::ChangePowerState(TargetPowerState::Rebooting, None)
        );
    }

    #[tokio::test]
    async fn exhausted_submission_still_waits() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        let fake = FakeIronic::new(node("active"));
        for _ in 0..5 {
            fake.push_power(Err(busy()));
        }

        PowerStateOrchestrator::new(&fake, &sleeper, &log)
            .change_power_state(NODE_ID, TargetPowerState::On, None)
            .await
            .unwrap();

        assert_eq!(
            fake.count(|c| matches!(c, Call::ChangePowerState(..))),
            5
        );
        assert_eq!(polls(&fake), 1);
        // Only the retry backoff; the first poll found nothing pending.
        assert_eq!(
            sleeper.sleeps(),
            [5, 10, 20, 40].map(Duration::from_secs).to_vec()
        );
    }

    #[tokio::test]
    async fn read_error_aborts_wait() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        let fake = FakeIronic::new(node("active"));
        fake.push_snapshot(Ok(power_pending("power on")));
        fake.push_snapshot(Err(upstream(StatusCode::SERVICE_UNAVAILABLE)));

        let err = PowerStateOrchestrator::new(&fake, &sleeper, &log)
            .change_power_state(NODE_ID, TargetPowerState::On, Some(300))
            .await
            .unwrap_err();

        match err {
            PowerError::ReadState(source) => assert_eq!(
                source.status(),
                Some(StatusCode::SERVICE_UNAVAILABLE)
            ),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(polls(&fake), 2);
    }
}
