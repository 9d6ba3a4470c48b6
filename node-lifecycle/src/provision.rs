// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drive a node through provision state transitions.
//!
//! Each transition is submitted and then polled until Ironic clears the
//! node's `target_provision_state`, so that the next step of a flow always
//! starts from a settled node.

use crate::api::ClientError;
use crate::api::NodeApi;
use crate::config::ProvisionConfig;
use crate::retry::retry_while_busy;
use crate::sleep::Sleeper;
use ironic_client::CleanStep;
use ironic_client::Node;
use ironic_client::ProvisionTarget;
use slog::Logger;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use std::time::Duration;
use thiserror::Error;

pub const MANAGEABLE: &str = "manageable";
pub const AVAILABLE: &str = "available";
pub const ENROLL: &str = "enroll";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to request provision state {target}: {err}")]
    Submit {
        target: ProvisionTarget,
        #[source]
        err: ClientError,
    },
    #[error("failed to read node state")]
    ReadState(#[source] ClientError),
    #[error(
        "timed out after {timeout_secs}s waiting for provision state \
         {target}"
    )]
    Timeout { target: ProvisionTarget, timeout_secs: u64 },
    #[error(
        "provision state {target} ended in {state:?}{}",
        last_error_suffix(.last_error)
    )]
    Failed {
        target: ProvisionTarget,
        state: String,
        last_error: Option<String>,
    },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error.as_deref().map(|e| format!(": {e}")).unwrap_or_default()
}

/// The stable state a node settles in once `target` has completed.
fn settled_state(target: ProvisionTarget) -> &'static str {
    match target {
        ProvisionTarget::Manage
        | ProvisionTarget::Clean
        | ProvisionTarget::Inspect => MANAGEABLE,
        ProvisionTarget::Provide | ProvisionTarget::Deleted => AVAILABLE,
    }
}

/// Whether `target` has nothing to do for a node currently in `state`.
fn already_there(target: ProvisionTarget, state: &str) -> bool {
    match target {
        ProvisionTarget::Manage => state == MANAGEABLE,
        ProvisionTarget::Provide => state == AVAILABLE,
        ProvisionTarget::Deleted => {
            matches!(state, ENROLL | MANAGEABLE | AVAILABLE)
        }
        ProvisionTarget::Clean | ProvisionTarget::Inspect => false,
    }
}

fn is_failure_state(state: &str) -> bool {
    state == "error" || state.ends_with(" failed")
}

pub struct ProvisionDriver<'a> {
    api: &'a dyn NodeApi,
    sleeper: &'a dyn Sleeper,
    poll_interval: Duration,
    timeout_secs: u64,
    log: Logger,
}

impl<'a> ProvisionDriver<'a> {
    pub fn new(
        api: &'a dyn NodeApi,
        sleeper: &'a dyn Sleeper,
        config: &ProvisionConfig,
        log: &Logger,
    ) -> Self {
        let log = log.new(o!("component" => "ProvisionDriver"));
        Self {
            api,
            sleeper,
            poll_interval: config.poll_interval(),
            timeout_secs: config.timeout_secs,
            log,
        }
    }

    /// Moves `node_id` to `target` and waits for the transition to finish.
    ///
    /// `clean_steps` is only sent with [`ProvisionTarget::Clean`]; manual
    /// cleaning with no steps is skipped entirely.
    pub async fn change_provision_state(
        &self,
        node_id: &str,
        target: ProvisionTarget,
        clean_steps: &[CleanStep],
    ) -> Result<(), ProvisionError> {
        let log = self.log.new(o!(
            "node_id" => node_id.to_string(),
            "target_provision_state" => target.to_string(),
        ));

        if target == ProvisionTarget::Clean && clean_steps.is_empty() {
            debug!(log, "no clean steps, skipping manual cleaning");
            return Ok(());
        }
        let clean_steps: &[CleanStep] =
            if target == ProvisionTarget::Clean { clean_steps } else { &[] };

        let node = self.read_node(node_id).await?;
        if already_there(target, &node.provision_state) {
            info!(
                log, "node already in requested provision state";
                "provision_state" => &node.provision_state,
            );
            return Ok(());
        }

        retry_while_busy(&log, self.sleeper, "change provision state", || {
            self.api.change_provision_state(node_id, target, clean_steps)
        })
        .await
        .map_err(|err| ProvisionError::Submit { target, err })?;
        info!(
            log, "provision state change submitted";
            "from" => &node.provision_state,
            "clean_steps" => clean_steps.len(),
        );

        let poll_secs = self.poll_interval.as_secs().max(1);
        let mut waited_secs = 0;
        loop {
            let node = self.read_node(node_id).await?;
            if is_failure_state(&node.provision_state) {
                return Err(self.failed(&log, target, node));
            }
            if !node.provision_transition_pending() {
                if node.provision_state == settled_state(target) {
                    info!(
                        log, "provision state change complete";
                        "provision_state" => &node.provision_state,
                        "waited_secs" => waited_secs,
                    );
                    return Ok(());
                }
                return Err(self.failed(&log, target, node));
            }
            if waited_secs >= self.timeout_secs {
                warn!(
                    log, "timed out waiting for provision state change";
                    "provision_state" => &node.provision_state,
                    "timeout_secs" => self.timeout_secs,
                );
                return Err(ProvisionError::Timeout {
                    target,
                    timeout_secs: self.timeout_secs,
                });
            }
            debug!(
                log, "provision state change still pending";
                "provision_state" => &node.provision_state,
                "pending" => node.target_provision_state.as_deref(),
            );
            self.sleeper.sleep(self.poll_interval).await;
            waited_secs += poll_secs;
        }
    }

    async fn read_node(&self, node_id: &str) -> Result<Node, ProvisionError> {
        self.api.get_node(node_id).await.map_err(ProvisionError::ReadState)
    }

    fn failed(
        &self,
        log: &Logger,
        target: ProvisionTarget,
        node: Node,
    ) -> ProvisionError {
        warn!(
            log, "provision state change failed";
            "provision_state" => &node.provision_state,
            "last_error" => node.last_error.as_deref(),
        );
        ProvisionError::Failed {
            target,
            state: node.provision_state,
            last_error: node.last_error,
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
    use crate::test_util::provision_pending;
    use crate::test_util::test_log;
    use crate::test_util::upstream;
    use ironic_client::StatusCode;

    fn config() -> ProvisionConfig {
        ProvisionConfig { poll_interval_secs: 10, timeout_secs: 30 }
    }

    fn provision_calls(fake: &FakeIronic) -> usize {
        fake.count(|c| matches!(c, Call::ChangeProvisionState(..)))
    }

    #[tokio::test]
    async fn manage_waits_until_settled() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        let fake = FakeIronic::new(node("enroll"));
        fake.push_snapshot(Ok(node("enroll")));
        fake.push_snapshot(Ok(provision_pending("verifying", "manageable")));
        fake.push_snapshot(Ok(node("manageable")));

        ProvisionDriver::new(&fake, &sleeper, &config(), &log)
            .change_provision_state(NODE_ID, ProvisionTarget::Manage, &[])
            .await
            .unwrap();

        assert_eq!(
            fake.calls(),
            vec![
                Call::GetNode,
                Call::ChangeProvisionState(ProvisionTarget::Manage, vec![]),
                Call::GetNode,
                Call::GetNode,
            ]
        );
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(10)]);
    }

    #[tokio::test]
    async fn clean_sends_steps_and_retries_busy() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        let fake = FakeIronic::new(node("manageable"));
        fake.push_provision(Err(busy()));
        let steps = vec![CleanStep::new("raid", "delete_configuration")];

        ProvisionDriver::new(&fake, &sleeper, &config(), &log)
            .change_provision_state(NODE_ID, ProvisionTarget::Clean, &steps)
            .await
            .unwrap();

        assert_eq!(provision_calls(&fake), 2);
        assert_eq!(
            fake.calls()[2],
            Call::ChangeProvisionState(ProvisionTarget::Clean, steps)
        );
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(5)]);
    }

    #[tokio::test]
    async fn clean_without_steps_does_nothing() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        let fake = FakeIronic::new(node("manageable"));

        ProvisionDriver::new(&fake, &sleeper, &config(), &log)
            .change_provision_state(NODE_ID, ProvisionTarget::Clean, &[])
            .await
            .unwrap();

        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn settled_targets_are_skipped() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        for (state, target) in [
            ("manageable", ProvisionTarget::Manage),
            ("available", ProvisionTarget::Provide),
            ("enroll", ProvisionTarget::Deleted),
            ("manageable", ProvisionTarget::Deleted),
        ] {
            let fake = FakeIronic::new(node(state));
            ProvisionDriver::new(&fake, &sleeper, &config(), &log)
                .change_provision_state(NODE_ID, target, &[])
                .await
                .unwrap();
            assert_eq!(fake.calls(), vec![Call::GetNode], "{state} {target}");
        }
    }

    #[tokio::test]
    async fn unexpected_settled_state_fails() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        let fake = FakeIronic::new(node("manageable"));
        fake.push_snapshot(Ok(node("manageable")));
        let mut failed = node("inspect failed");
        failed.last_error = Some("BMC unreachable".to_string());
        fake.push_snapshot(Ok(failed));

        let err = ProvisionDriver::new(&fake, &sleeper, &config(), &log)
            .change_provision_state(NODE_ID, ProvisionTarget::Inspect, &[])
            .await
            .unwrap_err();

        match &err {
            ProvisionError::Failed { target, state, last_error } => {
                assert_eq!(*target, ProvisionTarget::Inspect);
                assert_eq!(state, "inspect failed");
                assert_eq!(last_error.as_deref(), Some("BMC unreachable"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "provision state inspect ended in \"inspect failed\": BMC \
             unreachable"
        );
    }

    #[tokio::test]
    async fn times_out_while_pending() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        let fake =
            FakeIronic::new(provision_pending("cleaning", "available"));

        let err = ProvisionDriver::new(&fake, &sleeper, &config(), &log)
            .change_provision_state(NODE_ID, ProvisionTarget::Provide, &[])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Timeout {
                target: ProvisionTarget::Provide,
                timeout_secs: 30
            }
        ));
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(10); 3]);
    }

    #[tokio::test]
    async fn submission_error_is_returned() {
        let log = test_log();
        let sleeper = RecordingSleeper::default();
        let fake = FakeIronic::new(node("active"));
        fake.push_provision(Err(upstream(StatusCode::BAD_REQUEST)));

        let err = ProvisionDriver::new(&fake, &sleeper, &config(), &log)
            .change_provision_state(NODE_ID, ProvisionTarget::Deleted, &[])
            .await
            .unwrap_err();

        match err {
            ProvisionError::Submit { target, err } => {
                assert_eq!(target, ProvisionTarget::Deleted);
                assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(provision_calls(&fake), 1);
    }
}
