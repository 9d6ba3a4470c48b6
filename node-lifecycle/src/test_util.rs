// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scripted stand-ins for Ironic and the timer, shared by unit tests.

use crate::api::ClientError;
use crate::api::NodeApi;
use crate::sleep::Sleeper;
use async_trait::async_trait;
use ironic_client::CleanStep;
use ironic_client::LogicalDisk;
use ironic_client::Node;
use ironic_client::NodeCreate;
use ironic_client::PatchOperation;
use ironic_client::PowerState;
use ironic_client::ProvisionTarget;
use ironic_client::StatusCode;
use ironic_client::TargetPowerState;
use serde_json::json;
use slog::Logger;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub(crate) const NODE_ID: &str = "c8b4b4e6-5e1c-4e34-a3c6-0b5b1e2a9d11";

pub(crate) fn test_log() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

pub(crate) fn busy() -> ClientError {
    ClientError::Busy {
        message: format!("Node {NODE_ID} is locked by host conductor-0"),
    }
}

/// A RAID layout with a single 100 GiB hardware mirror.
pub(crate) fn mirror_layout() -> String {
    json!({"hardwareRAIDVolumes": [{"sizeGibibytes": 100, "level": "1"}]})
        .to_string()
}

pub(crate) fn upstream(status: StatusCode) -> ClientError {
    ClientError::Api { status, message: format!("upstream said {status}") }
}

pub(crate) fn node(provision_state: &str) -> Node {
    serde_json::from_value(json!({
        "uuid": NODE_ID,
        "driver": "redfish",
        "power_state": "power off",
        "target_power_state": null,
        "provision_state": provision_state,
        "raid_interface": "redfish",
    }))
    .unwrap()
}

pub(crate) fn power_pending(target: &str) -> Node {
    let mut n = node("available");
    n.target_power_state = Some(target.to_string());
    n
}

pub(crate) fn provision_pending(state: &str, target: &str) -> Node {
    let mut n = node(state);
    n.target_provision_state = Some(target.to_string());
    n
}

/// Records every requested wait and returns immediately.
#[derive(Default)]
pub(crate) struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    GetNode,
    UpdateNode(Vec<PatchOperation>),
    ChangePowerState(TargetPowerState, Option<u64>),
    SetRaidConfig(Vec<LogicalDisk>),
    ChangeProvisionState(ProvisionTarget, Vec<CleanStep>),
    CreateNode(NodeCreate),
    DeleteNode,
}

struct FakeState {
    calls: Vec<Call>,
    // Returned by `get_node` once `snapshots` runs dry; replaced by every
    // successful scripted snapshot.
    node: Node,
    snapshots: VecDeque<Result<Node, ClientError>>,
    updates: VecDeque<Result<(), ClientError>>,
    power: VecDeque<Result<(), ClientError>>,
    raid: VecDeque<Result<(), ClientError>>,
    provision: VecDeque<Result<(), ClientError>>,
    // Whether accepted power and provision changes take effect immediately.
    settle: bool,
}

/// An Ironic that answers from per-operation scripts. Unscripted calls
/// succeed.
pub(crate) struct FakeIronic {
    state: Mutex<FakeState>,
}

impl FakeIronic {
    pub(crate) fn new(node: Node) -> Self {
        Self {
            state: Mutex::new(FakeState {
                calls: Vec::new(),
                node,
                snapshots: VecDeque::new(),
                updates: VecDeque::new(),
                power: VecDeque::new(),
                raid: VecDeque::new(),
                provision: VecDeque::new(),
                settle: false,
            }),
        }
    }

    /// Makes every accepted power or provision change complete at once, so
    /// the next `get_node` sees a settled node.
    pub(crate) fn settling(self) -> Self {
        self.state.lock().unwrap().settle = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    pub(crate) fn push_snapshot(&self, snapshot: Result<Node, ClientError>) {
        self.state.lock().unwrap().snapshots.push_back(snapshot);
    }

    pub(crate) fn push_update(&self, result: Result<(), ClientError>) {
        self.state.lock().unwrap().updates.push_back(result);
    }

    pub(crate) fn push_power(&self, result: Result<(), ClientError>) {
        self.state.lock().unwrap().power.push_back(result);
    }

    pub(crate) fn push_raid(&self, result: Result<(), ClientError>) {
        self.state.lock().unwrap().raid.push_back(result);
    }

    pub(crate) fn push_provision(&self, result: Result<(), ClientError>) {
        self.state.lock().unwrap().provision.push_back(result);
    }
}

#[async_trait]
impl NodeApi for FakeIronic {
    async fn get_node(&self, _node_id: &str) -> Result<Node, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetNode);
        match state.snapshots.pop_front() {
            Some(Ok(node)) => {
                state.node = node.clone();
                Ok(node)
            }
            Some(Err(err)) => Err(err),
            None => Ok(state.node.clone()),
        }
    }

    async fn update_node(
        &self,
        _node_id: &str,
        patch: &[PatchOperation],
    ) -> Result<Node, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::UpdateNode(patch.to_vec()));
        state.updates.pop_front().unwrap_or(Ok(()))?;
        Ok(state.node.clone())
    }

    async fn change_power_state(
        &self,
        _node_id: &str,
        target: TargetPowerState,
        timeout: Option<u64>,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ChangePowerState(target, timeout));
        state.power.pop_front().unwrap_or(Ok(()))?;
        if state.settle {
            state.node.target_power_state = None;
            state.node.power_state = match target {
                TargetPowerState::Off | TargetPowerState::SoftOff => {
                    PowerState::Off
                }
                _ => PowerState::On,
            };
        }
        Ok(())
    }

    async fn set_raid_config(
        &self,
        _node_id: &str,
        logical_disks: &[LogicalDisk],
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::SetRaidConfig(logical_disks.to_vec()));
        state.raid.pop_front().unwrap_or(Ok(()))
    }

    async fn change_provision_state(
        &self,
        _node_id: &str,
        target: ProvisionTarget,
        clean_steps: &[CleanStep],
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(Call::ChangeProvisionState(target, clean_steps.to_vec()));
        state.provision.pop_front().unwrap_or(Ok(()))?;
        if state.settle {
            state.node.target_provision_state = None;
            state.node.provision_state = match target {
                ProvisionTarget::Provide | ProvisionTarget::Deleted => {
                    "available"
                }
                _ => "manageable",
            }
            .to_string();
        }
        Ok(())
    }

    async fn create_node(
        &self,
        node: &NodeCreate,
    ) -> Result<Node, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::CreateNode(node.clone()));
        Ok(state.node.clone())
    }

    async fn delete_node(&self, _node_id: &str) -> Result<(), ClientError> {
        self.state.lock().unwrap().calls.push(Call::DeleteNode);
        Ok(())
    }
}
