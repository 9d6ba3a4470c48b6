// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Create, update and delete one node, driving Ironic's state machine
//! through each step.
//!
//! Creation runs manage, then RAID configuration and manual cleaning, then
//! inspection, then provide, and changes power last. Updates change power
//! right after manage, before cleaning, inspection and provide. Every step
//! waits for the previous one to settle and the first failure stops the
//! flow, leaving the node wherever Ironic put it.

use crate::api::ClientError;
use crate::api::NodeApi;
use crate::clean_steps::CleanStepError;
use crate::clean_steps::build_manual_cleaning_steps;
use crate::config::ProvisionConfig;
use crate::node_spec::NodeSpec;
use crate::power::PowerError;
use crate::power::PowerStateOrchestrator;
use crate::provision::ProvisionDriver;
use crate::provision::ProvisionError;
use crate::raid::SetRaidError;
use crate::raid::apply_raid_config;
use crate::retry::retry_while_busy;
use crate::sensitive::RedactedDriverInfo;
use crate::sensitive::is_masked;
use crate::sleep::Sleeper;
use ironic_client::Node;
use ironic_client::PatchOperation;
use ironic_client::PowerState;
use ironic_client::ProvisionTarget;
use ironic_client::TargetPowerState;
use serde_json::Map;
use serde_json::Value;
use slog::Logger;
use slog::debug;
use slog::info;
use slog::o;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not create node")]
    Create(#[source] ClientError),
    #[error("could not read node")]
    Read(#[source] ClientError),
    #[error("could not update {field}")]
    Update {
        field: &'static str,
        #[source]
        err: ClientError,
    },
    #[error("could not manage")]
    Manage(#[source] ProvisionError),
    #[error("failed to set RAID config")]
    RaidConfig(#[source] SetRaidError),
    #[error("failed to build manual cleaning steps")]
    CleanSteps(#[source] CleanStepError),
    #[error("could not clean")]
    Clean(#[source] ProvisionError),
    #[error("could not inspect")]
    Inspect(#[source] ProvisionError),
    #[error("could not make node available")]
    Provide(#[source] ProvisionError),
    #[error("could not change power state")]
    Power(#[source] PowerError),
    #[error("could not tear down node")]
    Teardown(#[source] ProvisionError),
    #[error("could not delete node")]
    Delete(#[source] ClientError),
}

/// Drives whole-node flows against one Ironic.
pub struct NodeLifecycle {
    api: Arc<dyn NodeApi>,
    sleeper: Arc<dyn Sleeper>,
    provision: ProvisionConfig,
    log: Logger,
}

impl NodeLifecycle {
    pub fn new(
        api: Arc<dyn NodeApi>,
        sleeper: Arc<dyn Sleeper>,
        provision: ProvisionConfig,
        log: &Logger,
    ) -> Self {
        let log = log.new(o!("component" => "NodeLifecycle"));
        Self { api, sleeper, provision, log }
    }

    fn provision_driver(&self) -> ProvisionDriver<'_> {
        ProvisionDriver::new(
            &*self.api,
            &*self.sleeper,
            &self.provision,
            &self.log,
        )
    }

    /// Enrolls the node described by `spec` and walks it through every step
    /// the spec asks for. Returns the node as Ironic reports it at the end.
    pub async fn create(
        &self,
        spec: &NodeSpec,
    ) -> Result<Node, LifecycleError> {
        let created = self
            .api
            .create_node(&spec.to_create())
            .await
            .map_err(LifecycleError::Create)?;
        let node_id = created.uuid.as_str();
        let log = self.log.new(o!("node_id" => node_id.to_string()));
        info!(
            log, "node created";
            "driver" => &spec.driver,
            "driver_info" => %RedactedDriverInfo(&spec.driver_info),
        );

        if spec.needs_manageable() {
            self.provision_driver()
                .change_provision_state(node_id, ProvisionTarget::Manage, &[])
                .await
                .map_err(LifecycleError::Manage)?;
        }
        if spec.clean {
            let interface = spec
                .interfaces
                .raid_interface
                .as_deref()
                .unwrap_or(created.raid_interface());
            self.clean(&log, node_id, interface, spec).await?;
        }
        if spec.inspect {
            self.provision_driver()
                .change_provision_state(node_id, ProvisionTarget::Inspect, &[])
                .await
                .map_err(LifecycleError::Inspect)?;
        }
        if spec.available {
            self.provision_driver()
                .change_provision_state(node_id, ProvisionTarget::Provide, &[])
                .await
                .map_err(LifecycleError::Provide)?;
        }
        if let Some(target) = spec.target_power_state {
            self.set_power_state(node_id, target, spec.power_state_timeout)
                .await?;
        }

        self.api.get_node(node_id).await.map_err(LifecycleError::Read)
    }

    /// Moves the node at `node_id` from `previous` to `desired`.
    ///
    /// Boolean steps (manage, clean, inspect, available) only run when they
    /// flip from off to on; nothing is ever undone.
    pub async fn update(
        &self,
        node_id: &str,
        previous: &NodeSpec,
        desired: &NodeSpec,
    ) -> Result<Node, LifecycleError> {
        let log = self.log.new(o!("node_id" => node_id.to_string()));
        let observed =
            self.api.get_node(node_id).await.map_err(LifecycleError::Read)?;

        for ((field, before), (_, after)) in
            previous.string_fields().into_iter().zip(desired.string_fields())
        {
            if before == after {
                continue;
            }
            let path = format!("/{field}");
            let op = match after {
                Some(value) => {
                    PatchOperation::replace(path, Value::String(value.into()))
                }
                None => PatchOperation::remove(path),
            };
            self.patch(&log, node_id, field, vec![op]).await?;
        }

        let driver_info = driver_info_patch(
            &log,
            &observed.driver_info,
            &previous.driver_info,
            &desired.driver_info,
        );
        if !driver_info.is_empty() {
            self.patch(&log, node_id, "driver_info", driver_info).await?;
        }

        let newly = |before: bool, after: bool| after && !before;
        let manage = newly(previous.manage, desired.manage);
        let clean = newly(previous.clean, desired.clean);
        let inspect = newly(previous.inspect, desired.inspect);

        if manage || clean || inspect {
            self.provision_driver()
                .change_provision_state(node_id, ProvisionTarget::Manage, &[])
                .await
                .map_err(LifecycleError::Manage)?;
        }

        if desired.target_power_state != previous.target_power_state {
            if let Some(target) = desired.target_power_state {
                if already_powered(observed.power_state, target) {
                    debug!(
                        log, "node already in target power state";
                        "target_power_state" => %target,
                    );
                } else {
                    self.set_power_state(
                        node_id,
                        target,
                        desired.power_state_timeout,
                    )
                    .await?;
                }
            }
        }

        if clean {
            let interface = desired
                .interfaces
                .raid_interface
                .as_deref()
                .unwrap_or(observed.raid_interface());
            self.clean(&log, node_id, interface, desired).await?;
        }
        if inspect {
            self.provision_driver()
                .change_provision_state(node_id, ProvisionTarget::Inspect, &[])
                .await
                .map_err(LifecycleError::Inspect)?;
        }
        if newly(previous.available, desired.available) {
            self.provision_driver()
                .change_provision_state(node_id, ProvisionTarget::Provide, &[])
                .await
                .map_err(LifecycleError::Provide)?;
        }

        let properties = desired.merged_properties();
        if previous.merged_properties() != properties {
            let op =
                PatchOperation::add("/properties", Value::Object(properties));
            self.patch(&log, node_id, "properties", vec![op]).await?;
        }

        self.api.get_node(node_id).await.map_err(LifecycleError::Read)
    }

    /// Tears the node down to `available` (or leaves it where nothing needs
    /// undoing) and removes it from Ironic.
    pub async fn delete(&self, node_id: &str) -> Result<(), LifecycleError> {
        let log = self.log.new(o!("node_id" => node_id.to_string()));
        self.provision_driver()
            .change_provision_state(node_id, ProvisionTarget::Deleted, &[])
            .await
            .map_err(LifecycleError::Teardown)?;
        retry_while_busy(&log, &*self.sleeper, "delete node", || {
            self.api.delete_node(node_id)
        })
        .await
        .map_err(LifecycleError::Delete)?;
        info!(log, "node deleted");
        Ok(())
    }

    pub async fn set_power_state(
        &self,
        node_id: &str,
        target: TargetPowerState,
        timeout_secs: Option<u64>,
    ) -> Result<(), LifecycleError> {
        PowerStateOrchestrator::new(&*self.api, &*self.sleeper, &self.log)
            .change_power_state(node_id, target, timeout_secs)
            .await
            .map_err(LifecycleError::Power)
    }

    async fn clean(
        &self,
        log: &Logger,
        node_id: &str,
        raid_interface: &str,
        spec: &NodeSpec,
    ) -> Result<(), LifecycleError> {
        // Validate every input before anything is sent to Ironic.
        let steps = build_manual_cleaning_steps(
            log,
            raid_interface,
            spec.raid_config.as_deref(),
            spec.bios_settings.as_deref(),
        )
        .map_err(LifecycleError::CleanSteps)?;
        if let Some(raid_config) = spec.raid_config.as_deref() {
            apply_raid_config(
                &*self.api,
                &*self.sleeper,
                log,
                node_id,
                raid_interface,
                raid_config,
                spec.root_device_hints(),
            )
            .await
            .map_err(LifecycleError::RaidConfig)?;
        }
        self.provision_driver()
            .change_provision_state(node_id, ProvisionTarget::Clean, &steps)
            .await
            .map_err(LifecycleError::Clean)
    }

    async fn patch(
        &self,
        log: &Logger,
        node_id: &str,
        field: &'static str,
        ops: Vec<PatchOperation>,
    ) -> Result<(), LifecycleError> {
        retry_while_busy(log, &*self.sleeper, "update node", || {
            self.api.update_node(node_id, &ops)
        })
        .await
        .map_err(|err| LifecycleError::Update { field, err })?;
        debug!(log, "node updated";
            "field" => field,
            "operations" => ops.len(),
        );
        Ok(())
    }
}

fn already_powered(observed: PowerState, target: TargetPowerState) -> bool {
    matches!(
        (observed, target),
        (PowerState::On, TargetPowerState::On)
            | (PowerState::Off, TargetPowerState::Off)
    )
}

/// Escapes `key` for use as one segment of a JSON pointer.
fn pointer_segment(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Patch operations that bring the node's `driver_info` in line with
/// `desired`.
///
/// Keys are compared against what Ironic reports. Where Ironic reports the
/// mask for a sensitive key, the real value is unknown, so the key is only
/// written when it changed between `previous` and `desired`. Keys dropped
/// from `desired` since `previous` are removed.
fn driver_info_patch(
    log: &Logger,
    observed: &Map<String, Value>,
    previous: &Map<String, Value>,
    desired: &Map<String, Value>,
) -> Vec<PatchOperation> {
    let mut ops = Vec::new();
    for (key, value) in desired {
        match observed.get(key) {
            Some(current) if current == value => continue,
            Some(current)
                if is_masked(key, current)
                    && previous.get(key) == Some(value) =>
            {
                debug!(log, "driver_info value is masked by ironic, skipping";
                    "key" => key);
                continue;
            }
            _ => (),
        }
        let path = format!("/driver_info/{}", pointer_segment(key));
        ops.push(PatchOperation::add(path, value.clone()));
    }
    for key in previous.keys() {
        if !desired.contains_key(key) && observed.contains_key(key) {
            let path = format!("/driver_info/{}", pointer_segment(key));
            ops.push(PatchOperation::remove(path));
        }
    }
    ops
}
