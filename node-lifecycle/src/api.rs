// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The seam between the orchestration logic and the Ironic service.

use async_trait::async_trait;
use ironic_client::CleanStep;
use ironic_client::LogicalDisk;
use ironic_client::Node;
use ironic_client::NodeCreate;
use ironic_client::PatchOperation;
use ironic_client::ProvisionTarget;
use ironic_client::TargetPowerState;

pub type ClientError = ironic_client::Error;

/// Service operations consumed by this crate.
///
/// Implemented by [`ironic_client::Client`]; tests substitute a scripted fake.
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn get_node(&self, node_id: &str) -> Result<Node, ClientError>;

    async fn update_node(
        &self,
        node_id: &str,
        patch: &[PatchOperation],
    ) -> Result<Node, ClientError>;

    async fn change_power_state(
        &self,
        node_id: &str,
        target: TargetPowerState,
        timeout: Option<u64>,
    ) -> Result<(), ClientError>;

    async fn set_raid_config(
        &self,
        node_id: &str,
        logical_disks: &[LogicalDisk],
    ) -> Result<(), ClientError>;

    async fn change_provision_state(
        &self,
        node_id: &str,
        target: ProvisionTarget,
        clean_steps: &[CleanStep],
    ) -> Result<(), ClientError>;

    async fn create_node(&self, node: &NodeCreate) -> Result<Node, ClientError>;

    async fn delete_node(&self, node_id: &str) -> Result<(), ClientError>;
}

#[async_trait]
impl NodeApi for ironic_client::Client {
    async fn get_node(&self, node_id: &str) -> Result<Node, ClientError> {
        ironic_client::Client::get_node(self, node_id).await
    }

    async fn update_node(
        &self,
        node_id: &str,
        patch: &[PatchOperation],
    ) -> Result<Node, ClientError> {
        ironic_client::Client::update_node(self, node_id, patch).await
    }

    async fn change_power_state(
        &self,
        node_id: &str,
        target: TargetPowerState,
        timeout: Option<u64>,
    ) -> Result<(), ClientError> {
        ironic_client::Client::change_power_state(
            self, node_id, target, timeout,
        )
        .await
    }

    async fn set_raid_config(
        &self,
        node_id: &str,
        logical_disks: &[LogicalDisk],
    ) -> Result<(), ClientError> {
        ironic_client::Client::set_raid_config(self, node_id, logical_disks)
            .await
    }

    async fn change_provision_state(
        &self,
        node_id: &str,
        target: ProvisionTarget,
        clean_steps: &[CleanStep],
    ) -> Result<(), ClientError> {
        ironic_client::Client::change_provision_state(
            self,
            node_id,
            target,
            clean_steps,
        )
        .await
    }

    async fn create_node(
        &self,
        node: &NodeCreate,
    ) -> Result<Node, ClientError> {
        ironic_client::Client::create_node(self, node).await
    }

    async fn delete_node(&self, node_id: &str) -> Result<(), ClientError> {
        ironic_client::Client::delete_node(self, node_id).await
    }
}
