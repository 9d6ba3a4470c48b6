// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire types for the subset of the Ironic v1 API used by this client.

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde_json::Map;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Current power state reported by Ironic.
///
/// Ironic reports `null` while it has not yet synchronized with the BMC; that
/// and any value this client does not know about map to `Unknown`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
    #[default]
    Unknown,
}

impl PowerState {
    pub fn from_api(value: Option<&str>) -> Self {
        match value {
            Some("power on") => PowerState::On,
            Some("power off") => PowerState::Off,
            _ => PowerState::Unknown,
        }
    }

    pub fn as_api_str(&self) -> Option<&'static str> {
        match self {
            PowerState::On => Some("power on"),
            PowerState::Off => Some("power off"),
            PowerState::Unknown => None,
        }
    }
}

impl<'de> Deserialize<'de> for PowerState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(PowerState::from_api(value.as_deref()))
    }
}

impl Serialize for PowerState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.as_api_str().serialize(serializer)
    }
}

/// Power state a caller may ask Ironic to move a node into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum TargetPowerState {
    #[serde(rename = "power on")]
    On,
    #[serde(rename = "power off")]
    Off,
    #[serde(rename = "rebooting")]
    Rebooting,
    #[serde(rename = "soft power off")]
    SoftOff,
    #[serde(rename = "soft rebooting")]
    SoftRebooting,
}

impl TargetPowerState {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            TargetPowerState::On => "power on",
            TargetPowerState::Off => "power off",
            TargetPowerState::Rebooting => "rebooting",
            TargetPowerState::SoftOff => "soft power off",
            TargetPowerState::SoftRebooting => "soft rebooting",
        }
    }
}

impl fmt::Display for TargetPowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown target power state {0:?}")]
pub struct UnknownPowerState(pub String);

impl FromStr for TargetPowerState {
    type Err = UnknownPowerState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "power on" | "on" => Ok(TargetPowerState::On),
            "power off" | "off" => Ok(TargetPowerState::Off),
            "rebooting" | "reboot" => Ok(TargetPowerState::Rebooting),
            "soft power off" | "soft-off" => Ok(TargetPowerState::SoftOff),
            "soft rebooting" | "soft-reboot" => {
                Ok(TargetPowerState::SoftRebooting)
            }
            other => Err(UnknownPowerState(other.to_string())),
        }
    }
}

/// Provision state verbs accepted by `PUT /v1/nodes/{id}/states/provision`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionTarget {
    Manage,
    Clean,
    Inspect,
    Provide,
    Deleted,
}

impl ProvisionTarget {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            ProvisionTarget::Manage => "manage",
            ProvisionTarget::Clean => "clean",
            ProvisionTarget::Inspect => "inspect",
            ProvisionTarget::Provide => "provide",
            ProvisionTarget::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ProvisionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_str())
    }
}

/// Hardware interface names of a node. Every field is optional: Ironic picks
/// the driver default for anything left unset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeInterfaces {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspect_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raid_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescue_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_interface: Option<String>,
}

impl NodeInterfaces {
    /// Returns each interface as `(field name, value)`, in API order.
    pub fn fields(&self) -> [(&'static str, Option<&str>); 11] {
        [
            ("boot_interface", self.boot_interface.as_deref()),
            ("console_interface", self.console_interface.as_deref()),
            ("deploy_interface", self.deploy_interface.as_deref()),
            ("inspect_interface", self.inspect_interface.as_deref()),
            ("management_interface", self.management_interface.as_deref()),
            ("network_interface", self.network_interface.as_deref()),
            ("power_interface", self.power_interface.as_deref()),
            ("raid_interface", self.raid_interface.as_deref()),
            ("rescue_interface", self.rescue_interface.as_deref()),
            ("storage_interface", self.storage_interface.as_deref()),
            ("vendor_interface", self.vendor_interface.as_deref()),
        ]
    }
}

/// A node as returned by `GET /v1/nodes/{id}`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Node {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub driver_info: Map<String, Value>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub power_state: PowerState,
    /// Set while a power transition is in flight; Ironic clears it (to
    /// `null`) once the transition has finished.
    #[serde(default)]
    pub target_power_state: Option<String>,
    pub provision_state: String,
    #[serde(default)]
    pub target_provision_state: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub instance_uuid: Option<String>,
    #[serde(default)]
    pub resource_class: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub conductor_group: Option<String>,
    #[serde(flatten)]
    pub interfaces: NodeInterfaces,
}

impl Node {
    /// Whether Ironic still has a power state change pending for this node.
    pub fn power_transition_pending(&self) -> bool {
        self.target_power_state.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Whether Ironic still has a provision state change pending.
    pub fn provision_transition_pending(&self) -> bool {
        self.target_provision_state.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn raid_interface(&self) -> &str {
        self.interfaces.raid_interface.as_deref().unwrap_or("")
    }
}

/// Body of `POST /v1/nodes`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NodeCreate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub driver: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub driver_info: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conductor_group: Option<String>,
    #[serde(flatten)]
    pub interfaces: NodeInterfaces,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// One JSON patch (RFC 6902) operation applied by `PATCH /v1/nodes/{id}`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self { op: PatchOp::Add, path: path.into(), value: Some(value) }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self { op: PatchOp::Replace, path: path.into(), value: Some(value) }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self { op: PatchOp::Remove, path: path.into(), value: None }
    }
}

/// One volume of a node's target RAID configuration.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct LogicalDisk {
    pub size_gb: u64,
    pub raid_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_root_volume: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_physical_disks: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub physical_disks: Vec<Value>,
}

impl LogicalDisk {
    pub fn new(size_gb: u64, raid_level: impl Into<String>) -> Self {
        Self {
            size_gb,
            raid_level: raid_level.into(),
            is_root_volume: None,
            volume_name: None,
            controller: None,
            disk_type: None,
            number_of_physical_disks: None,
            physical_disks: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.is_root_volume.unwrap_or(false)
    }
}

/// One manual cleaning step.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CleanStep {
    pub interface: String,
    pub step: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl CleanStep {
    pub fn new(interface: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            step: step.into(),
            args: Map::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.args.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct PowerStateRequest {
    pub target: TargetPowerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RaidConfigRequest<'a> {
    pub logical_disks: &'a [LogicalDisk],
}

#[derive(Debug, Serialize)]
pub(crate) struct ProvisionStateRequest<'a> {
    pub target: ProvisionTarget,
    #[serde(skip_serializing_if = "no_clean_steps")]
    pub clean_steps: &'a [CleanStep],
}

fn no_clean_steps(steps: &&[CleanStep]) -> bool {
    steps.is_empty()
}
