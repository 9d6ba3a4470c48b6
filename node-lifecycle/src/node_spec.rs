// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The desired shape of a node, as described by an operator.

use crate::config::LoadError;
use crate::config::load_toml;
use camino::Utf8Path;
use ironic_client::NodeCreate;
use ironic_client::NodeInterfaces;
use ironic_client::TargetPowerState;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Key under `properties` that carries the root device hints.
pub const ROOT_DEVICE_PROPERTY: &str = "root_device";

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct NodeSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub driver: String,
    #[serde(default)]
    pub driver_info: Map<String, Value>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Root device hints; merged into `properties` when sent to Ironic and
    /// used to pick the root RAID volume.
    #[serde(default)]
    pub root_device: Map<String, Value>,
    #[serde(default)]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub resource_class: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub conductor_group: Option<String>,
    #[serde(flatten)]
    pub interfaces: NodeInterfaces,

    /// Move the node to `manageable`.
    #[serde(default)]
    pub manage: bool,
    /// Run manual cleaning with the RAID and BIOS steps below.
    #[serde(default)]
    pub clean: bool,
    #[serde(default)]
    pub inspect: bool,
    /// Move the node to `available`.
    #[serde(default)]
    pub available: bool,

    #[serde(default)]
    pub target_power_state: Option<TargetPowerState>,
    #[serde(default)]
    pub power_state_timeout: Option<u64>,

    /// RAID layout as JSON, see [`crate::raid::RaidConfig`].
    #[serde(default)]
    pub raid_config: Option<String>,
    /// BIOS settings as a JSON array of `{"name", "value"}` pairs.
    #[serde(default)]
    pub bios_settings: Option<String>,
}

impl NodeSpec {
    pub fn from_file(path: &Utf8Path) -> Result<NodeSpec, LoadError> {
        load_toml(path)
    }

    /// Whether any requested step needs the node to be `manageable` first.
    pub fn needs_manageable(&self) -> bool {
        self.manage || self.clean || self.inspect
    }

    pub fn root_device_hints(&self) -> Option<&Map<String, Value>> {
        (!self.root_device.is_empty()).then_some(&self.root_device)
    }

    pub fn raid_interface(&self) -> &str {
        self.interfaces.raid_interface.as_deref().unwrap_or("")
    }

    /// `properties` as Ironic should store them, root device hints included.
    pub fn merged_properties(&self) -> Map<String, Value> {
        let mut properties = self.properties.clone();
        if !self.root_device.is_empty() {
            properties.insert(
                ROOT_DEVICE_PROPERTY.to_string(),
                Value::Object(self.root_device.clone()),
            );
        }
        properties
    }

    /// Top-level string fields that are updated one patch at a time.
    pub fn string_fields(&self) -> Vec<(&'static str, Option<&str>)> {
        let mut fields = vec![
            ("conductor_group", self.conductor_group.as_deref()),
            ("driver", Some(self.driver.as_str())),
            ("name", self.name.as_deref()),
            ("owner", self.owner.as_deref()),
            ("resource_class", self.resource_class.as_deref()),
        ];
        fields.extend(self.interfaces.fields());
        fields.sort_by_key(|(field, _)| *field);
        fields
    }

    pub fn to_create(&self) -> NodeCreate {
        NodeCreate {
            name: self.name.clone(),
            driver: self.driver.clone(),
            driver_info: self.driver_info.clone(),
            properties: self.merged_properties(),
            extra: self.extra.clone(),
            resource_class: self.resource_class.clone(),
            owner: self.owner.clone(),
            conductor_group: self.conductor_group.clone(),
            interfaces: self.interfaces.clone(),
        }
    }
}
