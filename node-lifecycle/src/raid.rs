// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Translation of a declarative RAID layout into Ironic logical disks.
//!
//! The declarative form follows the metal3 `RAIDConfig` JSON shape: a list of
//! hardware volumes or a list of software volumes, in the order they should
//! be created. Which of the two is usable depends on the node's RAID
//! interface.

use crate::api::ClientError;
use crate::api::NodeApi;
use crate::retry::retry_while_busy;
use crate::sleep::Sleeper;
use ironic_client::CleanStep;
use ironic_client::LogicalDisk;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use slog::Logger;
use slog::debug;
use slog::info;
use slog::o;
use thiserror::Error;

/// RAID interface for drivers without RAID support.
pub const NO_RAID_INTERFACE: &str = "no-raid";

/// RAID interface implementing software RAID through the deploy agent.
pub const SOFTWARE_RAID_INTERFACE: &str = "agent";

/// Controller name Ironic expects on software RAID logical disks.
pub const SOFTWARE_RAID_CONTROLLER: &str = "software";

const HARDWARE_RAID_LEVELS: &[&str] =
    &["0", "1", "2", "5", "6", "1+0", "5+0", "6+0"];
const SOFTWARE_RAID_LEVELS: &[&str] = &["0", "1", "1+0"];
const MAX_SOFTWARE_RAID_VOLUMES: usize = 2;

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct RaidConfig {
    /// `None` leaves the existing hardware RAID alone; `Some` with no
    /// volumes wipes it.
    #[serde(
        default,
        rename = "hardwareRAIDVolumes",
        skip_serializing_if = "Option::is_none"
    )]
    pub hardware_raid_volumes: Option<Vec<HardwareRaidVolume>>,
    #[serde(default, rename = "softwareRAIDVolumes")]
    pub software_raid_volumes: Vec<SoftwareRaidVolume>,
}

impl RaidConfig {
    pub fn hardware_volumes(&self) -> &[HardwareRaidVolume] {
        self.hardware_raid_volumes.as_deref().unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.hardware_volumes().is_empty()
            && self.software_raid_volumes.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareRaidVolume {
    pub size_gibibytes: u64,
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotational: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_physical_disks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub physical_disks: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareRaidVolume {
    pub size_gibibytes: u64,
    pub level: String,
    /// Root device hints selecting the member disks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub physical_disks: Vec<Map<String, Value>>,
}

#[derive(Debug, Error)]
pub enum RaidError {
    #[error("invalid RAID configuration")]
    Parse(#[source] serde_json::Error),
    #[error(
        "RAID volumes are defined, but RAID interface {interface:?} does not \
         support RAID"
    )]
    RaidUnsupported { interface: String },
    #[error("RAID interface {interface:?} does not support hardware RAID")]
    HardwareRaidUnsupported { interface: String },
    #[error("RAID interface {interface:?} does not support software RAID")]
    SoftwareRaidUnsupported { interface: String },
    #[error("{kind} RAID volume {index} has unsupported RAID level {level:?}")]
    UnsupportedLevel { kind: &'static str, index: usize, level: String },
    #[error("software RAID supports at most 2 volumes, found {count}")]
    TooManySoftwareVolumes { count: usize },
    #[error("the first software RAID volume must be RAID-1, found {level:?}")]
    FirstSoftwareVolumeNotMirrored { level: String },
}

pub fn parse_raid_config(json: &str) -> Result<RaidConfig, RaidError> {
    serde_json::from_str(json).map_err(RaidError::Parse)
}

/// Checks that `interface` can carry out the volumes declared in `config`.
pub fn check_raid_interface(
    interface: &str,
    config: &RaidConfig,
) -> Result<(), RaidError> {
    let has_hardware = !config.hardware_volumes().is_empty();
    let has_software = !config.software_raid_volumes.is_empty();
    match interface {
        NO_RAID_INTERFACE if has_hardware || has_software => {
            Err(RaidError::RaidUnsupported { interface: interface.to_string() })
        }
        SOFTWARE_RAID_INTERFACE if has_hardware => {
            Err(RaidError::HardwareRaidUnsupported {
                interface: interface.to_string(),
            })
        }
        NO_RAID_INTERFACE | SOFTWARE_RAID_INTERFACE => Ok(()),
        _ if has_software && !has_hardware => {
            Err(RaidError::SoftwareRaidUnsupported {
                interface: interface.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Builds the ordered logical disks for `config` on a node whose RAID
/// interface is `interface`.
///
/// Unless the caller supplies root device hints, the first logical disk is
/// marked as the root volume; with hints, Ironic picks the root disk from
/// them and no logical disk is marked. An empty layout yields no disks and
/// no error.
pub fn build_logical_disks(
    log: &Logger,
    interface: &str,
    config: &RaidConfig,
    root_device_hints: Option<&Map<String, Value>>,
) -> Result<Vec<LogicalDisk>, RaidError> {
    check_raid_interface(interface, config)?;

    let mut disks = if !config.hardware_volumes().is_empty() {
        hardware_logical_disks(config.hardware_volumes())?
    } else if !config.software_raid_volumes.is_empty() {
        software_logical_disks(&config.software_raid_volumes)?
    } else {
        Vec::new()
    };

    let has_hints = root_device_hints.is_some_and(|hints| !hints.is_empty());
    match disks.first_mut() {
        Some(first) if !has_hints => first.is_root_volume = Some(true),
        Some(_) => info!(
            log,
            "root device hints are set, the first RAID volume will not be \
             marked as root"
        ),
        None => (),
    }
    Ok(disks)
}

fn hardware_logical_disks(
    volumes: &[HardwareRaidVolume],
) -> Result<Vec<LogicalDisk>, RaidError> {
    volumes
        .iter()
        .enumerate()
        .map(|(index, volume)| {
            let levels = HARDWARE_RAID_LEVELS;
            check_level("hardware", index, &volume.level, levels)?;
            let mut disk =
                LogicalDisk::new(volume.size_gibibytes, volume.level.clone());
            disk.volume_name = volume.name.clone();
            disk.controller = volume.controller.clone();
            disk.disk_type = volume
                .rotational
                .map(|rotational| if rotational { "hdd" } else { "ssd" })
                .map(str::to_string);
            disk.number_of_physical_disks = volume.number_of_physical_disks;
            disk.physical_disks = volume
                .physical_disks
                .iter()
                .cloned()
                .map(Value::String)
                .collect();
            Ok(disk)
        })
        .collect()
}

fn software_logical_disks(
    volumes: &[SoftwareRaidVolume],
) -> Result<Vec<LogicalDisk>, RaidError> {
    if volumes.len() > MAX_SOFTWARE_RAID_VOLUMES {
        return Err(RaidError::TooManySoftwareVolumes { count: volumes.len() });
    }
    if volumes[0].level != "1" {
        return Err(RaidError::FirstSoftwareVolumeNotMirrored {
            level: volumes[0].level.clone(),
        });
    }
    volumes
        .iter()
        .enumerate()
        .map(|(index, volume)| {
            let levels = SOFTWARE_RAID_LEVELS;
            check_level("software", index, &volume.level, levels)?;
            let mut disk =
                LogicalDisk::new(volume.size_gibibytes, volume.level.clone());
            disk.controller = Some(SOFTWARE_RAID_CONTROLLER.to_string());
            disk.physical_disks = volume
                .physical_disks
                .iter()
                .cloned()
                .map(Value::Object)
                .collect();
            Ok(disk)
        })
        .collect()
}

fn check_level(
    kind: &'static str,
    index: usize,
    level: &str,
    supported: &[&str],
) -> Result<(), RaidError> {
    if supported.contains(&level) {
        Ok(())
    } else {
        Err(RaidError::UnsupportedLevel {
            kind,
            index,
            level: level.to_string(),
        })
    }
}

/// Returns the clean steps that (re)build the RAID layout in `config`.
///
/// Hardware RAID is left alone when `hardwareRAIDVolumes` is absent.
/// Otherwise the existing configuration is wiped and a new one is created
/// only when volumes are declared. Software RAID is left alone unless
/// volumes are declared. `no-raid` never gets RAID steps.
pub fn raid_clean_steps(
    interface: &str,
    config: &RaidConfig,
) -> Vec<CleanStep> {
    match interface {
        NO_RAID_INTERFACE => Vec::new(),
        SOFTWARE_RAID_INTERFACE => {
            if config.software_raid_volumes.is_empty() {
                return Vec::new();
            }
            vec![
                CleanStep::new("raid", "delete_configuration"),
                CleanStep::new("deploy", "erase_devices_metadata"),
                CleanStep::new("raid", "create_configuration"),
            ]
        }
        _ => match &config.hardware_raid_volumes {
            None => Vec::new(),
            Some(volumes) => {
                let mut steps =
                    vec![CleanStep::new("raid", "delete_configuration")];
                if !volumes.is_empty() {
                    steps.push(CleanStep::new("raid", "create_configuration"));
                }
                steps
            }
        },
    }
}

#[derive(Debug, Error)]
pub enum SetRaidError {
    #[error(transparent)]
    Invalid(#[from] RaidError),
    #[error("failed to set target RAID configuration")]
    Upstream(#[source] ClientError),
}

/// Parses `raid_config`, builds its logical disks and sets them as the
/// node's target RAID configuration.
///
/// Empty input, or a layout without volumes, sets nothing.
pub async fn apply_raid_config(
    api: &dyn NodeApi,
    sleeper: &dyn Sleeper,
    log: &Logger,
    node_id: &str,
    interface: &str,
    raid_config: &str,
    root_device_hints: Option<&Map<String, Value>>,
) -> Result<(), SetRaidError> {
    if raid_config.trim().is_empty() {
        return Ok(());
    }
    let log = log.new(o!(
        "node_id" => node_id.to_string(),
        "raid_interface" => interface.to_string(),
    ));
    let config = parse_raid_config(raid_config)?;
    let disks =
        build_logical_disks(&log, interface, &config, root_device_hints)?;
    if disks.is_empty() {
        debug!(log, "no RAID volumes declared, leaving RAID config alone");
        return Ok(());
    }

    retry_while_busy(&log, sleeper, "set RAID config", || {
        api.set_raid_config(node_id, &disks)
    })
    .await
    .map_err(SetRaidError::Upstream)?;
    info!(log, "target RAID configuration set"; "logical_disks" => disks.len());
    Ok(())
}
