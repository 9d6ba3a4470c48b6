// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Assembly of the manual cleaning steps that apply RAID and BIOS settings.

use crate::raid::RaidError;
use crate::raid::build_logical_disks;
use crate::raid::parse_raid_config;
use crate::raid::raid_clean_steps;
use ironic_client::CleanStep;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use slog::Logger;
use slog::debug;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BiosSetting {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Error)]
pub enum CleanStepError {
    #[error(transparent)]
    Raid(#[from] RaidError),
    #[error("invalid BIOS settings")]
    BiosSettings(#[source] serde_json::Error),
}

pub fn parse_bios_settings(
    json: &str,
) -> Result<Vec<BiosSetting>, CleanStepError> {
    serde_json::from_str(json).map_err(CleanStepError::BiosSettings)
}

/// Builds the manual cleaning steps for the given RAID and BIOS settings.
///
/// RAID steps come first, in the order the RAID interface needs them,
/// followed by a single `bios.apply_configuration` step. Inputs that are
/// `None` or blank contribute nothing; if both are absent the result is
/// empty. Either input failing to parse or validate fails the whole
/// assembly.
pub fn build_manual_cleaning_steps(
    log: &Logger,
    raid_interface: &str,
    raid_config: Option<&str>,
    bios_settings: Option<&str>,
) -> Result<Vec<CleanStep>, CleanStepError> {
    let mut steps = Vec::new();

    if let Some(raid_config) = present(raid_config) {
        let config = parse_raid_config(raid_config)?;
        // The disks themselves are submitted separately; building them here
        // validates the layout against the interface before any step runs.
        build_logical_disks(log, raid_interface, &config, None)?;
        steps.extend(raid_clean_steps(raid_interface, &config));
    }

    if let Some(bios_settings) = present(bios_settings) {
        let settings = parse_bios_settings(bios_settings)?;
        let settings = settings
            .into_iter()
            .map(|setting| {
                serde_json::json!({
                    "name": setting.name,
                    "value": setting.value,
                })
            })
            .collect();
        steps.push(
            CleanStep::new("bios", "apply_configuration")
                .with_arg("settings", Value::Array(settings)),
        );
    }

    let names: Vec<String> = steps
        .iter()
        .map(|s| format!("{}.{}", s.interface, s.step))
        .collect();
    debug!(log, "built manual cleaning steps"; "steps" => ?names);
    Ok(steps)
}

fn present(input: Option<&str>) -> Option<&str> {
    input.filter(|s| !s.trim().is_empty())
}
