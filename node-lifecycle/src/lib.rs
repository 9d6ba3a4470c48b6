// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Orchestration of an Ironic node's lifecycle: busy-retry of updates,
//! power and provision state transitions, RAID translation and manual
//! cleaning steps.

mod api;
mod clean_steps;
mod config;
mod lifecycle;
mod node_spec;
mod power;
mod provision;
mod raid;
mod retry;
mod sensitive;
mod sleep;

#[cfg(test)]
mod test_util;

pub use api::ClientError;
pub use api::NodeApi;
pub use clean_steps::BiosSetting;
pub use clean_steps::CleanStepError;
pub use clean_steps::build_manual_cleaning_steps;
pub use clean_steps::parse_bios_settings;
pub use config::Config;
pub use config::IronicConfig;
pub use config::LoadError;
pub use config::ProvisionConfig;
pub use lifecycle::LifecycleError;
pub use lifecycle::NodeLifecycle;
pub use node_spec::NodeSpec;
pub use power::DEFAULT_POWER_STATE_TIMEOUT_SECS;
pub use power::POWER_STATE_POLL_INTERVAL;
pub use power::PowerError;
pub use power::PowerStateOrchestrator;
pub use provision::ProvisionDriver;
pub use provision::ProvisionError;
pub use raid::HardwareRaidVolume;
pub use raid::RaidConfig;
pub use raid::RaidError;
pub use raid::SetRaidError;
pub use raid::SoftwareRaidVolume;
pub use raid::apply_raid_config;
pub use raid::build_logical_disks;
pub use raid::parse_raid_config;
pub use retry::BusyError;
pub use retry::INITIAL_BACKOFF;
pub use retry::MAX_ATTEMPTS;
pub use retry::busy_policy;
pub use retry::retry_while_busy;
pub use sensitive::MASKED_VALUE;
pub use sensitive::RedactedDriverInfo;
pub use sensitive::is_masked;
pub use sensitive::redact_driver_info;
pub use sleep::Sleeper;
pub use sleep::TokioSleeper;
