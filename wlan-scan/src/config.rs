// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

/// Snapshot of the scan-related configuration, taken once at engine
/// construction.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub scan: ScanSettings,
    pub rank: RankSettings,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanSettings {
    pub enable_active_scanning: bool,
    pub disable_periodic_scan: bool,
    pub disable_mac_address_randomization: bool,
    pub initial_periodic_scan_interval: u32,
    pub maximum_periodic_scan_interval: u32,
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            enable_active_scanning: false,
            disable_periodic_scan: false,
            disable_mac_address_randomization: false,
            initial_periodic_scan_interval: 10,
            maximum_periodic_scan_interval: 300,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankSettings {
    pub band_modifier_5ghz: f64,
}

impl Default for RankSettings {
    fn default() -> Self {
        RankSettings { band_modifier_5ghz: 1.0 }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, anyhow::Error> {
        serde_json::from_str(json).context("failed to parse scan configuration")
    }

    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json_str(&contents)
    }

    /// Initial periodic interval in seconds, clamped to a u16.
    pub fn initial_periodic_interval(&self) -> u16 {
        self.scan.initial_periodic_scan_interval.min(u16::MAX as u32) as u16
    }

    /// Maximum periodic interval in seconds, clamped to a u16.
    pub fn maximum_periodic_interval(&self) -> u16 {
        self.scan.maximum_periodic_scan_interval.min(u16::MAX as u32) as u16
    }
}
