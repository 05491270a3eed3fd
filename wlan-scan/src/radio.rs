// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Seam to the radio inventory. A [`Radio`] answers capability queries and
//! arbitrates air time through its per-radio work queue; the engine never
//! issues a scan command unless its work item is the running head of that
//! queue.

use crate::transport::Band;

/// Identifier of a radio work item. Zero is never a valid id.
pub type WorkId = u32;

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum WorkPriority {
    Scan,
    PeriodicScan,
}

pub trait Radio {
    fn max_num_ssids_per_scan(&self) -> u8;
    fn max_scan_ie_len(&self) -> u16;
    fn can_randomize_mac_addr(&self) -> bool;
    /// Whether the driver can randomize probe-request sequence numbers.
    fn supports_random_sn(&self) -> bool;
    /// Whether the driver honors per-channel dwell-time hints.
    fn supports_scan_dwell(&self) -> bool;
    /// The station-mode Extended Capabilities element, 2-byte header
    /// included.
    fn extended_capabilities(&self) -> Vec<u8>;
    fn supported_rates(&self, band: Band) -> Option<Vec<u8>>;
    /// Estimated peak data rate (bits/s) towards a BSS advertising `ies`,
    /// heard at `signal_strength` mBm.
    fn estimate_data_rate(&self, ies: &[u8], signal_strength: i32) -> Option<u64>;

    /// Queues a work item; the embedder invokes
    /// `ScanEngine::do_scan_work(id)` once the item reaches the head of the
    /// queue.
    fn work_insert(&mut self, priority: WorkPriority) -> WorkId;
    fn work_done(&mut self, id: WorkId);
    fn work_is_running(&self, id: WorkId) -> bool;
}
