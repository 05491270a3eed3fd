// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Scan engine for a Wi-Fi station. Drives the host's 802.11 drivers over a
//! generic-netlink control channel to discover nearby access points, keeps a
//! ranked view of the discovered BSSes, and serializes concurrent scan
//! requests against a single radio.
//!
//! The engine is single-threaded and makes no blocking calls: outgoing
//! driver commands go through the [`transport::Transport`] seam, and every
//! driver-originated input (command acknowledgements, multicast scan
//! notifications, dump replies, timer fires) enters through a `handle_*`
//! method on [`ScanEngine`], driven by the embedder's event loop.

pub mod bss;
pub mod config;
pub mod engine;
pub mod freq_set;
pub mod known_networks;
pub mod radio;
pub mod timer;
pub mod transport;

pub use {
    bss::{Bss, SourceFrame},
    config::Config,
    engine::{
        PeriodicHandler, ScanEngine, ScanError, ScanHandler, ScanId, ScanParameters, ScanResults,
    },
    freq_set::FreqSet,
};
