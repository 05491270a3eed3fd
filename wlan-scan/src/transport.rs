// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Typed model of the nl80211 control channel. The engine builds [`Message`]
//! values and hands them to the [`Transport`] seam; the byte-level genetlink
//! codec lives behind that seam. Driver replies and multicast notifications
//! come back as the same message type through the engine's `handle_*`
//! methods.

use wlan_common::mac::MacAddr;

/// Identifier of an in-flight transport command. Zero means the submission
/// failed and no reply will arrive.
pub type CmdId = u32;

// nl80211 scan flags (linux/nl80211.h, enum nl80211_scan_flags)
pub const SCAN_FLAG_FLUSH: u32 = 1 << 1;
pub const SCAN_FLAG_RANDOM_ADDR: u32 = 1 << 3;
pub const SCAN_FLAG_RANDOM_SN: u32 = 1 << 11;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Band {
    TwoGhz,
    FiveGhz,
    SixGhz,
}

/// Commands and events of the nl80211 family used by the scan subsystem.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Cmd {
    GetProtocolFeatures,
    GetReg,
    GetWiphy,
    GetInterface,
    TriggerScan,
    StartSchedScan,
    GetScan,
    NewScanResults,
    SchedScanResults,
    ScanAborted,
}

/// Per-BSS attributes of a `GetScan` dump entry. Values stay raw bytes so
/// that malformed driver output can be represented and rejected by the
/// parser rather than by the transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BssAttr {
    Bssid,
    Capability,
    Frequency,
    SignalMbm,
    SignalUnspec,
    InformationElements,
    BeaconIes,
    PrespData,
    ParentTsf,
    SeenMsAgo,
    LastSeenBoottime,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Attr {
    Wdev(u64),
    Ifindex(u32),
    Wiphy(u32),
    Mac(MacAddr),
    MacMask(MacAddr),
    ScanSsids(Vec<Vec<u8>>),
    ScanFrequencies(Vec<u32>),
    ScanFlags(u32),
    Ie(Vec<u8>),
    TxNoCckRate,
    ScanSuppRates(Vec<(Band, Vec<u8>)>),
    MeasurementDuration(u16),
    MeasurementDurationMandatory,
    ScanStartTimeTsf(u64),
    Bss(Vec<(BssAttr, Vec<u8>)>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub cmd: Cmd,
    pub attrs: Vec<Attr>,
}

impl Message {
    pub fn new(cmd: Cmd) -> Self {
        Message { cmd, attrs: Vec::new() }
    }

    pub fn append(&mut self, attr: Attr) {
        self.attrs.push(attr);
    }

    pub fn with(mut self, attr: Attr) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn wdev(&self) -> Option<u64> {
        self.attrs.iter().find_map(|a| match a {
            Attr::Wdev(id) => Some(*id),
            _ => None,
        })
    }

    pub fn scan_flags(&self) -> u32 {
        self.attrs
            .iter()
            .find_map(|a| match a {
                Attr::ScanFlags(f) => Some(*f),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn scan_ssids(&self) -> Option<&[Vec<u8>]> {
        self.attrs.iter().find_map(|a| match a {
            Attr::ScanSsids(s) => Some(s.as_slice()),
            _ => None,
        })
    }

    pub fn scan_frequencies(&self) -> Option<&[u32]> {
        self.attrs.iter().find_map(|a| match a {
            Attr::ScanFrequencies(f) => Some(f.as_slice()),
            _ => None,
        })
    }

    pub fn start_time_tsf(&self) -> Option<u64> {
        self.attrs.iter().find_map(|a| match a {
            Attr::ScanStartTimeTsf(t) => Some(*t),
            _ => None,
        })
    }

    pub fn ie(&self) -> Option<&[u8]> {
        self.attrs.iter().find_map(|a| match a {
            Attr::Ie(ie) => Some(ie.as_slice()),
            _ => None,
        })
    }

    pub fn bss(&self) -> Option<&[(BssAttr, Vec<u8>)]> {
        self.attrs.iter().find_map(|a| match a {
            Attr::Bss(b) => Some(b.as_slice()),
            _ => None,
        })
    }
}

/// Outgoing half of the control channel. Command acknowledgements, dump
/// replies and multicast notifications are delivered back by the embedder
/// through `ScanEngine::handle_command_response`, `handle_dump_entry`,
/// `handle_dump_done` and `handle_notification`, keyed by the [`CmdId`]
/// returned here.
pub trait Transport {
    /// Subscribes to the family's scan multicast group.
    fn register_scan_events(&mut self);
    fn unregister_scan_events(&mut self);
    /// Submits a command expecting a single acknowledgement.
    fn send(&mut self, msg: Message) -> CmdId;
    /// Submits a dump; entries arrive one at a time, then a completion.
    fn dump(&mut self, msg: Message) -> CmdId;
    /// Cancels an in-flight command; no further replies will be delivered
    /// for it.
    fn cancel(&mut self, cmd_id: CmdId);
}
