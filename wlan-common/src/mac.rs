// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

pub type MacAddr = [u8; 6];

pub const BCAST_ADDR: MacAddr = [0xFF; 6];

/// Newtype for a MacAddr where a BSSID is explicitly required.
#[repr(transparent)]
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Bssid(pub MacAddr);

// IEEE Std 802.11-2016, 9.2.4.1
#[repr(C, packed)]
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameControl(pub u16);

impl FrameControl {
    pub fn frame_type(&self) -> u8 {
        ((self.0 >> 2) & 0x3) as u8
    }
    pub fn frame_subtype(&self) -> u8 {
        ((self.0 >> 4) & 0xF) as u8
    }
}

// IEEE Std 802.11-2016, 9.4.1.4
#[repr(C, packed)]
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapabilityInfo(pub u16);

impl CapabilityInfo {
    pub fn ess(&self) -> bool {
        self.0 & (1 << 0) != 0
    }
    pub fn ibss(&self) -> bool {
        self.0 & (1 << 1) != 0
    }
    pub fn privacy(&self) -> bool {
        self.0 & (1 << 4) != 0
    }
    pub fn spectrum_mgmt(&self) -> bool {
        self.0 & (1 << 8) != 0
    }
}

// IEEE Std 802.11-2016, 9.3.3.2
#[repr(C, packed)]
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
pub struct MgmtHdr {
    pub frame_ctrl: FrameControl,
    pub duration: u16,
    pub addr1: MacAddr,
    pub addr2: MacAddr,
    pub addr3: MacAddr,
    pub seq_ctrl: u16,
}

impl MgmtHdr {
    /// Splits a management frame into its fixed header and the frame body.
    pub fn parse(bytes: &[u8]) -> Option<(LayoutVerified<&[u8], MgmtHdr>, &[u8])> {
        LayoutVerified::new_unaligned_from_prefix(bytes)
    }
}
