// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::ops::Deref;

/// IEEE organizationally unique identifier, the first three octets of a
/// vendor-specific element body or a suite selector.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Oui([u8; 3]);

impl Oui {
    /// IEEE 802.11 cipher and AKM suite selectors.
    pub const DOT11: Self = Self([0x00, 0x0F, 0xAC]);
    /// Microsoft: WPA v1, WSC and the network-cost element.
    pub const MSFT: Self = Self([0x00, 0x50, 0xF2]);
    /// Wi-Fi Alliance: HS2.0, OSEN, OWE transition, P2P, WFD, DPP.
    pub const WFA: Self = Self([0x50, 0x6F, 0x9A]);
    /// Used by APs that only accept the default SAE group.
    pub const GOOGLE: Self = Self([0xF4, 0xF5, 0xE8]);

    pub const fn new(oui: [u8; 3]) -> Self {
        Self(oui)
    }

    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() >= 3 && data[..3] == self.0
    }
}

impl Deref for Oui {
    type Target = [u8; 3];
    fn deref(&self) -> &[u8; 3] {
        &self.0
    }
}
