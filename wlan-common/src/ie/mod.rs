// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! 802.11 information elements: the TLV reader, element identifiers and the
//! parsers for the elements the scan subsystem interprets. Each element is a
//! 1-byte ID, a 1-byte length and `length` bytes of body (IEEE Std
//! 802.11-2016, 9.4.2.1).

pub mod p2p;
pub mod rsn;
pub mod vendor;
pub mod wpa;

pub use {p2p::*, rsn::*, vendor::*, wpa::WpaIe};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("element body is truncated")]
    Truncated,
    #[error("unsupported element version {0}")]
    UnsupportedVersion(u16),
    #[error("malformed element")]
    Malformed,
}

// IEEE Std 802.11-2016, 9.4.2.1, Table 9-77
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Id(pub u8);

impl Id {
    pub const SSID: Self = Self(0);
    pub const SUPPORTED_RATES: Self = Self(1);
    pub const COUNTRY: Self = Self(7);
    pub const BSS_LOAD: Self = Self(11);
    pub const HT_CAPABILITIES: Self = Self(45);
    pub const RSNE: Self = Self(48);
    pub const MOBILITY_DOMAIN: Self = Self(54);
    pub const RM_ENABLED_CAPABILITIES: Self = Self(70);
    pub const INTERWORKING: Self = Self(107);
    pub const ADVERTISEMENT_PROTOCOL: Self = Self(108);
    pub const ROAMING_CONSORTIUM: Self = Self(111);
    pub const EXT_CAPABILITIES: Self = Self(127);
    pub const VHT_CAPABILITIES: Self = Self(191);
    pub const VENDOR_SPECIFIC: Self = Self(221);
    pub const RSNX: Self = Self(244);
}

/// Iterates over the elements of an IE stream, yielding `(id, body)` pairs.
/// A trailing element whose declared length overruns the buffer ends the
/// iteration.
pub struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader(bytes)
    }
}

impl<'a> Iterator for Reader<'a> {
    type Item = (Id, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.0.len() < 2 {
            return None;
        }
        let id = Id(self.0[0]);
        let body_len = self.0[1] as usize;
        if self.0.len() < 2 + body_len {
            return None;
        }
        let body = &self.0[2..2 + body_len];
        self.0 = &self.0[2 + body_len..];
        Some((id, body))
    }
}

/// BSS Load element (IEEE Std 802.11-2016, 9.4.2.28): station count,
/// channel utilization and available admission capacity.
pub fn parse_bss_load(body: &[u8]) -> Result<(u16, u8, u16), ParseError> {
    if body.len() != 5 {
        return Err(ParseError::Truncated);
    }
    let station_count = u16::from_le_bytes([body[0], body[1]]);
    let utilization = body[2];
    let admission_capacity = u16::from_le_bytes([body[3], body[4]]);
    Ok((station_count, utilization, admission_capacity))
}
