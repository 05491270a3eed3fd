// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::{
    ie::{wpa::WpaIe, Id, ParseError},
    organization::Oui,
};
use bytes::Bytes;
use nom::{
    bytes::complete::take, combinator::map, multi::count, number::complete::le_u16, IResult,
};

pub mod cipher {
    use super::*;

    // IEEE Std 802.11-2016, 9.4.2.25.2, Table 9-131
    pub const USE_GROUP: u8 = 0;
    pub const WEP_40: u8 = 1;
    pub const TKIP: u8 = 2;
    pub const CCMP_128: u8 = 4;
    pub const WEP_104: u8 = 5;
    pub const BIP_CMAC_128: u8 = 6;
    pub const GCMP_128: u8 = 8;
    pub const GCMP_256: u8 = 9;
    pub const CCMP_256: u8 = 10;
    pub const BIP_GMAC_128: u8 = 11;
    pub const BIP_GMAC_256: u8 = 12;
    pub const BIP_CMAC_256: u8 = 13;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct Cipher {
        pub oui: Bytes,
        pub suite_type: u8,
    }

    impl Cipher {
        pub fn new_dot11(suite_type: u8) -> Self {
            Cipher { oui: Bytes::copy_from_slice(&*Oui::DOT11), suite_type }
        }
    }
}

pub mod akm {
    use super::*;

    // IEEE Std 802.11-2016, 9.4.2.25.3, Table 9-133
    pub const EAP: u8 = 1;
    pub const PSK: u8 = 2;
    pub const FT_EAP: u8 = 3;
    pub const FT_PSK: u8 = 4;
    pub const EAP_SHA256: u8 = 5;
    pub const PSK_SHA256: u8 = 6;
    pub const SAE: u8 = 8;
    pub const FT_SAE: u8 = 9;
    pub const EAP_SUITEB: u8 = 11;
    pub const EAP_SUITEB_192: u8 = 12;
    pub const FT_EAP_SHA384: u8 = 13;
    pub const FILS_SHA256: u8 = 14;
    pub const FILS_SHA384: u8 = 15;
    pub const OWE: u8 = 18;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct Akm {
        pub oui: Bytes,
        pub suite_type: u8,
    }

    impl Akm {
        pub fn new_dot11(suite_type: u8) -> Self {
            Akm { oui: Bytes::copy_from_slice(&*Oui::DOT11), suite_type }
        }
    }
}

use {akm::Akm, cipher::Cipher};

// IEEE Std 802.11-2016, 9.4.2.25.4, Figure 9-257
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RsnCapabilities(pub u16);

impl RsnCapabilities {
    pub fn mgmt_frame_protection_required(&self) -> bool {
        self.0 & (1 << 6) != 0
    }
    pub fn mgmt_frame_protection_capable(&self) -> bool {
        self.0 & (1 << 7) != 0
    }
}

/// Post-parse view of an RSNE, WPA or OSEN element. Fields absent from a
/// (legally) truncated element keep their 802.11 defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct RsnInfo {
    pub group_cipher: Cipher,
    pub pairwise_ciphers: Vec<Cipher>,
    pub akms: Vec<Akm>,
    pub caps: RsnCapabilities,
    pub group_mgmt_cipher: Option<Cipher>,
}

impl Default for RsnInfo {
    fn default() -> Self {
        // IEEE Std 802.11-2016, 9.4.2.25.1: defaults for omitted fields.
        RsnInfo {
            group_cipher: Cipher::new_dot11(cipher::CCMP_128),
            pairwise_ciphers: vec![Cipher::new_dot11(cipher::CCMP_128)],
            akms: vec![Akm::new_dot11(akm::EAP)],
            caps: RsnCapabilities::default(),
            group_mgmt_cipher: None,
        }
    }
}

pub(super) fn parse_suite(input: &[u8]) -> IResult<&[u8], (Bytes, u8)> {
    map(take(4usize), |b: &[u8]| (Bytes::copy_from_slice(&b[..3]), b[3]))(input)
}

pub(super) fn parse_cipher(input: &[u8]) -> IResult<&[u8], Cipher> {
    map(parse_suite, |(oui, suite_type)| Cipher { oui, suite_type })(input)
}

pub(super) fn parse_akm(input: &[u8]) -> IResult<&[u8], Akm> {
    map(parse_suite, |(oui, suite_type)| Akm { oui, suite_type })(input)
}

/// Parses a whole RSNE, 2-byte header included.
pub fn parse_rsne(element: &[u8]) -> Result<RsnInfo, ParseError> {
    let body = element_body(element, Id::RSNE)?;
    let (body, version) = le_u16::<_, nom::error::Error<&[u8]>>(body)
        .map_err(|_| ParseError::Truncated)?;
    if version != 1 {
        return Err(ParseError::UnsupportedVersion(version));
    }
    parse_rsn_fields(body)
}

/// Parses an OSEN vendor element (WFA OUI, subtype 0x12), which has the RSNE
/// layout without the version field.
pub fn parse_osen(element: &[u8]) -> Result<RsnInfo, ParseError> {
    if element.len() < 6
        || element[0] != Id::VENDOR_SPECIFIC.0
        || !Oui::WFA.matches(&element[2..])
        || element[5] != super::vendor::WFA_SUBTYPE_OSEN
    {
        return Err(ParseError::Malformed);
    }
    parse_rsn_fields(&element[6..])
}

// Every field after the version is optional; the element may end cleanly
// before any of them.
fn parse_rsn_fields(body: &[u8]) -> Result<RsnInfo, ParseError> {
    let mut info = RsnInfo::default();

    if body.is_empty() {
        return Ok(info);
    }
    let (body, group_cipher) = parse_cipher(body).map_err(|_| ParseError::Truncated)?;
    info.group_cipher = group_cipher;

    if body.is_empty() {
        return Ok(info);
    }
    let (body, n) =
        le_u16::<_, nom::error::Error<&[u8]>>(body).map_err(|_| ParseError::Truncated)?;
    let (body, pairwise) =
        count(parse_cipher, n as usize)(body).map_err(|_| ParseError::Truncated)?;
    info.pairwise_ciphers = pairwise;

    if body.is_empty() {
        return Ok(info);
    }
    let (body, n) =
        le_u16::<_, nom::error::Error<&[u8]>>(body).map_err(|_| ParseError::Truncated)?;
    let (body, akms) = count(parse_akm, n as usize)(body).map_err(|_| ParseError::Truncated)?;
    info.akms = akms;

    if body.is_empty() {
        return Ok(info);
    }
    let (body, caps) =
        le_u16::<_, nom::error::Error<&[u8]>>(body).map_err(|_| ParseError::Truncated)?;
    info.caps = RsnCapabilities(caps);

    if body.is_empty() {
        return Ok(info);
    }
    let (body, n) =
        le_u16::<_, nom::error::Error<&[u8]>>(body).map_err(|_| ParseError::Truncated)?;
    let (body, _pmkids) = take::<_, _, nom::error::Error<&[u8]>>(16 * n as usize)(body)
        .map_err(|_| ParseError::Truncated)?;

    if body.is_empty() {
        return Ok(info);
    }
    let (_body, group_mgmt) = parse_cipher(body).map_err(|_| ParseError::Truncated)?;
    info.group_mgmt_cipher = Some(group_mgmt);

    Ok(info)
}

/// Maps a parsed WPA v1 element onto the RSN view. WPA has no capabilities
/// or management-group fields; suite OUIs stay vendor-specific.
pub fn rsn_info_from_wpa(wpa: &WpaIe) -> RsnInfo {
    RsnInfo {
        group_cipher: wpa.multicast_cipher.clone(),
        pairwise_ciphers: wpa.unicast_cipher_list.clone(),
        akms: wpa.akm_list.clone(),
        caps: RsnCapabilities::default(),
        group_mgmt_cipher: None,
    }
}

fn element_body(element: &[u8], id: Id) -> Result<&[u8], ParseError> {
    if element.len() < 2 || element[0] != id.0 {
        return Err(ParseError::Malformed);
    }
    let len = element[1] as usize;
    if element.len() < 2 + len {
        return Err(ParseError::Truncated);
    }
    Ok(&element[2..2 + len])
}
