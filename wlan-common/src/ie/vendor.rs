// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Vendor-specific element dispatch. All helpers take the element *body*
//! (the bytes after the 2-byte element header), which starts with the OUI.

use crate::{
    ie::{Id, ParseError, Reader},
    mac::MacAddr,
    organization::Oui,
};

pub const MSFT_SUBTYPE_WPA: u8 = 0x01;
pub const MSFT_SUBTYPE_WSC: u8 = 0x04;
pub const MSFT_SUBTYPE_NETWORK_COST: u8 = 0x11;

pub const WFA_SUBTYPE_P2P: u8 = 0x09;
pub const WFA_SUBTYPE_WFD: u8 = 0x0A;
pub const WFA_SUBTYPE_HS20_INDICATION: u8 = 0x10;
pub const WFA_SUBTYPE_OSEN: u8 = 0x12;
pub const WFA_SUBTYPE_OWE_TRANSITION: u8 = 0x1C;
pub const WFA_SUBTYPE_DPP_CONFIGURATOR_CONNECTIVITY: u8 = 0x1E;

const SAE_DEFAULT_GROUP_SUBTYPE: u8 = 0x05;

pub fn is_wfa_subtype(body: &[u8], subtype: u8) -> bool {
    body.len() >= 4 && Oui::WFA.matches(body) && body[3] == subtype
}

pub fn is_msft_subtype(body: &[u8], subtype: u8) -> bool {
    body.len() >= 4 && Oui::MSFT.matches(body) && body[3] == subtype
}

/// Advertised by APs that reject SAE commits with anything but the default
/// group.
pub fn is_default_sae_group(body: &[u8]) -> bool {
    body.len() >= 4 && Oui::GOOGLE.matches(body) && body[3] == SAE_DEFAULT_GROUP_SUBTYPE
}

/// Concatenates the payloads of every vendor element matching `oui` and
/// `subtype`, honoring 802.11 element fragmentation. `None` when no such
/// element exists.
pub fn extract_vendor_payload(ies: &[u8], oui: Oui, subtype: u8) -> Option<Vec<u8>> {
    let mut payload = Vec::new();
    let mut found = false;
    for (id, body) in Reader::new(ies) {
        if id == Id::VENDOR_SPECIFIC && body.len() >= 4 && oui.matches(body) && body[3] == subtype
        {
            found = true;
            payload.extend_from_slice(&body[4..]);
        }
    }
    found.then_some(payload)
}

pub fn extract_wsc_payload(ies: &[u8]) -> Option<Vec<u8>> {
    extract_vendor_payload(ies, Oui::MSFT, MSFT_SUBTYPE_WSC)
}

pub fn extract_wfd_payload(ies: &[u8]) -> Option<Vec<u8>> {
    extract_vendor_payload(ies, Oui::WFA, WFA_SUBTYPE_WFD)
}

pub fn extract_p2p_payload(ies: &[u8]) -> Option<Vec<u8>> {
    extract_vendor_payload(ies, Oui::WFA, WFA_SUBTYPE_P2P)
}

/// Hotspot 2.0 Indication element (Wi-Fi Alliance Hotspot 2.0 spec, 3.1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Hs20Indication {
    pub version: u8,
    pub dgaf_disable: bool,
    pub pps_mo_id: Option<u16>,
    pub domain_id: Option<u16>,
}

pub fn parse_hs20_indication(body: &[u8]) -> Result<Hs20Indication, ParseError> {
    if !is_wfa_subtype(body, WFA_SUBTYPE_HS20_INDICATION) {
        return Err(ParseError::Malformed);
    }
    let payload = &body[4..];
    if payload.is_empty() {
        return Err(ParseError::Truncated);
    }
    let config = payload[0];
    let mut info = Hs20Indication {
        version: (config >> 4) & 0x0F,
        dgaf_disable: config & 0x01 != 0,
        pps_mo_id: None,
        domain_id: None,
    };
    let mut rest = &payload[1..];
    if config & 0x02 != 0 {
        if rest.len() < 2 {
            return Err(ParseError::Truncated);
        }
        info.pps_mo_id = Some(u16::from_le_bytes([rest[0], rest[1]]));
        rest = &rest[2..];
    }
    if config & 0x04 != 0 {
        if rest.len() < 2 {
            return Err(ParseError::Truncated);
        }
        info.domain_id = Some(u16::from_le_bytes([rest[0], rest[1]]));
    }
    Ok(info)
}

/// OWE Transition Mode element (Wi-Fi Alliance OWE spec, 2.3.1): the open
/// BSS advertises its encrypted twin and vice versa.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OweTransitionInfo {
    pub bssid: MacAddr,
    pub ssid: Vec<u8>,
    /// `(operating class, channel number)`; absent when the twin operates on
    /// the same channel.
    pub channel_info: Option<(u8, u8)>,
}

pub fn parse_owe_transition(body: &[u8]) -> Result<OweTransitionInfo, ParseError> {
    if !is_wfa_subtype(body, WFA_SUBTYPE_OWE_TRANSITION) {
        return Err(ParseError::Malformed);
    }
    let payload = &body[4..];
    if payload.len() < 7 {
        return Err(ParseError::Truncated);
    }
    let mut bssid = MacAddr::default();
    bssid.copy_from_slice(&payload[0..6]);
    let ssid_len = payload[6] as usize;
    if ssid_len > 32 {
        return Err(ParseError::Malformed);
    }
    let rest = &payload[7..];
    if rest.len() < ssid_len {
        return Err(ParseError::Truncated);
    }
    let ssid = rest[..ssid_len].to_vec();
    let channel_info = match rest.len() - ssid_len {
        0 => None,
        2 => Some((rest[ssid_len], rest[ssid_len + 1])),
        _ => return Err(ParseError::Malformed),
    };
    Ok(OweTransitionInfo { bssid, ssid, channel_info })
}

/// Microsoft network-cost element: `(cost level, cost flags)`.
pub fn parse_network_cost(body: &[u8]) -> Option<(u16, u16)> {
    if body.len() < 8 || !is_msft_subtype(body, MSFT_SUBTYPE_NETWORK_COST) {
        return None;
    }
    let level = u16::from_le_bytes([body[4], body[5]]);
    let flags = u16::from_le_bytes([body[6], body[7]]);
    Some((level, flags))
}
