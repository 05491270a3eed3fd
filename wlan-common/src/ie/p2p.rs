// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Wi-Fi P2P payload parsing, limited to the attributes that let the scan
//! subsystem classify discovery frames. Beacon and probe-response P2P
//! subelement sets are mutually incompatible, which is what makes the
//! reclassification heuristic possible.

use crate::{
    ie::{extract_p2p_payload, ParseError},
    mac::MacAddr,
};

// Wi-Fi P2P Technical Specification v1.7, Table 6
const ATTR_CAPABILITY: u8 = 2;
const ATTR_DEVICE_ID: u8 = 3;
const ATTR_LISTEN_CHANNEL: u8 = 6;
const ATTR_DEVICE_INFO: u8 = 13;

const WSC_ATTR_DEVICE_NAME: u16 = 0x1011;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct P2pCapability {
    pub device_caps: u8,
    pub group_caps: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct P2pDeviceInfo {
    pub device_addr: MacAddr,
    pub config_methods: u16,
    pub device_name: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenChannel {
    pub country: [u8; 3],
    pub oper_class: u8,
    pub channel: u8,
}

/// P2P payload of a beacon frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct P2pBeacon {
    pub capability: P2pCapability,
    pub device_addr: MacAddr,
}

/// P2P payload of a probe-response frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct P2pProbeResp {
    pub capability: P2pCapability,
    pub device_info: P2pDeviceInfo,
}

/// P2P payload of a probe-request frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct P2pProbeReq {
    pub capability: P2pCapability,
    pub listen_channel: ListenChannel,
    pub device_info: Option<P2pDeviceInfo>,
}

struct Attributes<'a>(&'a [u8]);

impl<'a> Iterator for Attributes<'a> {
    type Item = Result<(u8, &'a [u8]), ParseError>;

    // Each attribute is a 1-byte ID and a 2-byte little-endian length.
    fn next(&mut self) -> Option<Self::Item> {
        if self.0.is_empty() {
            return None;
        }
        if self.0.len() < 3 {
            self.0 = &[];
            return Some(Err(ParseError::Truncated));
        }
        let id = self.0[0];
        let len = u16::from_le_bytes([self.0[1], self.0[2]]) as usize;
        if self.0.len() < 3 + len {
            self.0 = &[];
            return Some(Err(ParseError::Truncated));
        }
        let body = &self.0[3..3 + len];
        self.0 = &self.0[3 + len..];
        Some(Ok((id, body)))
    }
}

#[derive(Default)]
struct ParsedAttrs {
    capability: Option<P2pCapability>,
    device_id: Option<MacAddr>,
    listen_channel: Option<ListenChannel>,
    device_info: Option<P2pDeviceInfo>,
}

fn parse_attrs(payload: &[u8]) -> Result<ParsedAttrs, ParseError> {
    let mut out = ParsedAttrs::default();
    for attr in Attributes(payload) {
        let (id, body) = attr?;
        match id {
            ATTR_CAPABILITY => {
                if body.len() != 2 {
                    return Err(ParseError::Malformed);
                }
                out.capability =
                    Some(P2pCapability { device_caps: body[0], group_caps: body[1] });
            }
            ATTR_DEVICE_ID => {
                if body.len() != 6 {
                    return Err(ParseError::Malformed);
                }
                let mut addr = MacAddr::default();
                addr.copy_from_slice(body);
                out.device_id = Some(addr);
            }
            ATTR_LISTEN_CHANNEL => {
                if body.len() != 5 {
                    return Err(ParseError::Malformed);
                }
                out.listen_channel = Some(ListenChannel {
                    country: [body[0], body[1], body[2]],
                    oper_class: body[3],
                    channel: body[4],
                });
            }
            ATTR_DEVICE_INFO => out.device_info = Some(parse_device_info(body)?),
            _ => {}
        }
    }
    Ok(out)
}

fn parse_device_info(body: &[u8]) -> Result<P2pDeviceInfo, ParseError> {
    // addr(6) + config methods(2) + primary device type(8) + secondary count(1)
    if body.len() < 17 {
        return Err(ParseError::Truncated);
    }
    let mut device_addr = MacAddr::default();
    device_addr.copy_from_slice(&body[0..6]);
    let config_methods = u16::from_be_bytes([body[6], body[7]]);
    let num_secondary = body[16] as usize;
    let rest = body.get(17 + num_secondary * 8..).ok_or(ParseError::Truncated)?;
    // Device Name is carried as a WSC TLV (big-endian type and length).
    if rest.len() < 4 {
        return Err(ParseError::Truncated);
    }
    if u16::from_be_bytes([rest[0], rest[1]]) != WSC_ATTR_DEVICE_NAME {
        return Err(ParseError::Malformed);
    }
    let name_len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
    let device_name = rest.get(4..4 + name_len).ok_or(ParseError::Truncated)?.to_vec();
    Ok(P2pDeviceInfo { device_addr, config_methods, device_name })
}

/// Parses the P2P payload of a beacon. `Ok(None)` when the frame carries no
/// P2P element; `Err` when it does but is not beacon-shaped.
pub fn parse_beacon(ies: &[u8]) -> Result<Option<P2pBeacon>, ParseError> {
    let payload = match extract_p2p_payload(ies) {
        Some(p) => p,
        None => return Ok(None),
    };
    let attrs = parse_attrs(&payload)?;
    match (attrs.capability, attrs.device_id) {
        (Some(capability), Some(device_addr)) => {
            Ok(Some(P2pBeacon { capability, device_addr }))
        }
        _ => Err(ParseError::Malformed),
    }
}

/// Parses the P2P payload of a probe response. `Ok(None)` when the frame
/// carries no P2P element.
pub fn parse_probe_resp(ies: &[u8]) -> Result<Option<P2pProbeResp>, ParseError> {
    let payload = match extract_p2p_payload(ies) {
        Some(p) => p,
        None => return Ok(None),
    };
    let attrs = parse_attrs(&payload)?;
    match (attrs.capability, attrs.device_info) {
        (Some(capability), Some(device_info)) => {
            Ok(Some(P2pProbeResp { capability, device_info }))
        }
        _ => Err(ParseError::Malformed),
    }
}

/// Parses the P2P payload of a probe request. `Ok(None)` when the frame
/// carries no P2P element.
pub fn parse_probe_req(ies: &[u8]) -> Result<Option<P2pProbeReq>, ParseError> {
    let payload = match extract_p2p_payload(ies) {
        Some(p) => p,
        None => return Ok(None),
    };
    let attrs = parse_attrs(&payload)?;
    match (attrs.capability, attrs.listen_channel) {
        (Some(capability), Some(listen_channel)) => {
            Ok(Some(P2pProbeReq { capability, listen_channel, device_info: attrs.device_info }))
        }
        _ => Err(ParseError::Malformed),
    }
}
