// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::{
    ie::{
        rsn::{akm::Akm, cipher::Cipher, parse_akm, parse_cipher},
        Id, ParseError,
    },
    organization::Oui,
};
use nom::{multi::count, number::complete::le_u16, IResult};

// IEEE 802.11-2016, 9.4.2.26 (Vendor specific IE)
// The WPA1 element is not fully specified by IEEE; the layout below was
// derived from deployed APs:
// (1B) Element ID, (1B) Length
// (3B) OUI, (1B) OUI-specific element ID
// (2B) WPA type
// (4B) multicast cipher
// (2B) unicast cipher count, (4B x N) unicast cipher list
// (2B) AKM count, (4B x N) AKM list
pub const VENDOR_ELEMENT_ID: u8 = 1;
pub const WPA_TYPE: u16 = 1;

#[derive(Clone, Debug, PartialEq)]
pub struct WpaIe {
    pub multicast_cipher: Cipher,
    pub unicast_cipher_list: Vec<Cipher>,
    pub akm_list: Vec<Akm>,
}

/// Whether a vendor-specific element body is a WPA v1 element.
pub fn is_wpa_body(body: &[u8]) -> bool {
    body.len() >= 6
        && Oui::MSFT.matches(body)
        && body[3] == VENDOR_ELEMENT_ID
        && u16::from_le_bytes([body[4], body[5]]) == WPA_TYPE
}

/// Converts the bytes of a whole WPA element, 2-byte header included, into a
/// `WpaIe`.
pub fn from_bytes(element: &[u8]) -> Result<WpaIe, ParseError> {
    if element.len() < 8
        || element[0] != Id::VENDOR_SPECIFIC.0
        || !is_wpa_body(&element[2..])
    {
        return Err(ParseError::Malformed);
    }
    let (_, wpa) = parse_fields(&element[8..]).map_err(|_| ParseError::Truncated)?;
    Ok(wpa)
}

fn parse_fields(input: &[u8]) -> IResult<&[u8], WpaIe> {
    let (input, multicast_cipher) = parse_cipher(input)?;
    let (input, n) = le_u16(input)?;
    let (input, unicast_cipher_list) = count(parse_cipher, n as usize)(input)?;
    let (input, n) = le_u16(input)?;
    let (input, akm_list) = count(parse_akm, n as usize)(input)?;
    Ok((input, WpaIe { multicast_cipher, unicast_cipher_list, akm_list }))
}
