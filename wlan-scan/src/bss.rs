// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The post-parse descriptor of one discovered access point, the decoder
//! that populates it from a `GetScan` dump entry or a raw probe-request
//! body, and the rank order used for result lists.

use crate::{
    radio::Radio,
    transport::BssAttr,
};
use log::warn;
use std::cmp::Ordering;
use thiserror::Error;
use wlan_common::{
    channel::oper_class_to_frequency,
    format::MacFmt,
    ie::{
        self,
        p2p::{P2pBeacon, P2pProbeReq, P2pProbeResp},
        rsn::RsnInfo,
        Id,
    },
    mac::{CapabilityInfo, MacAddr, MgmtHdr},
};

/// Which frame kind the record was parsed from, together with the parsed
/// P2P payload specific to that kind. The classification is advisory: it
/// partly rests on frame contents, so nothing critical may depend on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceFrame {
    Beacon(Option<P2pBeacon>),
    ProbeResp(Option<P2pProbeResp>),
    ProbeReq(Option<P2pProbeReq>),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum BssParseError {
    #[error("bad {0} attribute length")]
    BadAttribute(&'static str),
    #[error("signal strength out of range")]
    BadSignal,
    #[error("SSID element missing")]
    NoSsid,
    #[error("SSID longer than 32 bytes")]
    SsidTooLong,
    #[error("malformed {0} element")]
    MalformedElement(&'static str),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum RsnInfoError {
    #[error("no RSN, WPA or OSEN element present")]
    NotPresent,
    #[error(transparent)]
    Parse(#[from] ie::ParseError),
}

/// The "unknown" sentinel for channel utilization.
pub const UTILIZATION_UNKNOWN: u8 = 127;

// Used when rate estimation is unavailable so the rank stays meaningful.
const FALLBACK_DATA_RATE: u64 = 2_000_000;

/// One discovered BSS. Immutable once parsed; the engine only ever moves
/// whole records around.
#[derive(Clone, Debug, PartialEq)]
pub struct Bss {
    pub addr: MacAddr,
    pub frequency: u32,
    pub capability: CapabilityInfo,
    /// Signal strength in mBm (1/100 dBm).
    pub signal_strength: i32,
    /// Estimated peak data rate in bits/s.
    pub data_rate: u64,
    /// Channel utilization out of 255; [`UTILIZATION_UNKNOWN`] when the BSS
    /// Load element was absent.
    pub utilization: u8,
    pub ssid: [u8; 32],
    pub ssid_len: u8,
    pub source_frame: SourceFrame,

    // Originals of the security-relevant elements, 2-byte header included.
    pub rsne: Option<Vec<u8>>,
    pub rsnxe: Option<Vec<u8>>,
    pub wpa: Option<Vec<u8>>,
    pub osen: Option<Vec<u8>>,
    pub rc_ie: Option<Vec<u8>>,
    /// WSC vendor payload, fragments concatenated.
    pub wsc: Option<Vec<u8>>,
    /// Wi-Fi Display vendor payload, fragments concatenated.
    pub wfd: Option<Vec<u8>>,

    pub hs20_capable: bool,
    pub hs20_version: u8,
    pub hs20_dgaf_disable: bool,
    pub owe_trans: Option<ie::OweTransitionInfo>,
    pub dpp_configurator: bool,
    pub force_default_sae_group: bool,

    pub mde: Option<[u8; 3]>,
    pub cc: Option<[u8; 3]>,
    pub hessid: MacAddr,
    pub anqp_capable: bool,
    pub cap_rm_neighbor_report: bool,
    pub ht_capable: bool,
    pub vht_capable: bool,
    pub cost_level: u16,
    pub cost_flags: u16,
    pub proxy_arp: bool,

    /// TSF of the frame carrying the parent beacon, when reported.
    pub parent_tsf: u64,
    /// When this BSS was last seen, in microseconds of the engine clock.
    pub time_stamp: u64,
    pub rank: u16,
}

impl Bss {
    fn empty(source_frame: SourceFrame) -> Self {
        Bss {
            addr: MacAddr::default(),
            frequency: 0,
            capability: CapabilityInfo(0),
            signal_strength: 0,
            data_rate: FALLBACK_DATA_RATE,
            utilization: UTILIZATION_UNKNOWN,
            ssid: [0; 32],
            ssid_len: 0,
            source_frame,
            rsne: None,
            rsnxe: None,
            wpa: None,
            osen: None,
            rc_ie: None,
            wsc: None,
            wfd: None,
            hs20_capable: false,
            hs20_version: 0,
            hs20_dgaf_disable: false,
            owe_trans: None,
            dpp_configurator: false,
            force_default_sae_group: false,
            mde: None,
            cc: None,
            hessid: MacAddr::default(),
            anqp_capable: false,
            cap_rm_neighbor_report: false,
            ht_capable: false,
            vht_capable: false,
            cost_level: 0,
            cost_flags: 0,
            proxy_arp: false,
            parent_tsf: 0,
            time_stamp: 0,
            rank: 0,
        }
    }

    pub fn ssid(&self) -> &[u8] {
        &self.ssid[..self.ssid_len as usize]
    }

    /// An empty or all-zero SSID means the network hides its name.
    pub fn has_hidden_ssid(&self) -> bool {
        self.ssid().iter().all(|&b| b == 0)
    }

    /// Builds a record from the attributes of one `GetScan` dump entry.
    /// Also returns the driver's seen-ms-ago report for timestamping.
    pub fn from_scan_entry(
        attrs: &[(BssAttr, Vec<u8>)],
        radio: &dyn Radio,
    ) -> Result<(Bss, u32), BssParseError> {
        let mut bss = Bss::empty(SourceFrame::Beacon(None));
        let mut ies: Option<&[u8]> = None;
        let mut seen_ms_ago = 0u32;

        for (attr, data) in attrs {
            match attr {
                BssAttr::Bssid => {
                    if data.len() != 6 {
                        return Err(BssParseError::BadAttribute("BSSID"));
                    }
                    bss.addr.copy_from_slice(data);
                }
                BssAttr::Capability => {
                    if data.len() != 2 {
                        return Err(BssParseError::BadAttribute("capability"));
                    }
                    bss.capability = CapabilityInfo(u16::from_le_bytes([data[0], data[1]]));
                }
                BssAttr::Frequency => {
                    if data.len() != 4 {
                        return Err(BssParseError::BadAttribute("frequency"));
                    }
                    bss.frequency = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                }
                BssAttr::SignalMbm => {
                    if data.len() != 4 {
                        return Err(BssParseError::BadAttribute("signal"));
                    }
                    bss.signal_strength =
                        i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                }
                BssAttr::SignalUnspec => {
                    if data.len() != 1 {
                        return Err(BssParseError::BadAttribute("signal"));
                    }
                    bss.signal_strength = signal_unspec_to_mbm(data[0])?;
                }
                BssAttr::InformationElements => ies = Some(data),
                // Beacon IEs would only serve the probe-response
                // reclassification heuristic, which is intentionally not
                // applied; the P2P subelement shapes cover it.
                BssAttr::BeaconIes => {}
                BssAttr::PrespData => bss.source_frame = SourceFrame::ProbeResp(None),
                BssAttr::ParentTsf => {
                    if data.len() != 8 {
                        return Err(BssParseError::BadAttribute("parent TSF"));
                    }
                    bss.parent_tsf = u64::from_le_bytes(data[..8].try_into().unwrap());
                }
                BssAttr::SeenMsAgo => {
                    if data.len() != 4 {
                        warn!("ignoring malformed seen-ms-ago attribute");
                        continue;
                    }
                    seen_ms_ago = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                }
                BssAttr::LastSeenBoottime => {
                    if data.len() != 8 {
                        warn!("ignoring malformed last-seen-boottime attribute");
                        continue;
                    }
                    bss.time_stamp =
                        u64::from_le_bytes(data[..8].try_into().unwrap()) / 1_000;
                }
            }
        }

        let ies = ies.unwrap_or(&[]);
        bss.parse_ies(ies)?;
        if let Some(rate) = radio.estimate_data_rate(ies, bss.signal_strength) {
            bss.data_rate = rate;
        }

        Ok((bss, seen_ms_ago))
    }

    /// Builds a record from a received probe request. The transmitter
    /// address identifies the peer.
    pub fn from_probe_request(
        hdr: &MgmtHdr,
        body: &[u8],
        frequency: u32,
        rssi: i32,
    ) -> Result<Bss, BssParseError> {
        let mut bss = Bss::empty(SourceFrame::ProbeReq(None));
        bss.addr = hdr.addr2;
        bss.frequency = frequency;
        bss.signal_strength = rssi;
        bss.parse_ies(body)?;
        Ok(bss)
    }

    fn parse_ies(&mut self, ies: &[u8]) -> Result<(), BssParseError> {
        let mut have_ssid = false;

        for (id, body) in ie::Reader::new(ies) {
            if id == Id::SSID {
                if body.len() > 32 {
                    return Err(BssParseError::SsidTooLong);
                }
                self.ssid[..body.len()].copy_from_slice(body);
                self.ssid_len = body.len() as u8;
                have_ssid = true;
            } else if id == Id::RSNE {
                if self.rsne.is_none() {
                    self.rsne = Some(element_with_header(id, body));
                }
            } else if id == Id::RSNX {
                if self.rsnxe.is_none() {
                    self.rsnxe = Some(element_with_header(id, body));
                }
            } else if id == Id::BSS_LOAD {
                match ie::parse_bss_load(body) {
                    Ok((_, utilization, _)) => self.utilization = utilization,
                    Err(_) => warn!(
                        "unable to parse BSS Load element for {}",
                        self.addr.to_mac_string()
                    ),
                }
            } else if id == Id::VENDOR_SPECIFIC {
                self.parse_vendor_specific(body);
            } else if id == Id::MOBILITY_DOMAIN {
                if self.mde.is_none() && body.len() == 3 {
                    self.mde = Some([body[0], body[1], body[2]]);
                }
            } else if id == Id::RM_ENABLED_CAPABILITIES {
                // Only the Neighbor Report capability matters here.
                if body.len() == 5 {
                    self.cap_rm_neighbor_report = body[0] & 0x01 != 0;
                }
            } else if id == Id::COUNTRY {
                if self.cc.is_none() && body.len() >= 6 {
                    self.cc = Some([body[0], body[1], body[2]]);
                }
            } else if id == Id::HT_CAPABILITIES {
                self.ht_capable = true;
            } else if id == Id::VHT_CAPABILITIES {
                self.vht_capable = true;
            } else if id == Id::ADVERTISEMENT_PROTOCOL {
                if body.len() < 2 {
                    return Err(BssParseError::MalformedElement("advertisement protocol"));
                }
                self.parse_advertisement_protocol(body);
            } else if id == Id::INTERWORKING {
                // No bits say whether venue and HESSID are included; the
                // length is the only discriminator (IEEE 802.11-2016,
                // Figure 9-439).
                if body.len() == 9 {
                    self.hessid.copy_from_slice(&body[3..9]);
                } else if body.len() == 7 {
                    self.hessid.copy_from_slice(&body[1..7]);
                }
            } else if id == Id::ROAMING_CONSORTIUM {
                if body.len() < 2 {
                    return Err(BssParseError::MalformedElement("roaming consortium"));
                }
                self.rc_ie = Some(element_with_header(id, body));
            } else if id == Id::EXT_CAPABILITIES {
                // Fields beyond the received length are defined to be zero
                // (802.11-2020, 9.4.2.26); only Proxy ARP (bit 12) is read.
                if body.len() >= 2 {
                    self.proxy_arp = body[1] & 0x10 != 0;
                }
            }
        }

        self.wsc = ie::extract_wsc_payload(ies);
        self.parse_p2p(ies);
        self.wfd = ie::extract_wfd_payload(ies);

        if !have_ssid {
            return Err(BssParseError::NoSsid);
        }
        Ok(())
    }

    fn parse_vendor_specific(&mut self, body: &[u8]) {
        if self.wpa.is_none() && ie::wpa::is_wpa_body(body) {
            self.wpa = Some(element_with_header(Id::VENDOR_SPECIFIC, body));
            return;
        }

        if self.osen.is_none() && ie::is_wfa_subtype(body, ie::WFA_SUBTYPE_OSEN) {
            self.osen = Some(element_with_header(Id::VENDOR_SPECIFIC, body));
            return;
        }

        if ie::is_wfa_subtype(body, ie::WFA_SUBTYPE_HS20_INDICATION) {
            if let Ok(indication) = ie::parse_hs20_indication(body) {
                self.hs20_capable = true;
                self.hs20_version = indication.version;
                self.hs20_dgaf_disable = indication.dgaf_disable;
            }
            return;
        }

        if ie::is_wfa_subtype(body, ie::WFA_SUBTYPE_OWE_TRANSITION) {
            if let Ok(info) = ie::parse_owe_transition(body) {
                // An unmappable class/channel pair would leave no frequency
                // to probe on.
                if let Some((oper_class, channel)) = info.channel_info {
                    if oper_class_to_frequency(oper_class, channel).is_none() {
                        return;
                    }
                }
                self.owe_trans = Some(info);
            }
            return;
        }

        if ie::is_wfa_subtype(body, ie::WFA_SUBTYPE_DPP_CONFIGURATOR_CONNECTIVITY) {
            self.dpp_configurator = true;
        }

        if let Some((level, flags)) = ie::parse_network_cost(body) {
            self.cost_level = level;
            self.cost_flags = flags;
            return;
        }

        if ie::is_default_sae_group(body) {
            self.force_default_sae_group = true;
        }
    }

    // The ANQP protocol ID may be buried behind several other advertisement
    // tuples, so the whole element may need to be walked. Unknown tuple
    // types end the walk.
    fn parse_advertisement_protocol(&mut self, body: &[u8]) -> bool {
        const ANQP: u8 = 0;
        const MIH_INFORMATION_SERVICE: u8 = 1;
        const MIH_DISCOVERY: u8 = 2;
        const EAS: u8 = 3;
        const RLQP: u8 = 4;
        const VENDOR_SPECIFIC: u8 = 221;

        let mut rest = body;
        while !rest.is_empty() {
            if rest.len() < 2 {
                return false;
            }
            match rest[1] {
                // IEEE 802.11-2016, 11.25.3.3.1: an ANQP request may only be
                // sent when the ANQP Advertisement Protocol ID is included.
                ANQP => {
                    self.anqp_capable = true;
                    return true;
                }
                MIH_INFORMATION_SERVICE | MIH_DISCOVERY | EAS | RLQP => rest = &rest[2..],
                VENDOR_SPECIFIC => {
                    // IEEE 802.11-2016, 9.4.2.26
                    if rest.len() < 4 {
                        return false;
                    }
                    let adv = rest[3] as usize;
                    if adv == 0 {
                        return false;
                    }
                    rest = &rest[adv.min(rest.len())..];
                }
                _ => return false,
            }
        }
        true
    }

    fn parse_p2p(&mut self, ies: &[u8]) {
        match &self.source_frame {
            SourceFrame::ProbeResp(_) => {
                if let Ok(Some(info)) = ie::p2p::parse_probe_resp(ies) {
                    self.source_frame = SourceFrame::ProbeResp(Some(info));
                }
            }
            SourceFrame::ProbeReq(_) => {
                if let Ok(Some(info)) = ie::p2p::parse_probe_req(ies) {
                    self.source_frame = SourceFrame::ProbeReq(Some(info));
                }
            }
            SourceFrame::Beacon(_) => match ie::p2p::parse_beacon(ies) {
                Ok(Some(info)) => self.source_frame = SourceFrame::Beacon(Some(info)),
                Ok(None) => {}
                // The P2P payload is present but not beacon-shaped; if it is
                // probe-response-shaped the driver mislabeled the frame.
                Err(_) => {
                    if let Ok(Some(info)) = ie::p2p::parse_probe_resp(ies) {
                        self.source_frame = SourceFrame::ProbeResp(Some(info));
                    }
                }
            },
        }
    }

    /// RSN information with the RSNE taking priority over a WPA element,
    /// which in turn beats OSEN.
    pub fn rsn_info(&self) -> Result<RsnInfo, RsnInfoError> {
        if let Some(rsne) = &self.rsne {
            return Ok(ie::parse_rsne(rsne)?);
        }
        if let Some(wpa) = &self.wpa {
            let wpa = ie::wpa::from_bytes(wpa)?;
            return Ok(ie::rsn_info_from_wpa(&wpa));
        }
        if let Some(osen) = &self.osen {
            return Ok(ie::parse_osen(osen)?);
        }
        Err(RsnInfoError::NotPresent)
    }

    /// Ranks the record for result ordering: rate dominates, with the 5 GHz
    /// preference and channel-load adjustments applied on top.
    pub fn compute_rank(&mut self, band_modifier_5ghz: f64) {
        const HIGH_UTILIZATION_FACTOR: f64 = 0.8;
        const LOW_UTILIZATION_FACTOR: f64 = 1.2;
        // Maximum assumed rate is 2340 Mbit/s (VHT).
        const MAX_RATE: f64 = 2_340_000_000.0;

        let mut rank = self.data_rate as f64 / MAX_RATE * u16::MAX as f64;

        if self.frequency > 4000 {
            rank *= band_modifier_5ghz;
        }

        if self.utilization >= 192 {
            rank *= HIGH_UTILIZATION_FACTOR;
        } else if self.utilization <= 63 {
            rank *= LOW_UTILIZATION_FACTOR;
        }

        self.rank = if rank >= u16::MAX as f64 { u16::MAX } else { rank as u16 };
    }

    /// Result-list order: rank descending, stronger signal first on ties.
    pub fn rank_cmp(a: &Bss, b: &Bss) -> Ordering {
        b.rank
            .cmp(&a.rank)
            .then_with(|| b.signal_strength.cmp(&a.signal_strength))
    }
}

// Maps the unit-less 0..100 "strength" reported by a handful of drivers
// onto -10000..0 mBm.
fn signal_unspec_to_mbm(strength: u8) -> Result<i32, BssParseError> {
    if strength > 100 {
        return Err(BssParseError::BadSignal);
    }
    Ok(i32::from(strength) * 100 - 10_000)
}

fn element_with_header(id: Id, body: &[u8]) -> Vec<u8> {
    let mut element = Vec::with_capacity(body.len() + 2);
    element.push(id.0);
    element.push(body.len() as u8);
    element.extend_from_slice(body);
    element
}
