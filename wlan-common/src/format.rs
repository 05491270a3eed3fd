// Copyright 2021 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// Lowercase colon-separated rendering of MAC-like byte strings for logs.
pub trait MacFmt {
    fn to_mac_string(&self) -> String;
}

impl MacFmt for [u8; 6] {
    fn to_mac_string(&self) -> String {
        self.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":")
    }
}

/// Best-effort rendering of an SSID: UTF-8 when printable, hex otherwise.
pub trait SsidFmt {
    fn to_ssid_string(&self) -> String;
}

impl SsidFmt for [u8] {
    fn to_ssid_string(&self) -> String {
        match std::str::from_utf8(self) {
            Ok(s) if !s.chars().any(char::is_control) => s.to_string(),
            _ => self.iter().map(|b| format!("{:02x}", b)).collect(),
        }
    }
}
