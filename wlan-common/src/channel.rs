// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Operating-class and channel-number arithmetic for the global operating
//! classes (IEEE Std 802.11-2020 Annex E, Table E-4).

pub const BASE_FREQ_2GHZ: u32 = 2407;
pub const BASE_FREQ_5GHZ: u32 = 5000;
pub const BASE_FREQ_6GHZ: u32 = 5950;

/// Center frequency for a (global operating class, channel number) pair.
///
/// Covers the classes that appear in OWE transition elements; other classes
/// map to `None`.
pub fn oper_class_to_frequency(oper_class: u8, channel: u8) -> Option<u32> {
    match oper_class {
        // 2.4 GHz, 20/40 MHz
        81 | 83 | 84 => match channel {
            1..=13 => Some(BASE_FREQ_2GHZ + 5 * channel as u32),
            _ => None,
        },
        82 => (channel == 14).then_some(2484),
        // 5 GHz, 20 MHz through 160 MHz
        115..=130 => match channel {
            36..=177 => Some(BASE_FREQ_5GHZ + 5 * channel as u32),
            _ => None,
        },
        // 6 GHz
        131..=135 => match channel {
            1..=233 => Some(BASE_FREQ_6GHZ + 5 * channel as u32),
            _ => None,
        },
        136 => (channel == 2).then_some(5935),
        _ => None,
    }
}
