// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// Seam to the known-networks store. Active scans probe for the saved
/// networks that do not broadcast their SSID.
pub trait KnownNetworks {
    /// SSIDs of saved networks marked hidden, each at most 32 bytes.
    fn hidden_ssids(&self) -> Vec<Vec<u8>>;

    fn has_hidden(&self) -> bool {
        !self.hidden_ssids().is_empty()
    }
}
