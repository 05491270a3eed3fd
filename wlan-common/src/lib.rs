// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! 802.11 primitives shared by the scan subsystem: information-element
//! parsing, management-frame headers and the OUI registry.

pub mod channel;
pub mod format;
pub mod ie;
pub mod mac;
pub mod organization;
pub mod test_utils;
