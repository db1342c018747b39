// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Classifies block devices as they appear and decides which drivers to bind and which
//! filesystems to check, format and mount on them.

pub mod block_device_manager;
pub mod boot_args;
pub mod config;
pub mod crypt;
pub mod device;
pub mod environment;
pub mod format;
pub mod manager;
pub mod manifest;
pub mod matcher;
pub mod service;
pub mod status;
pub mod verity;
pub mod watcher;
