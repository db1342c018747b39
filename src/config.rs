// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::boot_args::BootArgs,
    anyhow::{Context, Error},
    fshost_config::{default_options, read_options, Config},
    std::{fs::File, io::BufReader, path::Path},
};

/// Loads the configuration from the options file at `path`, or the default options if there is
/// none.
pub fn load_config(path: Option<&Path>) -> Result<Config, Error> {
    let options = match path {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open config {}", path.display()))?;
            read_options(BufReader::new(file))
                .with_context(|| format!("Failed to read config {}", path.display()))?
        }
        None => default_options(),
    };
    tracing::info!(?options, "Loaded fshost options");
    Config::from_options(&options)
}

pub fn apply_boot_args_to_config(config: &mut Config, boot_args: &BootArgs) {
    if boot_args.netboot() {
        config.netboot = true;
    }

    if boot_args.check_filesystems() {
        config.check_filesystems = true;
    }
}
