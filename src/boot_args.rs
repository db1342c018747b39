// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{status::Status, verity::Seal},
    anyhow::{Context, Error},
    std::{collections::HashMap, path::Path},
};

const NETSVC_NETBOOT: &str = "netsvc.netboot";
const ZIRCON_SYSTEM_DISABLE_AUTOMOUNT: &str = "zircon.system.disable-automount";
const ZIRCON_SYSTEM_FILESYSTEM_CHECK: &str = "zircon.system.filesystem-check";
const FACTORY_VERITY_SEAL: &str = "factory_verity_seal";
const ALLOW_AUTHORING_FACTORY: &str = "fshost.allow_authoring_factory";

#[derive(Clone, Debug, Default)]
pub struct BootArgs {
    netsvc_netboot: bool,
    zircon_system_disable_automount: bool,
    zircon_system_filesystem_check: bool,
    allow_authoring_factory: bool,
    factory_verity_seal: Option<String>,
}

/// A flag that is present without a value counts as set.
fn get_bool(args: &HashMap<&str, Option<&str>>, key: &str) -> bool {
    match args.get(key) {
        None => false,
        Some(None) => true,
        Some(Some(value)) => !matches!(*value, "0" | "false" | "off"),
    }
}

impl BootArgs {
    /// Parses boot arguments in kernel command line form: whitespace separated `key=value` or
    /// bare `key` entries. Later entries override earlier ones.
    pub fn parse(text: &str) -> Self {
        let args: HashMap<&str, Option<&str>> = text
            .split_whitespace()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (entry, None),
            })
            .collect();

        BootArgs {
            netsvc_netboot: get_bool(&args, NETSVC_NETBOOT),
            zircon_system_disable_automount: get_bool(&args, ZIRCON_SYSTEM_DISABLE_AUTOMOUNT),
            zircon_system_filesystem_check: get_bool(&args, ZIRCON_SYSTEM_FILESYSTEM_CHECK),
            allow_authoring_factory: get_bool(&args, ALLOW_AUTHORING_FACTORY),
            factory_verity_seal: args
                .get(FACTORY_VERITY_SEAL)
                .copied()
                .flatten()
                .map(str::to_string),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read boot arguments from {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn netboot(&self) -> bool {
        self.netsvc_netboot || self.zircon_system_disable_automount
    }

    pub fn check_filesystems(&self) -> bool {
        self.zircon_system_filesystem_check
    }

    pub fn allow_authoring_factory(&self) -> bool {
        self.allow_authoring_factory
    }

    /// Returns the seal for the factory partition, or `NotFound` if none was provided.
    pub fn block_verity_seal(&self) -> Result<Seal, Status> {
        self.factory_verity_seal.as_deref().ok_or(Status::NotFound)?.parse()
    }
}
