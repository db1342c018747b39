// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Configuration for fshost.
//!
//! The configuration is a flat text stream with one directive per line. A directive is either a
//! bare option name (`blobfs`), an option with a value (`minfs-max-bytes=1024`), the sentinel
//! `default` (which expands to [`default_options`]), or an option name prefixed with `-`, which
//! removes it. Lines are processed strictly in order, so a removal only affects options set above
//! it. Blank lines and lines starting with `#` are ignored.

use {
    anyhow::{Context, Error},
    std::{collections::BTreeMap, io::BufRead},
};

// -- Option names --
pub const DEFAULT: &str = "default";
pub const BLOBFS: &str = "blobfs";
pub const BLOBFS_MAX_BYTES: &str = "blobfs-max-bytes";
pub const BOOTPART: &str = "bootpart";
pub const DURABLE: &str = "durable";
pub const FACTORY: &str = "factory";
pub const FORMAT_MINFS_ON_CORRUPTION: &str = "format-minfs-on-corruption";
pub const FVM: &str = "fvm";
pub const GPT: &str = "gpt";
pub const MBR: &str = "mbr";
pub const MINFS: &str = "minfs";
pub const MINFS_MAX_BYTES: &str = "minfs-max-bytes";
pub const MINFS_RAMDISK: &str = "minfs-ramdisk";
pub const NETBOOT: &str = "netboot";
pub const NO_ZXCRYPT: &str = "no-zxcrypt";

/// A set of options. Options without a value map to the empty string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Options(BTreeMap<String, String>);

impl Options {
    pub fn is_set(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Returns the value of the option, if it is set. Flags have an empty value.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) {
        self.0.remove(name);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn merge(&mut self, other: Options) {
        self.0.extend(other.0);
    }
}

impl<'a> FromIterator<&'a str> for Options {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Options(iter.into_iter().map(|name| (name.to_string(), String::new())).collect())
    }
}

/// The option set that `default` expands to.
pub fn default_options() -> Options {
    [BLOBFS, BOOTPART, FORMAT_MINFS_ON_CORRUPTION, FVM, GPT, MINFS].into_iter().collect()
}

/// Reads options from `reader`, one directive per line.
pub fn read_options(reader: impl BufRead) -> Result<Options, Error> {
    let mut options = Options::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", index + 1))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(removed) = line.strip_prefix('-') {
            let name = removed.split_once('=').map_or(removed, |(name, _)| name);
            options.remove(name.trim());
            continue;
        }
        if line == DEFAULT {
            options.merge(default_options());
            continue;
        }
        match line.split_once('=') {
            Some((name, value)) => options.set(name.trim(), value.trim()),
            None => options.set(line, ""),
        }
    }
    Ok(options)
}

/// Typed view over [`Options`], plus settings that come from boot arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub blobfs: bool,
    pub blobfs_max_bytes: u64,
    pub bootpart: bool,
    pub durable: bool,
    pub factory: bool,
    pub format_minfs_on_corruption: bool,
    pub fvm: bool,
    pub gpt: bool,
    pub mbr: bool,
    pub minfs: bool,
    pub minfs_max_bytes: u64,
    pub minfs_ramdisk: bool,
    pub netboot: bool,
    pub no_zxcrypt: bool,
    /// Run fsck before mounting. Not an option; set from boot arguments.
    pub check_filesystems: bool,
}

impl Config {
    pub fn from_options(options: &Options) -> Result<Self, Error> {
        let bytes = |name: &str| -> Result<u64, Error> {
            match options.value(name) {
                None | Some("") => Ok(0),
                Some(value) => value
                    .parse::<u64>()
                    .with_context(|| format!("invalid value for {}: {:?}", name, value)),
            }
        };
        Ok(Config {
            blobfs: options.is_set(BLOBFS),
            blobfs_max_bytes: bytes(BLOBFS_MAX_BYTES)?,
            bootpart: options.is_set(BOOTPART),
            durable: options.is_set(DURABLE),
            factory: options.is_set(FACTORY),
            format_minfs_on_corruption: options.is_set(FORMAT_MINFS_ON_CORRUPTION),
            fvm: options.is_set(FVM),
            gpt: options.is_set(GPT),
            mbr: options.is_set(MBR),
            minfs: options.is_set(MINFS),
            minfs_max_bytes: bytes(MINFS_MAX_BYTES)?,
            minfs_ramdisk: options.is_set(MINFS_RAMDISK),
            netboot: options.is_set(NETBOOT),
            no_zxcrypt: options.is_set(NO_ZXCRYPT),
            check_filesystems: false,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        let options = default_options();
        Config {
            blobfs: options.is_set(BLOBFS),
            blobfs_max_bytes: 0,
            bootpart: options.is_set(BOOTPART),
            durable: options.is_set(DURABLE),
            factory: options.is_set(FACTORY),
            format_minfs_on_corruption: options.is_set(FORMAT_MINFS_ON_CORRUPTION),
            fvm: options.is_set(FVM),
            gpt: options.is_set(GPT),
            mbr: options.is_set(MBR),
            minfs: options.is_set(MINFS),
            minfs_max_bytes: 0,
            minfs_ramdisk: options.is_set(MINFS_RAMDISK),
            netboot: options.is_set(NETBOOT),
            no_zxcrypt: options.is_set(NO_ZXCRYPT),
            check_filesystems: false,
        }
    }
}
