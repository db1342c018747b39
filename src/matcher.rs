// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod factoryfs;
mod minfs;

pub use {
    factoryfs::FactoryfsMatcher,
    minfs::{MinfsMatcher, MinfsVariant},
};

use {
    crate::{
        device::{constants::BLOCK_FLAG_BOOTPART, BlockDeviceInterface},
        format::DiskFormat,
        status::Status,
    },
    async_trait::async_trait,
    std::sync::{Arc, OnceLock},
};

/// A rule that recognizes one kind of block device and knows how to add it.
#[async_trait]
pub trait Matcher: Send + Sync {
    /// Returns the format the device should be treated as, or `DiskFormat::Unknown` if this rule
    /// does not apply to it.
    async fn match_device(&self, device: &dyn BlockDeviceInterface) -> DiskFormat;

    /// Adds a device that this rule matched. The device's format has already been set to the
    /// value `match_device` returned.
    async fn add(&mut self, device: &mut dyn BlockDeviceInterface) -> Result<(), Status>;
}

/// The location of a partition container, shared between the container's matcher and the
/// matchers of its children. Empty until the container has been added.
#[derive(Debug)]
pub struct PartitionMap {
    suffix: &'static str,
    path: OnceLock<String>,
}

impl PartitionMap {
    /// `suffix` is the path segment the container's driver inserts between itself and its
    /// partitions: "/fvm" for FVM, nothing for GPT and MBR.
    pub fn new(suffix: &'static str) -> Self {
        PartitionMap { suffix, path: OnceLock::new() }
    }

    pub fn path(&self) -> Option<&str> {
        self.path.get().map(String::as_str)
    }

    fn record(&self, path: &str) {
        if self.path.set(path.to_string()).is_ok() {
            tracing::info!(%path, "Recorded partition container");
        }
    }

    /// Returns true if `path` is a partition directly inside the container, i.e. it has the form
    /// `<container><suffix>/<partition>/block`.
    pub fn is_child(&self, path: &str) -> bool {
        let Some(container) = self.path() else {
            return false;
        };
        let Some(partition) = path.strip_suffix("/block") else {
            return false;
        };
        let Some((parent, name)) = partition.rsplit_once('/') else {
            return false;
        };
        !name.is_empty() && parent.strip_suffix(self.suffix) == Some(container)
    }
}

/// Matches devices purely by their sniffed content, optionally only those backed by a ramdisk.
pub struct ContentMatcher {
    format: DiskFormat,
    ramdisk_prefix: Option<String>,
}

impl ContentMatcher {
    /// If `ramdisk_prefix` is set, only devices whose path starts with it are matched.
    pub fn new(format: DiskFormat, ramdisk_prefix: Option<String>) -> Self {
        ContentMatcher { format, ramdisk_prefix }
    }

    fn matches(&self, device: &dyn BlockDeviceInterface) -> bool {
        device.content_format() == self.format
            && self
                .ramdisk_prefix
                .as_deref()
                .map_or(true, |prefix| device.topological_path().starts_with(prefix))
    }
}

#[async_trait]
impl Matcher for ContentMatcher {
    async fn match_device(&self, device: &dyn BlockDeviceInterface) -> DiskFormat {
        if self.matches(device) {
            self.format
        } else {
            DiskFormat::Unknown
        }
    }

    async fn add(&mut self, device: &mut dyn BlockDeviceInterface) -> Result<(), Status> {
        device.add(false).await
    }
}

/// Matches a partition container (GPT, FVM or MBR) by content and records where the first one
/// was found so that its partitions can be recognized.
pub struct PartitionMapMatcher {
    content: ContentMatcher,
    map: Arc<PartitionMap>,
}

impl PartitionMapMatcher {
    pub fn new(format: DiskFormat, suffix: &'static str) -> Self {
        PartitionMapMatcher {
            content: ContentMatcher::new(format, None),
            map: Arc::new(PartitionMap::new(suffix)),
        }
    }

    /// Like `new`, but only matches containers on the ramdisk at `ramdisk_prefix`.
    pub fn on_ramdisk(format: DiskFormat, suffix: &'static str, ramdisk_prefix: String) -> Self {
        PartitionMapMatcher {
            content: ContentMatcher::new(format, Some(ramdisk_prefix)),
            map: Arc::new(PartitionMap::new(suffix)),
        }
    }

    pub fn partition_map(&self) -> Arc<PartitionMap> {
        self.map.clone()
    }
}

#[async_trait]
impl Matcher for PartitionMapMatcher {
    async fn match_device(&self, device: &dyn BlockDeviceInterface) -> DiskFormat {
        self.content.match_device(device).await
    }

    async fn add(&mut self, device: &mut dyn BlockDeviceInterface) -> Result<(), Status> {
        device.add(false).await?;
        self.map.record(device.topological_path());
        Ok(())
    }
}

/// Matches a partition of a known container by its exact name and type GUID.
pub struct SimpleMatcher {
    map: Arc<PartitionMap>,
    partition_name: &'static str,
    type_guid: [u8; 16],
    format: DiskFormat,
}

impl SimpleMatcher {
    pub fn new(
        map: Arc<PartitionMap>,
        partition_name: &'static str,
        type_guid: [u8; 16],
        format: DiskFormat,
    ) -> Self {
        SimpleMatcher { map, partition_name, type_guid, format }
    }
}

#[async_trait]
impl Matcher for SimpleMatcher {
    async fn match_device(&self, device: &dyn BlockDeviceInterface) -> DiskFormat {
        if !self.map.is_child(device.topological_path())
            || device.partition_name() != self.partition_name
        {
            return DiskFormat::Unknown;
        }
        match device.get_type_guid().await {
            Ok(guid) if guid == self.type_guid => self.format,
            _ => DiskFormat::Unknown,
        }
    }

    async fn add(&mut self, device: &mut dyn BlockDeviceInterface) -> Result<(), Status> {
        device.add(false).await
    }
}

/// Matches boot partitions, which are flagged by the block driver.
pub struct BootpartMatcher;

#[async_trait]
impl Matcher for BootpartMatcher {
    async fn match_device(&self, device: &dyn BlockDeviceInterface) -> DiskFormat {
        match device.get_info().await {
            Ok(info) if info.flags & BLOCK_FLAG_BOOTPART != 0 => DiskFormat::Bootpart,
            _ => DiskFormat::Unknown,
        }
    }

    async fn add(&mut self, device: &mut dyn BlockDeviceInterface) -> Result<(), Status> {
        device.add(false).await
    }
}
