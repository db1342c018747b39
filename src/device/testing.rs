// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fake devices for unit tests.

use {
    super::{BlockDeviceInterface, BlockInfo, Device},
    crate::{format::DiskFormat, status::Status, verity::Seal},
    async_trait::async_trait,
};

/// A raw device node with fixed answers.
#[derive(Clone, Debug, Default)]
pub struct MockDevice {
    pub topological_path: String,
    pub info: BlockInfo,
    pub content_format: DiskFormat,
    pub partition_label: Option<String>,
    pub partition_type: Option<[u8; 16]>,
}

impl MockDevice {
    pub fn new(topological_path: &str) -> Self {
        MockDevice {
            topological_path: topological_path.to_string(),
            info: BlockInfo { block_size: 512, block_count: 1024, flags: 0 },
            content_format: DiskFormat::Unknown,
            partition_label: None,
            partition_type: None,
        }
    }

    pub fn with_content_format(mut self, format: DiskFormat) -> Self {
        self.content_format = format;
        self
    }

    pub fn with_partition(mut self, label: &str, type_guid: [u8; 16]) -> Self {
        self.partition_label = Some(label.to_string());
        self.partition_type = Some(type_guid);
        self
    }
}

#[async_trait]
impl Device for MockDevice {
    fn topological_path(&self) -> &str {
        &self.topological_path
    }

    fn path(&self) -> &str {
        &self.topological_path
    }

    async fn get_block_info(&self) -> Result<BlockInfo, Status> {
        Ok(self.info)
    }

    async fn content_format(&self) -> Result<DiskFormat, Status> {
        Ok(self.content_format)
    }

    async fn partition_label(&self) -> Result<String, Status> {
        self.partition_label.clone().ok_or(Status::NotSupported)
    }

    async fn partition_type(&self) -> Result<[u8; 16], Status> {
        self.partition_type.ok_or(Status::NotSupported)
    }

    fn reopen(&self) -> Result<Box<dyn Device>, Status> {
        Ok(Box::new(self.clone()))
    }
}

/// An action performed on a `MockBlockDevice`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    AttachDriver(String),
    UnsealZxcrypt,
    FormatZxcrypt,
    OpenVerified(Seal),
    CheckFilesystem,
    FormatFilesystem,
    MountFilesystem,
}

/// A block device that records the actions taken on it instead of performing them.
#[derive(Debug)]
pub struct MockBlockDevice {
    topological_path: String,
    partition_name: String,
    content_format: DiskFormat,
    format: DiskFormat,
    sticky_format: bool,
    type_guid: Option<[u8; 16]>,
    flags: u32,
    netbooting: bool,
    allow_authoring: bool,
    format_on_corruption: bool,
    seal: Option<Seal>,
    check_result: Result<(), Status>,
    pub calls: Vec<Call>,
}

impl MockBlockDevice {
    pub fn new(topological_path: &str) -> Self {
        MockBlockDevice {
            topological_path: topological_path.to_string(),
            partition_name: String::new(),
            content_format: DiskFormat::Unknown,
            format: DiskFormat::Unknown,
            sticky_format: false,
            type_guid: None,
            flags: 0,
            netbooting: false,
            allow_authoring: false,
            format_on_corruption: true,
            seal: None,
            check_result: Ok(()),
            calls: Vec::new(),
        }
    }

    pub fn with_format(mut self, format: DiskFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_content_format(mut self, format: DiskFormat) -> Self {
        self.content_format = format;
        self
    }

    pub fn with_partition(mut self, name: &str, type_guid: [u8; 16]) -> Self {
        self.partition_name = name.to_string();
        self.type_guid = Some(type_guid);
        self
    }

    pub fn with_type_guid(mut self, type_guid: [u8; 16]) -> Self {
        self.type_guid = Some(type_guid);
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_seal(mut self, seal: Seal) -> Self {
        self.seal = Some(seal);
        self
    }

    pub fn with_check_result(mut self, result: Result<(), Status>) -> Self {
        self.check_result = result;
        self
    }

    /// Ignores `set_format`, so the device never leaves its initial format.
    pub fn with_sticky_format(mut self) -> Self {
        self.sticky_format = true;
        self
    }

    pub fn netbooting(mut self) -> Self {
        self.netbooting = true;
        self
    }

    pub fn allow_authoring(mut self) -> Self {
        self.allow_authoring = true;
        self
    }

    pub fn without_format_on_corruption(mut self) -> Self {
        self.format_on_corruption = false;
        self
    }
}

#[async_trait]
impl BlockDeviceInterface for MockBlockDevice {
    fn topological_path(&self) -> &str {
        &self.topological_path
    }

    fn partition_name(&self) -> &str {
        &self.partition_name
    }

    fn content_format(&self) -> DiskFormat {
        self.content_format
    }

    fn format(&self) -> DiskFormat {
        self.format
    }

    fn set_format(&mut self, format: DiskFormat) {
        if !self.sticky_format {
            self.format = format;
        }
    }

    fn netbooting(&self) -> bool {
        self.netbooting
    }

    fn should_allow_authoring_factory(&self) -> bool {
        self.allow_authoring
    }

    fn block_verity_seal(&self) -> Result<Seal, Status> {
        self.seal.ok_or(Status::NotFound)
    }

    fn format_on_corruption(&self) -> bool {
        self.format_on_corruption
    }

    async fn get_info(&self) -> Result<BlockInfo, Status> {
        Ok(BlockInfo { block_size: 512, block_count: 1024, flags: self.flags })
    }

    async fn get_type_guid(&self) -> Result<[u8; 16], Status> {
        self.type_guid.ok_or(Status::NotSupported)
    }

    async fn attach_driver(&mut self, driver_path: &str) -> Result<(), Status> {
        self.calls.push(Call::AttachDriver(driver_path.to_string()));
        Ok(())
    }

    async fn unseal_zxcrypt(&mut self) -> Result<(), Status> {
        self.calls.push(Call::UnsealZxcrypt);
        Ok(())
    }

    async fn format_zxcrypt(&mut self) -> Result<(), Status> {
        self.calls.push(Call::FormatZxcrypt);
        self.content_format = DiskFormat::Zxcrypt;
        Ok(())
    }

    async fn open_block_verity_for_verified_read(&mut self, seal: Seal) -> Result<(), Status> {
        self.calls.push(Call::OpenVerified(seal));
        Ok(())
    }

    async fn check_filesystem(&mut self) -> Result<(), Status> {
        self.calls.push(Call::CheckFilesystem);
        self.check_result
    }

    async fn format_filesystem(&mut self) -> Result<(), Status> {
        self.calls.push(Call::FormatFilesystem);
        Ok(())
    }

    async fn mount_filesystem(&mut self) -> Result<(), Status> {
        self.calls.push(Call::MountFilesystem);
        Ok(())
    }
}
