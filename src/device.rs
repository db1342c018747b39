// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod constants;
#[cfg(test)]
pub(crate) mod testing;

use {
    crate::{
        crypt::{zxcrypt::EncryptedVolume, EncryptedVolumeInterface},
        device::constants::{
            BLOBFS_TYPE_GUID, BLOCK_FLAG_BOOTPART, BLOCK_VERITY_DRIVER_PATH, BOOTPART_DRIVER_PATH,
            DATA_TYPE_GUID, DURABLE_TYPE_GUID, FACTORY_TYPE_GUID, FVM_CHILD_SUFFIX,
            FVM_DRIVER_PATH, GPT_DRIVER_PATH, INSTALL_TYPE_GUID, MBR_DRIVER_PATH,
            VERITY_MUTABLE_SUFFIX, VERITY_VERIFIED_SUFFIX, ZXCRYPT_UNSEALED_SUFFIX,
        },
        environment::{mount_point_for_minfs, FilesystemMounter, MountOptions, MountPoint},
        format::DiskFormat,
        status::Status,
        verity::Seal,
    },
    async_trait::async_trait,
    std::sync::Arc,
    uuid::Uuid,
};

/// An upper bound on how many times `add` re-runs classification after changing the format of
/// a device itself (formatting zxcrypt onto an empty data partition).
const MAX_CLASSIFICATION_PASSES: usize = 2;

/// The result of querying a block device for its geometry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_size: u32,
    pub block_count: u64,
    pub flags: u32,
}

/// A device node as surfaced by the operating system. This is the query surface of a block
/// device; actions on it go through `Environment`.
#[async_trait]
pub trait Device: Send + Sync {
    /// Returns the topological path.
    fn topological_path(&self) -> &str;

    /// Returns the path in the local namespace, e.g. /dev/class/block/000.
    fn path(&self) -> &str;

    /// Returns the block geometry and flags.
    async fn get_block_info(&self) -> Result<BlockInfo, Status>;

    /// Returns the format as determined by content sniffing.
    async fn content_format(&self) -> Result<DiskFormat, Status>;

    /// If this device is a partition, this returns the label. Otherwise, an error is returned.
    async fn partition_label(&self) -> Result<String, Status>;

    /// If this device is a partition, this returns the type GUID. Otherwise, an error is returned.
    async fn partition_type(&self) -> Result<[u8; 16], Status>;

    /// Opens another handle to the same device node. Used to hand the device to worker threads.
    fn reopen(&self) -> Result<Box<dyn Device>, Status>;

    /// If device is backed by FVM, returns the topological path to FVM, otherwise None.
    fn fvm_path(&self) -> Option<String> {
        let path = self.topological_path();
        path.match_indices(FVM_CHILD_SUFFIX)
            .map(|(index, _)| index + FVM_CHILD_SUFFIX.len())
            .filter(|end| path[*end..].is_empty() || path[*end..].starts_with('/'))
            .last()
            .map(|end| path[..end].to_string())
    }
}

/// The per-device operations that matchers drive, plus the `add` policy built on top of them.
#[async_trait]
pub trait BlockDeviceInterface: Send + Sync {
    /// Returns the topological path. Devices with an empty path are never classified.
    fn topological_path(&self) -> &str;

    /// Returns the partition name, or an empty string if the device is not a partition.
    fn partition_name(&self) -> &str;

    /// Returns the format detected from the device's contents.
    fn content_format(&self) -> DiskFormat;

    /// Returns the format assigned to this device by the matching rule.
    fn format(&self) -> DiskFormat;

    fn set_format(&mut self, format: DiskFormat);

    /// True if the system booted over the network; local data is left alone.
    fn netbooting(&self) -> bool;

    /// True if the factory partition may be opened read-write.
    fn should_allow_authoring_factory(&self) -> bool;

    /// Returns the seal that the factory block-verity volume must match.
    fn block_verity_seal(&self) -> Result<Seal, Status>;

    /// Whether a minfs filesystem that fails its check should be reformatted.
    fn format_on_corruption(&self) -> bool {
        true
    }

    async fn get_info(&self) -> Result<BlockInfo, Status>;

    async fn get_type_guid(&self) -> Result<[u8; 16], Status>;

    async fn attach_driver(&mut self, driver_path: &str) -> Result<(), Status>;

    /// Starts unsealing the zxcrypt volume on this device. Does not wait for completion.
    async fn unseal_zxcrypt(&mut self) -> Result<(), Status>;

    /// Destroys any zxcrypt volume on this device and creates a new one.
    async fn format_zxcrypt(&mut self) -> Result<(), Status>;

    /// Starts opening the block-verity volume for verified reads. Does not wait for completion.
    async fn open_block_verity_for_verified_read(&mut self, seal: Seal) -> Result<(), Status>;

    async fn check_filesystem(&mut self) -> Result<(), Status>;

    async fn format_filesystem(&mut self) -> Result<(), Status>;

    async fn mount_filesystem(&mut self) -> Result<(), Status>;

    /// True if this device is the unsealed volume of a zxcrypt container.
    fn is_unsealed_zxcrypt(&self) -> bool {
        self.topological_path().ends_with(ZXCRYPT_UNSEALED_SUFFIX)
    }

    /// True if this device is one of the volumes exposed by a block-verity container.
    fn is_block_verity_child(&self) -> bool {
        let path = self.topological_path();
        path.ends_with(VERITY_MUTABLE_SUFFIX) || path.ends_with(VERITY_VERIFIED_SUFFIX)
    }

    /// Binds drivers to, formats, checks and mounts the device according to its assigned format.
    ///
    /// If `force_format` is set, filesystems are formatted without being checked first.
    async fn add(&mut self, force_format: bool) -> Result<(), Status> {
        for _ in 0..MAX_CLASSIFICATION_PASSES {
            let info = self.get_info().await?;
            if info.flags & BLOCK_FLAG_BOOTPART != 0 {
                return self.attach_driver(BOOTPART_DRIVER_PATH).await;
            }

            match self.format() {
                DiskFormat::Gpt => return self.attach_driver(GPT_DRIVER_PATH).await,
                DiskFormat::Fvm => return self.attach_driver(FVM_DRIVER_PATH).await,
                DiskFormat::Mbr => return self.attach_driver(MBR_DRIVER_PATH).await,
                DiskFormat::BlockVerity => {
                    self.attach_driver(BLOCK_VERITY_DRIVER_PATH).await?;
                    if self.should_allow_authoring_factory() {
                        return Ok(());
                    }
                    let seal = self.block_verity_seal().map_err(|status| {
                        tracing::error!(
                            path = self.topological_path(),
                            %status,
                            "No block-verity seal available and authoring is not allowed"
                        );
                        status
                    })?;
                    return self.open_block_verity_for_verified_read(seal).await;
                }
                DiskFormat::Zxcrypt => {
                    if self.netbooting() {
                        tracing::info!(
                            path = self.topological_path(),
                            "Netbooting, not unsealing zxcrypt"
                        );
                        return Ok(());
                    }
                    return self.unseal_zxcrypt().await;
                }
                _ => {}
            }

            let guid = self.get_type_guid().await?;
            match self.format() {
                DiskFormat::Blobfs => {
                    expect_type_guid(&*self, &guid, &[BLOBFS_TYPE_GUID])?;
                    return check_and_mount(self, force_format, false).await;
                }
                DiskFormat::Factoryfs => {
                    expect_type_guid(&*self, &guid, &[FACTORY_TYPE_GUID])?;
                    return check_and_mount(self, force_format, false).await;
                }
                DiskFormat::Minfs => {
                    expect_type_guid(
                        &*self,
                        &guid,
                        &[DATA_TYPE_GUID, DURABLE_TYPE_GUID, INSTALL_TYPE_GUID],
                    )?;
                    let format_on_corruption = self.format_on_corruption();
                    return check_and_mount(self, force_format, format_on_corruption).await;
                }
                _ => {}
            }

            // The format is unknown; fall back to the type GUID to decide what to do.
            if guid == DATA_TYPE_GUID {
                if self.is_unsealed_zxcrypt() {
                    tracing::info!(path = self.topological_path(), "Formatting empty data volume");
                    self.set_format(DiskFormat::Minfs);
                    self.format_filesystem().await?;
                    return self.mount_filesystem().await;
                }
                tracing::info!(path = self.topological_path(), "Formatting zxcrypt onto data");
                self.format_zxcrypt().await?;
                self.set_format(DiskFormat::Zxcrypt);
                continue;
            }
            if guid == FACTORY_TYPE_GUID {
                if self.is_block_verity_child() {
                    return Err(Status::NotSupported);
                }
                return self.attach_driver(BLOCK_VERITY_DRIVER_PATH).await;
            }
            return Err(Status::NotSupported);
        }
        tracing::error!(
            path = self.topological_path(),
            format = self.format().as_str(),
            "Device did not settle after formatting"
        );
        Err(Status::BadState)
    }
}

fn expect_type_guid<D: BlockDeviceInterface + ?Sized>(
    device: &D,
    guid: &[u8; 16],
    expected: &[[u8; 16]],
) -> Result<(), Status> {
    if expected.contains(guid) {
        return Ok(());
    }
    tracing::error!(
        path = device.topological_path(),
        format = device.format().as_str(),
        type_guid = %Uuid::from_bytes_le(*guid),
        "Partition type does not match the assigned format"
    );
    Err(Status::InvalidArgs)
}

async fn check_and_mount<D: BlockDeviceInterface + ?Sized>(
    device: &mut D,
    force_format: bool,
    format_on_corruption: bool,
) -> Result<(), Status> {
    let format = device.format();
    if force_format {
        tracing::info!(path = device.topological_path(), ?format, "Formatting without a check");
        device.format_filesystem().await?;
    } else if let Err(status) = device.check_filesystem().await {
        if !format_on_corruption {
            tracing::error!(
                path = device.topological_path(),
                ?format,
                %status,
                "Filesystem check failed, not mounting"
            );
            return Err(status);
        }
        tracing::warn!(
            path = device.topological_path(),
            ?format,
            %status,
            "Filesystem check failed, reformatting, expect data loss..."
        );
        device.format_filesystem().await?;
    }
    device.mount_filesystem().await
}

/// A block device backed by a device node, acting through the `FilesystemMounter`.
pub struct BlockDevice {
    device: Box<dyn Device>,
    mounter: Arc<FilesystemMounter>,
    format: DiskFormat,
    content_format: DiskFormat,
    partition_name: String,
}

impl BlockDevice {
    /// Wraps `device`, sniffing its content format and reading its partition name up front.
    pub async fn new(device: Box<dyn Device>, mounter: Arc<FilesystemMounter>) -> Self {
        let content_format = device.content_format().await.unwrap_or_else(|status| {
            tracing::warn!(path = device.topological_path(), %status, "Failed to sniff format");
            DiskFormat::Unknown
        });
        let partition_name = device.partition_label().await.unwrap_or_default();
        BlockDevice {
            device,
            mounter,
            format: DiskFormat::Unknown,
            content_format,
            partition_name,
        }
    }

    fn encrypted_volume(&self) -> Result<EncryptedVolume, Status> {
        Ok(EncryptedVolume::new(self.device.reopen()?, self.mounter.environment().clone()))
    }
}

#[async_trait]
impl BlockDeviceInterface for BlockDevice {
    fn topological_path(&self) -> &str {
        self.device.topological_path()
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
        self.format = format;
    }

    fn netbooting(&self) -> bool {
        self.mounter.config().netboot
    }

    fn should_allow_authoring_factory(&self) -> bool {
        self.mounter.boot_args().allow_authoring_factory()
    }

    fn block_verity_seal(&self) -> Result<Seal, Status> {
        self.mounter.boot_args().block_verity_seal()
    }

    fn format_on_corruption(&self) -> bool {
        self.mounter.config().format_minfs_on_corruption
    }

    async fn get_info(&self) -> Result<BlockInfo, Status> {
        self.device.get_block_info().await
    }

    async fn get_type_guid(&self) -> Result<[u8; 16], Status> {
        self.device.partition_type().await
    }

    async fn attach_driver(&mut self, driver_path: &str) -> Result<(), Status> {
        self.mounter.attach_driver(self.device.as_ref(), driver_path).await
    }

    async fn unseal_zxcrypt(&mut self) -> Result<(), Status> {
        tracing::info!(path = self.topological_path(), "Unsealing zxcrypt volume");
        let mut volume = self.encrypted_volume()?;
        self.mounter.spawn_worker("zxcrypt-unseal", self.topological_path(), async move {
            volume.ensure_unsealed_and_format_if_needed().await
        })
    }

    async fn format_zxcrypt(&mut self) -> Result<(), Status> {
        tracing::info!(path = self.topological_path(), "Formatting zxcrypt volume");
        self.encrypted_volume()?.format().await
    }

    async fn open_block_verity_for_verified_read(&mut self, seal: Seal) -> Result<(), Status> {
        tracing::info!(path = self.topological_path(), %seal, "Opening block-verity volume");
        let device = self.device.reopen()?;
        let environment = self.mounter.environment().clone();
        self.mounter.spawn_worker("block-verity-open", self.topological_path(), async move {
            environment.open_block_verity_verified(device.as_ref(), &seal).await
        })
    }

    async fn check_filesystem(&mut self) -> Result<(), Status> {
        if !self.mounter.config().check_filesystems {
            return Ok(());
        }
        let format = self.format;
        tracing::info!(path = self.topological_path(), ?format, "fsck started");
        match self.mounter.environment().check_filesystem(self.device.as_ref(), format).await {
            Ok(()) => {
                tracing::info!(?format, "fsck completed OK");
                Ok(())
            }
            Err(status) => {
                tracing::error!(?format, %status, "FILESYSTEM CORRUPTION DETECTED!");
                Err(status)
            }
        }
    }

    async fn format_filesystem(&mut self) -> Result<(), Status> {
        let format = self.format;
        tracing::info!(path = self.topological_path(), ?format, "Formatting");
        self.mounter.environment().format_filesystem(self.device.as_ref(), format).await
    }

    async fn mount_filesystem(&mut self) -> Result<(), Status> {
        let (mount_point, options) = match self.format {
            DiskFormat::Blobfs => (MountPoint::Blob, MountOptions::default()),
            DiskFormat::Factoryfs => {
                // The mutable child only appears when authoring is allowed.
                let read_only = !self.topological_path().ends_with(VERITY_MUTABLE_SUFFIX);
                (MountPoint::Factory, MountOptions { read_only })
            }
            DiskFormat::Minfs => {
                let guid = self.device.partition_type().await?;
                (mount_point_for_minfs(&guid)?, MountOptions::default())
            }
            format => {
                tracing::warn!(path = self.topological_path(), ?format, "Cannot mount format");
                return Err(Status::NotSupported);
            }
        };
        self.mounter.mount(self.device.as_ref(), self.format, mount_point, options).await
    }
}
