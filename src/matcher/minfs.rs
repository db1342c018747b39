// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    super::{Matcher, PartitionMap},
    crate::{
        device::{constants::ZXCRYPT_UNSEALED_SUFFIX, BlockDeviceInterface},
        format::DiskFormat,
        status::Status,
    },
    async_trait::async_trait,
    std::sync::Arc,
};

/// How minfs is layered on its partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MinfsVariant {
    /// Minfs inside zxcrypt, except on a ramdisk where minfs sits on the partition directly.
    Normal,
    /// Minfs directly on the partition.
    NoZxcrypt,
    /// Minfs inside zxcrypt, always.
    ZxcryptOnly,
}

/// Matches a minfs partition and, if it is encrypted, the unsealed zxcrypt volume inside it.
pub struct MinfsMatcher {
    map: Arc<PartitionMap>,
    partition_names: &'static [&'static str],
    type_guid: [u8; 16],
    variant: MinfsVariant,
    ramdisk_prefix: Option<String>,
    // Set once the outer zxcrypt partition has been added; only this path matches afterwards.
    expected_inner_path: Option<String>,
    // Set when zxcrypt was freshly formatted, so the minfs inside is new and must be formatted.
    reformat: bool,
}

impl MinfsMatcher {
    pub fn new(
        map: Arc<PartitionMap>,
        partition_names: &'static [&'static str],
        type_guid: [u8; 16],
        variant: MinfsVariant,
        ramdisk_prefix: Option<String>,
    ) -> Self {
        MinfsMatcher {
            map,
            partition_names,
            type_guid,
            variant,
            ramdisk_prefix,
            expected_inner_path: None,
            reformat: false,
        }
    }

    fn is_ramdisk(&self, path: &str) -> bool {
        self.ramdisk_prefix.as_deref().map_or(false, |prefix| path.starts_with(prefix))
    }

    fn outer_format(&self, path: &str) -> DiskFormat {
        match self.variant {
            MinfsVariant::Normal if self.is_ramdisk(path) => DiskFormat::Minfs,
            MinfsVariant::Normal | MinfsVariant::ZxcryptOnly => DiskFormat::Zxcrypt,
            MinfsVariant::NoZxcrypt => DiskFormat::Minfs,
        }
    }

    async fn has_type_guid(&self, device: &dyn BlockDeviceInterface) -> bool {
        device.get_type_guid().await.map_or(false, |guid| guid == self.type_guid)
    }
}

#[async_trait]
impl Matcher for MinfsMatcher {
    async fn match_device(&self, device: &dyn BlockDeviceInterface) -> DiskFormat {
        let path = device.topological_path();
        if let Some(expected_inner_path) = &self.expected_inner_path {
            if path == expected_inner_path && self.has_type_guid(device).await {
                return DiskFormat::Minfs;
            }
            return DiskFormat::Unknown;
        }
        if self.map.is_child(path)
            && self.partition_names.iter().any(|name| *name == device.partition_name())
            && self.has_type_guid(device).await
        {
            return self.outer_format(path);
        }
        DiskFormat::Unknown
    }

    async fn add(&mut self, device: &mut dyn BlockDeviceInterface) -> Result<(), Status> {
        let format = device.format();
        if format == DiskFormat::Zxcrypt && device.content_format() != DiskFormat::Zxcrypt {
            tracing::info!(
                path = device.topological_path(),
                "Data partition has no zxcrypt volume, formatting"
            );
            device.format_zxcrypt().await?;
            self.reformat = true;
        }

        let force_format = format == DiskFormat::Minfs && std::mem::take(&mut self.reformat);
        device.add(force_format).await?;

        if format == DiskFormat::Zxcrypt {
            self.expected_inner_path =
                Some(format!("{}{}", device.topological_path(), ZXCRYPT_UNSEALED_SUFFIX));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::{MinfsMatcher, MinfsVariant},
        crate::{
            device::{
                constants::{DATA_TYPE_GUID, DURABLE_TYPE_GUID, FVM_CHILD_SUFFIX},
                testing::{Call, MockBlockDevice},
                BlockDeviceInterface,
            },
            format::DiskFormat,
            matcher::{Matcher, PartitionMap},
        },
        std::sync::Arc,
        test_case::test_case,
    };

    const NAMES: &[&str] = &["data", "minfs"];
    const FVM: &str = "/dev/sys/block/part-000/block";
    const DATA: &str = "/dev/sys/block/part-000/block/fvm/data-p-2/block";
    const INNER: &str = "/dev/sys/block/part-000/block/fvm/data-p-2/block/zxcrypt/unsealed/block";
    const RAMDISK_FVM: &str = "/dev/sys/ramdisk/ramctl/ramdisk-0/block";
    const RAMDISK_DATA: &str = "/dev/sys/ramdisk/ramctl/ramdisk-0/block/fvm/data-p-2/block";

    fn matcher(container: &str, variant: MinfsVariant) -> MinfsMatcher {
        let map = PartitionMap::new(FVM_CHILD_SUFFIX);
        map.record(container);
        MinfsMatcher::new(
            Arc::new(map),
            NAMES,
            DATA_TYPE_GUID,
            variant,
            Some("/dev/sys/ramdisk".to_string()),
        )
    }

    fn data(path: &str) -> MockBlockDevice {
        MockBlockDevice::new(path).with_partition("data", DATA_TYPE_GUID)
    }

    #[test_case(MinfsVariant::Normal, FVM, DATA, DiskFormat::Zxcrypt ; "normal")]
    #[test_case(MinfsVariant::Normal, RAMDISK_FVM, RAMDISK_DATA, DiskFormat::Minfs ; "ramdisk")]
    #[test_case(MinfsVariant::NoZxcrypt, FVM, DATA, DiskFormat::Minfs ; "no zxcrypt")]
    #[test_case(MinfsVariant::ZxcryptOnly, RAMDISK_FVM, RAMDISK_DATA, DiskFormat::Zxcrypt ;
        "zxcrypt only on ramdisk")]
    fn outer_format(variant: MinfsVariant, container: &str, path: &str, expected: DiskFormat) {
        futures::executor::block_on(async {
            let matcher = matcher(container, variant);
            assert_eq!(matcher.match_device(&data(path)).await, expected);
        })
    }

    #[futures_test::test]
    async fn outer_match_needs_name_and_guid() {
        let matcher = matcher(FVM, MinfsVariant::Normal);
        let legacy = MockBlockDevice::new(DATA).with_partition("minfs", DATA_TYPE_GUID);
        assert_eq!(matcher.match_device(&legacy).await, DiskFormat::Zxcrypt);
        let other = MockBlockDevice::new(DATA).with_partition("cache", DATA_TYPE_GUID);
        assert_eq!(matcher.match_device(&other).await, DiskFormat::Unknown);
        let durable = MockBlockDevice::new(DATA).with_partition("data", DURABLE_TYPE_GUID);
        assert_eq!(matcher.match_device(&durable).await, DiskFormat::Unknown);
    }

    #[futures_test::test]
    async fn unformatted_zxcrypt_forces_minfs_format() {
        let mut matcher = matcher(FVM, MinfsVariant::Normal);

        // The partition has no zxcrypt superblock yet.
        let mut outer = data(DATA);
        assert_eq!(matcher.match_device(&outer).await, DiskFormat::Zxcrypt);
        outer.set_format(DiskFormat::Zxcrypt);
        assert_eq!(matcher.add(&mut outer).await, Ok(()));
        assert_eq!(outer.calls, vec![Call::FormatZxcrypt, Call::UnsealZxcrypt]);

        // Only the unsealed volume matches now, and it skips straight to mkfs.
        assert_eq!(matcher.match_device(&data(DATA)).await, DiskFormat::Unknown);
        let mut inner = data(INNER);
        assert_eq!(matcher.match_device(&inner).await, DiskFormat::Minfs);
        inner.set_format(DiskFormat::Minfs);
        assert_eq!(matcher.add(&mut inner).await, Ok(()));
        assert_eq!(inner.calls, vec![Call::FormatFilesystem, Call::MountFilesystem]);

        // The flag is consumed by the first inner volume.
        let mut again = data(INNER).with_format(DiskFormat::Minfs);
        assert_eq!(matcher.add(&mut again).await, Ok(()));
        assert_eq!(again.calls, vec![Call::CheckFilesystem, Call::MountFilesystem]);
    }

    #[futures_test::test]
    async fn existing_zxcrypt_is_checked_not_formatted() {
        let mut matcher = matcher(FVM, MinfsVariant::Normal);

        let mut outer = data(DATA).with_content_format(DiskFormat::Zxcrypt);
        outer.set_format(DiskFormat::Zxcrypt);
        assert_eq!(matcher.add(&mut outer).await, Ok(()));
        assert_eq!(outer.calls, vec![Call::UnsealZxcrypt]);

        let mut inner = data(INNER).with_content_format(DiskFormat::Minfs);
        assert_eq!(matcher.match_device(&inner).await, DiskFormat::Minfs);
        inner.set_format(DiskFormat::Minfs);
        assert_eq!(matcher.add(&mut inner).await, Ok(()));
        assert_eq!(inner.calls, vec![Call::CheckFilesystem, Call::MountFilesystem]);
    }

    #[futures_test::test]
    async fn inner_volume_needs_guid() {
        let mut matcher = matcher(FVM, MinfsVariant::Normal);
        let mut outer = data(DATA).with_content_format(DiskFormat::Zxcrypt);
        outer.set_format(DiskFormat::Zxcrypt);
        matcher.add(&mut outer).await.expect("add failed");

        let inner = MockBlockDevice::new(INNER).with_partition("data", DURABLE_TYPE_GUID);
        assert_eq!(matcher.match_device(&inner).await, DiskFormat::Unknown);
    }

    #[futures_test::test]
    async fn minfs_without_zxcrypt_has_no_second_phase() {
        let mut matcher = matcher(FVM, MinfsVariant::NoZxcrypt);
        let mut outer = data(DATA).with_format(DiskFormat::Minfs);
        assert_eq!(matcher.add(&mut outer).await, Ok(()));
        assert_eq!(outer.calls, vec![Call::CheckFilesystem, Call::MountFilesystem]);
        assert_eq!(matcher.match_device(&data(INNER)).await, DiskFormat::Unknown);
        assert_eq!(matcher.match_device(&data(DATA)).await, DiskFormat::Minfs);
    }
}
