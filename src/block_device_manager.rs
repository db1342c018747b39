// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        device::{
            constants::{
                BLOBFS_PARTITION_LABEL, BLOBFS_TYPE_GUID, DATA_PARTITION_LABEL, DATA_TYPE_GUID,
                DURABLE_PARTITION_LABEL, DURABLE_TYPE_GUID, FVM_CHILD_SUFFIX,
                LEGACY_DATA_PARTITION_LABEL,
            },
            BlockDeviceInterface,
        },
        format::DiskFormat,
        matcher::{
            BootpartMatcher, FactoryfsMatcher, Matcher, MinfsMatcher, MinfsVariant,
            PartitionMapMatcher, SimpleMatcher,
        },
        status::Status,
    },
    fshost_config::Config,
};

const DATA_PARTITION_NAMES: &[&str] = &[DATA_PARTITION_LABEL, LEGACY_DATA_PARTITION_LABEL];
const DURABLE_PARTITION_NAMES: &[&str] = &[DURABLE_PARTITION_LABEL];

/// Classifies block devices as they appear and hands each to the first rule that claims it.
pub struct BlockDeviceManager {
    matchers: Vec<Box<dyn Matcher>>,
}

impl BlockDeviceManager {
    /// Builds the rules selected by `config`. Devices whose topological path starts with
    /// `ramdisk_prefix` are treated as ramdisks.
    ///
    /// Rules are consulted in priority order: boot partitions, then partitions inside GPT, then
    /// partitions inside FVM, and the containers themselves last, since those match on content
    /// alone.
    pub fn new(config: &Config, ramdisk_prefix: Option<&str>) -> Self {
        let ramdisk_prefix = ramdisk_prefix.map(str::to_string);
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();

        if config.bootpart {
            matchers.push(Box::new(BootpartMatcher));
        }

        let gpt = PartitionMapMatcher::new(DiskFormat::Gpt, "");
        let fvm = PartitionMapMatcher::new(DiskFormat::Fvm, FVM_CHILD_SUFFIX);

        if !config.netboot {
            if config.durable {
                let variant = if config.no_zxcrypt {
                    MinfsVariant::NoZxcrypt
                } else {
                    MinfsVariant::ZxcryptOnly
                };
                matchers.push(Box::new(MinfsMatcher::new(
                    gpt.partition_map(),
                    DURABLE_PARTITION_NAMES,
                    DURABLE_TYPE_GUID,
                    variant,
                    ramdisk_prefix.clone(),
                )));
            }
            if config.factory {
                matchers.push(Box::new(FactoryfsMatcher::new(gpt.partition_map())));
            }

            let data_variant =
                if config.no_zxcrypt { MinfsVariant::NoZxcrypt } else { MinfsVariant::Normal };
            if config.fvm {
                if config.blobfs {
                    matchers.push(Box::new(SimpleMatcher::new(
                        fvm.partition_map(),
                        BLOBFS_PARTITION_LABEL,
                        BLOBFS_TYPE_GUID,
                        DiskFormat::Blobfs,
                    )));
                }
                if config.minfs {
                    matchers.push(Box::new(MinfsMatcher::new(
                        fvm.partition_map(),
                        DATA_PARTITION_NAMES,
                        DATA_TYPE_GUID,
                        data_variant,
                        ramdisk_prefix.clone(),
                    )));
                }
            }

            // A ramdisk FVM that carries only the data partition.
            match (config.minfs_ramdisk, &ramdisk_prefix) {
                (true, Some(prefix)) => {
                    let ramdisk_fvm = PartitionMapMatcher::on_ramdisk(
                        DiskFormat::Fvm,
                        FVM_CHILD_SUFFIX,
                        prefix.clone(),
                    );
                    matchers.push(Box::new(MinfsMatcher::new(
                        ramdisk_fvm.partition_map(),
                        DATA_PARTITION_NAMES,
                        DATA_TYPE_GUID,
                        data_variant,
                        ramdisk_prefix.clone(),
                    )));
                    matchers.push(Box::new(ramdisk_fvm));
                }
                (true, None) => {
                    tracing::warn!("minfs-ramdisk is set but no ramdisk prefix is known, ignoring")
                }
                (false, _) => {}
            }
        }

        if config.fvm {
            matchers.push(Box::new(fvm));
        }
        if config.gpt {
            matchers.push(Box::new(gpt));
        }
        if config.mbr {
            matchers.push(Box::new(PartitionMapMatcher::new(DiskFormat::Mbr, "")));
        }

        tracing::info!(count = matchers.len(), "Block device manager configured");
        BlockDeviceManager { matchers }
    }

    /// Creates a manager over an explicit list of rules, consulted in order.
    pub fn with_matchers(matchers: Vec<Box<dyn Matcher>>) -> Self {
        BlockDeviceManager { matchers }
    }

    /// Finds the first rule that claims `device`, assigns the format it picked and lets it add
    /// the device. Returns `NotSupported` if no rule applies.
    pub async fn add_device(
        &mut self,
        device: &mut dyn BlockDeviceInterface,
    ) -> Result<(), Status> {
        if device.topological_path().is_empty() {
            return Err(Status::NotSupported);
        }
        for matcher in self.matchers.iter_mut() {
            let format = matcher.match_device(&*device).await;
            if format == DiskFormat::Unknown {
                continue;
            }
            tracing::info!(
                path = device.topological_path(),
                format = format.as_str(),
                content_format = device.content_format().as_str(),
                "Matched device"
            );
            device.set_format(format);
            return matcher.add(device).await;
        }
        Err(Status::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::BlockDeviceManager,
        crate::{
            device::{
                constants::{
                    BLOBFS_TYPE_GUID, BLOCK_FLAG_BOOTPART, BLOCK_VERITY_DRIVER_PATH,
                    BOOTPART_DRIVER_PATH, DATA_TYPE_GUID, DURABLE_TYPE_GUID, FACTORY_TYPE_GUID,
                    FVM_DRIVER_PATH, FVM_TYPE_GUID, GPT_DRIVER_PATH, MBR_DRIVER_PATH,
                },
                testing::{Call, MockBlockDevice},
                BlockDeviceInterface,
            },
            format::DiskFormat,
            matcher::{Matcher, PartitionMapMatcher, SimpleMatcher},
            status::Status,
        },
        async_trait::async_trait,
        fshost_config::Config,
        std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    const GPT: &str = "/dev/x/block";
    const FVM: &str = "/dev/x/block/part-000/block";
    const BLOBFS: &str = "/dev/x/block/part-000/block/fvm/blobfs-p-1/block";
    const DATA: &str = "/dev/x/block/part-000/block/fvm/data-p-2/block";
    const DATA_INNER: &str =
        "/dev/x/block/part-000/block/fvm/data-p-2/block/zxcrypt/unsealed/block";

    fn gpt() -> MockBlockDevice {
        MockBlockDevice::new(GPT).with_content_format(DiskFormat::Gpt)
    }

    fn fvm() -> MockBlockDevice {
        MockBlockDevice::new(FVM)
            .with_content_format(DiskFormat::Fvm)
            .with_partition("fvm", FVM_TYPE_GUID)
    }

    fn blobfs() -> MockBlockDevice {
        MockBlockDevice::new(BLOBFS)
            .with_content_format(DiskFormat::Blobfs)
            .with_partition("blobfs", BLOBFS_TYPE_GUID)
    }

    /// Counts calls so tests can tell whether it was consulted.
    struct CountingMatcher(Arc<AtomicUsize>);

    #[async_trait]
    impl Matcher for CountingMatcher {
        async fn match_device(&self, _device: &dyn BlockDeviceInterface) -> DiskFormat {
            self.0.fetch_add(1, Ordering::SeqCst);
            DiskFormat::Unknown
        }

        async fn add(&mut self, _device: &mut dyn BlockDeviceInterface) -> Result<(), Status> {
            unreachable!("never matches")
        }
    }

    #[futures_test::test]
    async fn empty_path_is_not_supported() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut manager =
            BlockDeviceManager::with_matchers(vec![Box::new(CountingMatcher(calls.clone()))]);
        let mut device = MockBlockDevice::new("").with_content_format(DiskFormat::Gpt);
        assert_eq!(manager.add_device(&mut device).await, Err(Status::NotSupported));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(device.calls.is_empty());
    }

    #[futures_test::test]
    async fn unmatched_device_is_not_supported() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut manager =
            BlockDeviceManager::with_matchers(vec![Box::new(CountingMatcher(calls.clone()))]);
        let mut device = MockBlockDevice::new("/dev/misc/block");
        assert_eq!(manager.add_device(&mut device).await, Err(Status::NotSupported));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[futures_test::test]
    async fn children_only_match_after_their_parent() {
        let gpt_matcher = PartitionMapMatcher::new(DiskFormat::Gpt, "");
        let child = SimpleMatcher::new(
            gpt_matcher.partition_map(),
            "blobfs",
            BLOBFS_TYPE_GUID,
            DiskFormat::Blobfs,
        );
        let mut manager =
            BlockDeviceManager::with_matchers(vec![Box::new(child), Box::new(gpt_matcher)]);
        let partition = || {
            MockBlockDevice::new("/dev/x/block/part-000/block")
                .with_partition("blobfs", BLOBFS_TYPE_GUID)
        };

        let mut early = partition();
        assert_eq!(manager.add_device(&mut early).await, Err(Status::NotSupported));
        assert!(early.calls.is_empty());

        assert_eq!(manager.add_device(&mut gpt()).await, Ok(()));

        let mut late = partition();
        assert_eq!(manager.add_device(&mut late).await, Ok(()));
        assert_eq!(late.format(), DiskFormat::Blobfs);
        assert_eq!(late.calls, vec![Call::CheckFilesystem, Call::MountFilesystem]);
    }

    #[futures_test::test]
    async fn gpt_then_fvm_then_blobfs() {
        let mut manager = BlockDeviceManager::new(&Config::default(), None);

        let mut gpt = gpt();
        assert_eq!(manager.add_device(&mut gpt).await, Ok(()));
        assert_eq!(gpt.format(), DiskFormat::Gpt);
        assert_eq!(gpt.calls, vec![Call::AttachDriver(GPT_DRIVER_PATH.to_string())]);

        let mut fvm = fvm();
        assert_eq!(manager.add_device(&mut fvm).await, Ok(()));
        assert_eq!(fvm.format(), DiskFormat::Fvm);
        assert_eq!(fvm.calls, vec![Call::AttachDriver(FVM_DRIVER_PATH.to_string())]);

        let mut blobfs = blobfs();
        assert_eq!(manager.add_device(&mut blobfs).await, Ok(()));
        assert_eq!(blobfs.format(), DiskFormat::Blobfs);
        assert_eq!(blobfs.calls, vec![Call::CheckFilesystem, Call::MountFilesystem]);
    }

    #[futures_test::test]
    async fn data_is_unsealed_then_mounted() {
        let mut manager = BlockDeviceManager::new(&Config::default(), None);
        manager.add_device(&mut gpt()).await.expect("gpt");
        manager.add_device(&mut fvm()).await.expect("fvm");

        let mut data = MockBlockDevice::new(DATA)
            .with_content_format(DiskFormat::Zxcrypt)
            .with_partition("data", DATA_TYPE_GUID);
        assert_eq!(manager.add_device(&mut data).await, Ok(()));
        assert_eq!(data.calls, vec![Call::UnsealZxcrypt]);

        let mut inner = MockBlockDevice::new(DATA_INNER)
            .with_content_format(DiskFormat::Minfs)
            .with_partition("data", DATA_TYPE_GUID);
        assert_eq!(manager.add_device(&mut inner).await, Ok(()));
        assert_eq!(inner.format(), DiskFormat::Minfs);
        assert_eq!(inner.calls, vec![Call::CheckFilesystem, Call::MountFilesystem]);
    }

    #[futures_test::test]
    async fn no_zxcrypt_mounts_data_directly() {
        let config = Config { no_zxcrypt: true, ..Config::default() };
        let mut manager = BlockDeviceManager::new(&config, None);
        manager.add_device(&mut gpt()).await.expect("gpt");
        manager.add_device(&mut fvm()).await.expect("fvm");

        let mut data = MockBlockDevice::new(DATA)
            .with_content_format(DiskFormat::Minfs)
            .with_partition("minfs", DATA_TYPE_GUID);
        assert_eq!(manager.add_device(&mut data).await, Ok(()));
        assert_eq!(data.format(), DiskFormat::Minfs);
        assert_eq!(data.calls, vec![Call::CheckFilesystem, Call::MountFilesystem]);
    }

    #[futures_test::test]
    async fn bootpart_takes_priority() {
        let mut manager = BlockDeviceManager::new(&Config::default(), None);
        let mut device = gpt().with_flags(BLOCK_FLAG_BOOTPART);
        assert_eq!(manager.add_device(&mut device).await, Ok(()));
        assert_eq!(device.format(), DiskFormat::Bootpart);
        assert_eq!(device.calls, vec![Call::AttachDriver(BOOTPART_DRIVER_PATH.to_string())]);
    }

    #[futures_test::test]
    async fn netboot_leaves_partitions_alone() {
        let config = Config { netboot: true, ..Config::default() };
        let mut manager = BlockDeviceManager::new(&config, None);
        assert_eq!(manager.add_device(&mut gpt()).await, Ok(()));
        assert_eq!(manager.add_device(&mut fvm()).await, Ok(()));
        let mut blobfs = blobfs();
        assert_eq!(manager.add_device(&mut blobfs).await, Err(Status::NotSupported));
        assert!(blobfs.calls.is_empty());
    }

    #[futures_test::test]
    async fn disabled_containers_are_ignored() {
        let config = Config { gpt: false, ..Config::default() };
        let mut manager = BlockDeviceManager::new(&config, None);
        assert_eq!(manager.add_device(&mut gpt()).await, Err(Status::NotSupported));

        let config = Config { mbr: true, ..Config::default() };
        let mut manager = BlockDeviceManager::new(&config, None);
        let mut mbr = MockBlockDevice::new("/dev/y/block").with_content_format(DiskFormat::Mbr);
        assert_eq!(manager.add_device(&mut mbr).await, Ok(()));
        assert_eq!(mbr.calls, vec![Call::AttachDriver(MBR_DRIVER_PATH.to_string())]);
    }

    #[futures_test::test]
    async fn durable_lives_in_gpt() {
        let config = Config { durable: true, ..Config::default() };
        let mut manager = BlockDeviceManager::new(&config, None);
        manager.add_device(&mut gpt()).await.expect("gpt");

        let mut durable = MockBlockDevice::new("/dev/x/block/part-002/block")
            .with_content_format(DiskFormat::Zxcrypt)
            .with_partition("durable", DURABLE_TYPE_GUID);
        assert_eq!(manager.add_device(&mut durable).await, Ok(()));
        assert_eq!(durable.format(), DiskFormat::Zxcrypt);
        assert_eq!(durable.calls, vec![Call::UnsealZxcrypt]);
    }

    #[futures_test::test]
    async fn factory_children_and_siblings() {
        let config = Config { factory: true, ..Config::default() };
        let mut manager = BlockDeviceManager::new(&config, None);
        manager.add_device(&mut gpt()).await.expect("gpt");

        let factory_path = "/dev/x/block/part-003/block";
        let factory = |path: &str| {
            MockBlockDevice::new(path).with_partition("factory", FACTORY_TYPE_GUID)
        };
        let mut outer = factory(factory_path).allow_authoring();
        assert_eq!(manager.add_device(&mut outer).await, Ok(()));
        assert_eq!(outer.format(), DiskFormat::BlockVerity);
        assert_eq!(outer.calls, vec![Call::AttachDriver(BLOCK_VERITY_DRIVER_PATH.to_string())]);

        for suffix in ["/verity/verified/block", "/verity/mutable/block"] {
            let mut child = factory(&format!("{}{}", factory_path, suffix));
            assert_eq!(manager.add_device(&mut child).await, Ok(()));
            assert_eq!(child.format(), DiskFormat::Factoryfs);
        }

        let mut sibling = factory("/dev/x/block/part-004/block");
        assert_eq!(manager.add_device(&mut sibling).await, Err(Status::NotSupported));
        assert!(sibling.calls.is_empty());
    }

    #[futures_test::test]
    async fn ramdisk_fvm_carries_data_only() {
        let config = Config { minfs_ramdisk: true, fvm: false, ..Config::default() };
        let prefix = "/dev/sys/ramdisk";
        let mut manager = BlockDeviceManager::new(&config, Some(prefix));

        let mut disk_fvm =
            MockBlockDevice::new("/dev/sys/pci/block").with_content_format(DiskFormat::Fvm);
        assert_eq!(manager.add_device(&mut disk_fvm).await, Err(Status::NotSupported));

        let ramdisk = "/dev/sys/ramdisk/ramctl/ramdisk-0/block";
        let mut ramdisk_fvm = MockBlockDevice::new(ramdisk).with_content_format(DiskFormat::Fvm);
        assert_eq!(manager.add_device(&mut ramdisk_fvm).await, Ok(()));

        let mut data = MockBlockDevice::new(&format!("{}/fvm/data-p-1/block", ramdisk))
            .with_content_format(DiskFormat::Minfs)
            .with_partition("data", DATA_TYPE_GUID);
        assert_eq!(manager.add_device(&mut data).await, Ok(()));
        assert_eq!(data.format(), DiskFormat::Minfs);
    }
}
