// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    super::{Matcher, PartitionMap},
    crate::{
        device::{
            constants::{
                FACTORY_PARTITION_LABEL, FACTORY_TYPE_GUID, VERITY_MUTABLE_SUFFIX,
                VERITY_VERIFIED_SUFFIX,
            },
            BlockDeviceInterface,
        },
        format::DiskFormat,
        status::Status,
    },
    async_trait::async_trait,
    std::sync::Arc,
};

/// Matches the factory partition, which is wrapped in block-verity, and then either of the
/// volumes block-verity exposes for it.
pub struct FactoryfsMatcher {
    map: Arc<PartitionMap>,
    base_path: Option<String>,
}

impl FactoryfsMatcher {
    pub fn new(map: Arc<PartitionMap>) -> Self {
        FactoryfsMatcher { map, base_path: None }
    }
}

#[async_trait]
impl Matcher for FactoryfsMatcher {
    async fn match_device(&self, device: &dyn BlockDeviceInterface) -> DiskFormat {
        let path = device.topological_path();
        if let Some(base_path) = &self.base_path {
            let is_verity_child = [VERITY_MUTABLE_SUFFIX, VERITY_VERIFIED_SUFFIX]
                .iter()
                .any(|suffix| path.strip_suffix(suffix) == Some(base_path.as_str()));
            return if is_verity_child { DiskFormat::Factoryfs } else { DiskFormat::Unknown };
        }
        if self.map.is_child(path)
            && device.partition_name() == FACTORY_PARTITION_LABEL
            && device.get_type_guid().await.map_or(false, |guid| guid == FACTORY_TYPE_GUID)
        {
            return DiskFormat::BlockVerity;
        }
        DiskFormat::Unknown
    }

    async fn add(&mut self, device: &mut dyn BlockDeviceInterface) -> Result<(), Status> {
        device.add(false).await?;
        if device.format() == DiskFormat::BlockVerity {
            self.base_path = Some(device.topological_path().to_string());
        }
        Ok(())
    }
}
