// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    super::EncryptedVolumeInterface,
    crate::{device::Device, environment::Environment, status::Status},
    async_trait::async_trait,
    std::sync::Arc,
};

/// A zxcrypt container on a block device.
pub struct EncryptedVolume {
    device: Box<dyn Device>,
    environment: Arc<dyn Environment>,
}

impl EncryptedVolume {
    pub fn new(device: Box<dyn Device>, environment: Arc<dyn Environment>) -> Self {
        EncryptedVolume { device, environment }
    }
}

#[async_trait]
impl EncryptedVolumeInterface for EncryptedVolume {
    fn topological_path(&self) -> &str {
        self.device.topological_path()
    }

    async fn unseal(&mut self) -> Result<(), Status> {
        self.environment.unseal_zxcrypt(self.device.as_ref()).await
    }

    async fn format(&mut self) -> Result<(), Status> {
        self.environment.format_zxcrypt(self.device.as_ref()).await
    }
}
