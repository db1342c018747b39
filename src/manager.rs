// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        block_device_manager::BlockDeviceManager,
        device::{BlockDevice, BlockDeviceInterface, Device},
        environment::FilesystemMounter,
        service,
        status::Status,
    },
    anyhow::{format_err, Error},
    futures::{channel::mpsc, StreamExt},
    std::sync::Arc,
    uuid::Uuid,
};

/// The watch loop: feeds every device the watcher reports to the block device manager.
pub struct Manager {
    block_device_manager: BlockDeviceManager,
    mounter: Arc<FilesystemMounter>,
}

impl Manager {
    pub fn new(mounter: Arc<FilesystemMounter>) -> Self {
        let block_device_manager =
            BlockDeviceManager::new(mounter.config(), mounter.ramdisk_prefix());
        Manager { block_device_manager, mounter }
    }

    /// Handles devices until a shutdown request arrives, returning its responder, or until the
    /// device stream ends, returning `None`. A device that fails to be added is logged and
    /// never stops the loop.
    pub async fn device_handler(
        &mut self,
        device_stream: impl futures::Stream<Item = Box<dyn Device>>,
        mut shutdown_rx: mpsc::Receiver<service::FshostShutdownResponder>,
    ) -> Result<Option<service::FshostShutdownResponder>, Error> {
        let mut device_stream = Box::pin(device_stream).fuse();
        loop {
            // Wait for the next device to come in, or the shutdown signal to arrive.
            let device = futures::select! {
                responder = shutdown_rx.next() => {
                    let responder = responder
                        .ok_or_else(|| format_err!("shutdown signal stream ended unexpectedly"))?;
                    return Ok(Some(responder));
                },
                maybe_device = device_stream.next() => {
                    match maybe_device {
                        Some(device) => device,
                        None => {
                            tracing::info!("Device stream ended");
                            return Ok(None);
                        }
                    }
                },
            };
            self.handle_device(device).await;
        }
    }

    async fn handle_device(&mut self, device: Box<dyn Device>) {
        let label = device.partition_label().await.ok();
        let type_guid = device.partition_type().await.ok().map(Uuid::from_bytes_le);
        let is_ramdisk = self.mounter.is_ramdisk_device(device.as_ref());
        let mut block_device = BlockDevice::new(device, self.mounter.clone()).await;
        let path = block_device.topological_path().to_string();
        tracing::info!(
            %path,
            content_format = block_device.content_format().as_str(),
            ?label,
            ?type_guid,
            is_ramdisk,
            "Matching device"
        );

        match self.block_device_manager.add_device(&mut block_device).await {
            Ok(()) => tracing::info!(%path, format = block_device.format().as_str(), "Added"),
            Err(Status::NotSupported) => tracing::info!(%path, "ignored"),
            Err(Status::AlreadyBound) => tracing::info!(%path, "Already bound, ignoring"),
            Err(status) => tracing::error!(%path, %status, "Failed to add device"),
        }
    }
}
