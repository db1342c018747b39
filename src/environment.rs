// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod dry_run;

use {
    crate::{
        boot_args::BootArgs,
        device::{
            constants::{DATA_TYPE_GUID, DURABLE_TYPE_GUID, INSTALL_TYPE_GUID},
            Device,
        },
        format::DiskFormat,
        status::Status,
        verity::Seal,
    },
    async_trait::async_trait,
    fshost_config::Config,
    futures::{channel::oneshot, future, lock::Mutex},
    std::{collections::HashSet, fmt, future::Future, sync::Arc},
    uuid::Uuid,
};

/// The places a filesystem can be mounted at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MountPoint {
    Blob,
    Data,
    Durable,
    Factory,
    Install,
}

impl MountPoint {
    pub fn path(&self) -> &'static str {
        match self {
            MountPoint::Blob => "/blob",
            MountPoint::Data => "/data",
            MountPoint::Durable => "/durable",
            MountPoint::Factory => "/factory",
            MountPoint::Install => "/install",
        }
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MountOptions {
    pub read_only: bool,
}

/// Picks where a minfs partition is mounted from its type GUID.
pub fn mount_point_for_minfs(type_guid: &[u8; 16]) -> Result<MountPoint, Status> {
    match *type_guid {
        DATA_TYPE_GUID => Ok(MountPoint::Data),
        DURABLE_TYPE_GUID => Ok(MountPoint::Durable),
        INSTALL_TYPE_GUID => Ok(MountPoint::Install),
        _ => {
            let type_guid = Uuid::from_bytes_le(*type_guid);
            tracing::error!(%type_guid, "Unrecognized minfs partition");
            Err(Status::WrongType)
        }
    }
}

/// Environment is a trait that performs the side effects of matching a device: binding drivers,
/// operating on encrypted and verified volumes, and running filesystems.
/// Nb: the engine's tests depend on this interface being used in order to record actions.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Attaches the specified driver to the device.
    async fn attach_driver(&self, device: &dyn Device, driver_path: &str) -> Result<(), Status>;

    /// Unseals the zxcrypt volume on `device` with the device key.
    async fn unseal_zxcrypt(&self, device: &dyn Device) -> Result<(), Status>;

    /// Creates a new zxcrypt volume on `device`, destroying what was there.
    async fn format_zxcrypt(&self, device: &dyn Device) -> Result<(), Status>;

    /// Opens the block-verity volume on `device` for reads verified against `seal`.
    async fn open_block_verity_verified(&self, device: &dyn Device, seal: &Seal)
        -> Result<(), Status>;

    async fn check_filesystem(&self, device: &dyn Device, format: DiskFormat)
        -> Result<(), Status>;

    async fn format_filesystem(&self, device: &dyn Device, format: DiskFormat)
        -> Result<(), Status>;

    /// Starts serving the filesystem on `device` at `mount_point`.
    async fn serve_filesystem(
        &self,
        device: &dyn Device,
        format: DiskFormat,
        mount_point: MountPoint,
        options: MountOptions,
    ) -> Result<(), Status>;

    /// Limits how far the FVM partition behind `device` may grow.
    async fn set_partition_max_bytes(&self, device: &dyn Device, max_bytes: u64)
        -> Result<(), Status>;

    /// Launches the package filesystem on top of /blob and /data.
    async fn launch_pkgfs(&self) -> Result<(), Status>;
}

#[derive(Default)]
struct MountState {
    mounted: HashSet<MountPoint>,
    pkgfs_launched: bool,
}

/// Owns the mount table and the configuration that device actions consult.
pub struct FilesystemMounter {
    environment: Arc<dyn Environment>,
    config: Arc<Config>,
    boot_args: Arc<BootArgs>,
    ramdisk_prefix: Option<String>,
    state: Mutex<MountState>,
    // Completion signals of worker threads that have not been waited for.
    workers: parking_lot::Mutex<Vec<oneshot::Receiver<()>>>,
}

impl FilesystemMounter {
    pub fn new(
        environment: Arc<dyn Environment>,
        config: Arc<Config>,
        boot_args: Arc<BootArgs>,
        ramdisk_prefix: Option<String>,
    ) -> Self {
        FilesystemMounter {
            environment,
            config,
            boot_args,
            ramdisk_prefix,
            state: Mutex::new(MountState::default()),
            workers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.environment
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn boot_args(&self) -> &BootArgs {
        &self.boot_args
    }

    pub fn ramdisk_prefix(&self) -> Option<&str> {
        self.ramdisk_prefix.as_deref()
    }

    pub async fn attach_driver(
        &self,
        device: &dyn Device,
        driver_path: &str,
    ) -> Result<(), Status> {
        tracing::info!(path = %device.path(), %driver_path, "Binding driver to device");
        match self.environment.attach_driver(device, driver_path).await {
            Err(Status::AlreadyBound) => {
                // It's fine if we get an ALREADY_BOUND error.
                tracing::info!(path = %device.path(), %driver_path,
                    "Ignoring ALREADY_BOUND error.");
                Ok(())
            }
            result => result,
        }
    }

    /// This helper method returns true if the given device is a ramdisk.
    /// We want to enforce partition limits only on non-ramdisk devices.
    pub fn is_ramdisk_device(&self, device: &dyn Device) -> bool {
        self.ramdisk_prefix
            .as_ref()
            .map_or(false, |prefix| device.topological_path().starts_with(prefix))
    }

    async fn apply_partition_limits(&self, device: &dyn Device, mount_point: MountPoint) {
        let max_bytes = match mount_point {
            MountPoint::Blob => self.config.blobfs_max_bytes,
            MountPoint::Data => self.config.minfs_max_bytes,
            _ => 0,
        };
        if max_bytes == 0 || self.is_ramdisk_device(device) || device.fvm_path().is_none() {
            return;
        }
        if let Err(error) = self.environment.set_partition_max_bytes(device, max_bytes).await {
            tracing::warn!(%error, %mount_point, "Failed to set max partition size");
        }
    }

    /// Mounts the filesystem on `device` at `mount_point`. Each mount point is used at most once;
    /// later attempts fail with `AlreadyBound`. Once both /blob and /data are up, pkgfs is
    /// launched.
    pub async fn mount(
        &self,
        device: &dyn Device,
        format: DiskFormat,
        mount_point: MountPoint,
        options: MountOptions,
    ) -> Result<(), Status> {
        let mut state = self.state.lock().await;
        if state.mounted.contains(&mount_point) {
            tracing::info!(path = %device.path(), %mount_point, "Already mounted, ignoring");
            return Err(Status::AlreadyBound);
        }

        self.apply_partition_limits(device, mount_point).await;
        tracing::info!(
            path = %device.path(),
            format = format.as_str(),
            %mount_point,
            read_only = options.read_only,
            "Mounting"
        );
        self.environment.serve_filesystem(device, format, mount_point, options).await?;
        state.mounted.insert(mount_point);

        if !state.pkgfs_launched
            && state.mounted.contains(&MountPoint::Blob)
            && state.mounted.contains(&MountPoint::Data)
        {
            match self.environment.launch_pkgfs().await {
                Ok(()) => {
                    tracing::info!("Launched pkgfs");
                    state.pkgfs_launched = true;
                }
                Err(status) => tracing::error!(%status, "Failed to launch pkgfs"),
            }
        }
        Ok(())
    }

    /// Runs `work` to completion on a new detached thread, logging its failure. The caller does
    /// not wait for it; `wait_for_workers` does.
    pub fn spawn_worker<F>(&self, name: &str, path: &str, work: F) -> Result<(), Status>
    where
        F: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let worker = name.to_string();
        let path = path.to_string();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                match futures::executor::block_on(work) {
                    Ok(()) => tracing::info!(%path, %worker, "Worker finished"),
                    Err(status) => tracing::error!(%path, %worker, %status, "Worker failed"),
                }
                let _ = done_tx.send(());
            })
            .map_err(|error| {
                tracing::error!(?error, worker = name, "Failed to spawn worker thread");
                Status::Internal
            })?;
        self.workers.lock().push(done_rx);
        Ok(())
    }

    /// Waits until every worker thread started so far has finished.
    pub async fn wait_for_workers(&self) {
        loop {
            let pending = std::mem::take(&mut *self.workers.lock());
            if pending.is_empty() {
                return;
            }
            // A worker that panicked drops its sender, which also ends the wait for it.
            future::join_all(pending).await;
        }
    }

    pub async fn pkgfs_launched(&self) -> bool {
        self.state.lock().await.pkgfs_launched
    }
}
