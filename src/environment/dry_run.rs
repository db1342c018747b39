// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! An environment that performs no device I/O. It logs and records every action so that a device
//! tree can be replayed against the matching policy.

use {
    super::{Environment, MountOptions, MountPoint},
    crate::{device::Device, format::DiskFormat, status::Status, verity::Seal},
    async_trait::async_trait,
    parking_lot::Mutex,
    std::{
        collections::{HashMap, HashSet},
        fmt,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    AttachDriver { path: String, driver: String },
    UnsealZxcrypt(String),
    FormatZxcrypt(String),
    OpenVerified { path: String, seal: Seal },
    CheckFilesystem { path: String, format: DiskFormat },
    FormatFilesystem { path: String, format: DiskFormat },
    ServeFilesystem { path: String, format: DiskFormat, mount_point: MountPoint, read_only: bool },
    SetPartitionMaxBytes { path: String, max_bytes: u64 },
    LaunchPkgfs,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::AttachDriver { path, driver } => write!(f, "bind {} to {}", driver, path),
            Action::UnsealZxcrypt(path) => write!(f, "unseal zxcrypt on {}", path),
            Action::FormatZxcrypt(path) => write!(f, "format zxcrypt on {}", path),
            Action::OpenVerified { path, seal } => {
                write!(f, "open {} for verified read with seal {}", path, seal)
            }
            Action::CheckFilesystem { path, format } => {
                write!(f, "check {} on {}", format.as_str(), path)
            }
            Action::FormatFilesystem { path, format } => {
                write!(f, "format {} on {}", format.as_str(), path)
            }
            Action::ServeFilesystem { path, format, mount_point, read_only } => write!(
                f,
                "mount {} from {} at {}{}",
                format.as_str(),
                path,
                mount_point,
                if *read_only { " (read-only)" } else { "" }
            ),
            Action::SetPartitionMaxBytes { path, max_bytes } => {
                write!(f, "limit {} to {} bytes", path, max_bytes)
            }
            Action::LaunchPkgfs => f.write_str("launch pkgfs"),
        }
    }
}

#[derive(Default)]
struct State {
    actions: Vec<Action>,
    bound: HashSet<(String, String)>,
    unseal_failures: HashMap<String, (Status, usize)>,
    check_failures: HashMap<String, Status>,
}

#[derive(Default)]
pub struct DryRunEnvironment {
    state: Mutex<State>,
}

impl DryRunEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything done so far, in order.
    pub fn actions(&self) -> Vec<Action> {
        self.state.lock().actions.clone()
    }

    /// Makes the next `times` attempts to unseal the volume at `path` fail with `status`.
    pub fn fail_unseal(&self, path: &str, status: Status, times: usize) {
        self.state.lock().unseal_failures.insert(path.to_string(), (status, times));
    }

    /// Makes every check of the filesystem at `path` fail with `status`.
    pub fn fail_check(&self, path: &str, status: Status) {
        self.state.lock().check_failures.insert(path.to_string(), status);
    }

    fn record(&self, action: Action) {
        tracing::info!(%action, "dry run");
        self.state.lock().actions.push(action);
    }
}

#[async_trait]
impl Environment for DryRunEnvironment {
    async fn attach_driver(&self, device: &dyn Device, driver_path: &str) -> Result<(), Status> {
        let path = device.topological_path().to_string();
        self.record(Action::AttachDriver { path: path.clone(), driver: driver_path.to_string() });
        if !self.state.lock().bound.insert((path, driver_path.to_string())) {
            return Err(Status::AlreadyBound);
        }
        Ok(())
    }

    async fn unseal_zxcrypt(&self, device: &dyn Device) -> Result<(), Status> {
        let path = device.topological_path();
        self.record(Action::UnsealZxcrypt(path.to_string()));
        let mut state = self.state.lock();
        match state.unseal_failures.get_mut(path) {
            Some((status, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(*status)
            }
            _ => Ok(()),
        }
    }

    async fn format_zxcrypt(&self, device: &dyn Device) -> Result<(), Status> {
        let path = device.topological_path();
        self.record(Action::FormatZxcrypt(path.to_string()));
        self.state.lock().unseal_failures.remove(path);
        Ok(())
    }

    async fn open_block_verity_verified(
        &self,
        device: &dyn Device,
        seal: &Seal,
    ) -> Result<(), Status> {
        let path = device.topological_path().to_string();
        self.record(Action::OpenVerified { path, seal: *seal });
        Ok(())
    }

    async fn check_filesystem(
        &self,
        device: &dyn Device,
        format: DiskFormat,
    ) -> Result<(), Status> {
        let path = device.topological_path();
        self.record(Action::CheckFilesystem { path: path.to_string(), format });
        match self.state.lock().check_failures.get(path) {
            Some(status) => Err(*status),
            None => Ok(()),
        }
    }

    async fn format_filesystem(
        &self,
        device: &dyn Device,
        format: DiskFormat,
    ) -> Result<(), Status> {
        let path = device.topological_path();
        self.record(Action::FormatFilesystem { path: path.to_string(), format });
        self.state.lock().check_failures.remove(path);
        Ok(())
    }

    async fn serve_filesystem(
        &self,
        device: &dyn Device,
        format: DiskFormat,
        mount_point: MountPoint,
        options: MountOptions,
    ) -> Result<(), Status> {
        self.record(Action::ServeFilesystem {
            path: device.topological_path().to_string(),
            format,
            mount_point,
            read_only: options.read_only,
        });
        Ok(())
    }

    async fn set_partition_max_bytes(
        &self,
        device: &dyn Device,
        max_bytes: u64,
    ) -> Result<(), Status> {
        let path = device.topological_path().to_string();
        self.record(Action::SetPartitionMaxBytes { path, max_bytes });
        Ok(())
    }

    async fn launch_pkgfs(&self) -> Result<(), Status> {
        self.record(Action::LaunchPkgfs);
        Ok(())
    }
}
