// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A JSON description of a device tree, replayed in order as if the devices were appearing.
//!
//! ```json
//! [
//!   { "event": "add", "topological_path": "/dev/sys/block", "content_format": "gpt" },
//!   { "event": "add", "topological_path": "/dev/sys/block/part-000/block",
//!     "label": "fvm", "type_guid": "49fd7cb8-df15-4e73-b9d9-992070127f0f",
//!     "header": "fvm.img" },
//!   { "event": "pause" },
//!   { "event": "resume" },
//!   { "event": "shutdown" }
//! ]
//! ```

use {
    crate::{
        device::{constants::BLOCK_FLAG_BOOTPART, BlockInfo, Device},
        format::{constants::HEADER_SIZE, detect_disk_format, DiskFormat},
        service::{self, BlockWatcherProxy, FshostShutdownResponder},
        status::Status,
    },
    anyhow::{bail, Context, Error},
    async_trait::async_trait,
    futures::{channel::mpsc, stream, Stream, StreamExt},
    serde::Deserialize,
    std::{
        io::Read,
        path::{Path, PathBuf},
    },
    uuid::Uuid,
};

const DEFAULT_BLOCK_SIZE: u32 = 512;

fn default_block_size() -> u32 {
    DEFAULT_BLOCK_SIZE
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum RawEvent {
    Add(RawDevice),
    Pause,
    Resume,
    Shutdown,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    topological_path: String,
    path: Option<String>,
    #[serde(default = "default_block_size")]
    block_size: u32,
    #[serde(default)]
    block_count: u64,
    #[serde(default)]
    bootpart: bool,
    label: Option<String>,
    type_guid: Option<Uuid>,
    content_format: Option<String>,
    header: Option<PathBuf>,
}

/// A device described by a manifest entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestDevice {
    topological_path: String,
    path: String,
    info: BlockInfo,
    content_format: DiskFormat,
    label: Option<String>,
    type_guid: Option<[u8; 16]>,
}

impl ManifestDevice {
    /// Resolves `raw`, reading header images relative to `base_dir`.
    fn resolve(raw: RawDevice, base_dir: &Path) -> Result<Self, Error> {
        let content_format = match (&raw.content_format, &raw.header) {
            (Some(_), Some(_)) => {
                bail!("{}: content_format and header are exclusive", raw.topological_path)
            }
            (Some(name), None) => DiskFormat::from_name(name).with_context(|| {
                format!("{}: unknown content format {:?}", raw.topological_path, name)
            })?,
            (None, Some(header)) => {
                let header = base_dir.join(header);
                let data = read_header(&header, raw.block_size)
                    .with_context(|| format!("Failed to read header {}", header.display()))?;
                detect_disk_format(&data, raw.block_size)
            }
            (None, None) => DiskFormat::Unknown,
        };
        Ok(ManifestDevice {
            path: raw.path.unwrap_or_else(|| raw.topological_path.clone()),
            topological_path: raw.topological_path,
            info: BlockInfo {
                block_size: raw.block_size,
                block_count: raw.block_count,
                flags: if raw.bootpart { BLOCK_FLAG_BOOTPART } else { 0 },
            },
            content_format,
            label: raw.label,
            // Partition tables store GUIDs in mixed-endian form.
            type_guid: raw.type_guid.map(|guid| guid.to_bytes_le()),
        })
    }
}

fn read_header(path: &Path, block_size: u32) -> Result<Vec<u8>, Error> {
    let len = HEADER_SIZE.max(2 * block_size as usize);
    let mut data = Vec::with_capacity(len);
    std::fs::File::open(path)?.take(len as u64).read_to_end(&mut data)?;
    Ok(data)
}

#[async_trait]
impl Device for ManifestDevice {
    fn topological_path(&self) -> &str {
        &self.topological_path
    }

    fn path(&self) -> &str {
        &self.path
    }

    async fn get_block_info(&self) -> Result<BlockInfo, Status> {
        Ok(self.info)
    }

    async fn content_format(&self) -> Result<DiskFormat, Status> {
        Ok(self.content_format)
    }

    async fn partition_label(&self) -> Result<String, Status> {
        self.label.clone().ok_or(Status::NotSupported)
    }

    async fn partition_type(&self) -> Result<[u8; 16], Status> {
        self.type_guid.ok_or(Status::NotSupported)
    }

    fn reopen(&self) -> Result<Box<dyn Device>, Status> {
        Ok(Box::new(self.clone()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManifestEvent {
    Add(ManifestDevice),
    Pause,
    Resume,
    Shutdown,
}

#[derive(Debug)]
pub struct Manifest {
    events: Vec<ManifestEvent>,
}

impl Manifest {
    /// Parses a manifest. Header images are looked up relative to `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self, Error> {
        let raw: Vec<RawEvent> = serde_json::from_str(text).context("Malformed device manifest")?;
        let events = raw
            .into_iter()
            .map(|event| {
                Ok(match event {
                    RawEvent::Add(device) => {
                        ManifestEvent::Add(ManifestDevice::resolve(device, base_dir)?)
                    }
                    RawEvent::Pause => ManifestEvent::Pause,
                    RawEvent::Resume => ManifestEvent::Resume,
                    RawEvent::Shutdown => ManifestEvent::Shutdown,
                })
            })
            .collect::<Result<_, Error>>()?;
        Ok(Manifest { events })
    }

    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read device manifest {}", path.display()))?;
        Self::parse(&text, path.parent().unwrap_or_else(|| Path::new(".")))
    }

    pub fn events(&self) -> &[ManifestEvent] {
        &self.events
    }

    /// Replays the manifest as a device stream. Pause and resume events go through
    /// `block_watcher`; a shutdown event is sent to `shutdown`, after which the stream stays
    /// open so that the device handler stops on the shutdown request rather than on the end of
    /// the stream. Events after a shutdown are dropped.
    pub fn into_device_stream(
        self,
        block_watcher: BlockWatcherProxy,
        shutdown: mpsc::Sender<FshostShutdownResponder>,
    ) -> impl Stream<Item = Box<dyn Device>> {
        let mut events = self.events;
        let shutdown_index = events.iter().position(|event| *event == ManifestEvent::Shutdown);
        if let Some(index) = shutdown_index {
            events.truncate(index + 1);
        }

        let devices = stream::iter(events).filter_map(move |event| {
            let block_watcher = block_watcher.clone();
            let mut shutdown = shutdown.clone();
            async move {
                match event {
                    ManifestEvent::Add(device) => return Some(Box::new(device) as Box<dyn Device>),
                    ManifestEvent::Pause => {
                        if let Err(status) = block_watcher.pause().await {
                            tracing::warn!(%status, "Failed to pause block watcher");
                        }
                    }
                    ManifestEvent::Resume => {
                        if let Err(status) = block_watcher.resume().await {
                            tracing::warn!(%status, "Failed to resume block watcher");
                        }
                    }
                    ManifestEvent::Shutdown => {
                        let responder = FshostShutdownResponder::detached();
                        service::handle_shutdown_request(&mut shutdown, responder).unwrap_or_else(
                            |error| tracing::warn!(?error, "Failed to request shutdown"),
                        );
                    }
                }
                None
            }
        });

        if shutdown_index.is_some() {
            devices.chain(stream::pending()).left_stream()
        } else {
            devices.right_stream()
        }
    }
}
