// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::device::Device,
    anyhow::{bail, Error},
    futures::{lock::Mutex, Stream, StreamExt},
    std::sync::Arc,
};

/// A handle to the block watcher's pause state. Clones share the same state.
///
/// Pausing is counted: every `pause` must be matched by a `resume` before devices are handled
/// again. Devices that appear while the watcher is paused are dropped, not deferred.
#[derive(Clone, Default)]
pub struct Watcher {
    pause_count: Arc<Mutex<usize>>,
}

impl Watcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a stream of newly discovered devices, dropping those that arrive while paused.
    pub fn watch<S>(&self, devices: S) -> impl Stream<Item = Box<dyn Device>>
    where
        S: Stream<Item = Box<dyn Device>>,
    {
        let pauser = self.clone();
        devices.filter(move |device| {
            let pauser = pauser.clone();
            let path = device.topological_path().to_string();
            async move {
                let paused = pauser.is_paused().await;
                if paused {
                    tracing::info!(%path, "Block watcher is paused, ignoring device");
                }
                !paused
            }
        })
    }

    pub async fn pause(&mut self) -> Result<(), Error> {
        let mut pause_count = self.pause_count.lock().await;
        *pause_count += 1;
        tracing::info!(pause_count = *pause_count, "Block watcher paused");
        Ok(())
    }

    pub async fn resume(&mut self) -> Result<(), Error> {
        let mut pause_count = self.pause_count.lock().await;
        if *pause_count == 0 {
            bail!("block watcher is not paused");
        }
        *pause_count -= 1;
        tracing::info!(pause_count = *pause_count, "Block watcher resumed");
        Ok(())
    }

    pub async fn is_paused(&self) -> bool {
        *self.pause_count.lock().await > 0
    }
}
