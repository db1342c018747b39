// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod zxcrypt;

use {crate::status::Status, async_trait::async_trait};

/// How many times unsealing is tried before the key is considered wrong.
pub const UNSEAL_ATTEMPTS: usize = 5;

/// An encrypted volume that can be unsealed with the device key, or formatted afresh.
#[async_trait]
pub trait EncryptedVolumeInterface: Send {
    fn topological_path(&self) -> &str;

    async fn unseal(&mut self) -> Result<(), Status>;

    /// Destroys the volume's contents and creates a new volume sealed with the device key.
    async fn format(&mut self) -> Result<(), Status>;

    /// Unseals the volume. If every attempt is refused because the key does not match, the volume
    /// is formatted and unsealed once more; any other failure is returned without formatting.
    async fn ensure_unsealed_and_format_if_needed(&mut self) -> Result<(), Status> {
        let mut last_status = Status::Internal;
        for attempt in 1..=UNSEAL_ATTEMPTS {
            match self.unseal().await {
                Ok(()) => return Ok(()),
                Err(status) => {
                    tracing::warn!(
                        path = self.topological_path(),
                        attempt,
                        %status,
                        "Failed to unseal zxcrypt volume"
                    );
                    last_status = status;
                }
            }
        }

        if last_status != Status::AccessDenied {
            tracing::error!(
                path = self.topological_path(),
                status = last_status.as_str(),
                "Could not unseal zxcrypt volume, leaving it alone"
            );
            return Err(last_status);
        }

        tracing::warn!(
            path = self.topological_path(),
            "Zxcrypt key does not match, reformatting volume, expect data loss..."
        );
        self.format().await.map_err(|status| {
            tracing::error!(path = self.topological_path(), %status, "Failed to format zxcrypt");
            status
        })?;
        self.unseal().await.map_err(|status| {
            tracing::error!(
                path = self.topological_path(),
                %status,
                "Failed to unseal zxcrypt volume after formatting"
            );
            status
        })
    }
}
