// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {crate::status::Status, std::fmt, std::str::FromStr};

pub const SEAL_SIZE: usize = 32;

/// The SHA-256 digest that a block-verity volume must match before it is opened for verified
/// reads.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Seal([u8; SEAL_SIZE]);

impl FromStr for Seal {
    type Err = Status;

    fn from_str(text: &str) -> Result<Self, Status> {
        let mut bytes = [0u8; SEAL_SIZE];
        hex::decode_to_slice(text.trim(), &mut bytes).map_err(|error| {
            tracing::warn!(%error, "Malformed block-verity seal");
            Status::InvalidArgs
        })?;
        Ok(Seal(bytes))
    }
}

impl fmt::Display for Seal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Seal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seal({})", self)
    }
}
