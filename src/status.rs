// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use thiserror::Error;

/// The status vocabulary of the matching and mounting engine.
///
/// Success is `Ok(())`; everything else is one of these.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Hash)]
pub enum Status {
    /// No policy applies to the device. This is the expected outcome for devices outside the
    /// configured policy and is not a failure.
    #[error("not supported")]
    NotSupported,
    /// A sanity check on the device (typically its type GUID) failed.
    #[error("invalid args")]
    InvalidArgs,
    /// The partition type did not correspond to any known role.
    #[error("wrong type")]
    WrongType,
    /// The target is already bound or mounted.
    #[error("already bound")]
    AlreadyBound,
    #[error("not found")]
    NotFound,
    #[error("bad state")]
    BadState,
    /// Access was denied, e.g. the key for an encrypted volume was wrong or missing.
    #[error("access denied")]
    AccessDenied,
    #[error("i/o error")]
    Io,
    #[error("internal error")]
    Internal,
}

impl Status {
    /// Returns the upper-case name of the status, as it appears in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NotSupported => "NOT_SUPPORTED",
            Status::InvalidArgs => "INVALID_ARGS",
            Status::WrongType => "WRONG_TYPE",
            Status::AlreadyBound => "ALREADY_BOUND",
            Status::NotFound => "NOT_FOUND",
            Status::BadState => "BAD_STATE",
            Status::AccessDenied => "ACCESS_DENIED",
            Status::Io => "IO",
            Status::Internal => "INTERNAL",
        }
    }
}

impl From<std::io::Error> for Status {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Status::NotFound,
            std::io::ErrorKind::PermissionDenied => Status::AccessDenied,
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                Status::InvalidArgs
            }
            _ => Status::Io,
        }
    }
}
