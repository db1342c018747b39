// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod constants {
    /// The number of bytes at the start of a device that are needed to sniff its format.
    pub const HEADER_SIZE: usize = 4096;

    pub const FVM_MAGIC: [u8; 8] = [0x46, 0x56, 0x4d, 0x20, 0x50, 0x41, 0x52, 0x54];
    pub const ZXCRYPT_MAGIC: [u8; 16] = [
        0x5f, 0xe8, 0xf8, 0x00, 0xb3, 0x6d, 0x11, 0xe7, 0x80, 0x7a, 0x78, 0x63, 0x72, 0x79, 0x70,
        0x74,
    ];
    pub const BLOCK_VERITY_MAGIC: [u8; 16] = [
        0x62, 0x6c, 0x6f, 0x63, 0x6b, 0x2d, 0x76, 0x65, 0x72, 0x69, 0x74, 0x79, 0x2d, 0x76, 0x31,
        0x00,
    ];
    pub const GPT_MAGIC: [u8; 16] = [
        0x45, 0x46, 0x49, 0x20, 0x50, 0x41, 0x52, 0x54, 0x00, 0x00, 0x01, 0x00, 0x5c, 0x00, 0x00,
        0x00,
    ];
    pub const MINFS_MAGIC: [u8; 16] = [
        0x21, 0x4d, 0x69, 0x6e, 0x46, 0x53, 0x21, 0x00, 0x04, 0xd3, 0xd3, 0xd3, 0xd3, 0x00, 0x50,
        0x38,
    ];
    pub const BLOBFS_MAGIC: [u8; 16] = [
        0x21, 0x4d, 0x69, 0x9e, 0x47, 0x53, 0x21, 0xac, 0x14, 0xd3, 0xd3, 0xd4, 0xd4, 0x00, 0x50,
        0x98,
    ];
    pub const FACTORYFS_MAGIC: [u8; 8] = [0x21, 0x4d, 0x69, 0x1e, 0xf9, 0x3f, 0x5d, 0xa5];
    pub const VB_META_MAGIC: [u8; 4] = [0x41, 0x56, 0x42, 0x30];
    pub const F2FS_MAGIC: [u8; 4] = [0x10, 0x20, 0xf5, 0xf2];
    pub const FXFS_MAGIC: [u8; 8] = [0x46, 0x78, 0x66, 0x53, 0x75, 0x70, 0x65, 0x72];
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DiskFormat {
    #[default]
    Unknown,
    Gpt,
    Mbr,
    Minfs,
    Fat,
    Blobfs,
    Fvm,
    Zxcrypt,
    Factoryfs,
    BlockVerity,
    VbMeta,
    Bootpart,
    Fxfs,
    F2fs,
}

impl DiskFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskFormat::Unknown => "unknown",
            DiskFormat::Gpt => "gpt",
            DiskFormat::Mbr => "mbr",
            DiskFormat::Minfs => "minfs",
            DiskFormat::Fat => "fat",
            DiskFormat::Blobfs => "blobfs",
            DiskFormat::Fvm => "fvm",
            DiskFormat::Zxcrypt => "zxcrypt",
            DiskFormat::Factoryfs => "factoryfs",
            DiskFormat::BlockVerity => "block verity",
            DiskFormat::VbMeta => "vbmeta",
            DiskFormat::Bootpart => "bootpart",
            DiskFormat::Fxfs => "fxfs",
            DiskFormat::F2fs => "f2fs",
        }
    }

    /// Parses the names produced by `as_str` (also accepting `block-verity`).
    pub fn from_name(name: &str) -> Option<DiskFormat> {
        Some(match name {
            "unknown" => DiskFormat::Unknown,
            "gpt" => DiskFormat::Gpt,
            "mbr" => DiskFormat::Mbr,
            "minfs" => DiskFormat::Minfs,
            "fat" => DiskFormat::Fat,
            "blobfs" => DiskFormat::Blobfs,
            "fvm" => DiskFormat::Fvm,
            "zxcrypt" => DiskFormat::Zxcrypt,
            "factoryfs" => DiskFormat::Factoryfs,
            "block verity" | "block-verity" => DiskFormat::BlockVerity,
            "vbmeta" => DiskFormat::VbMeta,
            "bootpart" => DiskFormat::Bootpart,
            "fxfs" => DiskFormat::Fxfs,
            "f2fs" => DiskFormat::F2fs,
            _ => return None,
        })
    }
}

/// Returns the format of a device given the first bytes of its contents.
///
/// `data` should hold at least `max(HEADER_SIZE, 2 * block_size)` bytes; a shorter header can
/// only be recognized by the magic values that fit in it.
pub fn detect_disk_format(data: &[u8], block_size: u32) -> DiskFormat {
    let has_at = |offset: usize, magic: &[u8]| {
        data.get(offset..offset + magic.len()).map_or(false, |bytes| bytes == magic)
    };

    if has_at(0, &constants::FVM_MAGIC) {
        return DiskFormat::Fvm;
    }

    if has_at(0, &constants::ZXCRYPT_MAGIC) {
        return DiskFormat::Zxcrypt;
    }

    if has_at(0, &constants::BLOCK_VERITY_MAGIC) {
        return DiskFormat::BlockVerity;
    }

    if block_size > 0 && has_at(block_size as usize, &constants::GPT_MAGIC) {
        return DiskFormat::Gpt;
    }

    if has_at(0, &constants::MINFS_MAGIC) {
        return DiskFormat::Minfs;
    }

    if has_at(0, &constants::BLOBFS_MAGIC) {
        return DiskFormat::Blobfs;
    }

    if has_at(0, &constants::FACTORYFS_MAGIC) {
        return DiskFormat::Factoryfs;
    }

    if has_at(0, &constants::VB_META_MAGIC) {
        return DiskFormat::VbMeta;
    }

    if has_at(510, &[0x55, 0xaa]) {
        // 0x29 is the FAT boot signature, at offset 38 or 66 depending on the FAT type.
        if data[38] == 0x29 || data[66] == 0x29 {
            return DiskFormat::Fat;
        }
        return DiskFormat::Mbr;
    }

    if has_at(1024, &constants::F2FS_MAGIC) {
        return DiskFormat::F2fs;
    }

    if has_at(0, &constants::FXFS_MAGIC) {
        return DiskFormat::Fxfs;
    }

    DiskFormat::Unknown
}
