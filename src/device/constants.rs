// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// -- Partition labels --
pub const BLOBFS_PARTITION_LABEL: &str = "blobfs";
pub const DATA_PARTITION_LABEL: &str = "data";
pub const LEGACY_DATA_PARTITION_LABEL: &str = "minfs";
pub const DURABLE_PARTITION_LABEL: &str = "durable";
pub const FACTORY_PARTITION_LABEL: &str = "factory";

// -- Partition type GUIDs --
pub const BLOBFS_TYPE_GUID: [u8; 16] = [
    0x0e, 0x38, 0x67, 0x29, 0x4c, 0x13, 0xbb, 0x4c, 0xb6, 0xda, 0x17, 0xe7, 0xce, 0x1c, 0xa4, 0x5d,
];
pub const DATA_TYPE_GUID: [u8; 16] = [
    0x0c, 0x5f, 0x18, 0x08, 0x2d, 0x89, 0x8a, 0x42, 0xa7, 0x89, 0xdb, 0xee, 0xc8, 0xf5, 0x5e, 0x6a,
];
pub const DURABLE_TYPE_GUID: [u8; 16] = [
    0x35, 0x45, 0xfd, 0xd9, 0x6c, 0x10, 0xec, 0x4c, 0x8d, 0x37, 0xdf, 0xc0, 0x20, 0xca, 0x87, 0xcb,
];
pub const FACTORY_TYPE_GUID: [u8; 16] = [
    0xaa, 0xdb, 0xb8, 0x10, 0xbf, 0xd2, 0xa9, 0x42, 0x98, 0xc6, 0xa7, 0xc5, 0xdb, 0x37, 0x01, 0xe7,
];
pub const INSTALL_TYPE_GUID: [u8; 16] = [
    0x46, 0x55, 0x43, 0x48, 0x53, 0x49, 0x41, 0x20, 0x49, 0x4e, 0x53, 0x54, 0x41, 0x4c, 0x4c, 0x52,
];
pub const FVM_TYPE_GUID: [u8; 16] = [
    0xb8, 0x7c, 0xfd, 0x49, 0x15, 0xdf, 0x73, 0x4e, 0xb9, 0xd9, 0x99, 0x20, 0x70, 0x12, 0x7f, 0x0f,
];

// -- Driver paths (to be used to attach devices)
pub const BLOCK_VERITY_DRIVER_PATH: &str = "block-verity.so";
pub const BOOTPART_DRIVER_PATH: &str = "bootpart.so";
pub const FVM_DRIVER_PATH: &str = "fvm.so";
pub const GPT_DRIVER_PATH: &str = "gpt.so";
pub const MBR_DRIVER_PATH: &str = "mbr.so";

// -- Topological path fragments --
/// Inserted by the fvm driver between the container and its partitions.
pub const FVM_CHILD_SUFFIX: &str = "/fvm";
/// Appended to a zxcrypt container to reach its unsealed volume.
pub const ZXCRYPT_UNSEALED_SUFFIX: &str = "/zxcrypt/unsealed/block";
/// Appended to a block-verity container to reach its read-write (authoring) volume.
pub const VERITY_MUTABLE_SUFFIX: &str = "/verity/mutable/block";
/// Appended to a block-verity container to reach its verified read-only volume.
pub const VERITY_VERIFIED_SUFFIX: &str = "/verity/verified/block";

/// Set in `BlockInfo::flags` for boot partitions.
pub const BLOCK_FLAG_BOOTPART: u32 = 0x0000_0004;
