// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Storage unit configuration.
//!
//! A [`UnitConfig`] is the serializable description of a storage unit the
//! way launchers and backends keep them on disk; it converts into the wire
//! parameters with the same validation the adapter applies at provision.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use uuid::Uuid;

use scsi_sys::transact::StorageUnitParams;
use scsi_sys::transact::PARAMS_CACHE_SUPPORTED;
use scsi_sys::transact::PARAMS_EJECT_DISABLED;
use scsi_sys::transact::PARAMS_UNMAP_SUPPORTED;
use scsi_sys::transact::PARAMS_WRITE_PROTECTED;

fn cache_supported_default() -> bool {
    true
}

fn unmap_supported_default() -> bool {
    true
}

fn block_length_default() -> u32 {
    512
}

fn max_transfer_length_default() -> u32 {
    64 * 1024
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UnitConfig {
    /// Unit identity; a random one is generated when absent.
    #[serde(default)]
    pub guid: Option<String>,
    pub block_count: u64,
    #[serde(default = "block_length_default")]
    pub block_length: u32,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub product_revision_level: Option<String>,
    #[serde(default, rename = "ro")]
    pub write_protected: bool,
    #[serde(default = "cache_supported_default")]
    pub cache_supported: bool,
    #[serde(default = "unmap_supported_default")]
    pub unmap_supported: bool,
    #[serde(default)]
    pub eject_disabled: bool,
    #[serde(default = "max_transfer_length_default")]
    pub max_transfer_length: u32,
}

impl UnitConfig {
    pub fn from_json(json: &str) -> anyhow::Result<UnitConfig> {
        serde_json::from_str(json).context("Failed to parse unit config")
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<UnitConfig> {
        let json = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
        Self::from_json(&json)
    }

    /// Converts into wire parameters. GUID fields are stored little-endian
    /// so the derived serial reads back as the configured GUID text.
    pub fn to_params(&self) -> anyhow::Result<StorageUnitParams> {
        let uuid = match &self.guid {
            Some(text) => Uuid::parse_str(text).context("Failed to parse unit guid")?,
            None => Uuid::new_v4(),
        };
        let (data1, data2, data3, data4) = uuid.as_fields();
        let mut guid = [0u8; 16];
        guid[0..4].copy_from_slice(&data1.to_le_bytes());
        guid[4..6].copy_from_slice(&data2.to_le_bytes());
        guid[6..8].copy_from_slice(&data3.to_le_bytes());
        guid[8..16].copy_from_slice(data4);

        let mut product_id = *b"                ";
        if let Some(text) = &self.product_id {
            if !text.is_ascii() || text.len() > product_id.len() {
                anyhow::bail!("product_id must be at most 16 ASCII characters");
            }
            product_id[..text.len()].copy_from_slice(text.as_bytes());
        }
        let mut product_revision_level = *b"    ";
        if let Some(text) = &self.product_revision_level {
            if !text.is_ascii() || text.len() > product_revision_level.len() {
                anyhow::bail!("product_revision_level must be at most 4 ASCII characters");
            }
            product_revision_level[..text.len()].copy_from_slice(text.as_bytes());
        }

        let mut flags = 0;
        if self.write_protected {
            flags |= PARAMS_WRITE_PROTECTED;
        }
        if self.cache_supported {
            flags |= PARAMS_CACHE_SUPPORTED;
        }
        if self.unmap_supported {
            flags |= PARAMS_UNMAP_SUPPORTED;
        }
        if self.eject_disabled {
            flags |= PARAMS_EJECT_DISABLED;
        }

        Ok(StorageUnitParams {
            guid,
            block_count: self.block_count,
            block_length: self.block_length,
            product_id,
            product_revision_level,
            flags,
            max_transfer_length: self.max_transfer_length,
            ..Default::default()
        })
    }
}
