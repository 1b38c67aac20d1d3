// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! Persisted lifecycle receipts.
//!
//! Receipts gate re-runs: a stage that finds its receipt present adopts it
//! instead of repeating the backend operation. All writes go through
//! atomic replace (write to a temp file in the target directory, then
//! rename) so a crash leaves either the prior or the new version, never a
//! torn one.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::Error;

pub fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), Error> {
    let dir = path.parent().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("receipt path has no parent: {}", path.display()),
        ))
    })?;
    fs::create_dir_all(dir)?;
    let tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(tmp.as_file(), value)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// One completed upload: enough to adopt the code id without re-uploading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub chain_id: String,
    pub code_id: String,
    pub code_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_tx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

/// On-disk store of upload receipts, keyed `<root>/<chainId>/<codeHash>.json`.
///
/// For a given `(chain_id, code_hash)` the stored `code_id` is authoritative:
/// re-uploads consult the store first.
#[derive(Clone, Debug)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        UploadStore { root: root.into() }
    }

    fn path(&self, chain_id: &str, code_hash: &str) -> PathBuf {
        self.root.join(chain_id).join(format!("{code_hash}.json"))
    }

    pub fn get(
        &self,
        chain_id: &str,
        code_hash: &str,
    ) -> Result<Option<UploadReceipt>, Error> {
        let path = self.path(chain_id, code_hash);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn put(&self, receipt: &UploadReceipt) -> Result<(), Error> {
        let path = self.path(&receipt.chain_id, &receipt.code_hash);
        write_json_atomic(&path, receipt)
    }
}
