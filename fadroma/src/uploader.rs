// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! Artifact-to-code-id uploads, cached by `(chain_id, code_hash)`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::chain::Agent;
use crate::contract::{code_hash_of, ContractTemplate, UploadedTemplate};
use crate::receipt::{UploadReceipt, UploadStore};
use crate::Error;

/// Uploads templates through an agent, consulting the upload receipt
/// store first so that re-runs adopt the existing code id instead of
/// paying for a second upload.
pub struct Uploader {
    id: String,
    agent: Arc<dyn Agent>,
    store: UploadStore,
    always: bool,
}

impl Uploader {
    pub fn new(agent: Arc<dyn Agent>, store: UploadStore) -> Self {
        Uploader {
            id: "caching".into(),
            agent,
            store,
            always: false,
        }
    }

    /// Skip the receipt store and upload unconditionally
    /// (`FADROMA_UPLOAD_ALWAYS`).
    pub fn always(mut self, always: bool) -> Self {
        self.always = always;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn upload(
        &self,
        template: &ContractTemplate,
    ) -> Result<UploadedTemplate, Error> {
        let chain_id = self.agent.chain().id.clone();

        if !self.always {
            if let Some(receipt) =
                self.store.get(&chain_id, &template.code_hash)?
            {
                debug!(
                    %chain_id,
                    code_id = %receipt.code_id,
                    code_hash = %receipt.code_hash,
                    "adopting code id from upload receipt"
                );
                return Ok(UploadedTemplate {
                    template: template.clone(),
                    chain_id,
                    code_id: receipt.code_id,
                    uploader_id: Some(self.id.clone()),
                    upload_by: receipt.upload_by,
                    upload_tx: receipt.upload_tx,
                });
            }
        }

        if template.source.dirty {
            warn!(
                crate_name = ?template.source.crate_name,
                "uploading artifact built from a dirty working tree"
            );
        }

        let path = template
            .artifact
            .as_deref()
            .ok_or_else(|| Error::Upload("template has no artifact".into()))?;
        let path = path.strip_prefix("file://").unwrap_or(path);
        let bytes = tokio::fs::read(path).await?;
        let computed = code_hash_of(&bytes);
        if computed != template.code_hash {
            warn!(
                expected = %template.code_hash,
                %computed,
                "artifact bytes changed since the build receipt was written"
            );
        }

        let mut uploaded = self.agent.upload(&bytes).await?;
        // the agent only saw bytes; keep the richer build provenance
        uploaded.template = ContractTemplate {
            source: template.source.clone(),
            builder_id: template.builder_id.clone(),
            artifact: template.artifact.clone(),
            code_hash: uploaded.template.code_hash,
        };
        uploaded.uploader_id = Some(self.id.clone());

        self.store.put(&UploadReceipt {
            chain_id: uploaded.chain_id.clone(),
            code_id: uploaded.code_id.clone(),
            code_hash: uploaded.template.code_hash.clone(),
            upload_tx: uploaded.upload_tx.clone(),
            upload_by: uploaded.upload_by.clone(),
            artifact: uploaded.template.artifact.clone(),
        })?;

        Ok(uploaded)
    }

    /// Upload several templates, preserving input order in the results.
    pub async fn upload_many(
        &self,
        templates: &[ContractTemplate],
    ) -> Vec<Result<UploadedTemplate, Error>> {
        futures::future::join_all(
            templates.iter().map(|t| self.upload(t)),
        )
        .await
    }
}
