// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! In-memory chain backend for exercising the pipeline without a
//! network. Counts every backend call so tests can assert that re-runs
//! hit the receipts instead of the backend.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use fadroma::{
    code_hash_of, Agent, AgentOpts, Builder, BundleMsg, Chain,
    ChainBackend, ChainMode, Coin, ContractInstance, ContractLink,
    ContractSource, ContractTemplate, Error, Label, TxResult,
    UploadedTemplate,
};

#[derive(Default)]
pub struct StubState {
    pub height: AtomicU64,
    pub uploads: AtomicUsize,
    pub inits: AtomicUsize,
    pub execs: AtomicUsize,
    pub code_hashes: Mutex<Vec<String>>,
    pub labels: Mutex<BTreeMap<String, String>>,
    pub submitted: Mutex<Vec<Vec<BundleMsg>>>,
}

pub struct StubBackend {
    pub state: Arc<StubState>,
}

#[async_trait]
impl ChainBackend for StubBackend {
    async fn block_height(&self) -> Result<u64, Error> {
        Ok(self.state.height.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn balance(
        &self,
        _denom: &str,
        _address: &str,
    ) -> Result<u128, Error> {
        Ok(0)
    }

    async fn query(
        &self,
        _contract: &ContractLink,
        _msg: &Value,
    ) -> Result<Value, Error> {
        Ok(json!({ "stub": true }))
    }

    async fn code_id_of(&self, _address: &str) -> Result<String, Error> {
        Ok("1".into())
    }

    async fn label_of(&self, _address: &str) -> Result<String, Error> {
        Ok("stub".into())
    }

    async fn code_hash_of_address(
        &self,
        _address: &str,
    ) -> Result<String, Error> {
        Ok(String::new())
    }

    async fn code_hash_of_code_id(
        &self,
        _code_id: &str,
    ) -> Result<String, Error> {
        Ok(String::new())
    }

    async fn authenticate(
        &self,
        chain: &Chain,
        opts: AgentOpts,
    ) -> Result<Arc<dyn Agent>, Error> {
        Ok(Arc::new(StubAgent {
            chain: chain.clone(),
            state: self.state.clone(),
            address: opts
                .address
                .unwrap_or_else(|| "stub1sender".to_owned()),
            name: opts.name.unwrap_or_else(|| "stub".to_owned()),
        }))
    }
}

pub struct StubAgent {
    chain: Chain,
    state: Arc<StubState>,
    address: String,
    name: String,
}

#[async_trait]
impl Agent for StubAgent {
    fn chain(&self) -> &Chain {
        &self.chain
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        _to: &str,
        _coins: &[Coin],
    ) -> Result<TxResult, Error> {
        Ok(TxResult::default())
    }

    async fn send_many(
        &self,
        _txs: &[(String, Vec<Coin>)],
    ) -> Result<TxResult, Error> {
        Ok(TxResult::default())
    }

    async fn upload(&self, code: &[u8]) -> Result<UploadedTemplate, Error> {
        self.state.uploads.fetch_add(1, Ordering::SeqCst);
        let code_hash = code_hash_of(code);
        let code_id = {
            let mut hashes = self.state.code_hashes.lock();
            hashes.push(code_hash.clone());
            hashes.len()
        };
        Ok(UploadedTemplate {
            template: ContractTemplate {
                source: ContractSource::default(),
                builder_id: None,
                artifact: None,
                code_hash,
            },
            chain_id: self.chain.id.clone(),
            code_id: code_id.to_string(),
            uploader_id: None,
            upload_by: Some(self.address.clone()),
            upload_tx: Some(format!("upload-{code_id}")),
        })
    }

    async fn instantiate(
        &self,
        template: &UploadedTemplate,
        label: &Label,
        init_msg: Value,
    ) -> Result<ContractInstance, Error> {
        self.state.inits.fetch_add(1, Ordering::SeqCst);
        let label_str = label.to_string();
        // refuse a name that always fails, so tests can observe that one
        // failed entry does not cancel its peers
        if label.name.contains("fail") {
            return Err(Error::backend(
                "init",
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "contract refused to instantiate",
                ),
            ));
        }
        let mut labels = self.state.labels.lock();
        if labels.contains_key(&label_str) {
            return Err(Error::backend(
                "init",
                std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("label taken: {label_str}"),
                ),
            ));
        }
        let address = format!("stub1instance{}", labels.len() + 1);
        labels.insert(label_str.clone(), address.clone());
        Ok(ContractInstance {
            uploaded: template.clone(),
            address: Some(address),
            label: label_str,
            prefix: label.prefix.clone(),
            name: label.name.clone(),
            suffix: label.suffix.clone(),
            init_by: Some(self.address.clone()),
            init_msg,
            init_tx: Some("init-tx".into()),
        })
    }

    async fn execute(
        &self,
        _contract: &ContractLink,
        _msg: &Value,
        _send: &[Coin],
    ) -> Result<TxResult, Error> {
        let n = self.state.execs.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TxResult {
            tx_hash: format!("exec-{n}"),
            data: None,
            logs: Vec::new(),
        })
    }

    async fn submit_bundle(
        &self,
        msgs: Vec<BundleMsg>,
        _memo: Option<String>,
    ) -> Result<TxResult, Error> {
        let mut submitted = self.state.submitted.lock();
        submitted.push(msgs);
        Ok(TxResult {
            tx_hash: format!("bundle-{}", submitted.len()),
            data: None,
            logs: Vec::new(),
        })
    }
}

/// A builder that "compiles" by writing the crate name into the artifact
/// file, which is enough for hashes and receipts to be real.
pub struct StubBuilder {
    pub builds: AtomicUsize,
    output_dir: PathBuf,
}

impl StubBuilder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        StubBuilder {
            builds: AtomicUsize::new(0),
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl Builder for StubBuilder {
    fn id(&self) -> &str {
        "stub"
    }

    async fn build(
        &self,
        source: &ContractSource,
    ) -> Result<ContractTemplate, Error> {
        let crate_name =
            source.crate_name.clone().ok_or(Error::NoCrate)?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        fs::create_dir_all(&self.output_dir)?;
        let path = self
            .output_dir
            .join(fadroma::artifact_name(&crate_name, source.revision()));
        let bytes = format!("\0asm<{crate_name}>");
        fs::write(&path, &bytes)?;
        Ok(ContractTemplate {
            source: source.clone(),
            builder_id: Some("stub".into()),
            artifact: Some(path.display().to_string()),
            code_hash: code_hash_of(bytes.as_bytes()),
        })
    }
}

pub fn stub_chain() -> (Chain, Arc<StubState>) {
    let state = Arc::new(StubState::default());
    let chain = Chain::new(
        "stub-1",
        "stub://",
        ChainMode::Testnet,
        Arc::new(StubBackend {
            state: state.clone(),
        }),
    )
    .expect("chain id is present");
    (chain, state)
}

pub async fn stub_agent(chain: &Chain) -> Arc<dyn Agent> {
    chain
        .agent(AgentOpts {
            mnemonic: Some("stub mnemonic".into()),
            ..Default::default()
        })
        .await
        .expect("stub agent always authenticates")
}
