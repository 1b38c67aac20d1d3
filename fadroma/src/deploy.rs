// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! The contract lifecycle state machine and the deployment registry.
//!
//! A [`Contract`] advances Declared → Built → Uploaded → Instantiated.
//! Each stage is a memoized task: concurrent callers collapse onto one
//! in-flight advance, a successful terminal value is cached forever, and
//! a stage whose terminal field is already present in the record skips
//! the backend entirely. Failures leave the stage unresolved so the next
//! invocation retries from the previous terminal state.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::builder::Builder;
use crate::bundle::Bundle;
use crate::chain::{Agent, Client};
use crate::contract::{
    ContractInstance, ContractRecord, ContractSource, ContractTemplate,
    Label, UploadedTemplate,
};
use crate::receipt::{read_json, write_json_atomic};
use crate::uploader::Uploader;
use crate::Error;

struct ContractInner {
    record: Mutex<ContractRecord>,
    receipt_path: Mutex<Option<PathBuf>>,
    builder: Mutex<Option<Arc<dyn Builder>>>,
    uploader: Mutex<Option<Arc<Uploader>>>,
    agent: Mutex<Option<Arc<dyn Agent>>>,
    built: OnceCell<ContractTemplate>,
    uploaded: OnceCell<UploadedTemplate>,
    instantiated: OnceCell<ContractInstance>,
}

/// One contract advancing through the lifecycle. Cheap to clone; clones
/// share the record and the memoized stage tasks.
#[derive(Clone)]
pub struct Contract {
    inner: Arc<ContractInner>,
}

impl Contract {
    pub fn new(name: &str, source: ContractSource) -> Self {
        let mut record = ContractRecord::from_source(source);
        record.name = Some(name.to_owned());
        Contract::from_record(record)
    }

    pub fn from_record(record: ContractRecord) -> Self {
        Contract {
            inner: Arc::new(ContractInner {
                record: Mutex::new(record),
                receipt_path: Mutex::new(None),
                builder: Mutex::new(None),
                uploader: Mutex::new(None),
                agent: Mutex::new(None),
                built: OnceCell::new(),
                uploaded: OnceCell::new(),
                instantiated: OnceCell::new(),
            }),
        }
    }

    pub fn record(&self) -> ContractRecord {
        self.inner.record.lock().clone()
    }

    pub fn set_agent(&self, agent: Arc<dyn Agent>) {
        let mut slot = self.inner.agent.lock();
        if slot.is_none() {
            *slot = Some(agent);
        }
    }

    pub fn set_builder(&self, builder: Arc<dyn Builder>) {
        let mut slot = self.inner.builder.lock();
        if slot.is_none() {
            *slot = Some(builder);
        }
    }

    pub fn set_uploader(&self, uploader: Arc<Uploader>) {
        let mut slot = self.inner.uploader.lock();
        if slot.is_none() {
            *slot = Some(uploader);
        }
    }

    pub fn set_crate(&self, crate_name: &str) {
        let mut record = self.inner.record.lock();
        if record.crate_name.is_none() {
            record.crate_name = Some(crate_name.to_owned());
        }
    }

    pub fn set_prefix(&self, prefix: &str) {
        let mut record = self.inner.record.lock();
        if record.prefix.is_none() {
            record.prefix = Some(prefix.to_owned());
        }
    }

    pub fn set_suffix(&self, suffix: &str) {
        let mut record = self.inner.record.lock();
        if record.suffix.is_none() {
            record.suffix = Some(suffix.to_owned());
        }
    }

    pub fn set_init_msg(&self, msg: Value) {
        let mut record = self.inner.record.lock();
        if record.init_msg.is_none() {
            record.init_msg = Some(msg);
        }
    }

    pub fn set_receipt_path(&self, path: PathBuf) {
        let mut slot = self.inner.receipt_path.lock();
        if slot.is_none() {
            *slot = Some(path);
        }
    }

    /// Adopt the result of an upload performed elsewhere, e.g. the shared
    /// template of a bulk deployment.
    pub fn absorb_uploaded(&self, uploaded: &UploadedTemplate) {
        self.inner.record.lock().absorb_upload(uploaded);
    }

    /// Advance to Built. Skips when the record already carries a build
    /// result.
    pub async fn built(&self) -> Result<ContractTemplate, Error> {
        self.inner
            .built
            .get_or_try_init(|| async {
                if let Some(template) = self.inner.record.lock().template() {
                    debug!("build skipped, template present");
                    return Ok(template);
                }
                let source = self.inner.record.lock().source();
                let builder =
                    self.inner.builder.lock().clone().ok_or_else(|| {
                        Error::Build {
                            crate_name: source
                                .crate_name
                                .clone()
                                .unwrap_or_default(),
                            reason: "no builder configured".into(),
                        }
                    })?;
                let template = builder.build(&source).await?;
                self.inner.record.lock().absorb_template(&template);
                Ok(template)
            })
            .await
            .map(Clone::clone)
    }

    /// Advance to Uploaded. Skips when the record already carries a code
    /// id on a chain.
    pub async fn uploaded(&self) -> Result<UploadedTemplate, Error> {
        self.inner
            .uploaded
            .get_or_try_init(|| async {
                if let Some(uploaded) = self.inner.record.lock().uploaded() {
                    debug!(code_id = %uploaded.code_id, "upload skipped");
                    return Ok(uploaded);
                }
                let template = self.built().await?;
                let uploader =
                    self.inner.uploader.lock().clone().ok_or_else(|| {
                        Error::Upload("no uploader configured".into())
                    })?;
                let uploaded = uploader.upload(&template).await?;
                self.inner.record.lock().absorb_upload(&uploaded);
                Ok(uploaded)
            })
            .await
            .map(Clone::clone)
    }

    /// Advance to Instantiated. Skips when the record already carries an
    /// address; writes the instance receipt on success.
    pub async fn deployed(&self) -> Result<ContractInstance, Error> {
        self.inner
            .instantiated
            .get_or_try_init(|| async {
                if let Some(instance) = self.inner.record.lock().instance() {
                    debug!(address = ?instance.address, "already deployed");
                    return Ok(instance);
                }
                let uploaded = self.uploaded().await?;
                let agent = self
                    .inner
                    .agent
                    .lock()
                    .clone()
                    .ok_or(Error::NoAgent)?;
                let (name, prefix, suffix, init_msg) = {
                    let record = self.inner.record.lock();
                    (
                        record.name.clone(),
                        record.prefix.clone(),
                        record.suffix.clone(),
                        record.init_msg.clone(),
                    )
                };
                let name = name.ok_or(Error::NoName)?;
                let init_msg = init_msg.ok_or(Error::NoInitMessage)?;
                if uploaded.code_id.is_empty() {
                    return Err(Error::NoInitCodeId);
                }
                let label = Label::new(
                    prefix.as_deref(),
                    &name,
                    suffix.as_deref(),
                )?;
                let instance =
                    agent.instantiate(&uploaded, &label, init_msg).await?;
                self.inner.record.lock().absorb_instance(&instance);
                self.write_receipt()?;
                info!(
                    label = %instance.label,
                    address = ?instance.address,
                    "instantiated"
                );
                Ok(instance)
            })
            .await
            .map(Clone::clone)
    }

    /// A client over the deployed instance, through the contract's agent.
    pub async fn client(&self) -> Result<Client, Error> {
        let instance = self.deployed().await?;
        let agent = self.inner.agent.lock().clone().ok_or(Error::NoAgent)?;
        Client::from_instance(agent, &instance)
    }

    fn write_receipt(&self) -> Result<(), Error> {
        let path = self.inner.receipt_path.lock().clone();
        if let Some(path) = path {
            let record = self.inner.record.lock().clone();
            write_json_atomic(&path, &record)?;
        }
        Ok(())
    }
}

/// A named set of contracts sharing defaults; the deployment name is the
/// label prefix of every instance it owns.
pub struct Deployment {
    pub name: String,
    dir: Option<PathBuf>,
    agent: Option<Arc<dyn Agent>>,
    builder: Option<Arc<dyn Builder>>,
    uploader: Option<Arc<Uploader>>,
    workspace: Option<PathBuf>,
    revision: Option<String>,
    state: Mutex<BTreeMap<String, Contract>>,
}

impl Deployment {
    pub fn new(name: &str) -> Self {
        Deployment {
            name: name.to_owned(),
            dir: None,
            agent: None,
            builder: None,
            uploader: None,
            workspace: None,
            revision: None,
            state: Mutex::new(BTreeMap::new()),
        }
    }

    /// Reconstitute a deployment from its receipt directory. Every
    /// instance comes back at its terminal state, so re-running it
    /// performs no backend calls.
    pub fn load(dir: &Path, name: &str) -> Result<Self, Error> {
        let deployment = Deployment {
            dir: Some(dir.to_path_buf()),
            ..Deployment::new(name)
        };
        let mut state = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record: ContractRecord = read_json(&path)?;
            let contract_name = match &record.name {
                Some(name) => name.clone(),
                None => path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            };
            let contract = Contract::from_record(record);
            contract.set_receipt_path(path);
            state.insert(contract_name, contract);
        }
        *deployment.state.lock() = state;
        Ok(deployment)
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_agent(self, agent: Arc<dyn Agent>) -> Self {
        for contract in self.state.lock().values() {
            contract.set_agent(agent.clone());
        }
        Deployment {
            agent: Some(agent),
            ..self
        }
    }

    pub fn with_builder(self, builder: Arc<dyn Builder>) -> Self {
        for contract in self.state.lock().values() {
            contract.set_builder(builder.clone());
        }
        Deployment {
            builder: Some(builder),
            ..self
        }
    }

    pub fn with_uploader(self, uploader: Arc<Uploader>) -> Self {
        for contract in self.state.lock().values() {
            contract.set_uploader(uploader.clone());
        }
        Deployment {
            uploader: Some(uploader),
            ..self
        }
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Return the contract registered under `name`, creating it with the
    /// deployment's defaults if it is new. Asking twice for the same name
    /// yields the same contract, which is what makes duplicate
    /// instantiation impossible within one deployment.
    pub fn contract(&self, name: &str) -> Contract {
        let mut state = self.state.lock();
        if let Some(contract) = state.get(name) {
            return contract.clone();
        }
        let source = ContractSource {
            workspace: self.workspace.clone(),
            revision: self.revision.clone(),
            ..Default::default()
        };
        let contract = Contract::new(name, source);
        contract.set_prefix(&self.name);
        if let Some(agent) = &self.agent {
            contract.set_agent(agent.clone());
        }
        if let Some(builder) = &self.builder {
            contract.set_builder(builder.clone());
        }
        if let Some(uploader) = &self.uploader {
            contract.set_uploader(uploader.clone());
        }
        if let Some(dir) = &self.dir {
            contract.set_receipt_path(dir.join(format!("{name}.json")));
        }
        state.insert(name.to_owned(), contract.clone());
        contract
    }

    pub fn get(&self, name: &str) -> Option<Contract> {
        self.state.lock().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.state.lock().keys().cloned().collect()
    }

    /// A bundle over the deployment's agent.
    pub fn bundle(&self) -> Result<Bundle, Error> {
        let agent = self.agent.clone().ok_or(Error::NoBundleAgent)?;
        Ok(Bundle::new(agent))
    }

    /// Deploy N instances of one template. The template is built and
    /// uploaded exactly once; the entries are instantiated independently
    /// and their results are returned in input order, one failure not
    /// cancelling its peers.
    pub async fn deploy_many(
        &self,
        mut source: ContractSource,
        entries: Vec<(String, Value)>,
    ) -> Result<Vec<(String, Result<ContractInstance, Error>)>, Error> {
        if source.workspace.is_none() {
            source.workspace = self.workspace.clone();
        }
        if source.revision.is_none() {
            source.revision = self.revision.clone();
        }
        let builder = self.builder.clone().ok_or_else(|| Error::Build {
            crate_name: source.crate_name.clone().unwrap_or_default(),
            reason: "no builder configured".into(),
        })?;
        let uploader = self.uploader.clone().ok_or_else(|| {
            Error::Upload("no uploader configured".into())
        })?;
        let template = builder.build(&source).await?;
        let uploaded = uploader.upload(&template).await?;

        let contracts: Vec<(String, Contract)> = entries
            .into_iter()
            .map(|(name, init_msg)| {
                let contract = self.contract(&name);
                contract.absorb_uploaded(&uploaded);
                contract.set_init_msg(init_msg);
                (name, contract)
            })
            .collect();

        let results = futures::future::join_all(
            contracts.iter().map(|(_, contract)| contract.deployed()),
        )
        .await;

        Ok(contracts
            .into_iter()
            .map(|(name, _)| name)
            .zip(results)
            .map(|(name, result)| (name, result))
            .collect())
    }

    /// Persist the receipt of every instantiated contract.
    pub fn save(&self) -> Result<(), Error> {
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => return Ok(()),
        };
        for (name, contract) in self.state.lock().iter() {
            let record = contract.record();
            if record.address.is_some() {
                write_json_atomic(&dir.join(format!("{name}.json")), &record)?;
            }
        }
        Ok(())
    }
}

const ACTIVE_POINTER: &str = ".active";

/// Directory of deployments, with a durable pointer to the active one.
/// Selection is last-writer-wins: the pointer file is atomically
/// replaced on every `select`.
pub struct DeployStore {
    root: PathBuf,
}

impl DeployStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        DeployStore { root: root.into() }
    }

    pub fn create(&self, name: &str) -> Result<Deployment, Error> {
        fs::create_dir_all(&self.root)?;
        let dir = self.root.join(name);
        fs::create_dir(&dir)?;
        Ok(Deployment::new(name).with_dir(dir))
    }

    pub fn list(&self) -> Result<Vec<String>, Error> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn select(&self, name: &str) -> Result<(), Error> {
        if !self.root.join(name).is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such deployment: {name}"),
            )));
        }
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        writeln!(tmp, "{name}")?;
        tmp.persist(self.root.join(ACTIVE_POINTER))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    pub fn active(&self) -> Result<Option<String>, Error> {
        let pointer = self.root.join(ACTIVE_POINTER);
        if !pointer.exists() {
            return Ok(None);
        }
        let name = fs::read_to_string(pointer)?.trim().to_owned();
        if name.is_empty() || !self.root.join(&name).is_dir() {
            return Ok(None);
        }
        Ok(Some(name))
    }

    pub fn load(&self, name: &str) -> Result<Deployment, Error> {
        Deployment::load(&self.root.join(name), name)
    }

    pub fn load_active(&self) -> Result<Option<Deployment>, Error> {
        match self.active()? {
            Some(name) => self.load(&name).map(Some),
            None => Ok(None),
        }
    }
}
