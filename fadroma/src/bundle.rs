// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! Deferred transaction batches.
//!
//! A [`Bundle`] is an agent-shaped collector: `execute` and `instantiate`
//! append to an ordered message log instead of broadcasting, and the whole
//! log is submitted as one atomic transaction when the bundle runs. Reads
//! of chain state are forbidden while collecting, because the batch
//! executes atomically at a single point in time; asking for the current
//! state mid-bundle is a programming error.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::{Agent, Chain, Coin, Fees, TxResult};
use crate::contract::{ContractInstance, ContractLink, Label, UploadedTemplate};
use crate::receipt::write_json_atomic;
use crate::Error;

/// One deferred message. Append order is execution order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BundleMsg {
    Init {
        sender: String,
        code_id: String,
        code_hash: String,
        label: String,
        msg: Value,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        funds: Vec<Coin>,
    },
    Exec {
        sender: String,
        contract: String,
        code_hash: String,
        msg: Value,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        funds: Vec<Coin>,
    },
}

/// An unsigned batch as persisted by [`Bundle::save`], for offline
/// signing by a multisig.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnsignedBundle {
    pub name: String,
    pub sender: String,
    pub msgs: Vec<BundleMsg>,
}

struct BundleInner {
    msgs: Mutex<Vec<BundleMsg>>,
    depth: AtomicUsize,
}

#[derive(Clone)]
pub struct Bundle {
    agent: Arc<dyn Agent>,
    name: String,
    inner: Arc<BundleInner>,
}

impl Bundle {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        let name = format!("{}@BUNDLE", agent.name());
        Bundle {
            agent,
            name,
            inner: Arc::new(BundleInner {
                msgs: Mutex::new(Vec::new()),
                depth: AtomicUsize::new(0),
            }),
        }
    }

    /// Current contents of the message log, in append order.
    pub fn msgs(&self) -> Vec<BundleMsg> {
        self.inner.msgs.lock().clone()
    }

    pub fn depth(&self) -> usize {
        self.inner.depth.load(Ordering::SeqCst)
    }

    /// Opening a bundle inside a bundle flattens: the depth counter goes
    /// up and the same bundle is returned.
    pub fn bundle(&self) -> Bundle {
        self.inner.depth.fetch_add(1, Ordering::SeqCst);
        self.clone()
    }

    /// Close one nesting level. Only the outermost `run` submits; inner
    /// ones return `None`.
    pub async fn run(
        &self,
        memo: Option<&str>,
    ) -> Result<Option<TxResult>, Error> {
        let depth = self.inner.depth.load(Ordering::SeqCst);
        if depth > 0 {
            self.inner.depth.store(depth - 1, Ordering::SeqCst);
            return Ok(None);
        }
        self.submit(memo).await.map(Some)
    }

    /// Broadcast the collected messages as one atomic transaction.
    pub async fn submit(
        &self,
        memo: Option<&str>,
    ) -> Result<TxResult, Error> {
        let msgs = std::mem::take(&mut *self.inner.msgs.lock());
        if msgs.is_empty() {
            return Err(Error::EmptyBundle);
        }
        self.agent
            .submit_bundle(msgs, memo.map(str::to_owned))
            .await
    }

    /// Persist the collected messages unsigned, instead of broadcasting.
    pub fn save(&self, name: &str, path: &Path) -> Result<(), Error> {
        let msgs = std::mem::take(&mut *self.inner.msgs.lock());
        if msgs.is_empty() {
            return Err(Error::EmptyBundle);
        }
        let batch = UnsignedBundle {
            name: name.to_owned(),
            sender: self.agent.address().to_owned(),
            msgs,
        };
        write_json_atomic(path, &batch)
    }

    /// Populate the bundle through a callback, then run it.
    pub async fn wrap<F, Fut>(
        &self,
        cb: F,
    ) -> Result<Option<TxResult>, Error>
    where
        F: FnOnce(Bundle) -> Fut + Send,
        Fut: Future<Output = Result<(), Error>> + Send,
    {
        cb(self.clone()).await?;
        self.run(None).await
    }
}

#[async_trait]
impl Agent for Bundle {
    fn chain(&self) -> &Chain {
        self.agent.chain()
    }

    fn address(&self) -> &str {
        self.agent.address()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn fees(&self) -> Option<&Fees> {
        self.agent.fees()
    }

    async fn height(&self) -> Result<u64, Error> {
        Err(Error::NotInBundle("height"))
    }

    async fn next_block(&self) -> Result<u64, Error> {
        Err(Error::NotInBundle("next_block"))
    }

    async fn balance(&self, _denom: &str) -> Result<u128, Error> {
        Err(Error::NotInBundle("balance"))
    }

    async fn query(
        &self,
        _contract: &ContractLink,
        _msg: &Value,
    ) -> Result<Value, Error> {
        Err(Error::NotInBundle("query"))
    }

    async fn send(
        &self,
        _to: &str,
        _coins: &[Coin],
    ) -> Result<TxResult, Error> {
        Err(Error::NotInBundle("send"))
    }

    async fn send_many(
        &self,
        _txs: &[(String, Vec<Coin>)],
    ) -> Result<TxResult, Error> {
        Err(Error::NotInBundle("send_many"))
    }

    async fn upload(
        &self,
        _code: &[u8],
    ) -> Result<UploadedTemplate, Error> {
        Err(Error::NotInBundle("upload"))
    }

    async fn upload_many(
        &self,
        blobs: &[Vec<u8>],
    ) -> Vec<Result<UploadedTemplate, Error>> {
        blobs
            .iter()
            .map(|_| Err(Error::NotInBundle("upload_many")))
            .collect()
    }

    async fn instantiate(
        &self,
        template: &UploadedTemplate,
        label: &Label,
        init_msg: Value,
    ) -> Result<ContractInstance, Error> {
        self.inner.msgs.lock().push(BundleMsg::Init {
            sender: self.address().to_owned(),
            code_id: template.code_id.clone(),
            code_hash: template.template.code_hash.clone(),
            label: label.to_string(),
            msg: init_msg.clone(),
            funds: Vec::new(),
        });
        // provisional: the address is only known after the batch lands
        Ok(ContractInstance {
            uploaded: template.clone(),
            address: None,
            label: label.to_string(),
            prefix: label.prefix.clone(),
            name: label.name.clone(),
            suffix: label.suffix.clone(),
            init_by: Some(self.address().to_owned()),
            init_msg,
            init_tx: None,
        })
    }

    async fn execute(
        &self,
        contract: &ContractLink,
        msg: &Value,
        send: &[Coin],
    ) -> Result<TxResult, Error> {
        self.inner.msgs.lock().push(BundleMsg::Exec {
            sender: self.address().to_owned(),
            contract: contract.address.clone(),
            code_hash: contract.code_hash.clone(),
            msg: msg.clone(),
            funds: send.to_vec(),
        });
        Ok(TxResult::default())
    }

    async fn submit_bundle(
        &self,
        msgs: Vec<BundleMsg>,
        _memo: Option<String>,
    ) -> Result<TxResult, Error> {
        // a bundle submitted into a bundle flattens into the outer log
        self.inner.msgs.lock().extend(msgs);
        Ok(TxResult::default())
    }
}

/// Bundle construction for any shared agent.
pub trait AgentExt {
    fn bundle(&self) -> Bundle;
}

impl AgentExt for Arc<dyn Agent> {
    fn bundle(&self) -> Bundle {
        Bundle::new(self.clone())
    }
}
