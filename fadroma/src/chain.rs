// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! The uniform surface over chain backends.
//!
//! [`Chain`] is a connection to one backend in one of four modes; its read
//! operations delegate to a [`ChainBackend`]. [`Agent`] is an authenticated
//! identity on a chain and carries the write operations. Backends implement
//! both traits; everything above this module is backend-agnostic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::bundle::BundleMsg;
use crate::config::Config;
use crate::contract::{ContractInstance, ContractLink, Label, UploadedTemplate};
use crate::devnet::Devnet;
use crate::Error;

/// Interval at which [`Chain::next_block`] polls the backend.
const NEXT_BLOCK_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainMode {
    Mainnet,
    Testnet,
    Devnet,
    Mocknet,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub amount: String,
    pub denom: String,
}

impl Coin {
    pub fn new(amount: u128, denom: impl Into<String>) -> Self {
        Coin {
            amount: amount.to_string(),
            denom: denom.into(),
        }
    }
}

/// Per-operation fee defaults for an agent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fees {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<Coin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<Coin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<Coin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send: Option<Coin>,
}

/// Identity material for acquiring an [`Agent`] from a [`Chain`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOpts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees: Option<Fees>,
}

/// Outcome of a broadcast transaction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    pub tx_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<Value>,
}

/// Read-only operations a backend must answer.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    async fn block_height(&self) -> Result<u64, Error>;
    async fn balance(&self, denom: &str, address: &str)
        -> Result<u128, Error>;
    async fn query(
        &self,
        contract: &ContractLink,
        msg: &Value,
    ) -> Result<Value, Error>;
    async fn code_id_of(&self, address: &str) -> Result<String, Error>;
    async fn label_of(&self, address: &str) -> Result<String, Error>;
    async fn code_hash_of_address(
        &self,
        address: &str,
    ) -> Result<String, Error>;
    async fn code_hash_of_code_id(
        &self,
        code_id: &str,
    ) -> Result<String, Error>;
    /// Produce an authenticated agent for this backend.
    async fn authenticate(
        &self,
        chain: &Chain,
        opts: AgentOpts,
    ) -> Result<Arc<dyn Agent>, Error>;
}

/// A connection to one chain backend.
#[derive(Clone)]
pub struct Chain {
    pub id: String,
    pub url: String,
    pub mode: ChainMode,
    /// Supervisor of the local node; present iff `mode` is devnet.
    pub node: Option<Arc<Devnet>>,
    backend: Arc<dyn ChainBackend>,
}

impl Chain {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        mode: ChainMode,
        backend: Arc<dyn ChainBackend>,
    ) -> Result<Self, Error> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::NoChainId);
        }
        Ok(Chain {
            id,
            url: url.into(),
            mode,
            node: None,
            backend,
        })
    }

    /// Construct a devnet chain around its node supervisor.
    pub fn devnet(
        node: Arc<Devnet>,
        backend: Arc<dyn ChainBackend>,
    ) -> Result<Self, Error> {
        let chain = Chain::new(
            node.chain_id(),
            node.url(),
            ChainMode::Devnet,
            backend,
        )?;
        Ok(chain.with_node(node))
    }

    /// Attach a devnet node. On a non-devnet chain the node is ignored
    /// with a warning; on devnet, the node's id and url win over whatever
    /// the chain was constructed with.
    pub fn with_node(mut self, node: Arc<Devnet>) -> Self {
        if self.mode != ChainMode::Devnet {
            warn!(
                chain = %self.id,
                "devnet node ignored on non-devnet chain"
            );
            return self;
        }
        let node_id = node.chain_id();
        if self.id != node_id {
            warn!(
                chain = %self.id,
                node = %node_id,
                "chain id overridden by devnet node"
            );
            self.id = node_id;
        }
        let node_url = node.url();
        if self.url != node_url {
            warn!(
                chain = %self.url,
                node = %node_url,
                "chain url overridden by devnet node"
            );
            self.url = node_url;
        }
        self.node = Some(node);
        self
    }

    pub fn is_devnet(&self) -> bool {
        self.mode == ChainMode::Devnet
    }

    pub fn is_mocknet(&self) -> bool {
        self.mode == ChainMode::Mocknet
    }

    pub fn dev_mode(&self) -> bool {
        self.is_devnet() || self.is_mocknet()
    }

    pub async fn height(&self) -> Result<u64, Error> {
        self.backend.block_height().await
    }

    /// Resolve once the block height strictly exceeds the height at the
    /// time of the call. Polls; cancellation is the caller's business.
    pub async fn next_block(&self) -> Result<u64, Error> {
        let start = self.height().await?;
        loop {
            tokio::time::sleep(NEXT_BLOCK_POLL).await;
            let height = self.height().await?;
            if height > start {
                return Ok(height);
            }
        }
    }

    pub async fn balance(
        &self,
        denom: &str,
        address: &str,
    ) -> Result<u128, Error> {
        self.backend.balance(denom, address).await
    }

    pub async fn query(
        &self,
        contract: &ContractLink,
        msg: &Value,
    ) -> Result<Value, Error> {
        self.backend.query(contract, msg).await
    }

    pub async fn code_id_of(&self, address: &str) -> Result<String, Error> {
        self.backend.code_id_of(address).await
    }

    pub async fn label_of(&self, address: &str) -> Result<String, Error> {
        self.backend.label_of(address).await
    }

    pub async fn code_hash_of_address(
        &self,
        address: &str,
    ) -> Result<String, Error> {
        self.backend.code_hash_of_address(address).await
    }

    pub async fn code_hash_of_code_id(
        &self,
        code_id: &str,
    ) -> Result<String, Error> {
        self.backend.code_hash_of_code_id(code_id).await
    }

    /// Fetch the code hash at `address` and compare it against the
    /// expected one, if given. Mismatch warns but the fetched hash is
    /// still returned.
    pub async fn check_hash(
        &self,
        address: &str,
        expected: Option<&str>,
    ) -> Result<String, Error> {
        let fetched = self.code_hash_of_address(address).await?;
        match expected {
            Some(expected) if expected != fetched => warn!(
                %address,
                %expected,
                %fetched,
                "code hash mismatch"
            ),
            None => warn!(%address, %fetched, "no code hash supplied"),
            _ => {}
        }
        Ok(fetched)
    }

    /// Acquire an agent. On devnet, a name without a mnemonic resolves
    /// through the node's genesis accounts.
    pub async fn agent(
        &self,
        mut opts: AgentOpts,
    ) -> Result<Arc<dyn Agent>, Error> {
        if opts.mnemonic.is_none() && opts.name.is_some() {
            match &self.node {
                Some(node) if self.is_devnet() => {
                    let name = opts.name.as_deref().expect("name is present");
                    let genesis = node.genesis_account(name)?;
                    opts.mnemonic = genesis.mnemonic;
                    if opts.address.is_none() {
                        opts.address = genesis.address;
                    }
                }
                _ if self.is_mocknet() => {}
                _ => return Err(Error::NameOutsideDevnet),
            }
        }
        self.backend.authenticate(self, opts).await
    }
}

/// An authenticated identity on a chain.
///
/// Write operations are backend-specific; reads have default
/// implementations that delegate to the chain. [`crate::Bundle`] is also
/// an agent, with the reads overridden to enforce bundle discipline.
#[async_trait]
pub trait Agent: Send + Sync {
    fn chain(&self) -> &Chain;
    fn address(&self) -> &str;
    fn name(&self) -> &str;
    fn fees(&self) -> Option<&Fees> {
        None
    }

    async fn height(&self) -> Result<u64, Error> {
        self.chain().height().await
    }

    async fn next_block(&self) -> Result<u64, Error> {
        self.chain().next_block().await
    }

    async fn balance(&self, denom: &str) -> Result<u128, Error> {
        self.chain().balance(denom, self.address()).await
    }

    async fn query(
        &self,
        contract: &ContractLink,
        msg: &Value,
    ) -> Result<Value, Error> {
        self.chain().query(contract, msg).await
    }

    async fn send(
        &self,
        to: &str,
        coins: &[Coin],
    ) -> Result<TxResult, Error>;

    async fn send_many(
        &self,
        txs: &[(String, Vec<Coin>)],
    ) -> Result<TxResult, Error>;

    async fn upload(&self, code: &[u8]) -> Result<UploadedTemplate, Error>;

    async fn upload_many(
        &self,
        blobs: &[Vec<u8>],
    ) -> Vec<Result<UploadedTemplate, Error>> {
        futures::future::join_all(blobs.iter().map(|b| self.upload(b)))
            .await
    }

    async fn instantiate(
        &self,
        template: &UploadedTemplate,
        label: &Label,
        init_msg: Value,
    ) -> Result<ContractInstance, Error>;

    async fn instantiate_many(
        &self,
        template: &UploadedTemplate,
        specs: Vec<(Label, Value)>,
    ) -> Vec<Result<ContractInstance, Error>> {
        let futs = specs
            .iter()
            .map(|(label, msg)| self.instantiate(template, label, msg.clone()));
        let mut results = futures::future::join_all(futs).await;
        for instance in results.iter_mut().flatten() {
            instance.uploaded.template.code_hash =
                template.template.code_hash.clone();
        }
        results
    }

    async fn execute(
        &self,
        contract: &ContractLink,
        msg: &Value,
        send: &[Coin],
    ) -> Result<TxResult, Error>;

    /// Broadcast a batch of messages as one atomic transaction, in order.
    async fn submit_bundle(
        &self,
        msgs: Vec<BundleMsg>,
        memo: Option<String>,
    ) -> Result<TxResult, Error>;
}

/// Handle to one instantiated contract through one agent.
#[derive(Clone)]
pub struct Client {
    pub link: ContractLink,
    agent: Arc<dyn Agent>,
}

impl Client {
    pub fn new(agent: Arc<dyn Agent>, link: ContractLink) -> Self {
        Client { agent, link }
    }

    pub fn from_instance(
        agent: Arc<dyn Agent>,
        instance: &ContractInstance,
    ) -> Result<Self, Error> {
        Ok(Client {
            agent,
            link: instance.link()?,
        })
    }

    /// The same contract through a different executor, e.g. a bundle.
    pub fn with_agent(&self, agent: Arc<dyn Agent>) -> Self {
        Client {
            agent,
            link: self.link.clone(),
        }
    }

    pub async fn execute(&self, msg: &Value) -> Result<TxResult, Error> {
        self.agent.execute(&self.link, msg, &[]).await
    }

    pub async fn query(&self, msg: &Value) -> Result<Value, Error> {
        self.agent.query(&self.link, msg).await
    }
}

/// A chain known to the registry, selectable via `FADROMA_CHAIN`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainDesc {
    pub key: &'static str,
    pub mode: ChainMode,
    pub chain_id: &'static str,
    pub url: &'static str,
}

pub const KNOWN_CHAINS: &[ChainDesc] = &[
    ChainDesc {
        key: "Mocknet",
        mode: ChainMode::Mocknet,
        chain_id: "mocknet",
        url: "mock://",
    },
    ChainDesc {
        key: "ScrtDevnet",
        mode: ChainMode::Devnet,
        chain_id: "fadroma-devnet",
        url: "http://localhost:1317",
    },
    ChainDesc {
        key: "ScrtTestnet",
        mode: ChainMode::Testnet,
        chain_id: "pulsar-2",
        url: "https://lcd.testnet.secretsaturn.net",
    },
    ChainDesc {
        key: "ScrtMainnet",
        mode: ChainMode::Mainnet,
        chain_id: "secret-4",
        url: "https://lcd.mainnet.secretsaturn.net",
    },
];

/// Resolve the chain selected by the configuration.
pub fn selected_chain(config: &Config) -> Result<&'static ChainDesc, Error> {
    let key = config.chain.as_deref().ok_or(Error::NoChainSelected)?;
    KNOWN_CHAINS
        .iter()
        .find(|desc| desc.key == key)
        .ok_or_else(|| Error::UnknownChainSelected(key.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_selection_validates_the_registry_key() {
        let mut config = Config::default();
        assert!(matches!(
            selected_chain(&config),
            Err(Error::NoChainSelected)
        ));

        config.chain = Some("NoSuchChain".into());
        assert!(matches!(
            selected_chain(&config),
            Err(Error::UnknownChainSelected(_))
        ));

        config.chain = Some("Mocknet".into());
        let desc = selected_chain(&config).expect("known chain");
        assert_eq!(desc.mode, ChainMode::Mocknet);
    }
}
