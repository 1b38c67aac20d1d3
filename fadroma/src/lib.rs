// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! Deterministic deployment pipeline for CosmWasm smart contracts.
//!
//! A contract advances through four lifecycle stages: source → artifact →
//! uploaded code → instantiated contract. Each stage is an idempotent,
//! memoized operation whose completion is persisted as a receipt, so
//! re-running a deployment reuses prior work instead of repeating
//! compilation, uploads, or instantiations.
//!
//! - [`ContractSource`] through [`ContractInstance`] model the stages;
//!   receipts are their flat union, [`ContractRecord`].
//! - [`Builder`] turns sources into deterministic WASM artifacts inside a
//!   pinned toolchain; the artifact's sha256 is the code hash.
//! - [`Uploader`] turns artifacts into chain code ids, cached by
//!   `(chain_id, code_hash)`.
//! - [`Deployment`] owns named [`Contract`]s and their receipt files;
//!   [`DeployStore`] keeps many deployments and a durable pointer to the
//!   active one.
//! - [`Chain`] and [`Agent`] abstract over backends (mainnet, testnet,
//!   devnet, mocknet); [`Bundle`] defers writes into one atomic batch.
//! - [`Devnet`] supervises an ephemeral local node for testing.
//!
//! # Usage
//! ```no_run
//! use fadroma::{AgentOpts, Chain, Deployment, Error};
//! use serde_json::json;
//!
//! async fn deploy(chain: Chain) -> Result<(), Error> {
//!     let agent = chain.agent(AgentOpts::default()).await?;
//!     let deployment = Deployment::new("2023-02-07").with_agent(agent);
//!     let token = deployment.contract("token");
//!     token.set_init_msg(json!({ "decimals": 6 }));
//!     let instance = token.deployed().await?;
//!     println!("{} is at {:?}", instance.label, instance.address);
//!     Ok(())
//! }
//! ```

mod builder;
mod bundle;
mod chain;
mod config;
mod contract;
mod deploy;
mod devnet;
mod error;
mod receipt;
mod uploader;
mod util;

pub use builder::{
    artifact_name, sanitize_crate, sanitize_path, Builder, ContainerBuilder,
    RawBuilder, DEFAULT_BUILD_IMAGE,
};
pub use bundle::{AgentExt, Bundle, BundleMsg, UnsignedBundle};
pub use chain::{
    selected_chain, Agent, AgentOpts, Chain, ChainBackend, ChainDesc,
    ChainMode, Client, Coin, Fees, TxResult, KNOWN_CHAINS,
};
pub use config::Config;
pub use contract::{
    code_hash_of, ContractInstance, ContractLink, ContractRecord,
    ContractSource, ContractTemplate, Label, UploadedTemplate, HEAD,
};
pub use deploy::{Contract, DeployStore, Deployment};
pub use devnet::{
    ContainerEngine, ContainerOpts, Devnet, DevnetState, DockerEngine,
    Platform, PortMode, DEFAULT_GENESIS_ACCOUNTS,
};
pub use error::Error;
pub use receipt::{
    read_json, write_json_atomic, UploadReceipt, UploadStore,
};
pub use uploader::Uploader;
