// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! In-process CosmWasm execution host.
//!
//! A [`Mocknet`] simulates a chain without a node or a network: contracts
//! are uploaded as WASM blobs, instantiated at deterministic synthetic
//! addresses, and driven through the CosmWasm calling convention — the
//! Region-based guest/host ABI with entry points `init`, `handle` and
//! `query` returning JSON `{Ok|Err}` results.
//!
//! Each instance owns an isolated key-value store reachable from other
//! instances only via the `query_chain` import. A fresh WASM instance is
//! created per call and discarded afterwards, so no guest state survives
//! a call except what went through storage. Gas metering is a no-op.
//!
//! The mocknet implements the `fadroma` chain/agent capability set
//! ([`Mocknet::chain`]), so the same deployment code that targets a real
//! network runs against it unchanged, just faster and deterministically.
//!
//! # Usage
//! ```no_run
//! use fadroma::{Agent, AgentOpts, Label};
//! use fadroma_mocknet::Mocknet;
//! use serde_json::json;
//!
//! # async fn run(wasm: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let net = Mocknet::new("mocknet-1");
//! let chain = net.chain()?;
//! let agent = chain.agent(AgentOpts::default()).await?;
//! let template = agent.upload(wasm).await?;
//! let label = Label::new(None, "counter", None)?;
//! let counter = agent.instantiate(&template, &label, json!({})).await?;
//! let value = agent.query(&counter.link()?, &json!("status")).await?;
//! # Ok(())
//! # }
//! ```

mod agent;
mod backend;
mod conv;
mod error;
mod guest;
mod imports;

pub use agent::{MocknetAgent, MocknetBackend};
pub use backend::Mocknet;
pub use conv::{
    b64_to_bytes, b64_to_utf8, bytes_to_b64, canonize, humanize,
    utf8_to_b64, CallResult,
};
pub use error::Error;
pub use guest::{Region, REGION_SIZE};
