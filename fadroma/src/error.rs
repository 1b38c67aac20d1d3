// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no chain id specified")]
    NoChainId,
    #[error("no chain selected")]
    NoChainSelected,
    #[error("unknown chain selected: {0}")]
    UnknownChainSelected(String),
    #[error("no crate specified for building")]
    NoCrate,
    #[error("no agent specified")]
    NoAgent,
    #[error("contract has no name")]
    NoName,
    #[error("missing label for instantiation")]
    NoInitLabel,
    #[error("missing init message for instantiation")]
    NoInitMessage,
    #[error("missing code id for instantiation")]
    NoInitCodeId,
    #[error("can't link to a contract with no address")]
    LinkNoAddress,
    #[error("agents can only be resolved by name on devnet")]
    NameOutsideDevnet,
    #[error("operation not allowed inside a bundle: {0}")]
    NotInBundle(&'static str),
    #[error("bundle contains no messages")]
    EmptyBundle,
    #[error("bundle has no underlying agent")]
    NoBundleAgent,
    #[error("invalid label: {0}")]
    InvalidLabel(String),
    #[error("build of crate {crate_name} failed: {reason}")]
    Build { crate_name: String, reason: String },
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("container engine: {0}")]
    Container(String),
    #[error("devnet: {0}")]
    Devnet(String),
    #[error("unknown genesis account: {0}")]
    UnknownGenesisAccount(String),
    #[error("{stage} failed: {source}")]
    Backend {
        stage: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap a backend-origin error, tagging it with the lifecycle stage
    /// that was being advanced when it occurred.
    pub fn backend<E>(stage: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Backend {
            stage,
            source: Box::new(source),
        }
    }
}
