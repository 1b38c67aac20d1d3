// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! The mocknet as a `fadroma` chain backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use fadroma::{
    Agent, AgentOpts, BundleMsg, Chain, ChainBackend, ChainMode, Coin,
    ContractInstance, ContractLink, ContractSource, ContractTemplate,
    Label, TxResult, UploadedTemplate,
};

use crate::backend::Mocknet;
use crate::Error;

type CoreResult<T> = Result<T, fadroma::Error>;

fn backend_err(stage: &'static str, e: Error) -> fadroma::Error {
    fadroma::Error::backend(stage, e)
}

impl Mocknet {
    /// A `Chain` handle over this mocknet, in `Mocknet` mode.
    pub fn chain(&self) -> CoreResult<Chain> {
        Chain::new(
            self.chain_id(),
            "mock://",
            ChainMode::Mocknet,
            Arc::new(MocknetBackend { net: self.clone() }),
        )
    }
}

pub struct MocknetBackend {
    net: Mocknet,
}

#[async_trait]
impl ChainBackend for MocknetBackend {
    async fn block_height(&self) -> CoreResult<u64> {
        Ok(self.net.height())
    }

    async fn balance(&self, denom: &str, address: &str) -> CoreResult<u128> {
        Ok(self.net.balance(denom, address))
    }

    async fn query(
        &self,
        contract: &ContractLink,
        msg: &Value,
    ) -> CoreResult<Value> {
        self.net
            .query(&contract.address, msg)
            .map_err(|e| backend_err("query", e))
    }

    async fn code_id_of(&self, address: &str) -> CoreResult<String> {
        self.net
            .code_id_of(address)
            .map(|id| id.to_string())
            .map_err(|e| backend_err("getCodeId", e))
    }

    async fn label_of(&self, address: &str) -> CoreResult<String> {
        self.net
            .label_of(address)
            .map_err(|e| backend_err("getLabel", e))
    }

    async fn code_hash_of_address(&self, address: &str) -> CoreResult<String> {
        self.net
            .code_hash_of_address(address)
            .map_err(|e| backend_err("getHash", e))
    }

    async fn code_hash_of_code_id(&self, code_id: &str) -> CoreResult<String> {
        let code_id = code_id.parse::<u64>().map_err(|_| {
            backend_err("getHash", Error::NoSuchCode(code_id.to_owned()))
        })?;
        self.net
            .code_hash_of_code_id(code_id)
            .map_err(|e| backend_err("getHash", e))
    }

    async fn authenticate(
        &self,
        chain: &Chain,
        opts: AgentOpts,
    ) -> CoreResult<Arc<dyn Agent>> {
        let name = opts.name.unwrap_or_else(|| "mocknet".to_owned());
        let address = opts
            .address
            .unwrap_or_else(|| format!("mocknet1{name}"));
        Ok(Arc::new(MocknetAgent {
            chain: chain.clone(),
            net: self.net.clone(),
            address,
            name,
        }))
    }
}

pub struct MocknetAgent {
    chain: Chain,
    net: Mocknet,
    address: String,
    name: String,
}

#[async_trait]
impl Agent for MocknetAgent {
    fn chain(&self) -> &Chain {
        &self.chain
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, to: &str, coins: &[Coin]) -> CoreResult<TxResult> {
        for coin in coins {
            let amount = coin.amount.parse::<u128>().map_err(|_| {
                backend_err(
                    "send",
                    Error::InvalidAddress(format!(
                        "bad amount: {}",
                        coin.amount
                    )),
                )
            })?;
            self.net
                .transfer(&self.address, to, &coin.denom, amount)
                .map_err(|e| backend_err("send", e))?;
        }
        Ok(TxResult {
            tx_hash: format!("mocknet-send-{}", self.net.height()),
            data: None,
            logs: Vec::new(),
        })
    }

    async fn send_many(
        &self,
        txs: &[(String, Vec<Coin>)],
    ) -> CoreResult<TxResult> {
        for (to, coins) in txs {
            self.send(to, coins).await?;
        }
        Ok(TxResult {
            tx_hash: format!("mocknet-send-{}", self.net.height()),
            data: None,
            logs: Vec::new(),
        })
    }

    async fn upload(&self, code: &[u8]) -> CoreResult<UploadedTemplate> {
        let (code_id, code_hash) = self.net.upload(code);
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
            upload_tx: Some(format!("mocknet-upload-{code_id}")),
        })
    }

    async fn instantiate(
        &self,
        template: &UploadedTemplate,
        label: &Label,
        init_msg: Value,
    ) -> CoreResult<ContractInstance> {
        let code_id = template.code_id.parse::<u64>().map_err(|_| {
            backend_err("init", Error::NoSuchCode(template.code_id.clone()))
        })?;
        let msg_bytes = serde_json::to_vec(&init_msg)
            .map_err(|e| backend_err("init", Error::Json(e)))?;
        let label_str = label.to_string();
        let (address, response) = self
            .net
            .instantiate(&self.address, code_id, &label_str, &msg_bytes)
            .map_err(|e| backend_err("init", e))?;
        let address = address.ok_or_else(|| {
            backend_err(
                "init",
                Error::Contract(
                    response.get("Err").cloned().unwrap_or(response),
                ),
            )
        })?;
        Ok(ContractInstance {
            uploaded: template.clone(),
            address: Some(address),
            label: label_str,
            prefix: label.prefix.clone(),
            name: label.name.clone(),
            suffix: label.suffix.clone(),
            init_by: Some(self.address.clone()),
            init_msg,
            init_tx: Some(format!("mocknet-init-{}", self.net.height())),
        })
    }

    async fn execute(
        &self,
        contract: &ContractLink,
        msg: &Value,
        _send: &[Coin],
    ) -> CoreResult<TxResult> {
        let msg_bytes = serde_json::to_vec(msg)
            .map_err(|e| backend_err("execute", Error::Json(e)))?;
        let response = self
            .net
            .execute(&self.address, &contract.address, &msg_bytes)
            .map_err(|e| backend_err("execute", e))?;
        match response.get("Ok") {
            Some(ok) => Ok(TxResult {
                tx_hash: format!("mocknet-tx-{}", self.net.height()),
                data: Some(ok.clone()),
                logs: ok
                    .get("log")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            }),
            None => Err(backend_err(
                "execute",
                Error::Contract(
                    response.get("Err").cloned().unwrap_or(response),
                ),
            )),
        }
    }

    /// Messages execute in append order against a snapshot; any failure
    /// restores it, so the batch is atomic.
    async fn submit_bundle(
        &self,
        msgs: Vec<BundleMsg>,
        _memo: Option<String>,
    ) -> CoreResult<TxResult> {
        let snapshot = self.net.snapshot();
        let mut logs = Vec::new();
        for msg in msgs {
            let result = match &msg {
                BundleMsg::Init {
                    code_id,
                    label,
                    msg: init_msg,
                    ..
                } => {
                    let template = UploadedTemplate {
                        template: ContractTemplate {
                            source: ContractSource::default(),
                            builder_id: None,
                            artifact: None,
                            code_hash: String::new(),
                        },
                        chain_id: self.chain.id.clone(),
                        code_id: code_id.clone(),
                        uploader_id: None,
                        upload_by: None,
                        upload_tx: None,
                    };
                    let label = label
                        .parse::<Label>()
                        .map_err(|e| backend_err("bundle", Error::Core(e)));
                    match label {
                        Ok(label) => self
                            .instantiate(&template, &label, init_msg.clone())
                            .await
                            .map(|instance| {
                                serde_json::json!({
                                    "init": instance.address
                                })
                            }),
                        Err(e) => Err(e),
                    }
                }
                BundleMsg::Exec {
                    contract,
                    code_hash,
                    msg: exec_msg,
                    funds,
                    ..
                } => self
                    .execute(
                        &ContractLink {
                            address: contract.clone(),
                            code_hash: code_hash.clone(),
                        },
                        exec_msg,
                        funds,
                    )
                    .await
                    .map(|tx| serde_json::json!({ "exec": tx.tx_hash })),
            };
            match result {
                Ok(log) => logs.push(log),
                Err(e) => {
                    self.net.restore(snapshot);
                    return Err(e);
                }
            }
        }
        Ok(TxResult {
            tx_hash: format!("mocknet-bundle-{}", self.net.height()),
            data: None,
            logs,
        })
    }
}
