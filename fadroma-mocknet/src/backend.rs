// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! The simulated chain itself: uploaded code, live instances, balances.
//!
//! Code ids are assigned monotonically from 1. Instance addresses are
//! synthetic but deterministic, derived from `(code id, instance
//! ordinal)`. Each instance owns an isolated key-value store; other
//! instances reach it only through `query_chain`. A fresh WASM instance
//! is spun up for every call and dropped afterwards.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use fadroma::code_hash_of;

use crate::conv::{b64_to_bytes, bytes_to_b64, CallResult};
use crate::guest::{HostEnv, WrappedGuest};
use crate::Error;

#[derive(Clone)]
struct CodeEntry {
    code_hash: String,
    wasm: Arc<Vec<u8>>,
}

#[derive(Clone)]
pub(crate) struct ContractSlot {
    pub code_id: u64,
    pub code_hash: String,
    pub label: String,
    pub wasm: Arc<Vec<u8>>,
    pub storage: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

/// Rollback point for atomic batches.
pub(crate) struct Snapshot {
    contracts: BTreeMap<String, (ContractSlot, BTreeMap<Vec<u8>, Vec<u8>>)>,
    instance_counter: u64,
    height: u64,
}

struct MocknetInner {
    chain_id: String,
    height: AtomicU64,
    instance_counter: AtomicU64,
    codes: RwLock<Vec<CodeEntry>>,
    contracts: RwLock<BTreeMap<String, ContractSlot>>,
    balances: RwLock<BTreeMap<String, BTreeMap<String, u128>>>,
}

/// An in-process chain. Cheap to clone; clones share all state, which
/// lives for the lifetime of the last handle.
#[derive(Clone)]
pub struct Mocknet {
    inner: Arc<MocknetInner>,
}

impl Mocknet {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Mocknet {
            inner: Arc::new(MocknetInner {
                chain_id: chain_id.into(),
                height: AtomicU64::new(1),
                instance_counter: AtomicU64::new(0),
                codes: RwLock::new(Vec::new()),
                contracts: RwLock::new(BTreeMap::new()),
                balances: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn chain_id(&self) -> String {
        self.inner.chain_id.clone()
    }

    pub fn height(&self) -> u64 {
        self.inner.height.load(Ordering::SeqCst)
    }

    fn bump_height(&self) -> u64 {
        self.inner.height.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Store a WASM blob, assigning the next code id.
    pub fn upload(&self, wasm: &[u8]) -> (u64, String) {
        let code_hash = code_hash_of(wasm);
        let mut codes = self.inner.codes.write();
        codes.push(CodeEntry {
            code_hash: code_hash.clone(),
            wasm: Arc::new(wasm.to_vec()),
        });
        let code_id = codes.len() as u64;
        debug!(%code_id, %code_hash, "code stored");
        (code_id, code_hash)
    }

    fn code(&self, code_id: u64) -> Result<CodeEntry, Error> {
        self.inner
            .codes
            .read()
            .get(code_id.wrapping_sub(1) as usize)
            .cloned()
            .ok_or_else(|| Error::NoSuchCode(code_id.to_string()))
    }

    pub fn code_hash_of_code_id(&self, code_id: u64) -> Result<String, Error> {
        Ok(self.code(code_id)?.code_hash)
    }

    fn slot(&self, address: &str) -> Result<ContractSlot, Error> {
        self.inner
            .contracts
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| Error::NoSuchContract(address.to_owned()))
    }

    pub fn code_id_of(&self, address: &str) -> Result<u64, Error> {
        Ok(self.slot(address)?.code_id)
    }

    pub fn label_of(&self, address: &str) -> Result<String, Error> {
        Ok(self.slot(address)?.label)
    }

    pub fn code_hash_of_address(
        &self,
        address: &str,
    ) -> Result<String, Error> {
        Ok(self.slot(address)?.code_hash)
    }

    pub fn balance(&self, denom: &str, address: &str) -> u128 {
        self.inner
            .balances
            .read()
            .get(address)
            .and_then(|coins| coins.get(denom))
            .copied()
            .unwrap_or(0)
    }

    /// Seed an account, e.g. a test identity.
    pub fn fund(&self, address: &str, denom: &str, amount: u128) {
        *self
            .inner
            .balances
            .write()
            .entry(address.to_owned())
            .or_default()
            .entry(denom.to_owned())
            .or_default() += amount;
    }

    pub fn transfer(
        &self,
        from: &str,
        to: &str,
        denom: &str,
        amount: u128,
    ) -> Result<(), Error> {
        let mut balances = self.inner.balances.write();
        let available = balances
            .get(from)
            .and_then(|coins| coins.get(denom))
            .copied()
            .unwrap_or(0);
        if available < amount {
            return Err(Error::InsufficientFunds {
                address: from.to_owned(),
                denom: denom.to_owned(),
            });
        }
        *balances
            .entry(from.to_owned())
            .or_default()
            .entry(denom.to_owned())
            .or_default() -= amount;
        *balances
            .entry(to.to_owned())
            .or_default()
            .entry(denom.to_owned())
            .or_default() += amount;
        Ok(())
    }

    /// Instantiate a fresh contract. Returns the new address and the
    /// parsed `{Ok|Err}` result; on a contract-level error no instance is
    /// recorded and the address is `None`.
    pub fn instantiate(
        &self,
        sender: &str,
        code_id: u64,
        label: &str,
        init_msg: &[u8],
    ) -> Result<(Option<String>, Value), Error> {
        let code = self.code(code_id)?;
        {
            let contracts = self.inner.contracts.read();
            if contracts.values().any(|slot| slot.label == label) {
                return Err(Error::LabelTaken(label.to_owned()));
            }
        }
        let ordinal =
            self.inner.instance_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let address = synth_address(code_id, ordinal);
        let storage = Arc::new(Mutex::new(BTreeMap::new()));

        let env = self.call_env(sender, &address, &code.code_hash);
        let mut guest = WrappedGuest::new(
            &code.wasm,
            HostEnv {
                storage: storage.clone(),
                backend: self.clone(),
                memory: None,
                allocate: None,
            },
        )?;
        let result = guest.init(&env, init_msg)?;
        drop(guest);

        match result {
            CallResult::Ok(ok) => {
                self.inner.contracts.write().insert(
                    address.clone(),
                    ContractSlot {
                        code_id,
                        code_hash: code.code_hash,
                        label: label.to_owned(),
                        wasm: code.wasm,
                        storage,
                    },
                );
                self.bump_height();
                debug!(%address, %label, "instantiated");
                Ok((Some(address), json!({ "Ok": ok })))
            }
            CallResult::Err(err) => Ok((None, json!({ "Err": err }))),
        }
    }

    /// Execute `handle` on a live instance. A contract-level error rolls
    /// the instance's storage back to the pre-call state.
    pub fn execute(
        &self,
        sender: &str,
        address: &str,
        msg: &[u8],
    ) -> Result<Value, Error> {
        let slot = self.slot(address)?;
        let rollback = slot.storage.lock().clone();

        let env = self.call_env(sender, address, &slot.code_hash);
        let mut guest = WrappedGuest::new(
            &slot.wasm,
            HostEnv {
                storage: slot.storage.clone(),
                backend: self.clone(),
                memory: None,
                allocate: None,
            },
        )?;
        let result = guest.handle(&env, msg)?;
        drop(guest);

        match result {
            CallResult::Ok(ok) => {
                self.bump_height();
                Ok(json!({ "Ok": ok }))
            }
            CallResult::Err(err) => {
                *slot.storage.lock() = rollback;
                Ok(json!({ "Err": err }))
            }
        }
    }

    /// Run `query` on a live instance, returning the raw `{Ok|Err}`
    /// result where `Ok` holds base64-encoded bytes.
    pub fn query_raw(
        &self,
        address: &str,
        msg: &[u8],
    ) -> Result<Value, Error> {
        let slot = self.slot(address)?;
        let mut guest = WrappedGuest::new(
            &slot.wasm,
            HostEnv {
                storage: slot.storage.clone(),
                backend: self.clone(),
                memory: None,
                allocate: None,
            },
        )?;
        let result = guest.query(msg)?;
        Ok(result.to_value())
    }

    /// Smart query: decode the `Ok` payload base64 → UTF-8 → JSON.
    pub fn query(&self, address: &str, msg: &Value) -> Result<Value, Error> {
        let raw = self.query_raw(address, &serde_json::to_vec(msg)?)?;
        match raw.get("Ok") {
            Some(Value::String(encoded)) => {
                Ok(serde_json::from_slice(&b64_to_bytes(encoded)?)?)
            }
            _ => Err(Error::Contract(
                raw.get("Err").cloned().unwrap_or(raw),
            )),
        }
    }

    /// The querier entry point used by `query_chain`. Never fails:
    /// system-level errors are encoded in the response envelope.
    pub(crate) fn handle_query_request(&self, request: &[u8]) -> Vec<u8> {
        let response = self.route_query(request).unwrap_or_else(|e| {
            json!({ "Err": { "generic_err": { "msg": e.to_string() } } })
        });
        serde_json::to_vec(&response).expect("response envelope serializes")
    }

    fn route_query(&self, request: &[u8]) -> Result<Value, Error> {
        let request: Value = serde_json::from_slice(request)?;
        let smart = &request["wasm"]["smart"];
        if smart.is_null() {
            return Ok(json!({
                "Err": { "generic_err": { "msg": "unsupported query request" } }
            }));
        }
        let contract_addr = smart["contract_addr"]
            .as_str()
            .ok_or_else(|| Error::InvalidAddress("missing".into()))?;
        let msg = b64_to_bytes(
            smart["msg"].as_str().unwrap_or_default(),
        )?;
        // outer Ok: the system located the contract; inner value is the
        // contract's own result
        let result = self.query_raw(contract_addr, &msg)?;
        Ok(json!({ "Ok": result }))
    }

    fn call_env(&self, sender: &str, address: &str, code_hash: &str) -> Value {
        let height = self.height();
        json!({
            "block": {
                "height": height,
                "time": 1_600_000_000u64 + height * 5,
                "chain_id": self.inner.chain_id,
            },
            "message": {
                "sender": sender,
                "sent_funds": [],
            },
            "contract": { "address": address },
            "contract_key": "",
            "contract_code_hash": code_hash,
        })
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let contracts = self
            .inner
            .contracts
            .read()
            .iter()
            .map(|(address, slot)| {
                let data = slot.storage.lock().clone();
                (address.clone(), (slot.clone(), data))
            })
            .collect();
        Snapshot {
            contracts,
            instance_counter: self.inner.instance_counter.load(Ordering::SeqCst),
            height: self.height(),
        }
    }

    pub(crate) fn restore(&self, snapshot: Snapshot) {
        let restored = snapshot
            .contracts
            .into_iter()
            .map(|(address, (slot, data))| {
                *slot.storage.lock() = data;
                (address, slot)
            })
            .collect();
        *self.inner.contracts.write() = restored;
        self.inner
            .instance_counter
            .store(snapshot.instance_counter, Ordering::SeqCst);
        self.inner.height.store(snapshot.height, Ordering::SeqCst);
    }

    /// Encode a smart-query request the way contracts send them through
    /// `query_chain`.
    pub fn smart_query_request(contract_addr: &str, msg: &Value) -> Value {
        json!({
            "wasm": {
                "smart": {
                    "contract_addr": contract_addr,
                    "msg": bytes_to_b64(
                        &serde_json::to_vec(msg)
                            .expect("query message serializes"),
                    ),
                }
            }
        })
    }
}

fn synth_address(code_id: u64, ordinal: u64) -> String {
    let digest = Sha256::digest(format!("{code_id}/{ordinal}").as_bytes());
    format!("mocknet1{}", &hex::encode(digest)[..32])
}
