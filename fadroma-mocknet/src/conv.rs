// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! The wire conventions of the CosmWasm calling boundary.
//!
//! Contracts speak JSON; `Binary`-typed fields within that JSON are
//! base64-encoded UTF-8 JSON. Call results come back externally tagged as
//! `{"Ok": …}` or `{"Err": …}`. Addresses cross the boundary through a
//! reversible, length-preserving canonical encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::Error;

pub fn utf8_to_b64(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

pub fn b64_to_utf8(encoded: &str) -> Result<String, Error> {
    Ok(String::from_utf8(STANDARD.decode(encoded)?)?)
}

pub fn bytes_to_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn b64_to_bytes(encoded: &str) -> Result<Vec<u8>, Error> {
    Ok(STANDARD.decode(encoded)?)
}

/// Canonical form of a human address. Total over valid addresses, and
/// exactly inverted by [`humanize`].
pub fn canonize(human: &str) -> Result<Vec<u8>, Error> {
    if human.is_empty() {
        return Err(Error::InvalidAddress("empty address".into()));
    }
    Ok(human.as_bytes().to_vec())
}

pub fn humanize(canonical: &[u8]) -> Result<String, Error> {
    if canonical.is_empty() {
        return Err(Error::InvalidAddress("empty address".into()));
    }
    Ok(String::from_utf8(canonical.to_vec())?)
}

/// What a contract entry point returns, parsed from its result region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CallResult {
    Ok(Value),
    Err(Value),
}

impl CallResult {
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The shape a guest trap surfaces as.
    pub fn from_trap(msg: &str) -> Self {
        CallResult::Err(json!({ "generic_err": { "msg": msg } }))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CallResult::Ok(_))
    }

    pub fn to_value(&self) -> Value {
        match self {
            CallResult::Ok(ok) => json!({ "Ok": ok }),
            CallResult::Err(err) => json!({ "Err": err }),
        }
    }

    pub fn into_result(self) -> Result<Value, Error> {
        match self {
            CallResult::Ok(ok) => Ok(ok),
            CallResult::Err(err) => Err(Error::Contract(err)),
        }
    }
}
