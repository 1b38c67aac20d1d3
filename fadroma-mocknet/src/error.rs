// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    InstantiationError(Box<wasmer::InstantiationError>),
    #[error(transparent)]
    CompileError(Box<wasmer::CompileError>),
    #[error(transparent)]
    ExportError(Box<wasmer::ExportError>),
    #[error(transparent)]
    RuntimeError(wasmer::RuntimeError),
    #[error(transparent)]
    MemoryAccessError(Box<wasmer::MemoryAccessError>),
    #[error("contract returned an error: {0}")]
    Contract(Value),
    #[error("region too small: capacity {capacity}, need {length}")]
    RegionTooSmall { capacity: u32, length: u32 },
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("no such code id: {0}")]
    NoSuchCode(String),
    #[error("no such contract: {0}")]
    NoSuchContract(String),
    #[error("label already taken: {0}")]
    LabelTaken(String),
    #[error("insufficient funds: {address} has no {denom}")]
    InsufficientFunds { address: String, denom: String },
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Core(#[from] fadroma::Error),
}

impl From<wasmer::InstantiationError> for Error {
    fn from(e: wasmer::InstantiationError) -> Self {
        Error::InstantiationError(Box::from(e))
    }
}

impl From<wasmer::CompileError> for Error {
    fn from(e: wasmer::CompileError) -> Self {
        Error::CompileError(Box::from(e))
    }
}

impl From<wasmer::ExportError> for Error {
    fn from(e: wasmer::ExportError) -> Self {
        Error::ExportError(Box::from(e))
    }
}

impl From<wasmer::RuntimeError> for Error {
    fn from(e: wasmer::RuntimeError) -> Self {
        Error::RuntimeError(e)
    }
}

impl From<wasmer::MemoryAccessError> for Error {
    fn from(e: wasmer::MemoryAccessError) -> Self {
        Error::MemoryAccessError(Box::from(e))
    }
}
