// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! Guest fixtures, kept as WAT so the suite needs no wasm toolchain.

#![allow(dead_code)]

/// Canned echo contract: `init({"fail":false})` logs its message,
/// `handle("echo")`/`query("echo")` return `"echo"`, `handle("fail")`
/// always fails.
pub fn echo() -> Vec<u8> {
    compile(include_bytes!("../fixtures/echo.wat"))
}

/// Single-slot KV contract over the `db_*` imports.
pub fn kv() -> Vec<u8> {
    compile(include_bytes!("../fixtures/kv.wat"))
}

/// Forwards its query message through `query_chain` and reports whether
/// the response was the expected one.
pub fn relay() -> Vec<u8> {
    compile(include_bytes!("../fixtures/relay.wat"))
}

fn compile(wat: &[u8]) -> Vec<u8> {
    wasmer::wat2wasm(wat)
        .expect("fixture contract compiles")
        .into_owned()
}
