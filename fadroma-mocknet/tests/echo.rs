// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

mod common;

use fadroma_mocknet::{Error, Mocknet};
use serde_json::json;

const SENDER: &str = "mocknet1admin";

fn deployed_echo(net: &Mocknet) -> Result<String, Error> {
    let (code_id, _) = net.upload(&common::echo());
    let (address, _) = net.instantiate(
        SENDER,
        code_id,
        "echo",
        &serde_json::to_vec(&json!({ "fail": false }))?,
    )?;
    Ok(address.expect("init succeeds"))
}

#[test]
fn init_logs_its_message_base64_encoded() -> Result<(), Error> {
    let net = Mocknet::new("mocknet-1");
    let (code_id, _) = net.upload(&common::echo());
    let (address, response) = net.instantiate(
        SENDER,
        code_id,
        "echo",
        &serde_json::to_vec(&json!({ "fail": false }))?,
    )?;
    assert!(address.is_some());
    assert_eq!(
        response,
        json!({
            "Ok": {
                "messages": [],
                "log": [{
                    "encrypted": true,
                    "key": "Echo",
                    "value": "eyJmYWlsIjpmYWxzZX0=",
                }],
            }
        })
    );
    Ok(())
}

#[test]
fn failing_init_records_no_instance() -> Result<(), Error> {
    let net = Mocknet::new("mocknet-1");
    let (code_id, _) = net.upload(&common::echo());
    let (address, response) = net.instantiate(
        SENDER,
        code_id,
        "echo",
        &serde_json::to_vec(&json!({ "fail": true }))?,
    )?;
    assert_eq!(address, None);
    assert_eq!(
        response,
        json!({
            "Err": { "generic_err": { "msg": "caller requested failure" } }
        })
    );
    Ok(())
}

#[test]
fn handle_echoes_and_fails_on_demand() -> Result<(), Error> {
    let net = Mocknet::new("mocknet-1");
    let address = deployed_echo(&net)?;

    let ok = net.execute(SENDER, &address, br#""echo""#)?;
    assert_eq!(
        ok,
        json!({
            "Ok": { "messages": [], "log": [], "data": "ImVjaG8i" }
        })
    );

    let err = net.execute(SENDER, &address, br#""fail""#)?;
    assert_eq!(
        err,
        json!({
            "Err": {
                "generic_err": { "msg": "this transaction always fails" }
            }
        })
    );
    Ok(())
}

#[test]
fn query_payload_is_base64_of_json() -> Result<(), Error> {
    let net = Mocknet::new("mocknet-1");
    let address = deployed_echo(&net)?;

    let raw = net.query_raw(&address, br#""echo""#)?;
    assert_eq!(raw, json!({ "Ok": "ImVjaG8i" }));

    // the smart query path decodes base64 → UTF-8 → JSON
    let smart = net.query(&address, &json!("echo"))?;
    assert_eq!(smart, json!("echo"));
    Ok(())
}
