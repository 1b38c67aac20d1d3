// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

mod common;

use fadroma_mocknet::{Error, Mocknet};
use serde_json::json;

const SENDER: &str = "mocknet1admin";

fn deployed_kv(net: &Mocknet, label: &str) -> Result<String, Error> {
    let (code_id, _) = net.upload(&common::kv());
    deployed_kv_from(net, code_id, label)
}

fn deployed_kv_from(
    net: &Mocknet,
    code_id: u64,
    label: &str,
) -> Result<String, Error> {
    let (address, response) = net.instantiate(
        SENDER,
        code_id,
        label,
        &serde_json::to_vec(&json!({ "value": "foo" }))?,
    )?;
    assert!(response.get("Ok").is_some(), "init failed: {response}");
    Ok(address.expect("init succeeds"))
}

#[test]
fn storage_round_trips_through_the_db_imports() -> Result<(), Error> {
    let net = Mocknet::new("mocknet-1");
    let address = deployed_kv(&net, "kv")?;

    assert_eq!(net.query(&address, &json!("get"))?, json!("foo"));

    net.execute(SENDER, &address, &serde_json::to_vec(&json!({ "set": "bar" }))?)?;
    assert_eq!(net.query(&address, &json!("get"))?, json!("bar"));

    net.execute(SENDER, &address, br#""del""#)?;
    assert!(matches!(
        net.query(&address, &json!("get")),
        Err(Error::Contract(_))
    ));
    Ok(())
}

#[test]
fn instances_do_not_share_storage() -> Result<(), Error> {
    let net = Mocknet::new("mocknet-1");
    let (code_id, _) = net.upload(&common::kv());
    let first = deployed_kv_from(&net, code_id, "kv-1")?;
    let second = deployed_kv_from(&net, code_id, "kv-2")?;

    net.execute(SENDER, &first, &serde_json::to_vec(&json!({ "set": "bar" }))?)?;

    assert_eq!(net.query(&first, &json!("get"))?, json!("bar"));
    assert_eq!(net.query(&second, &json!("get"))?, json!("foo"));
    Ok(())
}

#[test]
fn state_survives_across_calls_but_not_failed_ones() -> Result<(), Error> {
    let net = Mocknet::new("mocknet-1");
    let address = deployed_kv(&net, "kv")?;

    // a rejected message rolls the storage back
    let rejected =
        net.execute(SENDER, &address, br#""no-such-message""#)?;
    assert!(rejected.get("Err").is_some());
    assert_eq!(net.query(&address, &json!("get"))?, json!("foo"));
    Ok(())
}
