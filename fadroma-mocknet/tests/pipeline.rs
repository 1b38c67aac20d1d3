// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! The mocknet driven through the chain-agnostic pipeline surface.

mod common;

use std::sync::Arc;

use serde_json::json;

use fadroma::{
    Agent, AgentExt, AgentOpts, ChainMode, Error, Label,
};
use fadroma_mocknet::Mocknet;

#[tokio::test]
async fn the_full_agent_surface_works_in_process() -> Result<(), Error> {
    let net = Mocknet::new("mocknet-1");
    let chain = net.chain()?;
    assert_eq!(chain.mode, ChainMode::Mocknet);
    assert!(chain.dev_mode());

    // names don't need mnemonics on mocknet
    let agent = chain
        .agent(AgentOpts {
            name: Some("admin".into()),
            ..Default::default()
        })
        .await?;

    let kv = agent.upload(&common::kv()).await?;
    assert_eq!(kv.code_id, "1");
    let echo = agent.upload(&common::echo()).await?;
    assert_eq!(echo.code_id, "2");

    let label = Label::new(Some("deploy-1"), "kv", None)?;
    let instance = agent
        .instantiate(&kv, &label, json!({ "value": "foo" }))
        .await?;
    let address = instance
        .address
        .clone()
        .expect("live instance has an address");
    assert!(address.starts_with("mocknet1"));
    assert_eq!(instance.label, "deploy-1/kv");

    // chain reads resolve against the live instance
    assert_eq!(chain.code_id_of(&address).await?, "1");
    assert_eq!(chain.label_of(&address).await?, "deploy-1/kv");
    assert_eq!(
        chain.code_hash_of_address(&address).await?,
        kv.template.code_hash
    );
    let fetched = chain
        .check_hash(&address, Some(kv.template.code_hash.as_str()))
        .await?;
    assert_eq!(fetched, kv.template.code_hash);

    let link = instance.link()?;
    assert_eq!(agent.query(&link, &json!("get")).await?, json!("foo"));

    let height_before = chain.height().await?;
    agent
        .execute(&link, &json!({ "set": "bar" }), &[])
        .await?;
    assert_eq!(agent.query(&link, &json!("get")).await?, json!("bar"));
    assert!(chain.height().await? > height_before);
    Ok(())
}

#[tokio::test]
async fn failed_bundles_roll_back_atomically() -> Result<(), Error> {
    let net = Mocknet::new("mocknet-1");
    let chain = net.chain()?;
    let agent = chain.agent(AgentOpts::default()).await?;

    let kv = agent.upload(&common::kv()).await?;
    let label = Label::new(Some("deploy-1"), "kv", None)?;
    let instance = agent
        .instantiate(&kv, &label, json!({ "value": "foo" }))
        .await?;
    let link = instance.link()?;

    // second message is refused by the contract: the first must not stick
    let bundle = agent.bundle();
    let link_for_bundle = link.clone();
    let result = bundle
        .wrap(|b| async move {
            let batched: Arc<dyn Agent> = Arc::new(b);
            batched
                .execute(&link_for_bundle, &json!({ "set": "bar" }), &[])
                .await?;
            batched
                .execute(&link_for_bundle, &json!("no-such-message"), &[])
                .await?;
            Ok(())
        })
        .await;
    assert!(result.is_err(), "bundle should fail as a whole");
    assert_eq!(agent.query(&link, &json!("get")).await?, json!("foo"));
    Ok(())
}

#[tokio::test]
async fn bundled_messages_execute_in_append_order() -> Result<(), Error> {
    let net = Mocknet::new("mocknet-1");
    let chain = net.chain()?;
    let agent = chain.agent(AgentOpts::default()).await?;

    let kv = agent.upload(&common::kv()).await?;
    let label = Label::new(Some("deploy-1"), "kv", None)?;
    let instance = agent
        .instantiate(&kv, &label, json!({ "value": "foo" }))
        .await?;
    let link = instance.link()?;

    // set then delete: only the append order produces an empty slot
    let bundle = agent.bundle();
    let link_for_bundle = link.clone();
    let submitted = bundle
        .wrap(|b| async move {
            let batched: Arc<dyn Agent> = Arc::new(b);
            batched
                .execute(&link_for_bundle, &json!({ "set": "bar" }), &[])
                .await?;
            batched
                .execute(&link_for_bundle, &json!("del"), &[])
                .await?;
            Ok(())
        })
        .await?;
    assert!(submitted.is_some());
    assert!(agent.query(&link, &json!("get")).await.is_err());
    Ok(())
}
