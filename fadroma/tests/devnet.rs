// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use fadroma::{
    ContainerEngine, ContainerOpts, Devnet, Error, Platform,
};

/// Container runtime that only keeps books.
#[derive(Default)]
struct StubEngine {
    created: Mutex<Vec<ContainerOpts>>,
    running: Mutex<BTreeSet<String>>,
    counter: AtomicUsize,
}

#[async_trait]
impl ContainerEngine for StubEngine {
    async fn pull(&self, _image: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn create(&self, opts: &ContainerOpts) -> Result<String, Error> {
        let id = format!(
            "container-{}",
            self.counter.fetch_add(1, Ordering::SeqCst) + 1
        );
        self.created.lock().push(opts.clone());
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), Error> {
        self.running.lock().insert(id.to_owned());
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), Error> {
        self.running.lock().remove(id);
        Ok(())
    }

    async fn remove(&self, _id: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn is_running(&self, id: &str) -> Result<bool, Error> {
        Ok(self.running.lock().contains(id))
    }
}

#[tokio::test]
async fn spawn_persists_state_and_load_reattaches() -> Result<(), Error> {
    let root = tempfile::tempdir()?;
    let engine = Arc::new(StubEngine::default());

    let devnet = Devnet::new(
        engine.clone(),
        "fadroma-devnet-1",
        Platform::Scrt1_8,
        root.path(),
    );
    devnet.spawn().await?;

    let port = devnet.port();
    assert!(port >= 1024, "port {port} below the registered range");
    let state_file = root.path().join("fadroma-devnet-1").join("devnet.json");
    assert!(state_file.exists());

    devnet.kill().await?;
    assert!(!engine
        .is_running(&devnet.container_id().expect("container was created"))
        .await?);

    // a fresh supervisor over the same state directory sees the same node
    let revived = Devnet::new(
        engine.clone(),
        "fadroma-devnet-1",
        Platform::Scrt1_8,
        root.path(),
    );
    let state = revived.load()?.expect("state file is present");
    assert_eq!(state.chain_id, "fadroma-devnet-1");
    assert_eq!(state.port, port);
    assert_eq!(revived.port(), port);
    Ok(())
}

#[tokio::test]
async fn respawn_is_spawn_if_not_running() -> Result<(), Error> {
    let root = tempfile::tempdir()?;
    let engine = Arc::new(StubEngine::default());
    let devnet = Devnet::new(
        engine.clone(),
        "fadroma-devnet-2",
        Platform::Scrt1_2,
        root.path(),
    );

    devnet.respawn().await?;
    assert_eq!(engine.created.lock().len(), 1);

    // already running: no second container
    devnet.respawn().await?;
    assert_eq!(engine.created.lock().len(), 1);

    devnet.kill().await?;
    devnet.respawn().await?;
    assert_eq!(engine.created.lock().len(), 2);
    Ok(())
}

#[tokio::test]
async fn terminate_erases_the_state_directory() -> Result<(), Error> {
    let root = tempfile::tempdir()?;
    let engine = Arc::new(StubEngine::default());
    let devnet = Devnet::new(
        engine,
        "fadroma-devnet-3",
        Platform::Scrt1_5,
        root.path(),
    );
    devnet.spawn().await?;
    let state_dir = root.path().join("fadroma-devnet-3");
    assert!(state_dir.exists());

    devnet.terminate().await?;
    assert!(!state_dir.exists());
    Ok(())
}

#[tokio::test]
async fn container_publishes_the_platform_port() -> Result<(), Error> {
    let root = tempfile::tempdir()?;
    let engine = Arc::new(StubEngine::default());
    let devnet = Devnet::new(
        engine.clone(),
        "fadroma-devnet-4",
        Platform::Scrt1_3,
        root.path(),
    );
    devnet.spawn().await?;

    let created = engine.created.lock();
    assert_eq!(created[0].container_port, 9091, "grpcWeb variant");
    assert_eq!(created[0].name, "fadroma-devnet-fadroma-devnet-4");
    Ok(())
}

#[test]
fn genesis_identities_are_deterministic() -> Result<(), Error> {
    let root = tempfile::tempdir()?;
    let engine = Arc::new(StubEngine::default());
    let a = Devnet::new(
        engine.clone(),
        "fadroma-devnet-5",
        Platform::Scrt1_8,
        root.path(),
    );
    let b = Devnet::new(
        engine.clone(),
        "fadroma-devnet-5",
        Platform::Scrt1_8,
        root.path(),
    );

    let first = a.genesis_account("ADMIN")?;
    let again = b.genesis_account("ADMIN")?;
    assert_eq!(first, again, "same identity across reruns");
    assert!(first.mnemonic.is_some());
    assert!(first.address.as_deref().unwrap().starts_with("secret1"));

    let other = a.genesis_account("ALICE")?;
    assert_ne!(first.address, other.address);

    // a different chain id yields a different identity for the same name
    let elsewhere = Devnet::new(
        engine,
        "fadroma-devnet-6",
        Platform::Scrt1_8,
        root.path(),
    );
    assert_ne!(first.address, elsewhere.genesis_account("ADMIN")?.address);

    assert!(matches!(
        a.genesis_account("NOBODY"),
        Err(Error::UnknownGenesisAccount(_))
    ));
    Ok(())
}
