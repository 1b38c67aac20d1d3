// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! Ephemeral local chain nodes.
//!
//! A [`Devnet`] owns exactly one containerized node. Its identity and
//! port live in `state/<chainId>/devnet.json` so a later process can
//! reattach to the same node, and its pre-funded genesis identities are
//! derived deterministically from `(chain_id, name)` so reruns talk to
//! the same accounts.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::chain::AgentOpts;
use crate::receipt::{read_json, write_json_atomic};
use crate::util::exec;
use crate::Error;

/// How the node exposes its API port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortMode {
    /// HTTP light client / LCD.
    Lcp,
    GrpcWeb,
}

impl PortMode {
    pub fn default_port(self) -> u16 {
        match self {
            PortMode::Lcp => 1317,
            PortMode::GrpcWeb => 9091,
        }
    }
}

/// Supported node images, one per chain variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    Scrt1_2,
    Scrt1_3,
    Scrt1_4,
    Scrt1_5,
    Scrt1_6,
    Scrt1_7,
    Scrt1_8,
}

impl Platform {
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "scrt_1.2" => Platform::Scrt1_2,
            "scrt_1.3" => Platform::Scrt1_3,
            "scrt_1.4" => Platform::Scrt1_4,
            "scrt_1.5" => Platform::Scrt1_5,
            "scrt_1.6" => Platform::Scrt1_6,
            "scrt_1.7" => Platform::Scrt1_7,
            "scrt_1.8" => Platform::Scrt1_8,
            _ => return None,
        })
    }

    pub fn port_mode(self) -> PortMode {
        match self {
            Platform::Scrt1_3 | Platform::Scrt1_4 => PortMode::GrpcWeb,
            _ => PortMode::Lcp,
        }
    }

    pub fn image(self) -> &'static str {
        match self {
            Platform::Scrt1_2 => "ghcr.io/scrtlabs/localsecret:v1.2",
            Platform::Scrt1_3 => "ghcr.io/scrtlabs/localsecret:v1.3",
            Platform::Scrt1_4 => "ghcr.io/scrtlabs/localsecret:v1.4",
            Platform::Scrt1_5 => "ghcr.io/scrtlabs/localsecret:v1.5",
            Platform::Scrt1_6 => "ghcr.io/scrtlabs/localsecret:v1.6",
            Platform::Scrt1_7 => "ghcr.io/scrtlabs/localsecret:v1.7",
            Platform::Scrt1_8 => "ghcr.io/scrtlabs/localsecret:v1.8",
        }
    }
}

/// Everything needed to create the node container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerOpts {
    pub image: String,
    pub name: String,
    pub port: u16,
    pub container_port: u16,
    pub env: Vec<(String, String)>,
    pub volumes: Vec<(PathBuf, String)>,
}

/// The subset of a container runtime the supervisor needs. Implemented
/// over the `docker` CLI; tests substitute a stub.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn pull(&self, image: &str) -> Result<(), Error>;
    async fn create(&self, opts: &ContainerOpts) -> Result<String, Error>;
    async fn start(&self, id: &str) -> Result<(), Error>;
    async fn stop(&self, id: &str) -> Result<(), Error>;
    async fn remove(&self, id: &str) -> Result<(), Error>;
    async fn is_running(&self, id: &str) -> Result<bool, Error>;
}

pub struct DockerEngine;

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn pull(&self, image: &str) -> Result<(), Error> {
        exec("docker", &["pull", image], None).await?;
        Ok(())
    }

    async fn create(&self, opts: &ContainerOpts) -> Result<String, Error> {
        let publish = format!("{}:{}", opts.port, opts.container_port);
        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            opts.name.clone(),
            "-p".into(),
            publish,
        ];
        for (key, value) in &opts.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        for (host_path, container_path) in &opts.volumes {
            args.push("-v".into());
            args.push(format!("{}:{container_path}", host_path.display()));
        }
        args.push(opts.image.clone());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = exec("docker", &arg_refs, None).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    async fn start(&self, id: &str) -> Result<(), Error> {
        exec("docker", &["start", id], None).await?;
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), Error> {
        exec("docker", &["stop", id], None).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), Error> {
        exec("docker", &["rm", "-f", id], None).await?;
        Ok(())
    }

    async fn is_running(&self, id: &str) -> Result<bool, Error> {
        let output = exec(
            "docker",
            &["inspect", "-f", "{{.State.Running}}", id],
            None,
        )
        .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }
}

/// Contents of `state/<chainId>/devnet.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevnetState {
    pub chain_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Names of the pre-funded identities seeded into the node's genesis.
pub const DEFAULT_GENESIS_ACCOUNTS: &[&str] =
    &["ADMIN", "ALICE", "BOB", "CHARLIE", "MALLORY"];

const STATE_FILE: &str = "devnet.json";

/// Supervisor of one local chain node.
pub struct Devnet {
    chain_id: String,
    platform: Platform,
    state_dir: PathBuf,
    host: String,
    ephemeral: bool,
    genesis_names: Vec<String>,
    port: Mutex<Option<u16>>,
    container_id: Mutex<Option<String>>,
    engine: Arc<dyn ContainerEngine>,
}

impl Devnet {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        chain_id: impl Into<String>,
        platform: Platform,
        state_root: impl Into<PathBuf>,
    ) -> Self {
        let chain_id = chain_id.into();
        let state_dir = state_root.into().join(&chain_id);
        Devnet {
            chain_id,
            platform,
            state_dir,
            host: "localhost".into(),
            ephemeral: false,
            genesis_names: DEFAULT_GENESIS_ACCOUNTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            port: Mutex::new(None),
            container_id: Mutex::new(None),
            engine,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Tear the node down when the supervisor is dropped.
    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    pub fn chain_id(&self) -> String {
        self.chain_id.clone()
    }

    pub fn port(&self) -> u16 {
        self.port
            .lock()
            .unwrap_or_else(|| self.platform.port_mode().default_port())
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port())
    }

    pub fn container_id(&self) -> Option<String> {
        self.container_id.lock().clone()
    }

    fn state_file(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    /// Reconstitute port and container id from the state file, if any.
    /// A stored chain id that disagrees with ours is worth a warning but
    /// the stored state is still adopted.
    pub fn load(&self) -> Result<Option<DevnetState>, Error> {
        let path = self.state_file();
        if !path.exists() {
            return Ok(None);
        }
        let state: DevnetState = read_json(&path)?;
        if state.chain_id != self.chain_id {
            warn!(
                expected = %self.chain_id,
                stored = %state.chain_id,
                "devnet state belongs to a different chain id"
            );
        }
        *self.port.lock() = Some(state.port);
        *self.container_id.lock() = state.container_id.clone();
        Ok(Some(state))
    }

    fn save(&self) -> Result<(), Error> {
        let state = DevnetState {
            chain_id: self.chain_id.clone(),
            container_id: self.container_id.lock().clone(),
            port: self.port(),
            host: Some(self.host.clone()),
        };
        write_json_atomic(&self.state_file(), &state)
    }

    /// Create and start the node container, picking a fresh port if none
    /// is stored, and persist the state file.
    pub async fn spawn(&self) -> Result<(), Error> {
        self.load()?;
        let port = {
            let mut slot = self.port.lock();
            match *slot {
                Some(port) => port,
                None => {
                    let port = free_port()?;
                    *slot = Some(port);
                    port
                }
            }
        };
        self.engine.pull(self.platform.image()).await?;
        fs::create_dir_all(&self.state_dir)?;
        let opts = ContainerOpts {
            image: self.platform.image().to_owned(),
            // fixed name: a second supervisor for the same chain id will
            // fail to create instead of racing this one
            name: format!("fadroma-devnet-{}", self.chain_id),
            port,
            container_port: self.platform.port_mode().default_port(),
            env: vec![
                ("ChainId".into(), self.chain_id.clone()),
                (
                    "GenesisAccounts".into(),
                    self.genesis_names.join(" "),
                ),
            ],
            volumes: vec![(self.state_dir.clone(), "/state".into())],
        };
        let id = self.engine.create(&opts).await?;
        self.engine.start(&id).await?;
        *self.container_id.lock() = Some(id);
        self.save()?;
        info!(chain_id = %self.chain_id, %port, "devnet up");
        Ok(())
    }

    /// Spawn unless the node is already running.
    pub async fn respawn(&self) -> Result<(), Error> {
        self.load()?;
        let id = self.container_id.lock().clone();
        if let Some(id) = id {
            if self.engine.is_running(&id).await? {
                return Ok(());
            }
        }
        self.spawn().await
    }

    pub async fn kill(&self) -> Result<(), Error> {
        let id = self.container_id.lock().clone();
        if let Some(id) = id {
            self.engine.stop(&id).await?;
            info!(chain_id = %self.chain_id, "devnet stopped");
        }
        Ok(())
    }

    /// Delete the state directory.
    pub fn erase(&self) -> Result<(), Error> {
        if self.state_dir.exists() {
            fs::remove_dir_all(&self.state_dir)?;
        }
        Ok(())
    }

    pub async fn terminate(&self) -> Result<(), Error> {
        self.kill().await?;
        let id = self.container_id.lock().clone();
        if let Some(id) = id {
            self.engine.remove(&id).await?;
        }
        self.erase()
    }

    /// Identity material of a pre-funded genesis account, derived
    /// deterministically from `(chain_id, name)`.
    pub fn genesis_account(&self, name: &str) -> Result<AgentOpts, Error> {
        if !self.genesis_names.iter().any(|n| n == name) {
            return Err(Error::UnknownGenesisAccount(name.to_owned()));
        }
        let digest =
            Sha256::digest(format!("{}:{name}", self.chain_id).as_bytes());
        let hex = hex::encode(digest);
        let mnemonic: Vec<&str> = digest
            .iter()
            .take(24)
            .map(|b| MNEMONIC_WORDS[*b as usize % MNEMONIC_WORDS.len()])
            .collect();
        Ok(AgentOpts {
            name: Some(name.to_owned()),
            mnemonic: Some(mnemonic.join(" ")),
            address: Some(format!("secret1{}", &hex[..38])),
            fees: None,
        })
    }
}

impl Drop for Devnet {
    fn drop(&mut self) {
        if !self.ephemeral {
            return;
        }
        // best effort: async engine calls are unavailable here
        if let Some(id) = self.container_id.lock().clone() {
            let _ = std::process::Command::new("docker")
                .args(["rm", "-f", &id])
                .output();
        }
        let _ = fs::remove_dir_all(&self.state_dir);
    }
}

fn free_port() -> Result<u16, Error> {
    let mut rng = rand::thread_rng();
    for _ in 0..64 {
        let port: u16 = rng.gen_range(1024..=65535);
        if std::net::TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
    }
    Err(Error::Devnet("no free port found".into()))
}

const MNEMONIC_WORDS: &[&str] = &[
    "abandon", "brace", "canyon", "dawn", "eagle", "fabric", "garden",
    "harbor", "island", "jungle", "kernel", "ladder", "magnet", "nephew",
    "orbit", "pelican", "quarry", "ribbon", "saddle", "tunnel", "useful",
    "vessel", "walnut", "yellow", "zebra", "anchor", "breeze", "cactus",
    "dolphin", "ember", "falcon", "glacier",
];
