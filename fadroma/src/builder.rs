// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! Reproducible source-to-artifact builds.
//!
//! A build has two phases. Phase one prepares the source: `HEAD` builds run
//! in the working tree, pinned revisions are checked out into a scratch
//! tree cloned from a copy of the repository's `.git`. Phase two compiles
//! the requested crate to `wasm32-unknown-unknown`, optimizes it with
//! `wasm-opt`, and writes the artifact plus its sha256 sidecar into the
//! output directory. The artifact's sha256 is the contract's code hash.
//!
//! An artifact that already exists short-circuits the build, which is what
//! makes re-runs cheap: identical `(crate, revision, features)` inputs
//! yield identical bytes.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::contract::{code_hash_of, ContractSource, ContractTemplate, HEAD};
use crate::util::{copy_dir_all, exec, exec_check};
use crate::Error;

/// Pinned toolchain image used by the containerized builder.
pub const DEFAULT_BUILD_IMAGE: &str = "ghcr.io/hackbg/fadroma-build:2023.2";

/// Named volume shared between build containers so repeated builds reuse
/// the cargo registry.
const CARGO_CACHE_VOLUME: &str = "fadroma-build-cache";

const WASM_TARGET: &str = "wasm32-unknown-unknown";

/// `/` is a path separator in revision names (e.g. `release/1.2`).
pub fn sanitize_path(s: &str) -> String {
    s.replace('/', "_")
}

/// Cargo replaces `-` with `_` in artifact file stems.
pub fn sanitize_crate(s: &str) -> String {
    s.replace('-', "_")
}

pub fn artifact_name(crate_name: &str, revision: &str) -> String {
    format!("{}@{}.wasm", sanitize_crate(crate_name), sanitize_path(revision))
}

/// Turns a source spec into a deterministic WASM artifact.
#[async_trait]
pub trait Builder: Send + Sync {
    fn id(&self) -> &str;

    /// One-time setup shared by all builds (e.g. pulling the toolchain
    /// image). Invoked once before any fan-out.
    async fn prepare(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn build(
        &self,
        source: &ContractSource,
    ) -> Result<ContractTemplate, Error>;

    /// Build several sources, preserving input order in the results.
    /// Parallelism is bounded by the number of available CPUs.
    async fn build_many(
        &self,
        sources: &[ContractSource],
    ) -> Result<Vec<Result<ContractTemplate, Error>>, Error> {
        self.prepare().await?;
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let futures: Vec<_> = sources.iter().map(|s| self.build(s)).collect();
        let results = stream::iter(futures)
            .buffered(parallelism)
            .collect::<Vec<_>>()
            .await;
        Ok(results)
    }
}

/// Builds inside a pinned container image so the toolchain does not vary
/// with the host.
pub struct ContainerBuilder {
    image: String,
    output_dir: PathBuf,
    scratch_dir: PathBuf,
    no_fetch: bool,
    rebuild: bool,
    pulled: OnceCell<()>,
}

impl ContainerBuilder {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        let output_dir = output_dir.into();
        let scratch_dir = output_dir.join(".scratch");
        ContainerBuilder {
            image: DEFAULT_BUILD_IMAGE.into(),
            output_dir,
            scratch_dir,
            no_fetch: false,
            rebuild: false,
            pulled: OnceCell::new(),
        }
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn no_fetch(mut self, no_fetch: bool) -> Self {
        self.no_fetch = no_fetch;
        self
    }

    pub fn rebuild(mut self, rebuild: bool) -> Self {
        self.rebuild = rebuild;
        self
    }
}

#[async_trait]
impl Builder for ContainerBuilder {
    fn id(&self) -> &str {
        "container"
    }

    async fn prepare(&self) -> Result<(), Error> {
        self.pulled
            .get_or_try_init(|| async {
                info!(image = %self.image, "pulling build image");
                exec("docker", &["pull", &self.image], None).await?;
                Ok(())
            })
            .await
            .map(|_| ())
    }

    async fn build(
        &self,
        source: &ContractSource,
    ) -> Result<ContractTemplate, Error> {
        let crate_name =
            source.crate_name.clone().ok_or(Error::NoCrate)?;
        let revision = source.revision().to_owned();
        let artifact = self
            .output_dir
            .join(artifact_name(&crate_name, &revision));
        if artifact.exists() && !self.rebuild {
            debug!(artifact = %artifact.display(), "reusing existing artifact");
            return finalize_artifact(&artifact, source, self.id(), false);
        }

        self.prepare().await?;
        let prepared = prepare_source(
            source,
            &revision,
            self.no_fetch,
            &self.scratch_dir,
        )
        .await?;
        fs::create_dir_all(&self.output_dir)?;

        let features = if source.features.is_empty() {
            String::new()
        } else {
            format!(" --features {}", source.features.join(","))
        };
        let script = format!(
            "cargo build -p {crate_name} --release --target {WASM_TARGET}{features} \
             && wasm-opt -g -Oz --strip-dwarf \
             target/{WASM_TARGET}/release/{stem}.wasm \
             -o /output/{name}",
            stem = sanitize_crate(&crate_name),
            name = artifact_name(&crate_name, &revision),
        );
        let context = prepared.dir.display().to_string();
        let output = self.output_dir.display().to_string();
        exec(
            "docker",
            &[
                "run",
                "--rm",
                "-v",
                &format!("{context}:/contract"),
                "-v",
                &format!("{output}:/output"),
                "-v",
                &format!("{CARGO_CACHE_VOLUME}:/usr/local/cargo"),
                "-w",
                "/contract",
                &self.image,
                "sh",
                "-c",
                &script,
            ],
            None,
        )
        .await
        .map_err(|e| Error::Build {
            crate_name: crate_name.clone(),
            reason: e.to_string(),
        })?;

        info!(%crate_name, %revision, "built artifact");
        finalize_artifact(&artifact, source, self.id(), prepared.dirty)
    }
}

/// Builds with the host toolchain, for environments where the container
/// engine is unavailable or unwanted.
pub struct RawBuilder {
    output_dir: PathBuf,
    scratch_dir: PathBuf,
    no_fetch: bool,
    rebuild: bool,
}

impl RawBuilder {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        let output_dir = output_dir.into();
        let scratch_dir = output_dir.join(".scratch");
        RawBuilder {
            output_dir,
            scratch_dir,
            no_fetch: false,
            rebuild: false,
        }
    }

    pub fn no_fetch(mut self, no_fetch: bool) -> Self {
        self.no_fetch = no_fetch;
        self
    }

    pub fn rebuild(mut self, rebuild: bool) -> Self {
        self.rebuild = rebuild;
        self
    }
}

#[async_trait]
impl Builder for RawBuilder {
    fn id(&self) -> &str {
        "raw"
    }

    async fn build(
        &self,
        source: &ContractSource,
    ) -> Result<ContractTemplate, Error> {
        let crate_name =
            source.crate_name.clone().ok_or(Error::NoCrate)?;
        let revision = source.revision().to_owned();
        let artifact = self
            .output_dir
            .join(artifact_name(&crate_name, &revision));
        if artifact.exists() && !self.rebuild {
            debug!(artifact = %artifact.display(), "reusing existing artifact");
            return finalize_artifact(&artifact, source, self.id(), false);
        }

        let prepared = prepare_source(
            source,
            &revision,
            self.no_fetch,
            &self.scratch_dir,
        )
        .await?;
        fs::create_dir_all(&self.output_dir)?;

        let mut args = vec![
            "build",
            "-p",
            crate_name.as_str(),
            "--release",
            "--target",
            WASM_TARGET,
        ];
        let features = source.features.join(",");
        if !features.is_empty() {
            args.push("--features");
            args.push(&features);
        }
        let build = |e: Error| Error::Build {
            crate_name: crate_name.clone(),
            reason: e.to_string(),
        };
        exec("cargo", &args, Some(&prepared.dir))
            .await
            .map_err(build)?;

        let compiled = prepared
            .dir
            .join("target")
            .join(WASM_TARGET)
            .join("release")
            .join(format!("{}.wasm", sanitize_crate(&crate_name)));
        exec(
            "wasm-opt",
            &[
                "-g",
                "-Oz",
                "--strip-dwarf",
                &compiled.display().to_string(),
                "-o",
                &artifact.display().to_string(),
            ],
            None,
        )
        .await
        .map_err(build)?;

        info!(%crate_name, %revision, "built artifact");
        finalize_artifact(&artifact, source, self.id(), prepared.dirty)
    }
}

struct PreparedSource {
    dir: PathBuf,
    dirty: bool,
}

/// Phase one: produce the directory the compiler will run in.
///
/// `HEAD` builds use the workspace in place and probe it for uncommitted
/// changes. Pinned revisions are cloned from a scratch copy of `.git` into
/// a scratch working tree keyed by the sanitized revision.
async fn prepare_source(
    source: &ContractSource,
    revision: &str,
    no_fetch: bool,
    scratch: &Path,
) -> Result<PreparedSource, Error> {
    let workspace = source
        .workspace
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    if revision == HEAD {
        let dirty = is_dirty(&workspace).await;
        return Ok(PreparedSource {
            dir: workspace,
            dirty,
        });
    }

    let sanitized = sanitize_path(revision);
    let tree_dir = scratch.join("checkout").join(&sanitized);
    if tree_dir.exists() {
        return Ok(PreparedSource {
            dir: tree_dir,
            dirty: false,
        });
    }

    let git_dir = scratch.join("git").join(&sanitized);
    if !git_dir.exists() {
        copy_dir_all(&workspace.join(".git"), &git_dir)?;
    }
    let gd = git_dir.display().to_string();

    // the copied .git may belong to a worktree; the entry would break
    // cloning from it as a standalone repo
    exec_check(
        "git",
        &["--git-dir", &gd, "config", "--unset", "core.worktree"],
        None,
    )
    .await?;

    let local_ref = format!("refs/heads/{revision}");
    let have_ref = exec_check(
        "git",
        &["--git-dir", &gd, "show-ref", "--verify", "--quiet", &local_ref],
        None,
    )
    .await?;
    if !have_ref {
        let from_remote = exec_check(
            "git",
            &[
                "--git-dir",
                &gd,
                "branch",
                revision,
                &format!("origin/{revision}"),
            ],
            None,
        )
        .await?;
        if !from_remote {
            if no_fetch {
                return Err(Error::Build {
                    crate_name: source
                        .crate_name
                        .clone()
                        .unwrap_or_default(),
                    reason: format!(
                        "ref {revision} not found and fetching is disabled"
                    ),
                });
            }
            exec(
                "git",
                &[
                    "--git-dir",
                    &gd,
                    "fetch",
                    "origin",
                    &format!("{revision}:{revision}"),
                ],
                None,
            )
            .await?;
        }
    }

    fs::create_dir_all(tree_dir.parent().expect("scratch tree has a parent"))?;
    let tree = tree_dir.display().to_string();
    exec(
        "git",
        &["clone", "--recursive", "-b", revision, &gd, &tree],
        None,
    )
    .await?;
    exec(
        "git",
        &["-C", &tree, "submodule", "update", "--init", "--recursive"],
        None,
    )
    .await?;

    Ok(PreparedSource {
        dir: tree_dir,
        dirty: false,
    })
}

async fn is_dirty(workspace: &Path) -> bool {
    let mut cmd = tokio::process::Command::new("git");
    cmd.args(["status", "--porcelain"]).current_dir(workspace);
    match cmd.output().await {
        Ok(out) if out.status.success() => !out.stdout.is_empty(),
        _ => false,
    }
}

/// Phase two epilogue: hash the artifact, write the sha256 sidecar, and
/// project the template.
fn finalize_artifact(
    path: &Path,
    source: &ContractSource,
    builder_id: &str,
    dirty: bool,
) -> Result<ContractTemplate, Error> {
    let bytes = fs::read(path)?;
    let code_hash = code_hash_of(&bytes);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    fs::write(
        path.with_extension("wasm.sha256"),
        format!("{code_hash}  {file_name}\n"),
    )?;

    let mut source = source.clone();
    source.dirty = source.dirty || dirty;
    Ok(ContractTemplate {
        source,
        builder_id: Some(builder_id.into()),
        artifact: Some(path.display().to_string()),
        code_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names_are_sanitized() {
        assert_eq!(
            artifact_name("snip20-token", "release/1.2"),
            "snip20_token@release_1.2.wasm"
        );
        assert_eq!(artifact_name("echo", HEAD), "echo@HEAD.wasm");
    }

    #[tokio::test]
    async fn existing_artifact_short_circuits_the_build() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let artifact = dir.path().join("echo@HEAD.wasm");
        fs::write(&artifact, b"\0asm fake")?;

        let builder = RawBuilder::new(dir.path());
        let template =
            builder.build(&ContractSource::new("echo")).await?;

        assert_eq!(template.code_hash, code_hash_of(b"\0asm fake"));
        assert_eq!(
            template.artifact.as_deref(),
            Some(artifact.display().to_string().as_str())
        );
        // sidecar appears beside the artifact
        let sidecar = dir.path().join("echo@HEAD.wasm.sha256");
        let contents = fs::read_to_string(sidecar)?;
        assert!(contents.starts_with(&template.code_hash));
        assert!(contents.trim_end().ends_with("echo@HEAD.wasm"));
        Ok(())
    }

    #[tokio::test]
    async fn build_requires_a_crate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let builder = RawBuilder::new(dir.path());
        let result = builder.build(&ContractSource::default()).await;
        assert!(matches!(result, Err(Error::NoCrate)));
    }

    #[tokio::test]
    async fn second_build_of_same_artifact_is_identical() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let artifact = dir.path().join("echo@HEAD.wasm");
        fs::write(&artifact, b"deterministic bytes")?;

        let builder = RawBuilder::new(dir.path());
        let first = builder.build(&ContractSource::new("echo")).await?;
        let second = builder.build(&ContractSource::new("echo")).await?;
        assert_eq!(first.code_hash, second.code_hash);
        assert_eq!(first.artifact, second.artifact);
        Ok(())
    }
}
