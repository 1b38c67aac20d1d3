// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

use std::env;

/// Snapshot of the `FADROMA_*` environment variables recognized by the
/// operational core. Taking the snapshot never fails; variables that
/// gate chain selection are validated where the chain is resolved.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    /// Registry key selecting a chain (`FADROMA_CHAIN`).
    pub chain: Option<String>,
    /// Skip the build container and use the host toolchain
    /// (`FADROMA_BUILD_RAW`).
    pub build_raw: bool,
    /// Optional out-of-process build manager (`FADROMA_BUILD_MANAGER`).
    pub build_manager: Option<String>,
    /// Allow mounting key material into build containers
    /// (`FADROMA_BUILD_UNSAFE_MOUNT_KEYS`).
    pub build_unsafe_mount_keys: bool,
    /// Refuse to fetch missing refs during source preparation
    /// (`FADROMA_BUILD_NO_FETCH`).
    pub build_no_fetch: bool,
    /// Rebuild artifacts even when they already exist (`FADROMA_REBUILD`).
    pub rebuild: bool,
    /// Re-upload even when an upload receipt exists
    /// (`FADROMA_UPLOAD_ALWAYS`).
    pub upload_always: bool,
    /// Optional out-of-process devnet manager (`FADROMA_DEVNET_MANAGER`).
    pub devnet_manager: Option<String>,
    /// Tear down the devnet on process exit (`FADROMA_DEVNET_EPHEMERAL`).
    pub devnet_ephemeral: bool,
    /// Hostname on which the devnet is reachable (`FADROMA_DEVNET_HOST`).
    pub devnet_host: Option<String>,
    /// Log full transaction contents (`FADROMA_PRINT_TXS`).
    pub print_txs: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            chain: var("FADROMA_CHAIN"),
            build_raw: flag("FADROMA_BUILD_RAW"),
            build_manager: var("FADROMA_BUILD_MANAGER"),
            build_unsafe_mount_keys: flag("FADROMA_BUILD_UNSAFE_MOUNT_KEYS"),
            build_no_fetch: flag("FADROMA_BUILD_NO_FETCH"),
            rebuild: flag("FADROMA_REBUILD"),
            upload_always: flag("FADROMA_UPLOAD_ALWAYS"),
            devnet_manager: var("FADROMA_DEVNET_MANAGER"),
            devnet_ephemeral: flag("FADROMA_DEVNET_EPHEMERAL"),
            devnet_host: var("FADROMA_DEVNET_HOST"),
            print_txs: flag("FADROMA_PRINT_TXS"),
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn flag(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_truthy_values() {
        env::set_var("FADROMA_TEST_FLAG_A", "TRUE");
        env::set_var("FADROMA_TEST_FLAG_B", "0");
        assert!(flag("FADROMA_TEST_FLAG_A"));
        assert!(!flag("FADROMA_TEST_FLAG_B"));
        assert!(!flag("FADROMA_TEST_FLAG_UNSET"));
    }

    #[test]
    fn empty_vars_count_as_unset() {
        env::set_var("FADROMA_TEST_EMPTY", "");
        assert_eq!(var("FADROMA_TEST_EMPTY"), None);
    }
}
