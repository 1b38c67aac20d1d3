// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

use std::path::Path;
use std::process::Output;
use std::{fs, io};

use tokio::process::Command;

use crate::Error;

/// Run an external program to completion, capturing its output.
///
/// A non-zero exit status is an error carrying the program name and
/// whatever the program printed to stderr.
pub(crate) async fn exec(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
) -> Result<Output, Error> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd.output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Container(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(output)
}

/// Like [`exec`] but failure is reported as a boolean instead of an error.
pub(crate) async fn exec_check(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
) -> Result<bool, Error> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    Ok(cmd.output().await?.status.success())
}

pub(crate) fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
