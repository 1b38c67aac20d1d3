// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! The environment imports supplied to every contract module.
//!
//! Storage operates on the instance's own key-value map; addresses go
//! through the reversible canonical codec; `query_chain` routes back into
//! the mocknet's query path so contracts can read each other. Gas
//! metering is a no-op: the mocknet is not a gas model.

use tracing::debug;
use wasmer::{
    imports, Function, FunctionEnv, FunctionEnvMut, Imports, RuntimeError,
    Store,
};

use crate::conv::{canonize, humanize};
use crate::guest::{read_region, read_region_header, write_region, HostEnv};
use crate::Error;

pub(crate) fn build_imports(
    store: &mut Store,
    fenv: &FunctionEnv<HostEnv>,
) -> Imports {
    imports! {
        "env" => {
            "db_read" =>
                Function::new_typed_with_env(store, fenv, db_read),
            "db_write" =>
                Function::new_typed_with_env(store, fenv, db_write),
            "db_remove" =>
                Function::new_typed_with_env(store, fenv, db_remove),
            "canonicalize_address" =>
                Function::new_typed_with_env(store, fenv, canonicalize_address),
            "humanize_address" =>
                Function::new_typed_with_env(store, fenv, humanize_address),
            "query_chain" =>
                Function::new_typed_with_env(store, fenv, query_chain),
            "gas" =>
                Function::new_typed_with_env(store, fenv, gas),
            "debug_print" =>
                Function::new_typed_with_env(store, fenv, debug_print),
        }
    }
}

fn user_err(e: Error) -> RuntimeError {
    RuntimeError::user(Box::new(e))
}

/// Read the bytes a guest-side region points at.
fn region_bytes(
    fenv: &mut FunctionEnvMut<HostEnv>,
    ptr: u32,
) -> Result<Vec<u8>, RuntimeError> {
    let (env, store) = fenv.data_and_store_mut();
    let view = env.memory().view(&store);
    read_region(&view, ptr).map_err(user_err)
}

/// Allocate a region in the guest and fill it with host data.
fn give_region(
    fenv: &mut FunctionEnvMut<HostEnv>,
    data: &[u8],
) -> Result<u32, RuntimeError> {
    let (env, mut store) = fenv.data_and_store_mut();
    let allocate = env.allocate();
    let ptr = allocate.call(&mut store, data.len() as u32)?;
    let view = env.memory().view(&store);
    write_region(&view, ptr, data).map_err(user_err)?;
    Ok(ptr)
}

/// Fill a region the guest already allocated.
fn fill_region(
    fenv: &mut FunctionEnvMut<HostEnv>,
    ptr: u32,
    data: &[u8],
) -> Result<(), RuntimeError> {
    let (env, store) = fenv.data_and_store_mut();
    let view = env.memory().view(&store);
    // the header must parse before we overwrite anything
    read_region_header(&view, ptr).map_err(user_err)?;
    write_region(&view, ptr, data).map_err(user_err)
}

fn db_read(
    mut fenv: FunctionEnvMut<HostEnv>,
    key_ptr: u32,
) -> Result<u32, RuntimeError> {
    let key = region_bytes(&mut fenv, key_ptr)?;
    let value = fenv.data().storage.lock().get(&key).cloned();
    match value {
        Some(value) => give_region(&mut fenv, &value),
        None => Ok(0),
    }
}

fn db_write(
    mut fenv: FunctionEnvMut<HostEnv>,
    key_ptr: u32,
    value_ptr: u32,
) -> Result<(), RuntimeError> {
    let key = region_bytes(&mut fenv, key_ptr)?;
    let value = region_bytes(&mut fenv, value_ptr)?;
    fenv.data().storage.lock().insert(key, value);
    Ok(())
}

fn db_remove(
    mut fenv: FunctionEnvMut<HostEnv>,
    key_ptr: u32,
) -> Result<(), RuntimeError> {
    let key = region_bytes(&mut fenv, key_ptr)?;
    fenv.data().storage.lock().remove(&key);
    Ok(())
}

/// Returns 0 on success; on invalid input, returns a region holding the
/// error message.
fn canonicalize_address(
    mut fenv: FunctionEnvMut<HostEnv>,
    source_ptr: u32,
    destination_ptr: u32,
) -> Result<i32, RuntimeError> {
    let human = region_bytes(&mut fenv, source_ptr)?;
    let human = match String::from_utf8(human) {
        Ok(human) => human,
        Err(e) => {
            let ptr = give_region(&mut fenv, e.to_string().as_bytes())?;
            return Ok(ptr as i32);
        }
    };
    match canonize(&human) {
        Ok(canonical) => {
            fill_region(&mut fenv, destination_ptr, &canonical)?;
            Ok(0)
        }
        Err(e) => {
            let ptr = give_region(&mut fenv, e.to_string().as_bytes())?;
            Ok(ptr as i32)
        }
    }
}

/// Returns 0 on success; on invalid input, returns a region holding the
/// error message.
fn humanize_address(
    mut fenv: FunctionEnvMut<HostEnv>,
    source_ptr: u32,
    destination_ptr: u32,
) -> Result<i32, RuntimeError> {
    let canonical = region_bytes(&mut fenv, source_ptr)?;
    match humanize(&canonical) {
        Ok(human) => {
            fill_region(&mut fenv, destination_ptr, human.as_bytes())?;
            Ok(0)
        }
        Err(e) => {
            let ptr = give_region(&mut fenv, e.to_string().as_bytes())?;
            Ok(ptr as i32)
        }
    }
}

/// Inter-contract queries route back through the mocknet's query path.
fn query_chain(
    mut fenv: FunctionEnvMut<HostEnv>,
    request_ptr: u32,
) -> Result<u32, RuntimeError> {
    let request = region_bytes(&mut fenv, request_ptr)?;
    let response = fenv.data().backend.clone().handle_query_request(&request);
    give_region(&mut fenv, &response)
}

fn gas(_fenv: FunctionEnvMut<HostEnv>, _amount: u32) {}

fn debug_print(
    mut fenv: FunctionEnvMut<HostEnv>,
    msg_ptr: u32,
) -> Result<(), RuntimeError> {
    let msg = region_bytes(&mut fenv, msg_ptr)?;
    debug!(target: "mocknet", "{}", String::from_utf8_lossy(&msg));
    Ok(())
}
