// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! One WASM instance, wrapped with the Region discipline.
//!
//! Every data transfer across the guest boundary goes through a Region, a
//! `{offset, capacity, length}` triple of little-endian u32 living in
//! guest memory. The host obtains regions by calling the guest's exported
//! `allocate`, and releases host-allocated regions through `deallocate`
//! where the guest exports one; everything else is released when the
//! instance is dropped, which happens after every single call.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use wasmer::{
    Function, FunctionEnv, Instance, Memory, MemoryView, Module, Store,
    TypedFunction,
};
use wasmer_compiler_singlepass::Singlepass;

use crate::backend::Mocknet;
use crate::conv::CallResult;
use crate::imports::build_imports;
use crate::Error;

/// Byte layout of the guest-side region descriptor.
pub const REGION_SIZE: u64 = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub offset: u32,
    pub capacity: u32,
    pub length: u32,
}

impl Region {
    pub fn from_le_bytes(bytes: [u8; REGION_SIZE as usize]) -> Self {
        let word = |i: usize| {
            u32::from_le_bytes([
                bytes[i],
                bytes[i + 1],
                bytes[i + 2],
                bytes[i + 3],
            ])
        };
        Region {
            offset: word(0),
            capacity: word(4),
            length: word(8),
        }
    }

    pub fn to_le_bytes(self) -> [u8; REGION_SIZE as usize] {
        let mut bytes = [0u8; REGION_SIZE as usize];
        bytes[0..4].copy_from_slice(&self.offset.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.capacity.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_le_bytes());
        bytes
    }
}

pub(crate) fn read_region_header(
    view: &MemoryView,
    ptr: u32,
) -> Result<Region, Error> {
    let mut bytes = [0u8; REGION_SIZE as usize];
    view.read(ptr as u64, &mut bytes)?;
    Ok(Region::from_le_bytes(bytes))
}

/// Read the `length` bytes a region points at.
pub(crate) fn read_region(
    view: &MemoryView,
    ptr: u32,
) -> Result<Vec<u8>, Error> {
    let region = read_region_header(view, ptr)?;
    let mut data = vec![0u8; region.length as usize];
    view.read(region.offset as u64, &mut data)?;
    Ok(data)
}

/// Write into an existing region, updating its length field.
pub(crate) fn write_region(
    view: &MemoryView,
    ptr: u32,
    data: &[u8],
) -> Result<(), Error> {
    let region = read_region_header(view, ptr)?;
    if (region.capacity as usize) < data.len() {
        return Err(Error::RegionTooSmall {
            capacity: region.capacity,
            length: data.len() as u32,
        });
    }
    view.write(region.offset as u64, data)?;
    view.write(ptr as u64 + 8, &(data.len() as u32).to_le_bytes())?;
    Ok(())
}

/// Per-instance state visible to the environment imports.
pub(crate) struct HostEnv {
    pub storage: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
    pub backend: Mocknet,
    pub memory: Option<Memory>,
    pub allocate: Option<TypedFunction<u32, u32>>,
}

impl HostEnv {
    pub fn memory(&self) -> &Memory {
        self.memory
            .as_ref()
            .expect("memory is bound at instantiation time")
    }

    pub fn allocate(&self) -> TypedFunction<u32, u32> {
        self.allocate
            .clone()
            .expect("allocate is bound at instantiation time")
    }
}

/// A freshly instantiated contract module. One guest serves exactly one
/// entry-point call; dropping it releases the whole linear memory, so no
/// state leaks between calls.
pub struct WrappedGuest {
    store: Store,
    instance: Instance,
    memory: Memory,
    allocate: TypedFunction<u32, u32>,
}

impl WrappedGuest {
    pub fn new(bytecode: &[u8], env: HostEnv) -> Result<Self, Error> {
        let mut store = Store::new(Singlepass::default());
        let module = Module::new(&store, bytecode)?;
        let mut fenv = FunctionEnv::new(&mut store, env);
        let imports = build_imports(&mut store, &fenv);
        let instance = Instance::new(&mut store, &module, &imports)?;

        let memory = instance.exports.get_memory("memory")?.clone();
        let allocate: TypedFunction<u32, u32> = instance
            .exports
            .get_typed_function(&store, "allocate")?;

        let data = fenv.as_mut(&mut store);
        data.memory = Some(memory.clone());
        data.allocate = Some(allocate.clone());

        Ok(WrappedGuest {
            store,
            instance,
            memory,
            allocate,
        })
    }

    /// Allocate a region in the guest and fill it.
    fn alloc_region(&mut self, data: &[u8]) -> Result<u32, Error> {
        let ptr = self.allocate.call(&mut self.store, data.len() as u32)?;
        let view = self.memory.view(&self.store);
        write_region(&view, ptr, data)?;
        Ok(ptr)
    }

    fn read_result(&self, ptr: u32) -> Result<Vec<u8>, Error> {
        let view = self.memory.view(&self.store);
        read_region(&view, ptr)
    }

    /// Release a host-observed region if the guest exports `deallocate`.
    fn release(&mut self, ptr: u32) {
        let deallocate: Result<TypedFunction<u32, ()>, _> = self
            .instance
            .exports
            .get_typed_function(&self.store, "deallocate");
        if let Ok(deallocate) = deallocate {
            let _ = deallocate.call(&mut self.store, ptr);
        }
    }

    pub fn init(
        &mut self,
        env: &Value,
        msg: &[u8],
    ) -> Result<CallResult, Error> {
        self.call_with_env("init", env, msg)
    }

    pub fn handle(
        &mut self,
        env: &Value,
        msg: &[u8],
    ) -> Result<CallResult, Error> {
        self.call_with_env("handle", env, msg)
    }

    pub fn query(&mut self, msg: &[u8]) -> Result<CallResult, Error> {
        let msg_ptr = self.alloc_region(msg)?;
        let entry: TypedFunction<u32, u32> = self
            .instance
            .exports
            .get_typed_function(&self.store, "query")?;
        match entry.call(&mut self.store, msg_ptr) {
            Ok(ret) => {
                let bytes = self.read_result(ret)?;
                self.release(ret);
                CallResult::parse(&bytes)
            }
            Err(trap) => Ok(CallResult::from_trap(&trap.message())),
        }
    }

    fn call_with_env(
        &mut self,
        entry_point: &str,
        env: &Value,
        msg: &[u8],
    ) -> Result<CallResult, Error> {
        let env_bytes = serde_json::to_vec(env)?;
        let env_ptr = self.alloc_region(&env_bytes)?;
        let msg_ptr = self.alloc_region(msg)?;
        let entry: TypedFunction<(u32, u32), u32> = self
            .instance
            .exports
            .get_typed_function(&self.store, entry_point)?;
        match entry.call(&mut self.store, env_ptr, msg_ptr) {
            Ok(ret) => {
                let bytes = self.read_result(ret)?;
                self.release(ret);
                CallResult::parse(&bytes)
            }
            Err(trap) => Ok(CallResult::from_trap(&trap.message())),
        }
    }
}
