#![allow(dead_code)]

use std::sync::Arc;

use indy_linker::classfile::{ACC_PUBLIC, ACC_STATIC};
use indy_linker::prelude::*;

pub const PUBLIC: u16 = ACC_PUBLIC;
pub const PUBLIC_STATIC: u16 = ACC_PUBLIC | ACC_STATIC;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn agent() -> IndyAgent {
    init_logging();
    IndyAgent::start(AgentConfig::default(), TypeNamespace::new("agent"))
}

/// Defines `name` in `host` with a static `id()Ljava/lang/String;`
/// returning `id`.
pub fn define_with_id(host: &HostContext, name: &str, id: &'static str) {
    host.define(type_with_id(name, id)).unwrap();
}

pub fn type_with_id(name: &str, id: &'static str) -> TypeDefinition {
    TypeDefinition::builder(name)
        .static_method("id", "()Ljava/lang/String;", move |_, _| Ok(Value::str(id)))
        .build()
        .unwrap()
}

pub fn call_id(ty: &Arc<indy_linker::types::LoadedType>) -> String {
    let lookup = ty.defining_lookup().unwrap();
    let desc = MethodDescriptor::parse("()Ljava/lang/String;").unwrap();
    let value = lookup.find_static(ty, "id", &desc).unwrap().invoke(&[]).unwrap();
    value.as_str().unwrap().to_string()
}

pub struct CpBuilder {
    entries: Vec<Vec<u8>>,
}

impl CpBuilder {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn push(&mut self, entry: Vec<u8>) -> u16 {
        self.entries.push(entry);
        self.entries.len() as u16
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        let mut entry = vec![1];
        entry.extend_from_slice(&(s.len() as u16).to_be_bytes());
        entry.extend_from_slice(s.as_bytes());
        self.push(entry)
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let mut entry = vec![7];
        entry.extend_from_slice(&name_index.to_be_bytes());
        self.push(entry)
    }

    pub fn long(&mut self, value: i64) -> u16 {
        let mut entry = vec![5];
        entry.extend_from_slice(&value.to_be_bytes());
        let index = self.push(entry);
        // second slot of an 8-byte constant
        self.entries.push(Vec::new());
        index
    }
}

fn u2(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn u4(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// A class file without code: just the names and the method table.
/// `methods` are `(access_flags, name, descriptor)`.
pub fn class_file(name: &str, super_name: &str, interfaces: &[&str], methods: &[(u16, &str, &str)]) -> Vec<u8> {
    let mut cp = CpBuilder::new();
    let this_class = cp.class(name);
    let super_class = cp.class(super_name);
    let interface_indices: Vec<u16> = interfaces.iter().map(|i| cp.class(i)).collect();
    let method_indices: Vec<(u16, u16, u16)> =
        methods.iter().map(|(flags, n, d)| (*flags, cp.utf8(n), cp.utf8(d))).collect();
    let source_file = cp.utf8("SourceFile");
    let source_name = cp.utf8("Generated.java");
    cp.long(1 << 40);

    let mut bytes = Vec::new();
    u4(&mut bytes, 0xCAFE_BABE);
    u2(&mut bytes, 0);
    u2(&mut bytes, 52);
    u2(&mut bytes, (cp.entries.len() + 1) as u16);
    for entry in &cp.entries {
        bytes.extend_from_slice(entry);
    }
    u2(&mut bytes, 0x0021);
    u2(&mut bytes, this_class);
    u2(&mut bytes, super_class);
    u2(&mut bytes, interface_indices.len() as u16);
    for i in interface_indices {
        u2(&mut bytes, i);
    }
    // fields
    u2(&mut bytes, 0);
    u2(&mut bytes, method_indices.len() as u16);
    for (flags, name_index, descriptor_index) in method_indices {
        u2(&mut bytes, flags);
        u2(&mut bytes, name_index);
        u2(&mut bytes, descriptor_index);
        u2(&mut bytes, 0);
    }
    u2(&mut bytes, 1);
    u2(&mut bytes, source_file);
    u4(&mut bytes, 2);
    u2(&mut bytes, source_name);
    bytes
}
