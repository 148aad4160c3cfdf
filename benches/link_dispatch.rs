use criterion::{black_box, criterion_group, criterion_main, Criterion};
use indy_linker::classfile::ClassFile;
use indy_linker::prelude::*;

fn build_min_class() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0xCAFEBABE_u32.to_be_bytes());
    bytes.extend_from_slice(&0_u16.to_be_bytes());
    bytes.extend_from_slice(&52_u16.to_be_bytes());

    // constant pool count = 5
    bytes.extend_from_slice(&5_u16.to_be_bytes());

    // 1: Utf8 "m/Advice"
    bytes.push(1);
    bytes.extend_from_slice(&8_u16.to_be_bytes());
    bytes.extend_from_slice(b"m/Advice");

    // 2: Utf8 "java/lang/Object"
    bytes.push(1);
    bytes.extend_from_slice(&16_u16.to_be_bytes());
    bytes.extend_from_slice(b"java/lang/Object");

    // 3: Class #1
    bytes.push(7);
    bytes.extend_from_slice(&1_u16.to_be_bytes());

    // 4: Class #2
    bytes.push(7);
    bytes.extend_from_slice(&2_u16.to_be_bytes());

    // access_flags, this_class, super_class
    bytes.extend_from_slice(&0x0021_u16.to_be_bytes());
    bytes.extend_from_slice(&3_u16.to_be_bytes());
    bytes.extend_from_slice(&4_u16.to_be_bytes());

    // interfaces, fields, methods, attributes
    bytes.extend_from_slice(&0_u16.to_be_bytes());
    bytes.extend_from_slice(&0_u16.to_be_bytes());
    bytes.extend_from_slice(&0_u16.to_be_bytes());
    bytes.extend_from_slice(&0_u16.to_be_bytes());

    bytes
}

fn agent_with_advice() -> IndyAgent {
    let advice = TypeDefinition::builder("m/Advice")
        .static_method("onEnter", "(Lorg/acme/Request;I)I", |_, args| Ok(Value::Int(args[1].as_int().unwrap_or(0) + 1)))
        .static_method("sum", "(II)I", |_, args| {
            Ok(Value::Int(args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0)))
        })
        .build()
        .unwrap();
    let agent = IndyAgent::start(AgentConfig::default(), TypeNamespace::new("agent"));
    agent
        .register_module(ModuleDescriptor::builder("M", MemorySource::new().with_definition(advice)).advice("m/Advice").build())
        .unwrap();
    agent
}

fn bench_classfile_parse(c: &mut Criterion) {
    let bytes = build_min_class();
    c.bench_function("classfile_parse_min", |b| {
        b.iter(|| {
            let _ = ClassFile::parse(black_box(&bytes)).unwrap();
        })
    });
}

fn bench_linked_invoke(c: &mut Criterion) {
    let agent = agent_with_advice();
    let app = agent.host_context("App1");

    // identical signatures: no adaptation
    let direct = agent.advice_call_site(&app, "M", "m/Advice", "sum", "(II)I").unwrap();
    direct.invoke(&[Value::Int(1), Value::Int(2)]).unwrap();
    c.bench_function("linked_invoke_direct", |b| {
        b.iter(|| direct.invoke(black_box(&[Value::Int(1), Value::Int(2)])).unwrap())
    });

    // erased receiver cast on every call
    let erased = agent.advice_call_site(&app, "M", "m/Advice", "onEnter", "(Lorg/acme/Request;I)I").unwrap();
    let args = [Value::Null, Value::Int(41)];
    erased.invoke(&args).unwrap();
    c.bench_function("linked_invoke_erased", |b| b.iter(|| erased.invoke(black_box(&args)).unwrap()));
}

fn bench_context_lookup(c: &mut Criterion) {
    let agent = agent_with_advice();
    let app = agent.host_context("App1");
    let _ctx = agent.registry().resolve_context("M", &app).unwrap();
    c.bench_function("resolve_context_cached", |b| {
        b.iter(|| agent.registry().resolve_context(black_box("M"), &app).unwrap())
    });
}

criterion_group!(benches, bench_classfile_parse, bench_linked_invoke, bench_context_lookup);
criterion_main!(benches);
