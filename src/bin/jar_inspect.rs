//! Lists the types of an instrumentation module jar with the erased call-site
//! descriptor of every linkable member.
//!
//! usage: jar_inspect JAR_PATH [TYPE_PREFIX]

use std::env;
use std::time::Instant;

use indy_linker::source::{JarSource, TypeSource};
use indy_linker::types::{MemberKind, NativeTable};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let jar_path = args.next().ok_or("usage: jar_inspect JAR_PATH [TYPE_PREFIX]")?;
    let prefix = args.next().unwrap_or_default().replace('.', "/");

    let source = JarSource::open(&jar_path, NativeTable::new())?;
    let start = Instant::now();
    let mut types: u64 = 0;
    let mut members: u64 = 0;
    let mut failed: u64 = 0;

    for name in source.class_names().into_iter().filter(|n| n.starts_with(&prefix)) {
        let def = match source.locate(&name) {
            Ok(def) => def,
            Err(e) => {
                eprintln!("{name}: {e}");
                failed += 1;
                continue;
            }
        };
        types += 1;
        println!("{}", def.name());
        for member in def.members().iter().filter(|m| m.kind != MemberKind::Initializer) {
            members += 1;
            println!("  {:<11} {}{}  ->  {}", member.kind.as_str(), member.name, member.descriptor, member.descriptor.erase());
        }
    }

    println!("jar_path={jar_path}");
    println!("types={types} members={members} failed={failed}");
    println!("elapsed_ms={:.3}", start.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}
