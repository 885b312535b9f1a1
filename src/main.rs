use class2dex::cf::ClassFile;
use class2dex::compile::{self, Options};
use class2dex::{dex, Error};

use clap::{Arg, ArgAction, Command};
use std::fs;
use std::path::Path;
use std::process;

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("class2dex")
        .version("0.1.0")
        .about("Compile JVM class files into Dalvik register bytecode")
        .arg(
            Arg::new("no-optimize")
                .long("no-optimize")
                .action(ArgAction::SetTrue)
                .help("Skip SSA optimization and use the one-slot-per-value register allocator"),
        )
        .arg(
            Arg::new("naive-alloc")
                .long("naive-alloc")
                .action(ArgAction::SetTrue)
                .help("Use the one-slot-per-value register allocator even when optimizing"),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .action(ArgAction::SetTrue)
                .help("Reject class files with dangling constant pool indices"),
        )
        .arg(
            Arg::new("method")
                .long("method")
                .value_name("NAME")
                .help("Only compile methods with this name"),
        )
        .arg(
            Arg::new("dump-rop")
                .long("dump-rop")
                .action(ArgAction::SetTrue)
                .help("Print the register-form CFG of each method"),
        )
        .arg(
            Arg::new("dump-ssa")
                .long("dump-ssa")
                .action(ArgAction::SetTrue)
                .help("Print the SSA form of each method, optimizer applied"),
        )
        .arg(
            Arg::new("dump-code")
                .long("dump-code")
                .action(ArgAction::SetTrue)
                .help("Disassemble the compiled Dalvik bytecode of each method"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("DIR")
                .help("Write each compiled body's little-endian code units under DIR"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Class file to compile")
                .required(true)
                .index(1),
        )
        .get_matches();

    let options = Options {
        optimize: !matches.get_flag("no-optimize"),
        naive_alloc: matches.get_flag("naive-alloc"),
        strict: matches.get_flag("strict"),
        ..Options::default()
    };
    let only_method = matches.get_one::<String>("method");
    let out_dir = matches.get_one::<String>("output");

    let input = matches.get_one::<String>("INPUT").unwrap();
    log::info!("reading '{}'", input);
    let bytes = fs::read(input)?;
    let class = ClassFile::parse(&bytes, options.strict)?;
    let class_name = class.constant_pool.class_name_at(class.this_class)?;

    let mut failures = 0usize;
    let mut compiled = 0usize;
    for method in &class.methods {
        let name = class.constant_pool.utf8_at(method.name_index)?;
        let descriptor = class.constant_pool.utf8_at(method.descriptor_index)?;
        if let Some(filter) = only_method {
            if filter.as_str() != name {
                continue;
            }
        }
        let code = match class.code_of(method)? {
            Some(code) => code,
            None => continue,
        };

        if matches.get_flag("dump-rop") {
            match compile::rop_of(&class, method, &code) {
                Ok(rop) => {
                    println!("{}.{}{}", class_name, name, descriptor);
                    for block in &rop.blocks {
                        println!("  B{}: -> {:?}", block.label, block.successors);
                        for insn in &block.insns {
                            println!("    {}", insn.display(&class.constant_pool));
                        }
                    }
                }
                Err(err) => log::error!("{}.{}: {}", class_name, name, err),
            }
        }

        if matches.get_flag("dump-ssa") {
            match compile::ssa_of(&class, method, &code, &options) {
                Ok(ssa) => {
                    println!("{}.{}{}", class_name, name, descriptor);
                    for block in &ssa.blocks {
                        println!("  B{}: -> {:?}", block.label, block.successors);
                        for phi in &block.phis {
                            let operands: Vec<String> = phi
                                .operands
                                .iter()
                                .map(|(pred, operand)| format!("B{}:{}", pred, operand))
                                .collect();
                            println!("    {} <- phi {}", phi.result, operands.join(" "));
                        }
                        for insn in &block.insns {
                            println!("    {}", insn.display(&class.constant_pool));
                        }
                    }
                }
                Err(err) => log::error!("{}.{}: {}", class_name, name, err),
            }
        }

        match compile::compile_method(&class, method, &code, &options) {
            Ok(body) => {
                compiled += 1;
                println!(
                    "{}.{}{}: {} code units, {} registers ({} in, {} out)",
                    class_name,
                    name,
                    descriptor,
                    body.code_units.len(),
                    body.registers_size,
                    body.ins_size,
                    body.outs_size
                );
                if matches.get_flag("dump-code") {
                    for insn in dex::decode(&body.code_units)? {
                        println!("  {}", insn);
                    }
                }
                if let Some(dir) = out_dir {
                    let file = Path::new(dir).join(format!("{}_{}.dcode", name, compiled));
                    let mut bytes = Vec::with_capacity(body.code_units.len() * 2);
                    for unit in &body.code_units {
                        bytes.extend_from_slice(&unit.to_le_bytes());
                    }
                    log::info!("writing '{}'", file.display());
                    fs::write(&file, &bytes)?;
                }
            }
            Err(Error::MalformedInput(err)) => return Err(Error::MalformedInput(err)),
            Err(err) => {
                failures += 1;
                log::error!("{}.{}{} failed: {}", class_name, name, descriptor, err);
            }
        }
    }

    log::info!("{} methods compiled, {} failed", compiled, failures);
    if failures > 0 {
        process::exit(1);
    }
    Ok(())
}
