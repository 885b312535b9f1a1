//! End-to-end driver: class file bytes in, Dalvik method bodies out
//!
//! A structurally bad class file aborts the whole run, but a method that
//! trips an opcode or capacity limit only fails itself; the rest of the
//! class still compiles.

use crate::cf::{
    decode_code, parse_method_descriptor, ClassFile, CodeAttribute, Method, MethodAccessFlags,
};
use crate::dex::{translate, CompiledBody};
use crate::regalloc::{allocate_first_fit, allocate_naive, analyze, audit, build_interference};
use crate::rop::{build_rop, RopMethod, TypeTag};
use crate::ssa::{into_ssa, optimize, OptionalStep, SsaMethod};
use crate::{Error, ParseError};
use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::BTreeSet;

/// Knobs for a compilation run
#[derive(Debug, Clone)]
pub struct Options {
    /// Run the SSA optimizer and the packing register allocator
    pub optimize: bool,
    /// Force the one-slot-per-value allocator even when optimizing
    pub naive_alloc: bool,
    /// Reject class files with dangling constant pool indices up front
    pub strict: bool,
    /// Which optional SSA passes to run when optimizing
    pub steps: BTreeSet<OptionalStep>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            optimize: true,
            naive_alloc: false,
            strict: false,
            steps: OptionalStep::all(),
        }
    }
}

/// One successfully compiled method body
#[derive(Debug)]
pub struct CompiledMethod {
    pub name: String,
    pub descriptor: String,
    /// Code units serialized little-endian, two bytes each
    pub bytecode: Vec<u8>,
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
}

/// The per-class result, with per-method failures kept alongside
#[derive(Debug)]
pub struct CompiledClass {
    pub class_name: String,
    pub methods: Vec<CompiledMethod>,
    pub failures: Vec<(String, Error)>,
}

/// Compile every concrete method of one class file
pub fn compile_class(bytes: &[u8], options: &Options) -> Result<CompiledClass, Error> {
    let class = ClassFile::parse(bytes, options.strict)?;
    let class_name = class
        .constant_pool
        .class_name_at(class.this_class)?
        .to_string();
    log::debug!("compiling {} ({} methods)", class_name, class.methods.len());

    let mut methods = vec![];
    let mut failures = vec![];
    for method in &class.methods {
        let name = class.constant_pool.utf8_at(method.name_index)?.to_string();
        let descriptor = class
            .constant_pool
            .utf8_at(method.descriptor_index)?
            .to_string();
        // abstract and native methods have no body to compile
        let code = match class.code_of(method)? {
            Some(code) => code,
            None => continue,
        };
        match compile_method(&class, method, &code, options) {
            Ok(body) => {
                log::debug!(
                    "{}.{}{}: {} units in {} registers",
                    class_name,
                    name,
                    descriptor,
                    body.code_units.len(),
                    body.registers_size
                );
                methods.push(CompiledMethod {
                    name,
                    descriptor,
                    bytecode: serialize_units(&body.code_units),
                    registers_size: body.registers_size,
                    ins_size: body.ins_size,
                    outs_size: body.outs_size,
                });
            }
            Err(err @ Error::MalformedInput(_)) => return Err(err),
            Err(err) => {
                log::warn!("{}.{}{} failed: {}", class_name, name, descriptor, err);
                failures.push((name, err));
            }
        }
    }
    Ok(CompiledClass {
        class_name,
        methods,
        failures,
    })
}

/// Parameter tags and return tag of a method, `this` included
pub fn method_signature(
    class: &ClassFile,
    method: &Method,
) -> Result<(Vec<TypeTag>, Option<TypeTag>), Error> {
    let descriptor = class.constant_pool.utf8_at(method.descriptor_index)?;
    let (mut params, ret) = parse_method_descriptor(descriptor).ok_or(ParseError {
        offset: 0,
        expected: "method descriptor",
    })?;
    if !method.access_flags.contains(MethodAccessFlags::STATIC) {
        params.insert(0, TypeTag::Object);
    }
    Ok((params, ret))
}

/// Lift one method body to register form
pub fn rop_of(
    class: &ClassFile,
    method: &Method,
    code: &CodeAttribute,
) -> Result<RopMethod, Error> {
    let (params, ret) = method_signature(class, method)?;
    let decoded = decode_code(code, &class.constant_pool)?;
    build_rop(&decoded, code, &params, ret)
}

/// Lift one method body to SSA form, optimizer applied per the options
pub fn ssa_of(
    class: &ClassFile,
    method: &Method,
    code: &CodeAttribute,
    options: &Options,
) -> Result<SsaMethod, Error> {
    let rop = rop_of(class, method, code)?;
    let mut ssa = into_ssa(&rop);
    if options.optimize {
        optimize(&mut ssa, &options.steps);
    }
    Ok(ssa)
}

/// Compile one method body all the way to code units
pub fn compile_method(
    class: &ClassFile,
    method: &Method,
    code: &CodeAttribute,
    options: &Options,
) -> Result<CompiledBody, Error> {
    let rop = rop_of(class, method, code)?;
    if options.optimize {
        match lower(&rop, true, options) {
            // an optimized body that overflows an encoding may still fit
            // when laid out the simple way
            Err(Error::CapacityExceeded { what, value }) => {
                log::warn!(
                    "retrying without optimization: {} {} did not fit",
                    what,
                    value
                );
                lower(&rop, false, options)
            }
            done => done,
        }
    } else {
        lower(&rop, false, options)
    }
}

fn lower(rop: &RopMethod, optimized: bool, options: &Options) -> Result<CompiledBody, Error> {
    let mut ssa = into_ssa(rop);
    if optimized {
        optimize(&mut ssa, &options.steps);
    }
    let mapper = if optimized && !options.naive_alloc {
        let liveness = analyze(&ssa);
        let graph = build_interference(&ssa, &liveness);
        let mapper = allocate_first_fit(&ssa, &graph);
        audit(&ssa, &graph, &mapper)?;
        mapper
    } else {
        allocate_naive(&ssa)
    };
    let flat = crate::ssa::back_to_rop(&ssa, &mapper);
    translate(&flat)
}

fn serialize_units(units: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(units.len() * 2);
    for unit in units {
        // writing into a Vec cannot fail
        bytes.write_u16::<LittleEndian>(*unit).unwrap();
    }
    bytes
}
