use crate::cf::{ClassParser, ConstantPool};
use crate::ParseError;
use bitflags::bitflags;

bitflags! {
    /// Class-level access flags
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Field access flags
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Method access flags
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

/// Raw attribute: a name plus its uninterpreted payload
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

/// A field member
#[derive(Debug)]
pub struct Field {
    pub access_flags: FieldAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

/// A method member
#[derive(Debug)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

/// One exception handler range from a `Code` attribute
///
/// The covered range is `[start_pc, end_pc)`. `catch_type == 0` means the
/// handler catches anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

/// Decoded `Code` attribute of a concrete method
#[derive(Debug)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytecode: Vec<u8>,
    pub handlers: Vec<ExceptionTableEntry>,
    pub attributes: Vec<Attribute>,
}

/// A fully parsed class file
///
/// Immutable once parsed; the constant pool is the per-class interning table
/// shared by reference with everything downstream.
#[derive(Debug)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

const CLASS_MAGIC: u32 = 0xCAFE_BABE;

/// Versions from Java 1.1 through Java 8 (the bytecode this pipeline knows)
const SUPPORTED_MAJOR: std::ops::RangeInclusive<u16> = 45..=52;

impl ClassFile {
    /// Parse a class file from a fully materialized byte buffer
    ///
    /// Pure function of its input. In strict mode, files that are structurally
    /// legal but carry dangling constant pool indices are also rejected.
    pub fn parse(bytes: &[u8], strict: bool) -> Result<ClassFile, ParseError> {
        let mut parser = ClassParser::new(bytes);

        let magic = parser.u32("magic number")?;
        if magic != CLASS_MAGIC {
            return Err(ParseError {
                offset: 0,
                expected: "magic number 0xCAFEBABE",
            });
        }
        let minor_version = parser.u16("minor version")?;
        let major_version = parser.u16("major version")?;
        if !SUPPORTED_MAJOR.contains(&major_version) {
            return Err(ParseError {
                offset: 6,
                expected: "major version between 45 and 52",
            });
        }

        let constant_pool = ConstantPool::parse(&mut parser)?;

        let access_flags = ClassAccessFlags::from_bits_truncate(parser.u16("access flags")?);
        let this_class = parser.u16("this class index")?;
        let super_class = parser.u16("super class index")?;

        let interface_count = parser.u16("interface count")?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(parser.u16("interface index")?);
        }

        let field_count = parser.u16("field count")?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(Field {
                access_flags: FieldAccessFlags::from_bits_truncate(
                    parser.u16("field access flags")?,
                ),
                name_index: parser.u16("field name index")?,
                descriptor_index: parser.u16("field descriptor index")?,
                attributes: parse_attributes(&mut parser)?,
            });
        }

        let method_count = parser.u16("method count")?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(Method {
                access_flags: MethodAccessFlags::from_bits_truncate(
                    parser.u16("method access flags")?,
                ),
                name_index: parser.u16("method name index")?,
                descriptor_index: parser.u16("method descriptor index")?,
                attributes: parse_attributes(&mut parser)?,
            });
        }

        let attributes = parse_attributes(&mut parser)?;
        if parser.remaining() != 0 {
            return Err(parser.error("end of class file"));
        }

        if strict {
            constant_pool.check_indices()?;
        }

        Ok(ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Find a method's `Code` attribute, if it has one
    ///
    /// Abstract and native methods have none.
    pub fn code_of(&self, method: &Method) -> Result<Option<CodeAttribute>, ParseError> {
        for attribute in &method.attributes {
            if self.constant_pool.utf8_at(attribute.name_index) == Ok("Code") {
                return Ok(Some(parse_code_attribute(&attribute.info)?));
            }
        }
        Ok(None)
    }
}

fn parse_attributes(parser: &mut ClassParser) -> Result<Vec<Attribute>, ParseError> {
    let count = parser.u16("attribute count")?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = parser.u16("attribute name index")?;
        // The declared length is authoritative: the payload is exactly this
        // many bytes or the file is rejected
        let length = parser.u32("attribute length")?;
        let info = parser.bytes(length as usize, "attribute payload")?;
        attributes.push(Attribute {
            name_index,
            info: info.to_vec(),
        });
    }
    Ok(attributes)
}

fn parse_code_attribute(info: &[u8]) -> Result<CodeAttribute, ParseError> {
    let mut parser = ClassParser::new(info);
    let max_stack = parser.u16("max stack")?;
    let max_locals = parser.u16("max locals")?;
    let code_length = parser.u32("code length")?;
    let bytecode = parser.bytes(code_length as usize, "bytecode array")?.to_vec();

    let handler_count = parser.u16("exception table length")?;
    let mut handlers = Vec::with_capacity(handler_count as usize);
    for _ in 0..handler_count {
        handlers.push(ExceptionTableEntry {
            start_pc: parser.u16("handler start pc")?,
            end_pc: parser.u16("handler end pc")?,
            handler_pc: parser.u16("handler pc")?,
            catch_type: parser.u16("handler catch type")?,
        });
    }

    let attributes = parse_attributes(&mut parser)?;
    if parser.remaining() != 0 {
        return Err(parser.error("end of code attribute"));
    }

    Ok(CodeAttribute {
        max_stack,
        max_locals,
        bytecode,
        handlers,
        attributes,
    })
}
