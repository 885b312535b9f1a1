use crate::cf::ClassParser;
use crate::ParseError;

/// Entry in the class file constant pool
///
/// Tags follow [the class file format][0]. `Float` and `Double` keep their raw
/// bit patterns so that structural equality is exact (NaN payloads included).
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name: u16 },
    String { utf8: u16 },
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
}

/// The interned constant pool of one class file
///
/// Built exactly once while parsing and immutable afterwards; every later
/// pipeline stage borrows it. Slot 0 is unused and the slot following a
/// `Long`/`Double` is a phantom, both represented as `None`.
#[derive(Debug)]
pub struct ConstantPool {
    entries: Vec<Option<Constant>>,
}

impl ConstantPool {
    pub(crate) fn parse(parser: &mut ClassParser) -> Result<ConstantPool, ParseError> {
        let count = parser.u16("constant pool count")?;
        let mut entries: Vec<Option<Constant>> = vec![None];

        while entries.len() < count as usize {
            let tag = parser.u8("constant pool tag")?;
            let constant = match tag {
                1 => {
                    let len = parser.u16("utf8 length")?;
                    let bytes = parser.bytes(len as usize, "utf8 bytes")?;
                    Constant::Utf8(decode_modified_utf8(bytes).ok_or_else(|| ParseError {
                        offset: parser.offset() - len as usize,
                        expected: "modified utf8 string",
                    })?)
                }
                3 => Constant::Integer(parser.i32("integer constant")?),
                4 => Constant::Float(parser.u32("float constant")?),
                5 => Constant::Long(parser.u64("long constant")? as i64),
                6 => Constant::Double(parser.u64("double constant")?),
                7 => Constant::Class {
                    name: parser.u16("class name index")?,
                },
                8 => Constant::String {
                    utf8: parser.u16("string utf8 index")?,
                },
                9 => Constant::FieldRef {
                    class: parser.u16("fieldref class index")?,
                    name_and_type: parser.u16("fieldref name and type index")?,
                },
                10 => Constant::MethodRef {
                    class: parser.u16("methodref class index")?,
                    name_and_type: parser.u16("methodref name and type index")?,
                },
                11 => Constant::InterfaceMethodRef {
                    class: parser.u16("interface methodref class index")?,
                    name_and_type: parser.u16("interface methodref name and type index")?,
                },
                12 => Constant::NameAndType {
                    name: parser.u16("name index")?,
                    descriptor: parser.u16("descriptor index")?,
                },
                // MethodHandle/MethodType/InvokeDynamic and the module
                // constants are not used by anything this pipeline compiles
                _ => return Err(parser.error("known constant pool tag")),
            };

            let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
            entries.push(Some(constant));
            if wide {
                entries.push(None);
            }
        }

        Ok(ConstantPool { entries })
    }

    /// Number of slots, counting slot 0 and phantom slots
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(index as usize)?.as_ref()
    }

    fn expect(&self, index: u16, expected: &'static str) -> Result<&Constant, ParseError> {
        self.get(index).ok_or(ParseError {
            offset: index as usize,
            expected,
        })
    }

    pub fn utf8_at(&self, index: u16) -> Result<&str, ParseError> {
        match self.expect(index, "utf8 constant")? {
            Constant::Utf8(string) => Ok(string),
            _ => Err(ParseError {
                offset: index as usize,
                expected: "utf8 constant",
            }),
        }
    }

    /// Binary name of the class constant at `index`
    pub fn class_name_at(&self, index: u16) -> Result<&str, ParseError> {
        match self.expect(index, "class constant")? {
            Constant::Class { name } => self.utf8_at(*name),
            _ => Err(ParseError {
                offset: index as usize,
                expected: "class constant",
            }),
        }
    }

    pub fn name_and_type_at(&self, index: u16) -> Result<(&str, &str), ParseError> {
        match self.expect(index, "name and type constant")? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8_at(*name)?, self.utf8_at(*descriptor)?))
            }
            _ => Err(ParseError {
                offset: index as usize,
                expected: "name and type constant",
            }),
        }
    }

    /// `(class name, member name, descriptor)` of a field reference
    pub fn field_ref_at(&self, index: u16) -> Result<(&str, &str, &str), ParseError> {
        match self.expect(index, "fieldref constant")? {
            Constant::FieldRef {
                class,
                name_and_type,
            } => {
                let (name, descriptor) = self.name_and_type_at(*name_and_type)?;
                Ok((self.class_name_at(*class)?, name, descriptor))
            }
            _ => Err(ParseError {
                offset: index as usize,
                expected: "fieldref constant",
            }),
        }
    }

    /// `(class name, member name, descriptor)` of a method reference
    pub fn method_ref_at(&self, index: u16) -> Result<(&str, &str, &str), ParseError> {
        match self.expect(index, "methodref constant")? {
            Constant::MethodRef {
                class,
                name_and_type,
            }
            | Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => {
                let (name, descriptor) = self.name_and_type_at(*name_and_type)?;
                Ok((self.class_name_at(*class)?, name, descriptor))
            }
            _ => Err(ParseError {
                offset: index as usize,
                expected: "methodref constant",
            }),
        }
    }

    /// Validate every index held by every entry
    ///
    /// Strict mode runs this right after parsing so that structurally legal
    /// files with dangling references are rejected up front instead of
    /// surfacing halfway through a method compilation.
    pub fn check_indices(&self) -> Result<(), ParseError> {
        for index in 1..self.entries.len() as u16 {
            match self.get(index) {
                None => {}
                Some(Constant::Class { name }) | Some(Constant::String { utf8: name }) => {
                    self.utf8_at(*name)?;
                }
                Some(Constant::NameAndType { name, descriptor }) => {
                    self.utf8_at(*name)?;
                    self.utf8_at(*descriptor)?;
                }
                Some(Constant::FieldRef { .. }) => {
                    self.field_ref_at(index)?;
                }
                Some(Constant::MethodRef { .. }) | Some(Constant::InterfaceMethodRef { .. }) => {
                    self.method_ref_at(index)?;
                }
                Some(
                    Constant::Utf8(_)
                    | Constant::Integer(_)
                    | Constant::Float(_)
                    | Constant::Long(_)
                    | Constant::Double(_),
                ) => {}
            }
        }
        Ok(())
    }
}

/// Decode the modified UTF-8 format used by class files
///
/// The differences from standard UTF-8: the null character is two bytes,
/// supplementary characters are surrogate pairs, and only the 1/2/3 byte
/// encodings appear. Surrogate pairs are accepted but lone surrogates are
/// replaced rather than rejected, matching lenient JVM behavior.
fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut out = String::with_capacity(bytes.len());
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut idx = 0;

    while idx < bytes.len() {
        let b0 = bytes[idx];
        let unit: u16 = if b0 & 0x80 == 0 {
            idx += 1;
            b0 as u16
        } else if b0 & 0xE0 == 0xC0 {
            let b1 = *bytes.get(idx + 1)?;
            idx += 2;
            ((b0 as u16 & 0x1F) << 6) | (b1 as u16 & 0x3F)
        } else if b0 & 0xF0 == 0xE0 {
            let b1 = *bytes.get(idx + 1)?;
            let b2 = *bytes.get(idx + 2)?;
            idx += 3;
            ((b0 as u16 & 0x0F) << 12) | ((b1 as u16 & 0x3F) << 6) | (b2 as u16 & 0x3F)
        } else {
            return None;
        };
        units.push(unit);
    }

    for c in char::decode_utf16(units) {
        out.push(c.unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    Some(out)
}

#[cfg(test)]
mod constant_pool_tests {
    use super::*;

    fn pool_from(bytes: &[u8]) -> Result<ConstantPool, ParseError> {
        ConstantPool::parse(&mut ClassParser::new(bytes))
    }

    #[test]
    fn long_takes_two_slots() {
        // count = 3: one long entry occupying slots 1 and 2
        let bytes = [0x00, 0x03, 5, 0, 0, 0, 0, 0, 0, 0, 42];
        let pool = pool_from(&bytes).unwrap();
        assert_eq!(pool.get(1), Some(&Constant::Long(42)));
        assert_eq!(pool.get(2), None);
    }

    #[test]
    fn utf8_with_embedded_null() {
        let bytes = [0x00, 0x02, 1, 0x00, 0x04, 97, 192, 128, 97];
        let pool = pool_from(&bytes).unwrap();
        assert_eq!(pool.utf8_at(1).unwrap(), "a\u{0}a");
    }

    #[test]
    fn dangling_index_caught_by_check() {
        // Class constant pointing at slot 9 which does not exist
        let bytes = [0x00, 0x02, 7, 0x00, 0x09];
        let pool = pool_from(&bytes).unwrap();
        assert!(pool.check_indices().is_err());
    }

    #[test]
    fn unknown_tag_rejected() {
        let bytes = [0x00, 0x02, 19, 0x00, 0x00];
        assert!(pool_from(&bytes).is_err());
    }
}
