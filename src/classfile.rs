//! Class file decoding for injected helper and advice types.
//!
//! Only the linkage-relevant view of a `.class` file is decoded: the
//! constant pool, the class/superclass/interface names and the field and
//! method tables. Attribute bodies are kept as raw bytes, nothing in this
//! crate interprets bytecode.

use thiserror::Error;

pub const MAGIC: u32 = 0xCAFE_BABE;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassFileError {
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("invalid magic: {0:#x}")]
    InvalidMagic(u32),
    #[error("invalid constant pool index: {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("invalid constant pool tag: {0}")]
    InvalidConstantPoolTag(u8),
    #[error("{0} trailing bytes after class file")]
    TrailingBytes(usize),
    #[error("constant pool entry {0} is not valid UTF-8")]
    InvalidUtf8(u16),
}

#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<RawAttribute>,
}

/// A field or method table entry.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<RawAttribute>,
}

impl MemberInfo {
    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags & ACC_ABSTRACT != 0
    }
}

#[derive(Debug, Clone)]
pub struct RawAttribute {
    pub name: String,
    pub info: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Option<CpInfo>>,
}

impl ConstantPool {
    pub fn get(&self, index: u16) -> Result<&CpInfo, ClassFileError> {
        if index == 0 {
            return Err(ClassFileError::InvalidConstantPoolIndex(index));
        }
        self.entries
            .get(index as usize)
            .and_then(|e| e.as_ref())
            .ok_or(ClassFileError::InvalidConstantPoolIndex(index))
    }

    pub fn get_utf8(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            CpInfo::Utf8(s) => Ok(s.as_str()),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    /// Resolves a `CONSTANT_Class` entry to its internal name.
    pub fn get_class_name(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            CpInfo::Class { name_index } => self.get_utf8(*name_index),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

#[derive(Debug, Clone)]
pub enum CpInfo {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFileError> {
        let mut r = Reader::new(bytes);
        let magic = r.read_u4()?;
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }

        let minor_version = r.read_u2()?;
        let major_version = r.read_u2()?;

        let constant_pool = parse_constant_pool(&mut r)?;

        let access_flags = r.read_u2()?;
        let this_class = r.read_u2()?;
        let super_class = r.read_u2()?;

        let interfaces_count = r.read_u2()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(r.read_u2()?);
        }

        let fields = parse_members(&mut r, &constant_pool)?;
        let methods = parse_members(&mut r, &constant_pool)?;
        let attributes = parse_attributes(&mut r, &constant_pool)?;

        if r.remaining() > 0 {
            return Err(ClassFileError::TrailingBytes(r.remaining()));
        }

        Ok(Self {
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

    /// Internal name of the class, e.g. `com/example/Helper`.
    pub fn class_name(&self) -> Result<&str, ClassFileError> {
        self.constant_pool.get_class_name(self.this_class)
    }

    /// Internal name of the superclass; `None` only for `java/lang/Object`.
    pub fn super_name(&self) -> Result<Option<&str>, ClassFileError> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.get_class_name(self.super_class).map(Some)
    }

    pub fn interface_names(&self) -> Result<Vec<&str>, ClassFileError> {
        self.interfaces
            .iter()
            .map(|&i| self.constant_pool.get_class_name(i))
            .collect()
    }

    pub fn member_name(&self, member: &MemberInfo) -> Result<&str, ClassFileError> {
        self.constant_pool.get_utf8(member.name_index)
    }

    pub fn member_descriptor(&self, member: &MemberInfo) -> Result<&str, ClassFileError> {
        self.constant_pool.get_utf8(member.descriptor_index)
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags & ACC_INTERFACE != 0
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn read_u1(&mut self) -> Result<u8, ClassFileError> {
        let v = *self.data.get(self.pos).ok_or(ClassFileError::UnexpectedEof)?;
        self.pos += 1;
        Ok(v)
    }

    fn read_u2(&mut self) -> Result<u16, ClassFileError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u4(&mut self) -> Result<u32, ClassFileError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u8(&mut self) -> Result<u64, ClassFileError> {
        let high = self.read_u4()? as u64;
        let low = self.read_u4()? as u64;
        Ok((high << 32) | low)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ClassFileError> {
        if self.remaining() < len {
            return Err(ClassFileError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

fn parse_constant_pool(r: &mut Reader) -> Result<ConstantPool, ClassFileError> {
    let count = r.read_u2()? as usize;
    let mut entries: Vec<Option<CpInfo>> = Vec::with_capacity(count);
    entries.push(None); // index 0 is unused

    while entries.len() < count {
        let tag = r.read_u1()?;
        let entry = match tag {
            1 => {
                let index = entries.len() as u16;
                let len = r.read_u2()? as usize;
                let bytes = r.read_bytes(len)?;
                // Modified UTF-8 only differs from UTF-8 for NUL and
                // supplementary characters, neither of which appear in
                // well-formed type names.
                let text = std::str::from_utf8(bytes).map_err(|_| ClassFileError::InvalidUtf8(index))?;
                CpInfo::Utf8(text.to_string())
            }
            3 => CpInfo::Integer(r.read_u4()? as i32),
            4 => CpInfo::Float(f32::from_bits(r.read_u4()?)),
            5 | 6 => {
                let bits = r.read_u8()?;
                let value = if tag == 5 {
                    CpInfo::Long(bits as i64)
                } else {
                    CpInfo::Double(f64::from_bits(bits))
                };
                // 8-byte constants take two slots
                entries.push(Some(value));
                entries.push(None);
                continue;
            }
            7 => CpInfo::Class { name_index: r.read_u2()? },
            8 => CpInfo::String { string_index: r.read_u2()? },
            9 => CpInfo::Fieldref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            10 => CpInfo::Methodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            11 => CpInfo::InterfaceMethodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            12 => CpInfo::NameAndType { name_index: r.read_u2()?, descriptor_index: r.read_u2()? },
            15 => CpInfo::MethodHandle { reference_kind: r.read_u1()?, reference_index: r.read_u2()? },
            16 => CpInfo::MethodType { descriptor_index: r.read_u2()? },
            17 => CpInfo::Dynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            18 => CpInfo::InvokeDynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            19 => CpInfo::Module { name_index: r.read_u2()? },
            20 => CpInfo::Package { name_index: r.read_u2()? },
            _ => return Err(ClassFileError::InvalidConstantPoolTag(tag)),
        };
        entries.push(Some(entry));
    }

    Ok(ConstantPool { entries })
}

fn parse_members(r: &mut Reader, cp: &ConstantPool) -> Result<Vec<MemberInfo>, ClassFileError> {
    let count = r.read_u2()? as usize;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let access_flags = r.read_u2()?;
        let name_index = r.read_u2()?;
        let descriptor_index = r.read_u2()?;
        // validate eagerly so later lookups cannot fail on these indices
        cp.get_utf8(name_index)?;
        cp.get_utf8(descriptor_index)?;
        let attributes = parse_attributes(r, cp)?;
        members.push(MemberInfo { access_flags, name_index, descriptor_index, attributes });
    }
    Ok(members)
}

fn parse_attributes(r: &mut Reader, cp: &ConstantPool) -> Result<Vec<RawAttribute>, ClassFileError> {
    let count = r.read_u2()? as usize;
    let mut attrs = Vec::with_capacity(count);
    for _ in 0..count {
        let name_index = r.read_u2()?;
        let length = r.read_u4()? as usize;
        let name = cp.get_utf8(name_index)?.to_string();
        let info = r.read_bytes(length)?.to_vec();
        attrs.push(RawAttribute { name, info });
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let err = ClassFile::parse(&[0xCA, 0xFE, 0xD0, 0x0D, 0, 0, 0, 52]).unwrap_err();
        assert_eq!(err, ClassFileError::InvalidMagic(0xCAFE_D00D));
    }

    #[test]
    fn truncated_pool_is_eof() {
        let mut bytes = MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 52, 0, 3, 1, 0, 4, b'T']);
        assert_eq!(ClassFile::parse(&bytes).unwrap_err(), ClassFileError::UnexpectedEof);
    }

    #[test]
    fn malformed_utf8_names_its_pool_entry() {
        let mut bytes = MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 52, 0, 3]);
        bytes.extend_from_slice(&[1, 0, 1, b'A']);
        bytes.extend_from_slice(&[1, 0, 2, 0xC3, 0x28]);
        assert_eq!(ClassFile::parse(&bytes).unwrap_err(), ClassFileError::InvalidUtf8(2));
    }
}
