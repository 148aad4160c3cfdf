//! JVM field and method descriptors.
//!
//! Call sites are linked with *erased* descriptors: every reference type
//! that is not a platform (`java/…`) type is replaced by `java/lang/Object`.
//! This keeps the number of distinct generated call-site shapes small, the
//! concrete signature is restored by [`crate::handle::Adaptation`] once the
//! target has been resolved inside its isolated context.

use std::fmt;
use std::str::FromStr;

use crate::error::DescriptorError;

pub const OBJECT: &str = "java/lang/Object";
pub const STRING: &str = "java/lang/String";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// Class or interface, by internal name.
    Reference(String),
    Array(Box<FieldType>),
}

impl FieldType {
    pub fn object() -> Self {
        FieldType::Reference(OBJECT.to_string())
    }

    pub fn reference(name: impl Into<String>) -> Self {
        FieldType::Reference(name.into())
    }

    pub fn is_primitive(&self) -> bool {
        !self.is_reference()
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Reference(_) | FieldType::Array(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, FieldType::Reference(name) if name == OBJECT)
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            FieldType::Reference(name) => Some(name),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self, DescriptorError> {
        let mut c = Cursor::new(s);
        let ty = c.field_type()?;
        c.finish()?;
        Ok(ty)
    }

    /// Erasure used at call-site boundaries.
    pub fn erase(&self) -> FieldType {
        match self {
            FieldType::Reference(name) if !name.starts_with("java/") => FieldType::object(),
            // TODO: erase array component types once generated call sites
            // cast array elements individually
            other => other.clone(),
        }
    }

    fn write(&self, out: &mut String) {
        match self {
            FieldType::Byte => out.push('B'),
            FieldType::Char => out.push('C'),
            FieldType::Double => out.push('D'),
            FieldType::Float => out.push('F'),
            FieldType::Int => out.push('I'),
            FieldType::Long => out.push('J'),
            FieldType::Short => out.push('S'),
            FieldType::Boolean => out.push('Z'),
            FieldType::Reference(name) => {
                out.push('L');
                out.push_str(name);
                out.push(';');
            }
            FieldType::Array(component) => {
                out.push('[');
                component.write(out);
            }
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        self.write(&mut s);
        f.write_str(&s)
    }
}

impl FromStr for FieldType {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::parse(s)
    }
}

/// A method descriptor: parameter types and an optional (non-void) return.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    params: Vec<FieldType>,
    ret: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn new(params: Vec<FieldType>, ret: Option<FieldType>) -> Self {
        Self { params, ret }
    }

    pub fn parse(s: &str) -> Result<Self, DescriptorError> {
        let mut c = Cursor::new(s);
        let desc = c.method_descriptor()?;
        c.finish()?;
        Ok(desc)
    }

    pub fn params(&self) -> &[FieldType] {
        &self.params
    }

    pub fn return_type(&self) -> Option<&FieldType> {
        self.ret.as_ref()
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn erase(&self) -> MethodDescriptor {
        MethodDescriptor {
            params: self.params.iter().map(FieldType::erase).collect(),
            ret: self.ret.as_ref().map(FieldType::erase),
        }
    }

    pub fn with_return(&self, ret: Option<FieldType>) -> MethodDescriptor {
        MethodDescriptor { params: self.params.clone(), ret }
    }

    /// Drops the first `n` parameters; `None` when there are fewer.
    pub fn drop_leading(&self, n: usize) -> Option<MethodDescriptor> {
        if self.params.len() < n {
            return None;
        }
        Some(MethodDescriptor { params: self.params[n..].to_vec(), ret: self.ret.clone() })
    }

    pub fn with_leading(&self, first: FieldType) -> MethodDescriptor {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        params.push(first);
        params.extend(self.params.iter().cloned());
        MethodDescriptor { params, ret: self.ret.clone() }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::from("(");
        for p in &self.params {
            p.write(&mut s);
        }
        s.push(')');
        match &self.ret {
            Some(ret) => ret.write(&mut s),
            None => s.push('V'),
        }
        f.write_str(&s)
    }
}

impl FromStr for MethodDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MethodDescriptor::parse(s)
    }
}

/// The class file format limit on array dimensions.
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

struct Cursor<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, bytes: src.as_bytes(), pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn next(&mut self) -> Result<u8, DescriptorError> {
        let b = self.peek().ok_or_else(|| self.truncated())?;
        self.pos += 1;
        Ok(b)
    }

    fn truncated(&self) -> DescriptorError {
        if self.src.is_empty() {
            DescriptorError::Empty
        } else {
            DescriptorError::Truncated(self.src.to_string())
        }
    }

    fn unexpected(&self, at: usize) -> DescriptorError {
        DescriptorError::Unexpected {
            descriptor: self.src.to_string(),
            offset: at,
            found: self.src[at..].chars().next().unwrap_or('\0'),
        }
    }

    fn finish(&self) -> Result<(), DescriptorError> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(DescriptorError::Trailing(self.src.to_string()))
        }
    }

    fn field_type(&mut self) -> Result<FieldType, DescriptorError> {
        let mut dims = 0;
        while self.peek() == Some(b'[') {
            if dims == MAX_ARRAY_DIMENSIONS {
                return Err(self.unexpected(self.pos));
            }
            dims += 1;
            self.pos += 1;
        }
        let mut ty = self.element_type()?;
        for _ in 0..dims {
            ty = FieldType::Array(Box::new(ty));
        }
        Ok(ty)
    }

    fn element_type(&mut self) -> Result<FieldType, DescriptorError> {
        let at = self.pos;
        let ty = match self.next()? {
            b'B' => FieldType::Byte,
            b'C' => FieldType::Char,
            b'D' => FieldType::Double,
            b'F' => FieldType::Float,
            b'I' => FieldType::Int,
            b'J' => FieldType::Long,
            b'S' => FieldType::Short,
            b'Z' => FieldType::Boolean,
            b'L' => {
                let start = self.pos;
                while self.next()? != b';' {}
                let name = &self.src[start..self.pos - 1];
                if name.is_empty() {
                    return Err(self.unexpected(start));
                }
                FieldType::Reference(name.to_string())
            }
            b'V' => return Err(DescriptorError::MisplacedVoid(self.src.to_string())),
            _ => return Err(self.unexpected(at)),
        };
        Ok(ty)
    }

    fn method_descriptor(&mut self) -> Result<MethodDescriptor, DescriptorError> {
        if self.next()? != b'(' {
            return Err(self.unexpected(0));
        }
        let mut params = Vec::new();
        while self.peek().ok_or_else(|| self.truncated())? != b')' {
            params.push(self.field_type()?);
        }
        self.pos += 1;
        let ret = if self.peek() == Some(b'V') {
            self.pos += 1;
            None
        } else {
            Some(self.field_type()?)
        };
        Ok(MethodDescriptor { params, ret })
    }
}
