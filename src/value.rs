//! Values passed through call sites and method handles.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::descriptor::{FieldType, OBJECT, STRING};
use crate::types::{LoadedType, TypeRef};

/// A runtime value. `byte`, `char` and `short` travel as [`Value::Int`],
/// the way the VM widens them on the operand stack.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Void,
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<str>),
    Array(Arc<[Value]>),
    Object(JObject),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(Arc::from(values))
    }

    /// The value an uninstrumented call site produces for `ret`.
    pub fn default_for(ret: Option<&FieldType>) -> Self {
        match ret {
            None => Value::Void,
            Some(FieldType::Boolean) => Value::Boolean(false),
            Some(FieldType::Byte | FieldType::Char | FieldType::Short | FieldType::Int) => Value::Int(0),
            Some(FieldType::Long) => Value::Long(0),
            Some(FieldType::Float) => Value::Float(0.0),
            Some(FieldType::Double) => Value::Double(0.0),
            Some(FieldType::Reference(_) | FieldType::Array(_)) => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(&**s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(&**values),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&JObject> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Whether this value may be stored in a slot of type `ty` without
    /// conversion. `java/lang/Object` slots accept every non-void value
    /// (primitives count as boxed).
    pub fn conforms_to(&self, ty: &FieldType) -> bool {
        match (ty, self) {
            (_, Value::Void) => false,
            (FieldType::Boolean, Value::Boolean(_)) => true,
            (FieldType::Byte | FieldType::Char | FieldType::Short | FieldType::Int, Value::Int(_)) => true,
            (FieldType::Long, Value::Long(_)) => true,
            (FieldType::Float, Value::Float(_)) => true,
            (FieldType::Double, Value::Double(_)) => true,
            (FieldType::Reference(name), v) if name == OBJECT => !matches!(v, Value::Void),
            (FieldType::Reference(_) | FieldType::Array(_), Value::Null) => true,
            (FieldType::Reference(name), Value::Str(_)) => {
                name == STRING || name == "java/lang/CharSequence"
            }
            (FieldType::Reference(name), Value::Object(obj)) => obj.is_instance_of(name),
            (FieldType::Array(_), Value::Array(_)) => true,
            _ => false,
        }
    }

    /// Like [`conforms_to`](Self::conforms_to), with a reference type
    /// `ty` that `namespace` defined: objects only conform when that exact
    /// type is their class or one of their supertypes.
    pub fn conforms_to_in(&self, ty: &FieldType, namespace: Option<&str>) -> bool {
        match (ty, self, namespace) {
            (FieldType::Reference(name), Value::Object(obj), Some(_)) if name != OBJECT => {
                obj.is_instance_of_in(name, namespace)
            }
            _ => self.conforms_to(ty),
        }
    }

    /// Short type label for diagnostics.
    pub fn type_label(&self) -> String {
        match self {
            Value::Void => "void".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(_) => "boolean".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Long(_) => "long".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Double(_) => "double".to_string(),
            Value::Str(_) => STRING.to_string(),
            Value::Array(_) => "array".to_string(),
            Value::Object(obj) => obj.class_name().to_string(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("Void"),
            Value::Null => f.write_str("Null"),
            Value::Boolean(v) => write!(f, "Boolean({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Long(v) => write!(f, "Long({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Double(v) => write!(f, "Double({v})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Array(values) => f.debug_list().entries(values.iter()).finish(),
            Value::Object(obj) => obj.fmt(f),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<JObject> for Value {
    fn from(v: JObject) -> Self {
        Value::Object(v)
    }
}

/// An object reference. It remembers the runtime class it was created as,
/// including the namespace that defined that class, so casts and isolation
/// can be checked without a heap.
#[derive(Clone)]
pub struct JObject {
    class: Arc<str>,
    namespace: Arc<str>,
    supertypes: Arc<[TypeRef]>,
    payload: Arc<dyn Any + Send + Sync>,
}

impl JObject {
    /// Creates an instance of `ty` carrying `payload` as its state.
    pub fn new<T: Any + Send + Sync>(ty: &LoadedType, payload: T) -> Self {
        Self {
            class: ty.name_arc(),
            namespace: ty.namespace_arc(),
            supertypes: ty.supertypes_arc(),
            payload: Arc::new(payload),
        }
    }

    /// An instance of a platform class that has no [`LoadedType`]
    /// (e.g. `java/lang/invoke/MethodHandles$Lookup`).
    pub fn platform<T: Any + Send + Sync>(class: &str, payload: T) -> Self {
        Self {
            class: Arc::from(class),
            namespace: Arc::from("<platform>"),
            supertypes: Arc::from(Vec::new()),
            payload: Arc::new(payload),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    /// Label of the namespace that defined this object's class.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Checks by name only, whichever namespace defined the type.
    pub fn is_instance_of(&self, name: &str) -> bool {
        self.is_instance_of_in(name, None)
    }

    /// Whether this object is an instance of `name` as defined by
    /// `namespace`; `None` accepts any namespace.
    pub fn is_instance_of_in(&self, name: &str, namespace: Option<&str>) -> bool {
        name == OBJECT
            || (*self.class == *name && (namespace.is_none() || namespace == Some(&*self.namespace)))
            || self.supertypes.iter().any(|s| s.is(name, namespace))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub fn ptr_eq(a: &JObject, b: &JObject) -> bool {
        Arc::ptr_eq(&a.payload, &b.payload)
    }
}

impl fmt::Debug for JObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.class, self.namespace)
    }
}
