//! Method handles and the lookup capability that produces them.
//!
//! A [`MethodHandle`] is a typed, directly invocable reference to a member.
//! [`MethodHandle::as_type`] adapts a handle to another signature by
//! building an [`Adaptation`] plan once, at bind time; invoking the adapted
//! handle only runs the precomputed conversions.

use std::fmt;
use std::sync::Arc;

use crate::descriptor::{FieldType, MethodDescriptor};
use crate::error::{InvocationError, LinkError, LoadError};
use crate::namespace::TypeResolver;
use crate::types::{LoadedType, MemberKind, CONSTRUCTOR_NAME};
use crate::value::Value;

type Invoker = Arc<dyn Fn(&[Value]) -> Result<Value, InvocationError> + Send + Sync>;

#[derive(Clone)]
pub struct MethodHandle {
    descriptor: MethodDescriptor,
    invoker: Invoker,
}

impl MethodHandle {
    /// A handle around an arbitrary closure. Arguments are checked against
    /// `descriptor` before `f` runs.
    pub fn from_fn<F>(descriptor: MethodDescriptor, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, InvocationError> + Send + Sync + 'static,
    {
        Self { descriptor, invoker: Arc::new(f) }
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, InvocationError> {
        let params = self.descriptor.params();
        if args.len() != params.len() {
            return Err(InvocationError::Arity { expected: params.len(), actual: args.len() });
        }
        for (arg, ty) in args.iter().zip(params) {
            if !arg.conforms_to(ty) {
                return Err(InvocationError::ClassCast { value: arg.type_label(), target: ty.to_string() });
            }
        }
        (self.invoker)(args)
    }

    /// Adapts this handle to `expected`. Fails when some parameter or the
    /// return type cannot be converted. Casts check reference types by name.
    pub fn as_type(&self, expected: &MethodDescriptor) -> Result<MethodHandle, LinkError> {
        if self.descriptor == *expected {
            return Ok(self.clone());
        }
        self.adapted(expected, Adaptation::plan(&self.descriptor, expected)?)
    }

    /// Like [`as_type`](Self::as_type), but every cast target is pinned to
    /// the type `lookup` resolves for it, so an object of a same-named type
    /// from another namespace fails the cast.
    pub fn as_type_in(&self, expected: &MethodDescriptor, lookup: &Lookup) -> Result<MethodHandle, LinkError> {
        if self.descriptor == *expected {
            return Ok(self.clone());
        }
        self.adapted(expected, Adaptation::plan(&self.descriptor, expected)?.pinned(lookup)?)
    }

    fn adapted(&self, expected: &MethodDescriptor, plan: Adaptation) -> Result<MethodHandle, LinkError> {
        let target = self.clone();
        Ok(MethodHandle {
            descriptor: expected.clone(),
            invoker: Arc::new(move |args| plan.apply(&target, args)),
        })
    }
}

impl fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodHandle{}", self.descriptor)
    }
}

/// One step of an [`Adaptation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    Identity,
    /// Reference narrowing, checked on every invocation. With a namespace,
    /// only the target type defined there passes.
    Cast { target: FieldType, namespace: Option<Arc<str>> },
    /// Primitive into an `Object` slot.
    Box,
    /// `Object` slot into a primitive, checked on every invocation.
    Unbox(FieldType),
    /// Primitive widening (`int` to `long` and so on).
    Widen(FieldType),
    /// `void` producer into a value slot: the slot gets its default value.
    Default(FieldType),
    /// Value producer into a `void` slot.
    Discard,
}

impl Conversion {
    /// Conversion for a value flowing from a slot of type `from` into one of
    /// type `to`. `None` is `void`.
    fn between(from: Option<&FieldType>, to: Option<&FieldType>) -> Result<Conversion, String> {
        let (from, to) = match (from, to) {
            (None, None) => return Ok(Conversion::Identity),
            (None, Some(to)) => return Ok(Conversion::Default(to.clone())),
            (Some(_), None) => return Ok(Conversion::Discard),
            (Some(from), Some(to)) => (from, to),
        };
        if from == to {
            Ok(Conversion::Identity)
        } else if from.is_reference() && to.is_reference() {
            if to.is_object() {
                Ok(Conversion::Identity)
            } else {
                Ok(Conversion::Cast { target: to.clone(), namespace: None })
            }
        } else if from.is_primitive() && to.is_object() {
            Ok(Conversion::Box)
        } else if from.is_object() && to.is_primitive() {
            Ok(Conversion::Unbox(to.clone()))
        } else if widens(from, to) {
            Ok(Conversion::Widen(to.clone()))
        } else {
            Err(format!("{from} is not convertible to {to}"))
        }
    }

    fn apply(&self, value: Value) -> Result<Value, InvocationError> {
        match self {
            Conversion::Identity | Conversion::Box => Ok(value),
            Conversion::Cast { target, namespace } => {
                if value.conforms_to_in(target, namespace.as_deref()) {
                    Ok(value)
                } else {
                    let value = match (&value, namespace) {
                        (Value::Object(obj), Some(_)) => format!("{obj:?}"),
                        _ => value.type_label(),
                    };
                    Err(InvocationError::ClassCast { value, target: target.to_string() })
                }
            }
            Conversion::Unbox(ty) => {
                if value.conforms_to(ty) {
                    Ok(value)
                } else {
                    Err(InvocationError::ClassCast { value: value.type_label(), target: ty.to_string() })
                }
            }
            Conversion::Widen(ty) => widen(value, ty),
            Conversion::Default(ty) => Ok(Value::default_for(Some(ty))),
            Conversion::Discard => Ok(Value::Void),
        }
    }
}

fn widens(from: &FieldType, to: &FieldType) -> bool {
    use FieldType::*;
    matches!(
        (from, to),
        (Byte, Short | Int | Long | Float | Double)
            | (Short | Char, Int | Long | Float | Double)
            | (Int, Long | Float | Double)
            | (Long, Float | Double)
            | (Float, Double)
    )
}

fn widen(value: Value, to: &FieldType) -> Result<Value, InvocationError> {
    let widened = match (&value, to) {
        (Value::Int(v), FieldType::Long) => Value::Long(i64::from(*v)),
        (Value::Int(v), FieldType::Float) => Value::Float(*v as f32),
        (Value::Int(v), FieldType::Double) => Value::Double(f64::from(*v)),
        (Value::Int(v), FieldType::Short | FieldType::Int) => Value::Int(*v),
        (Value::Long(v), FieldType::Float) => Value::Float(*v as f32),
        (Value::Long(v), FieldType::Double) => Value::Double(*v as f64),
        (Value::Float(v), FieldType::Double) => Value::Double(f64::from(*v)),
        _ => return Err(InvocationError::ClassCast { value: value.type_label(), target: to.to_string() }),
    };
    Ok(widened)
}

/// Conversions from an expected signature to a target's signature.
///
/// Arguments flow from the expected parameter types into the target's, the
/// result flows from the target's return type into the expected one.
#[derive(Debug, Clone, PartialEq)]
pub struct Adaptation {
    params: Vec<Conversion>,
    ret: Conversion,
}

impl Adaptation {
    pub fn plan(target: &MethodDescriptor, expected: &MethodDescriptor) -> Result<Self, LinkError> {
        let mismatch = |reason: String| LinkError::WrongMethodType {
            from: target.to_string(),
            to: expected.to_string(),
            reason,
        };
        if target.arity() != expected.arity() {
            return Err(mismatch(format!("arity {} vs {}", target.arity(), expected.arity())));
        }
        let params = expected
            .params()
            .iter()
            .zip(target.params())
            .map(|(e, t)| Conversion::between(Some(e), Some(t)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(mismatch)?;
        let ret = Conversion::between(target.return_type(), expected.return_type()).map_err(mismatch)?;
        Ok(Self { params, ret })
    }

    /// Pins every cast to a class type to the namespace that defines it as
    /// seen from `lookup`. Types `lookup` cannot find stay checked by name.
    pub fn pinned(mut self, lookup: &Lookup) -> Result<Self, LinkError> {
        for conversion in self.params.iter_mut().chain(std::iter::once(&mut self.ret)) {
            if let Conversion::Cast { target: FieldType::Reference(name), namespace } = conversion {
                *namespace = match lookup.load_type(name) {
                    Ok(ty) => Some(ty.namespace_arc()),
                    Err(LoadError::TypeNotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                };
            }
        }
        Ok(self)
    }

    pub fn params(&self) -> &[Conversion] {
        &self.params
    }

    pub fn return_conversion(&self) -> &Conversion {
        &self.ret
    }

    pub fn is_identity(&self) -> bool {
        self.ret == Conversion::Identity && self.params.iter().all(|c| *c == Conversion::Identity)
    }

    fn apply(&self, target: &MethodHandle, args: &[Value]) -> Result<Value, InvocationError> {
        let converted = args
            .iter()
            .zip(&self.params)
            .map(|(arg, conversion)| conversion.apply(arg.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let ret = target.invoke(&converted)?;
        self.ret.apply(ret)
    }
}

/// The capability to find members and load types through one namespace.
#[derive(Clone)]
pub struct Lookup {
    resolver: Arc<dyn TypeResolver>,
}

impl Lookup {
    pub fn new(resolver: Arc<dyn TypeResolver>) -> Self {
        Self { resolver }
    }

    /// Label of the namespace this lookup resolves through.
    pub fn namespace(&self) -> &str {
        self.resolver.label()
    }

    pub fn load_type(&self, name: &str) -> Result<Arc<LoadedType>, LoadError> {
        self.resolver.resolve(name)
    }

    pub fn find_static(
        &self,
        ty: &Arc<LoadedType>,
        name: &str,
        descriptor: &MethodDescriptor,
    ) -> Result<MethodHandle, LinkError> {
        let index = self.member(ty, MemberKind::Static, name, descriptor)?;
        Ok(self.bind(ty, index, descriptor.clone(), |_| Ok(())))
    }

    /// `descriptor` is the constructor's own descriptor (returning void);
    /// the handle returns the new instance.
    pub fn find_constructor(
        &self,
        ty: &Arc<LoadedType>,
        descriptor: &MethodDescriptor,
    ) -> Result<MethodHandle, LinkError> {
        let index = self.member(ty, MemberKind::Constructor, CONSTRUCTOR_NAME, descriptor)?;
        let handle_type = descriptor.with_return(Some(FieldType::reference(ty.name())));
        Ok(self.bind(ty, index, handle_type, |_| Ok(())))
    }

    /// The handle takes the receiver as an extra leading parameter.
    pub fn find_virtual(
        &self,
        ty: &Arc<LoadedType>,
        name: &str,
        descriptor: &MethodDescriptor,
    ) -> Result<MethodHandle, LinkError> {
        let index = self.member(ty, MemberKind::Virtual, name, descriptor)?;
        let handle_type = descriptor.with_leading(FieldType::reference(ty.name()));
        let member = format!("{}.{name}{descriptor}", ty.name());
        Ok(self.bind(ty, index, handle_type, move |args| match args.first() {
            Some(Value::Null) | None => Err(InvocationError::NullReceiver(member.clone())),
            Some(_) => Ok(()),
        }))
    }

    fn member(
        &self,
        ty: &LoadedType,
        kind: MemberKind,
        name: &str,
        descriptor: &MethodDescriptor,
    ) -> Result<usize, LinkError> {
        ty.find_member(kind, name, descriptor).ok_or_else(|| LinkError::NoSuchMember {
            kind: kind.as_str(),
            owner: ty.name().to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    fn bind<C>(&self, ty: &Arc<LoadedType>, index: usize, descriptor: MethodDescriptor, check: C) -> MethodHandle
    where
        C: Fn(&[Value]) -> Result<(), InvocationError> + Send + Sync + 'static,
    {
        let ty = ty.clone();
        // the defining namespace stays reachable while the handle is held
        let keepalive = self.resolver.clone();
        MethodHandle::from_fn(descriptor, move |args| {
            let _ = &keepalive;
            check(args)?;
            ty.invoke_member(index, args)
        })
    }
}

impl fmt::Debug for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lookup({})", self.namespace())
    }
}
