//! Error types, one enum per concern.
//!
//! None of these ever reach instrumented application code: registration
//! errors are reported at startup, load and link errors leave a call site
//! without a handle, and only [`InvocationError`] travels through a bound
//! handle (it is the advice's own failure, or a runtime cast failure).

use thiserror::Error;

use crate::classfile::ClassFileError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("empty descriptor")]
    Empty,
    #[error("unexpected {found:?} at offset {offset} in {descriptor:?}")]
    Unexpected { descriptor: String, offset: usize, found: char },
    #[error("descriptor {0:?} ends early")]
    Truncated(String),
    #[error("void is only valid as a return type: {0:?}")]
    MisplacedVoid(String),
    #[error("trailing characters in {0:?}")]
    Trailing(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("module {0} is already registered")]
    DuplicateModule(String),
    #[error("advice {advice} of module {module} is already registered by {owner}")]
    AdviceConflict { advice: String, module: String, owner: String },
    #[error("provided module {0} does not enable isolation")]
    IsolationDisabled(String),
}

/// Failures while supplying the definition of an injected type.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no definition available for {0}")]
    Missing(String),
    #[error(transparent)]
    ClassFile(#[from] ClassFileError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "jar")]
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("type {0} not found")]
    TypeNotFound(String),
    #[error("definition supplied for {requested} declares {declared}")]
    WrongName { requested: String, declared: String },
    #[error("type {0} is already defined in this namespace")]
    AlreadyDefined(String),
    #[error("type {0} is being defined by the current thread")]
    Circular(String),
    #[error("failed to supply {name}")]
    Source {
        name: String,
        #[source]
        source: SourceError,
    },
    #[error("module {0} is not registered")]
    UnknownModule(String),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("unknown bootstrapping kind: {0}")]
    UnknownKind(String),
    #[error("unknown proxy method kind: {0}")]
    UnknownShape(String),
    #[error("malformed link request: {0}")]
    Malformed(String),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("no {kind} member {owner}.{name}{descriptor}")]
    NoSuchMember { kind: &'static str, owner: String, name: String, descriptor: String },
    #[error("cannot adapt {from} to {to}: {reason}")]
    WrongMethodType { from: String, to: String, reason: String },
    #[error("lookup exposer returned {0} instead of a lookup")]
    LookupUnavailable(String),
    #[error(transparent)]
    Invocation(#[from] InvocationError),
    #[error("nested instrumented call site linkage detected")]
    Reentrant,
    #[error("call site linking panicked: {0}")]
    Panicked(String),
    #[error("agent has been shut down")]
    ShutDown,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvocationError {
    #[error("expected {expected} arguments, got {actual}")]
    Arity { expected: usize, actual: usize },
    #[error("cannot cast {value} to {target}")]
    ClassCast { value: String, target: String },
    #[error("null receiver for {0}")]
    NullReceiver(String),
    #[error("native method {owner}.{name}{descriptor} is not bound")]
    UnsatisfiedLink { owner: String, name: String, descriptor: String },
    #[error("namespace {0} is no longer reachable")]
    NamespaceGone(String),
    #[error("{0}")]
    Thrown(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProxyError {
    #[error("unknown type of method: {0}")]
    UnknownMemberShape(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown agent option {0:?}")]
    UnknownOption(String),
    #[error("option {key} expects true or false, got {value:?}")]
    InvalidBool { key: String, value: String },
    #[error("option {0} needs a value")]
    MissingValue(String),
}
