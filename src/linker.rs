//! Call-site linking.
//!
//! An instrumented call site carries an erased descriptor and a list of
//! bootstrap constants. The first time it runs, the linker turns the
//! constants into a [`LinkRequest`], resolves the isolated context for the
//! request's module and the caller's hosting context, finds the target
//! inside it and adapts the target to the call site's erased signature.
//! Whatever happens, nothing escapes to the instrumented code: a failed link
//! leaves the site behaving as if it had never been instrumented.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use log::{error, log, warn, Level};

use crate::descriptor::MethodDescriptor;
use crate::error::{InvocationError, LinkError};
use crate::guard::ReentrancyGuard;
use crate::handle::{Lookup, MethodHandle};
use crate::namespace::{HostContext, TypeResolver};
use crate::registry::ModuleRegistry;
use crate::sync::{Claim, InFlight};
use crate::value::Value;

pub const KIND_ADVICE: &str = "advice";
pub const KIND_PROXY: &str = "proxy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchShape {
    Static,
    Constructor,
    Virtual,
}

impl DispatchShape {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchShape::Static => "static",
            DispatchShape::Constructor => "constructor",
            DispatchShape::Virtual => "virtual",
        }
    }

    pub fn parse(s: &str) -> Result<Self, LinkError> {
        match s {
            "static" => Ok(DispatchShape::Static),
            "constructor" => Ok(DispatchShape::Constructor),
            "virtual" => Ok(DispatchShape::Virtual),
            other => Err(LinkError::UnknownShape(other.to_string())),
        }
    }
}

impl fmt::Display for DispatchShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a call site asks to be linked to.
///
/// Bootstrap constants are `[advice, module, descriptor, adviceType]` for
/// advices and `[proxy, module, proxiedType, shape]` for proxies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRequest {
    Advice { module: String, descriptor: String, advice_type: String },
    Proxy { module: String, proxied_type: String, shape: DispatchShape },
}

impl LinkRequest {
    pub fn parse(args: &[Value]) -> Result<Self, LinkError> {
        let text = |i: usize| constant(args, i);
        let kind = text(0)?;
        if kind != KIND_ADVICE && kind != KIND_PROXY {
            return Err(LinkError::UnknownKind(kind.to_string()));
        }
        if args.len() != 4 {
            return Err(LinkError::Malformed(format!("{kind} takes 4 constants, got {}", args.len())));
        }
        let module = text(1)?.to_string();
        if kind == KIND_ADVICE {
            Ok(LinkRequest::Advice { module, descriptor: text(2)?.to_string(), advice_type: text(3)?.to_string() })
        } else {
            Ok(LinkRequest::Proxy {
                module,
                proxied_type: text(2)?.to_string(),
                shape: DispatchShape::parse(text(3)?)?,
            })
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LinkRequest::Advice { .. } => KIND_ADVICE,
            LinkRequest::Proxy { .. } => KIND_PROXY,
        }
    }

    pub fn module(&self) -> &str {
        match self {
            LinkRequest::Advice { module, .. } | LinkRequest::Proxy { module, .. } => module,
        }
    }

    /// The bootstrap constants encoding this request.
    pub fn to_args(&self) -> Vec<Value> {
        match self {
            LinkRequest::Advice { module, descriptor, advice_type } => {
                vec![Value::str(KIND_ADVICE), Value::str(module), Value::str(descriptor), Value::str(advice_type)]
            }
            LinkRequest::Proxy { module, proxied_type, shape } => {
                vec![Value::str(KIND_PROXY), Value::str(module), Value::str(proxied_type), Value::str(shape.as_str())]
            }
        }
    }
}

fn constant(args: &[Value], i: usize) -> Result<&str, LinkError> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(&**s),
        Some(other) => Err(LinkError::Malformed(format!("constant {i} is {}, not a string", other.type_label()))),
        None => Err(LinkError::Malformed(format!("missing constant {i}"))),
    }
}

/// Call-site erasure: references outside `java/` become `java/lang/Object`.
pub fn erase_descriptor(descriptor: &MethodDescriptor) -> MethodDescriptor {
    descriptor.erase()
}

/// Marker operation for the advice linking depth counter.
struct AdviceLinking;

pub struct CallSiteLinker {
    registry: Arc<ModuleRegistry>,
    capture_stacks: bool,
    verbose: bool,
    shut_down: AtomicBool,
    attempts: AtomicUsize,
}

impl CallSiteLinker {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry, capture_stacks: true, verbose: false, shut_down: AtomicBool::new(false), attempts: AtomicUsize::new(0) }
    }

    /// Whether a backtrace is logged along with nested linkage warnings.
    pub fn with_stack_capture(mut self, capture: bool) -> Self {
        self.capture_stacks = capture;
        self
    }

    /// Successful links are logged at `info` instead of `debug`.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn link_level(&self) -> Level {
        if self.verbose {
            Level::Info
        } else {
            Level::Debug
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Number of link attempts so far, failed and aborted ones included.
    pub fn link_attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Every later link attempt fails with [`LinkError::ShutDown`]. Sites
    /// linked before keep their handles.
    pub fn shut_down(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Bootstrap entry point of an instrumented call site. `None` means the
    /// site could not be linked; the cause has been logged.
    pub fn bootstrap(
        &self,
        caller: &Arc<HostContext>,
        name: &str,
        erased: &MethodDescriptor,
        args: &[Value],
    ) -> Option<MethodHandle> {
        self.report(name, erased, self.link(caller, name, erased, args))
    }

    /// Like [`bootstrap`](Self::bootstrap) but returns the failure.
    pub fn link(
        &self,
        caller: &Arc<HostContext>,
        name: &str,
        erased: &MethodDescriptor,
        args: &[Value],
    ) -> Result<MethodHandle, LinkError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if self.is_shut_down() {
            return Err(LinkError::ShutDown);
        }
        let request = LinkRequest::parse(args)?;
        match panic::catch_unwind(AssertUnwindSafe(|| self.link_request(caller, name, erased, &request))) {
            Ok(result) => result,
            Err(payload) => Err(LinkError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    pub(crate) fn report(
        &self,
        name: &str,
        erased: &MethodDescriptor,
        result: Result<MethodHandle, LinkError>,
    ) -> Option<MethodHandle> {
        match result {
            Ok(handle) => Some(handle),
            // warned where it was detected
            Err(LinkError::Reentrant) => None,
            Err(e) => {
                error!("failed to link call site {name}{erased}: {}", error_chain(&e));
                None
            }
        }
    }

    fn link_request(
        &self,
        caller: &Arc<HostContext>,
        name: &str,
        erased: &MethodDescriptor,
        request: &LinkRequest,
    ) -> Result<MethodHandle, LinkError> {
        match request {
            LinkRequest::Advice { module, descriptor, advice_type } => {
                self.link_advice(caller, name, erased, module, descriptor, advice_type)
            }
            LinkRequest::Proxy { module, proxied_type, shape } => {
                self.link_proxy(caller, name, erased, module, proxied_type, *shape)
            }
        }
    }

    fn link_advice(
        &self,
        caller: &Arc<HostContext>,
        name: &str,
        erased: &MethodDescriptor,
        module: &str,
        descriptor: &str,
        advice_type: &str,
    ) -> Result<MethodHandle, LinkError> {
        let depth = ReentrancyGuard::enter::<AdviceLinking>();
        if depth.is_nested() {
            if self.capture_stacks {
                warn!(
                    "nested instrumented call site linkage detected for {advice_type}.{name}{erased}\n{}",
                    Backtrace::force_capture()
                );
            } else {
                warn!("nested instrumented call site linkage detected for {advice_type}.{name}{erased}");
            }
            return Err(LinkError::Reentrant);
        }

        let context = self.registry.resolve_context(module, caller)?;
        let advice = context.load_type(advice_type)?;
        let actual = MethodDescriptor::parse(descriptor)?;
        let lookup = context.lookup()?;
        let handle = lookup.find_static(&advice, name, &actual)?.as_type_in(erased, &lookup)?;
        log!(self.link_level(), "linked {advice_type}.{name}{actual} in {} as {erased}", context.label());
        caller.retain(context);
        Ok(handle)
    }

    fn link_proxy(
        &self,
        caller: &Arc<HostContext>,
        name: &str,
        expected: &MethodDescriptor,
        module: &str,
        proxied_type: &str,
        shape: DispatchShape,
    ) -> Result<MethodHandle, LinkError> {
        let context = self.registry.resolve_context(module, caller)?;
        let proxied = context.load_type(proxied_type)?;
        let resolver: Arc<dyn TypeResolver> = context.clone();
        let lookup = Lookup::new(resolver);
        let handle = match shape {
            DispatchShape::Static => lookup.find_static(&proxied, name, expected)?,
            // the constructor returns the proxied type, the proxy expects Object
            DispatchShape::Constructor => {
                lookup.find_constructor(&proxied, &expected.with_return(None))?.as_type_in(expected, &lookup)?
            }
            // same for the receiver
            DispatchShape::Virtual => {
                let without_receiver = expected
                    .drop_leading(1)
                    .ok_or_else(|| LinkError::Malformed(format!("virtual proxy {name}{expected} has no receiver")))?;
                lookup.find_virtual(&proxied, name, &without_receiver)?.as_type_in(expected, &lookup)?
            }
        };
        log!(self.link_level(), "linked {shape} proxy {proxied_type}.{name}{expected} in {}", context.label());
        caller.retain(context);
        Ok(handle)
    }
}

impl fmt::Debug for CallSiteLinker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSiteLinker")
            .field("attempts", &self.link_attempts())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unlinked,
    Linking,
    /// Terminal, whether or not a handle was bound.
    Linked,
}

/// An instrumented call site: links itself on first invocation and then
/// dispatches straight to the bound handle.
pub struct CallSite {
    linker: Arc<CallSiteLinker>,
    caller: Arc<HostContext>,
    name: String,
    erased: MethodDescriptor,
    args: Vec<Value>,
    target: OnceLock<Option<MethodHandle>>,
    linking: InFlight<()>,
}

impl CallSite {
    pub fn new(
        linker: Arc<CallSiteLinker>,
        caller: Arc<HostContext>,
        name: impl Into<String>,
        erased: MethodDescriptor,
        args: Vec<Value>,
    ) -> Self {
        Self {
            linker,
            caller,
            name: name.into(),
            erased,
            args,
            target: OnceLock::new(),
            linking: InFlight::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.erased
    }

    pub fn caller(&self) -> &Arc<HostContext> {
        &self.caller
    }

    pub fn state(&self) -> LinkState {
        if self.target.get().is_some() {
            LinkState::Linked
        } else if self.linking.is_owned(&()) {
            LinkState::Linking
        } else {
            LinkState::Unlinked
        }
    }

    /// Whether the site is linked to an actual handle.
    pub fn is_bound(&self) -> bool {
        matches!(self.target.get(), Some(Some(_)))
    }

    /// The bound handle, linking first if needed.
    pub fn target(&self) -> Option<&MethodHandle> {
        match self.target.get() {
            Some(target) => target.as_ref(),
            None => self.link(),
        }
    }

    /// Runs the site. An unlinked or failed site returns the default value
    /// of its return type.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, InvocationError> {
        match self.target() {
            Some(handle) => handle.invoke(args),
            None => Ok(Value::default_for(self.erased.return_type())),
        }
    }

    fn link(&self) -> Option<&MethodHandle> {
        match self.linking.claim(&(), || self.target.get().is_some()) {
            Claim::Finished => self.target.get().and_then(Option::as_ref),
            // linking this very site triggered it again
            Claim::Recursive => None,
            Claim::Owned(_section) => {
                match self.linker.link(&self.caller, &self.name, &self.erased, &self.args) {
                    // a later invocation may still link the site
                    Err(LinkError::Reentrant) => None,
                    result => {
                        let handle = self.linker.report(&self.name, &self.erased, result);
                        self.target.get_or_init(|| handle).as_ref()
                    }
                }
            }
        }
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("name", &self.name)
            .field("descriptor", &self.erased.to_string())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(values: &[&str]) -> Vec<Value> {
        values.iter().map(|s| Value::str(s)).collect()
    }

    #[test]
    fn parses_advice_and_proxy_requests() {
        let advice = LinkRequest::parse(&strs(&["advice", "m", "(I)V", "m/Advice"])).unwrap();
        assert_eq!(
            advice,
            LinkRequest::Advice { module: "m".into(), descriptor: "(I)V".into(), advice_type: "m/Advice".into() }
        );
        let proxy = LinkRequest::parse(&strs(&["proxy", "m", "m/Impl", "virtual"])).unwrap();
        assert_eq!(proxy.kind(), KIND_PROXY);
        assert_eq!(LinkRequest::parse(&proxy.to_args()).unwrap(), proxy);
    }

    #[test]
    fn rejects_bad_requests() {
        assert!(matches!(LinkRequest::parse(&strs(&["weave", "m", "a", "b"])), Err(LinkError::UnknownKind(k)) if k == "weave"));
        assert!(matches!(LinkRequest::parse(&strs(&["proxy", "m", "a", "special"])), Err(LinkError::UnknownShape(_))));
        assert!(matches!(LinkRequest::parse(&strs(&["advice", "m"])), Err(LinkError::Malformed(_))));
        assert!(matches!(LinkRequest::parse(&[Value::Int(1)]), Err(LinkError::Malformed(_))));
        assert!(matches!(LinkRequest::parse(&[]), Err(LinkError::Malformed(_))));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload = panic::catch_unwind(|| panic!("bad {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "bad 1");
    }
}
