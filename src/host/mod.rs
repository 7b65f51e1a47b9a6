// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Reference host for woven units.
//!
//! A small single-threaded interpreter that loads class units, runs static
//! initializers on first active use, and executes method bodies with their
//! exception tables. The telemetry entry points that woven code calls are
//! bound to a [`Registry`], so the effect of weaving can be observed end to
//! end without a real virtual machine.
//!
//! # Example
//!
//! ```rust,ignore
//! use weaver::host::{Host, Value};
//!
//! let mut host = Host::new(registry.clone());
//! host.load_bytes(&woven)?;
//! host.call_static("com/acme/Job", "run", "(I)I", vec![Value::Int(3)])?;
//! ```

mod interp;
mod natives;
mod value;

pub use natives::{builtin_super, FieldPathResolver, PropertyResolver};
pub use value::{MetricHandle, ObjRef, Object, ObjectData, Value};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::error::HostError;
use crate::telemetry::Registry;
use crate::unit::{codec, ClassUnit, FieldType, Label, Method, OBJECT_CLASS, STATIC_INITIALIZER};

/// Maximum interpreter call depth.
pub const MAX_DEPTH: usize = 512;

/// Class whose instances carry a `message` field and can be thrown.
pub const THROWABLE: &str = "java/lang/Throwable";

/// Abrupt completion of an instruction.
#[derive(Debug)]
pub enum Trap {
    /// A thrown object, unwinding to the nearest matching handler.
    Throw(ObjRef),
    /// A host failure that no handler can catch.
    Fatal(HostError),
}

impl From<HostError> for Trap {
    fn from(err: HostError) -> Self {
        Self::Fatal(err)
    }
}

/// Host-provided implementation of a method.
pub type NativeFn = Rc<dyn Fn(&mut Host, Vec<Value>) -> Result<Option<Value>, Trap>>;

#[derive(Debug)]
struct PreparedRegion {
    start: usize,
    end: usize,
    handler: usize,
    catch_type: Option<String>,
}

/// A method with its labels resolved to instruction indices.
#[derive(Debug)]
struct PreparedMethod {
    method: Method,
    labels: HashMap<Label, usize>,
    regions: Vec<PreparedRegion>,
}

impl PreparedMethod {
    fn prepare(class: &str, method: Method) -> Result<Self, HostError> {
        let labels: HashMap<Label, usize> = method
            .code
            .iter()
            .enumerate()
            .filter_map(|(i, insn)| match insn {
                crate::unit::Insn::Label(l) => Some((*l, i)),
                _ => None,
            })
            .collect();

        let lookup = |label: Label| {
            labels.get(&label).copied().ok_or_else(|| HostError::Execution {
                method: format!("{}.{}", class, method.signature()),
                message: format!("region label {} is not defined", label),
            })
        };
        let regions = method
            .handlers
            .iter()
            .map(|r| {
                Ok(PreparedRegion {
                    start: lookup(r.start)?,
                    end: lookup(r.end)?,
                    handler: lookup(r.handler)?,
                    catch_type: r.catch_type.clone(),
                })
            })
            .collect::<Result<Vec<_>, HostError>>()?;

        Ok(Self {
            method,
            labels,
            regions,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    Uninitialized,
    Running,
    Done,
    Failed,
}

#[derive(Debug)]
struct LoadedClass {
    name: String,
    super_name: Option<String>,
    instance_fields: Vec<(String, FieldType)>,
    methods: HashMap<(String, String), Rc<PreparedMethod>>,
    statics: RefCell<HashMap<String, Value>>,
    state: Cell<InitState>,
}

/// Interpreter state: loaded classes, natives, and the bound registry.
pub struct Host {
    classes: HashMap<String, Rc<LoadedClass>>,
    natives: HashMap<String, NativeFn>,
    registry: Arc<Registry>,
    resolver: Rc<dyn PropertyResolver>,
    epoch: Instant,
    next_id: u64,
    depth: usize,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .field("natives", &self.natives.len())
            .field("depth", &self.depth)
            .finish()
    }
}

fn native_key(owner: &str, name: &str, descriptor: &str) -> String {
    format!("{}.{}{}", owner, name, descriptor)
}

impl Host {
    /// Create a host whose telemetry entry points record into `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        let mut host = Self {
            classes: HashMap::new(),
            natives: HashMap::new(),
            registry,
            resolver: Rc::new(FieldPathResolver),
            epoch: Instant::now(),
            next_id: 1,
            depth: 0,
        };
        natives::install(&mut host);
        host
    }

    /// Replace the nested property resolver.
    pub fn with_resolver(mut self, resolver: impl PropertyResolver + 'static) -> Self {
        self.resolver = Rc::new(resolver);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Bind `owner.name descriptor` to a host function. Natives take
    /// precedence over loaded method bodies.
    pub fn register_native(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        f: impl Fn(&mut Host, Vec<Value>) -> Result<Option<Value>, Trap> + 'static,
    ) {
        self.natives
            .insert(native_key(owner, name, descriptor), Rc::new(f));
    }

    /// Load a unit. Its static initializer runs on first active use.
    pub fn load(&mut self, unit: ClassUnit) -> Result<(), HostError> {
        let mut methods = HashMap::new();
        for method in unit.methods {
            let key = (method.name.clone(), method.descriptor.clone());
            methods.insert(key, Rc::new(PreparedMethod::prepare(&unit.name, method)?));
        }

        let mut statics = HashMap::new();
        let mut instance_fields = Vec::new();
        for field in &unit.fields {
            let ty = FieldType::parse(&field.descriptor).map_err(|e| HostError::Execution {
                method: format!("{}.{}", unit.name, field.name),
                message: e.to_string(),
            })?;
            if field.access.is_static() {
                statics.insert(field.name.clone(), Value::default_for(&ty));
            } else {
                instance_fields.push((field.name.clone(), ty));
            }
        }

        debug!(class = %unit.name, methods = methods.len(), "Loaded class");
        self.classes.insert(
            unit.name.clone(),
            Rc::new(LoadedClass {
                name: unit.name,
                super_name: unit.super_name,
                instance_fields,
                methods,
                statics: RefCell::new(statics),
                state: Cell::new(InitState::Uninitialized),
            }),
        );
        Ok(())
    }

    /// Decode and load an encoded unit.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<(), HostError> {
        let unit = codec::decode(bytes)?;
        self.load(unit)
    }

    pub fn is_loaded(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// Whether the class's static initializer has completed.
    pub fn is_initialized(&self, class: &str) -> bool {
        self.classes
            .get(class)
            .is_some_and(|c| c.state.get() == InitState::Done)
    }

    /// Invoke a static method.
    pub fn call_static(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, HostError> {
        let member = crate::unit::MemberRef::new(owner, name, descriptor);
        let result = self.invoke_static(&member, args);
        self.settle(result)
    }

    /// Invoke a method on `receiver`, dispatching on its runtime class.
    pub fn call_virtual(
        &mut self,
        receiver: &Value,
        name: &str,
        descriptor: &str,
        mut args: Vec<Value>,
    ) -> Result<Option<Value>, HostError> {
        let owner = receiver.class_name().unwrap_or_else(|| OBJECT_CLASS.to_string());
        let member = crate::unit::MemberRef::new(owner, name, descriptor);
        args.insert(0, receiver.clone());
        let result = self.invoke_virtual(&member, args);
        self.settle(result)
    }

    /// Allocate an instance of `class` and run the constructor `descriptor`.
    pub fn instantiate(
        &mut self,
        class: &str,
        descriptor: &str,
        mut args: Vec<Value>,
    ) -> Result<Value, HostError> {
        let result = self.new_instance(class).and_then(|obj| {
            args.insert(0, obj.clone());
            let member = crate::unit::MemberRef::new(class, crate::unit::CONSTRUCTOR, descriptor);
            self.invoke_special(&member, args).map(|_| obj)
        });
        self.settle(result)
    }

    /// Read a static field, initializing its class first.
    pub fn get_static(&mut self, owner: &str, name: &str) -> Result<Value, HostError> {
        let result = self.read_static(owner, name);
        self.settle(result)
    }

    /// Allocate a string object.
    pub fn new_string(&mut self, s: impl Into<String>) -> Value {
        Value::Ref(self.alloc("java/lang/String", ObjectData::Str(s.into())))
    }

    /// Allocate a throwable of `class` with `message`, ready to throw.
    pub fn throw_new(&mut self, class: &str, message: impl Into<String>) -> Trap {
        let message = self.new_string(message);
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("message".to_string(), message);
        Trap::Throw(self.alloc(class, ObjectData::Instance(fields)))
    }

    fn alloc(&mut self, class: &str, data: ObjectData) -> ObjRef {
        let id = self.next_id;
        self.next_id += 1;
        Rc::new(RefCell::new(Object {
            id,
            class: class.to_string(),
            data,
        }))
    }

    fn nanos_since_start(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    fn native(&self, owner: &str, name: &str, descriptor: &str) -> Option<NativeFn> {
        self.natives.get(&native_key(owner, name, descriptor)).cloned()
    }

    fn super_of(&self, class: &str) -> Option<String> {
        match self.classes.get(class) {
            Some(loaded) => loaded.super_name.clone(),
            None => builtin_super(class).map(str::to_string),
        }
    }

    fn is_known(&self, class: &str) -> bool {
        class == OBJECT_CLASS || self.classes.contains_key(class) || builtin_super(class).is_some()
    }

    /// Whether `class` is `target` or one of its subclasses.
    pub fn is_subclass(&self, class: &str, target: &str) -> bool {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if name == target {
                return true;
            }
            current = self.super_of(&name);
        }
        false
    }

    /// Find a method with a body on `class` or its superclasses.
    fn find_method(
        &self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Option<(Rc<LoadedClass>, Rc<PreparedMethod>)> {
        let key = (name.to_string(), descriptor.to_string());
        let mut current = Some(class.to_string());
        while let Some(cname) = current {
            let loaded = self.classes.get(&cname)?;
            if let Some(method) = loaded.methods.get(&key) {
                return Some((loaded.clone(), method.clone()));
            }
            current = loaded.super_name.clone();
        }
        None
    }

    /// Run the static initializer of `class` (and its superclasses) once.
    fn ensure_initialized(&mut self, class: &str) -> Result<(), Trap> {
        let Some(loaded) = self.classes.get(class).cloned() else {
            return Ok(());
        };
        match loaded.state.get() {
            InitState::Done | InitState::Running => Ok(()),
            InitState::Failed => Err(Trap::Fatal(HostError::Execution {
                method: format!("{}.{}", class, STATIC_INITIALIZER),
                message: "class initialization failed earlier".to_string(),
            })),
            InitState::Uninitialized => {
                loaded.state.set(InitState::Running);
                let result = self.run_initializer(&loaded);
                loaded.state.set(if result.is_ok() {
                    InitState::Done
                } else {
                    InitState::Failed
                });
                result
            }
        }
    }

    fn run_initializer(&mut self, loaded: &Rc<LoadedClass>) -> Result<(), Trap> {
        if let Some(super_name) = &loaded.super_name {
            self.ensure_initialized(super_name)?;
        }
        let key = (STATIC_INITIALIZER.to_string(), "()V".to_string());
        if let Some(clinit) = loaded.methods.get(&key).cloned() {
            debug!(class = %loaded.name, "Running static initializer");
            self.execute(loaded, &clinit, Vec::new())?;
        }
        Ok(())
    }

    /// The loaded class that declares static field `name`, searching supers.
    fn static_owner(&self, owner: &str, name: &str) -> Result<Rc<LoadedClass>, HostError> {
        let mut current = Some(owner.to_string());
        while let Some(cname) = current {
            let Some(loaded) = self.classes.get(&cname) else {
                break;
            };
            if loaded.statics.borrow().contains_key(name) {
                return Ok(loaded.clone());
            }
            current = loaded.super_name.clone();
        }
        Err(HostError::FieldNotFound {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    fn read_static(&mut self, owner: &str, name: &str) -> Result<Value, Trap> {
        self.ensure_initialized(owner)?;
        let declaring = self.static_owner(owner, name)?;
        let value = declaring.statics.borrow().get(name).cloned();
        Ok(value.unwrap_or(Value::Null))
    }

    fn write_static(&mut self, owner: &str, name: &str, value: Value) -> Result<(), Trap> {
        self.ensure_initialized(owner)?;
        let declaring = self.static_owner(owner, name)?;
        declaring.statics.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }

    /// Allocate an instance with every declared field at its zero value.
    fn new_instance(&mut self, class: &str) -> Result<Value, Trap> {
        if !self.is_known(class) {
            return Err(Trap::Fatal(HostError::ClassNotFound(class.to_string())));
        }
        self.ensure_initialized(class)?;

        let mut fields = std::collections::BTreeMap::new();
        let mut current = Some(class.to_string());
        while let Some(cname) = current {
            if let Some(loaded) = self.classes.get(&cname) {
                for (name, ty) in &loaded.instance_fields {
                    fields
                        .entry(name.clone())
                        .or_insert_with(|| Value::default_for(ty));
                }
            }
            if cname == THROWABLE {
                fields.insert("message".to_string(), Value::Null);
            }
            current = self.super_of(&cname);
        }
        Ok(Value::Ref(self.alloc(class, ObjectData::Instance(fields))))
    }

    /// Convert an escaping trap into a host error.
    fn settle<T>(&self, result: Result<T, Trap>) -> Result<T, HostError> {
        result.map_err(|trap| match trap {
            Trap::Throw(obj) => {
                let thrown = obj.borrow();
                let err = HostError::Uncaught {
                    class: thrown.class.clone(),
                    message: thrown.field("message").and_then(Value::as_str),
                    object_id: thrown.id,
                };
                err
            }
            Trap::Fatal(err) => err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{AccessFlags, ClassBuilder, Insn, Kind, MethodBuilder, CONSTRUCTOR};

    fn host() -> Host {
        Host::new(Arc::new(Registry::new()))
    }

    #[test]
    fn test_static_initializer_runs_once_on_first_use() {
        let mut clinit = MethodBuilder::new(AccessFlags::STATIC, STATIC_INITIALIZER, "()V");
        clinit
            .emit(Insn::get_static("a/B", "INITS", "I"))
            .emit(Insn::iconst(1))
            .emit(Insn::Arith(crate::unit::ArithOp::Add, Kind::Int))
            .emit(Insn::put_static("a/B", "INITS", "I"))
            .emit(Insn::Return(None));
        let unit = ClassBuilder::new("a/B")
            .field(AccessFlags::STATIC, "INITS", "I")
            .method(clinit.build())
            .build();

        let mut host = host();
        host.load(unit).unwrap();
        assert!(!host.is_initialized("a/B"));
        assert_eq!(host.get_static("a/B", "INITS").unwrap().as_int(), Some(1));
        assert_eq!(host.get_static("a/B", "INITS").unwrap().as_int(), Some(1));
        assert!(host.is_initialized("a/B"));
    }

    #[test]
    fn test_instantiate_user_exception_subclass() {
        let mut ctor = MethodBuilder::new(AccessFlags::PUBLIC, CONSTRUCTOR, "()V");
        ctor.emit(Insn::Load(Kind::Ref, 0))
            .emit(Insn::ldc("custom"))
            .emit(Insn::invoke_special(
                "java/lang/RuntimeException",
                CONSTRUCTOR,
                "(Ljava/lang/String;)V",
            ))
            .emit(Insn::Return(None));
        let unit = ClassBuilder::new("a/Oops")
            .extends("java/lang/RuntimeException")
            .method(ctor.build())
            .build();

        let mut host = host();
        host.load(unit).unwrap();
        let oops = host.instantiate("a/Oops", "()V", vec![]).unwrap();
        assert!(host.is_subclass("a/Oops", THROWABLE));
        let message = host
            .call_virtual(&oops, "getMessage", "()Ljava/lang/String;", vec![])
            .unwrap();
        assert_eq!(message.and_then(|m| m.as_str()).as_deref(), Some("custom"));
    }

    #[test]
    fn test_unknown_class_and_method() {
        let mut host = host();
        assert!(matches!(
            host.instantiate("no/Such", "()V", vec![]),
            Err(HostError::ClassNotFound(_))
        ));
        host.load(ClassBuilder::new("a/B").build()).unwrap();
        assert!(matches!(
            host.call_static("a/B", "run", "()V", vec![]),
            Err(HostError::MethodNotFound { .. })
        ));
    }
}
