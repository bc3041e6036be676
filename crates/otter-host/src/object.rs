//! Host objects exposed to scripts.
//!
//! A `HostObject` is a property bag with a prototype link, a parent-scope
//! link and an optional association with the document node it represents.
//! Prototypes, constructors, functions and the global object are all host
//! objects distinguished by [`ObjectKind`].

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{HostError, HostResult};
use crate::value::{NativeFn, Value};

/// Shared handle to a host object.
pub type HostObjectRef = Arc<HostObject>;

/// Well-known symbols usable as member keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WellKnownSymbol {
    Iterator,
    AsyncIterator,
    ToStringTag,
    ToPrimitive,
    HasInstance,
    Unscopables,
}

impl WellKnownSymbol {
    pub fn description(self) -> &'static str {
        match self {
            Self::Iterator => "Symbol.iterator",
            Self::AsyncIterator => "Symbol.asyncIterator",
            Self::ToStringTag => "Symbol.toStringTag",
            Self::ToPrimitive => "Symbol.toPrimitive",
            Self::HasInstance => "Symbol.hasInstance",
            Self::Unscopables => "Symbol.unscopables",
        }
    }
}

/// Property key
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String property key
    String(Arc<str>),
    /// Symbol property key
    Symbol(WellKnownSymbol),
}

impl PropertyKey {
    /// Create a string property key
    pub fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Symbol(sym) => write!(f, "[{}]", sym.description()),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<WellKnownSymbol> for PropertyKey {
    fn from(sym: WellKnownSymbol) -> Self {
        Self::Symbol(sym)
    }
}

/// Property attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropertyAttributes {
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl PropertyAttributes {
    /// Plain data property
    pub const fn data() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Methods: writable, configurable, not enumerable
    pub const fn builtin_method() -> Self {
        Self {
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// Interface constants: read-only, enumerable, fixed
    pub const fn constant() -> Self {
        Self {
            writable: false,
            enumerable: true,
            configurable: false,
        }
    }

    /// Attribute accessors: enumerable and configurable
    pub const fn builtin_accessor() -> Self {
        Self {
            writable: false,
            enumerable: true,
            configurable: true,
        }
    }

    /// `constructor.prototype` / `name` / `length` links
    pub const fn frozen() -> Self {
        Self {
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }
}

/// Property descriptor
#[derive(Clone)]
pub enum PropertyDescriptor {
    Data {
        value: Value,
        attributes: PropertyAttributes,
    },
    Accessor {
        get: Option<NativeFn>,
        set: Option<NativeFn>,
        attributes: PropertyAttributes,
    },
}

impl PropertyDescriptor {
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            attributes: PropertyAttributes::data(),
        }
    }

    pub fn data_with_attrs(value: Value, attributes: PropertyAttributes) -> Self {
        Self::Data { value, attributes }
    }

    pub fn builtin_method(value: Value) -> Self {
        Self::data_with_attrs(value, PropertyAttributes::builtin_method())
    }

    pub fn attributes(&self) -> PropertyAttributes {
        match self {
            Self::Data { attributes, .. } | Self::Accessor { attributes, .. } => *attributes,
        }
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data { value, attributes } => f
                .debug_struct("Data")
                .field("value", value)
                .field("attributes", attributes)
                .finish(),
            Self::Accessor { get, set, .. } => f
                .debug_struct("Accessor")
                .field("get", &get.is_some())
                .field("set", &set.is_some())
                .finish(),
        }
    }
}

/// What a host object is used for.
#[derive(Clone)]
pub enum ObjectKind {
    /// Instance created for a document node or a script
    Ordinary,
    /// Shared member storage for one class
    Prototype,
    /// Root object of a browsing context
    Global,
    /// Callable native function
    Function { func: NativeFn, length: u32 },
    /// Class constructor. `custom` is false for the shared default
    /// constructor, which rejects construction.
    Constructor {
        func: NativeFn,
        length: u32,
        custom: bool,
    },
}

impl fmt::Debug for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordinary => write!(f, "Ordinary"),
            Self::Prototype => write!(f, "Prototype"),
            Self::Global => write!(f, "Global"),
            Self::Function { length, .. } => write!(f, "Function({length})"),
            Self::Constructor { length, custom, .. } => {
                write!(f, "Constructor({length}, custom: {custom})")
            }
        }
    }
}

struct ObjectState {
    prototype: Option<HostObjectRef>,
    parent_scope: Option<Weak<HostObject>>,
    node: Option<Weak<dyn Any + Send + Sync>>,
    properties: IndexMap<PropertyKey, PropertyDescriptor>,
}

/// A runtime object exposed to scripts.
pub struct HostObject {
    class_name: Arc<str>,
    kind: ObjectKind,
    state: RwLock<ObjectState>,
}

impl HostObject {
    /// Allocate a new object with the given `[[Prototype]]`.
    pub fn new(
        class_name: impl Into<Arc<str>>,
        kind: ObjectKind,
        prototype: Option<HostObjectRef>,
    ) -> HostObjectRef {
        Arc::new(Self {
            class_name: class_name.into(),
            kind,
            state: RwLock::new(ObjectState {
                prototype,
                parent_scope: None,
                node: None,
                properties: IndexMap::new(),
            }),
        })
    }

    /// Allocate a native function object with `name` and `length` set.
    pub fn native_function(
        name: &str,
        func: NativeFn,
        length: u32,
        function_prototype: &HostObjectRef,
    ) -> HostObjectRef {
        let obj = Self::new(
            "Function",
            ObjectKind::Function { func, length },
            Some(Arc::clone(function_prototype)),
        );
        obj.install_function_metadata(name, length);
        obj
    }

    /// Define `name`/`length` on a freshly allocated function object.
    pub(crate) fn install_function_metadata(&self, name: &str, length: u32) {
        let mut state = self.state.write();
        state.properties.insert(
            PropertyKey::string("name"),
            PropertyDescriptor::data_with_attrs(Value::string(name), PropertyAttributes::frozen()),
        );
        state.properties.insert(
            PropertyKey::string("length"),
            PropertyDescriptor::data_with_attrs(
                Value::Number(length as f64),
                PropertyAttributes::frozen(),
            ),
        );
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self.kind,
            ObjectKind::Function { .. } | ObjectKind::Constructor { .. }
        )
    }

    pub fn is_constructor(&self) -> bool {
        matches!(self.kind, ObjectKind::Constructor { .. })
    }

    pub fn is_prototype(&self) -> bool {
        matches!(self.kind, ObjectKind::Prototype)
    }

    /// `[[Prototype]]`
    pub fn prototype(&self) -> Option<HostObjectRef> {
        self.state.read().prototype.clone()
    }

    /// Replace `[[Prototype]]`, rejecting links that would form a cycle.
    pub fn set_prototype(self: &Arc<Self>, prototype: Option<HostObjectRef>) -> HostResult<()> {
        let mut cursor = prototype.clone();
        while let Some(obj) = cursor {
            if Arc::ptr_eq(&obj, self) {
                return Err(HostError::CyclicPrototype(self.class_name.to_string()));
            }
            cursor = obj.prototype();
        }
        self.state.write().prototype = prototype;
        Ok(())
    }

    pub fn parent_scope(&self) -> Option<HostObjectRef> {
        self.state.read().parent_scope.as_ref().and_then(Weak::upgrade)
    }

    pub fn set_parent_scope(&self, scope: &HostObjectRef) {
        self.state.write().parent_scope = Some(Arc::downgrade(scope));
    }

    /// Associate this object with the node it represents. The object does not
    /// keep the node alive.
    pub fn attach_node<T: Any + Send + Sync>(&self, node: &Arc<T>) {
        let node: Arc<dyn Any + Send + Sync> = node.clone();
        self.state.write().node = Some(Arc::downgrade(&node));
    }

    /// The associated node, if it is still alive and of type `T`.
    pub fn node<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let node = self.state.read().node.as_ref()?.upgrade()?;
        node.downcast::<T>().ok()
    }

    /// Define a new own property. Fails if the key is already present.
    pub fn define_property(
        &self,
        key: impl Into<PropertyKey>,
        descriptor: PropertyDescriptor,
    ) -> HostResult<()> {
        let key = key.into();
        let mut state = self.state.write();
        if state.properties.contains_key(&key) {
            return Err(HostError::PropertyCollision {
                class: self.class_name.to_string(),
                property: key.to_string(),
            });
        }
        state.properties.insert(key, descriptor);
        Ok(())
    }

    pub fn get_own_property(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        self.state.read().properties.get(key).cloned()
    }

    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.state.read().properties.contains_key(key)
    }

    /// Own or inherited property lookup.
    pub fn has_property(&self, key: &PropertyKey) -> bool {
        self.lookup(key).is_some()
    }

    /// Own keys in definition order.
    pub fn own_keys(&self) -> Vec<PropertyKey> {
        self.state.read().properties.keys().cloned().collect()
    }

    fn lookup(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        if let Some(desc) = self.get_own_property(key) {
            return Some(desc);
        }
        let mut cursor = self.prototype();
        while let Some(obj) = cursor {
            if let Some(desc) = obj.get_own_property(key) {
                return Some(desc);
            }
            cursor = obj.prototype();
        }
        None
    }

    /// `[[Get]]` along the prototype chain. Accessors run with `this` bound
    /// to the receiver.
    pub fn get(self: &Arc<Self>, key: &PropertyKey) -> HostResult<Value> {
        match self.lookup(key) {
            None => Ok(Value::Undefined),
            Some(PropertyDescriptor::Data { value, .. }) => Ok(value),
            Some(PropertyDescriptor::Accessor { get: Some(getter), .. }) => {
                getter(&Value::Object(Arc::clone(self)), &[])
            }
            Some(PropertyDescriptor::Accessor { get: None, .. }) => Ok(Value::Undefined),
        }
    }

    /// `[[Set]]`: runs an inherited setter, updates a writable own property,
    /// or defines a new own data property.
    pub fn set(self: &Arc<Self>, key: PropertyKey, value: Value) -> HostResult<()> {
        match self.lookup(&key) {
            Some(PropertyDescriptor::Accessor { set: Some(setter), .. }) => {
                setter(&Value::Object(Arc::clone(self)), &[value]).map(|_| ())
            }
            Some(PropertyDescriptor::Accessor { set: None, .. }) => Err(HostError::type_error(
                format!("Cannot set property {key} of {} which has only a getter", self.class_name),
            )),
            Some(PropertyDescriptor::Data { attributes, .. }) if !attributes.writable => {
                Err(HostError::type_error(format!(
                    "Cannot assign to read only property '{key}' of {}",
                    self.class_name
                )))
            }
            _ => {
                let mut state = self.state.write();
                let attributes = state
                    .properties
                    .get(&key)
                    .map(PropertyDescriptor::attributes)
                    .unwrap_or_else(PropertyAttributes::data);
                state
                    .properties
                    .insert(key, PropertyDescriptor::Data { value, attributes });
                Ok(())
            }
        }
    }

    /// Invoke a function or constructor object as a plain call.
    pub fn call(&self, this: &Value, args: &[Value]) -> HostResult<Value> {
        match &self.kind {
            ObjectKind::Function { func, .. } | ObjectKind::Constructor { func, .. } => {
                func(this, args)
            }
            _ => Err(HostError::type_error(format!(
                "{} is not a function",
                self.class_name
            ))),
        }
    }

    /// `new C(...args)`. The constructor receives itself as `this`.
    pub fn construct(self: &Arc<Self>, args: &[Value]) -> HostResult<Value> {
        match &self.kind {
            ObjectKind::Constructor { func, .. } => func(&Value::Object(Arc::clone(self)), args),
            _ => Err(HostError::type_error(format!(
                "{} is not a constructor",
                self.class_name
            ))),
        }
    }

    /// Drop all properties and links so reference cycles through
    /// `constructor`/`prototype` are released.
    pub(crate) fn clear(&self) {
        let mut state = self.state.write();
        state.properties.clear();
        state.prototype = None;
        state.parent_scope = None;
        state.node = None;
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostObject")
            .field("class_name", &self.class_name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
