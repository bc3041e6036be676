//! Per-browsing-context global scope.
//!
//! A `GlobalScope` owns the global object and the prototype/constructor
//! registry produced by the graph builder. One exists per browsing context;
//! it is built once and torn down when the context closes.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::HostResult;
use crate::object::{HostObjectRef, PropertyKey};
use crate::value::Value;

/// Unique scope identifier.
pub type ScopeId = u64;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// The root object graph of one browsing context.
pub struct GlobalScope {
    id: ScopeId,
    global: HostObjectRef,
    object_prototype: HostObjectRef,
    function_prototype: HostObjectRef,
    /// Canonical class name -> prototype
    prototypes: HashMap<String, HostObjectRef>,
    /// Alias -> canonical class name
    aliases: BTreeMap<String, String>,
    /// Host type -> prototype
    host_types: HashMap<TypeId, HostObjectRef>,
    /// Class name -> constructor
    constructors: HashMap<String, HostObjectRef>,
    torn_down: AtomicBool,
}

/// Parts assembled by the graph builder.
pub(crate) struct ScopeParts {
    pub global: HostObjectRef,
    pub object_prototype: HostObjectRef,
    pub function_prototype: HostObjectRef,
    pub prototypes: HashMap<String, HostObjectRef>,
    pub aliases: BTreeMap<String, String>,
    pub host_types: HashMap<TypeId, HostObjectRef>,
    pub constructors: HashMap<String, HostObjectRef>,
}

impl GlobalScope {
    pub(crate) fn from_parts(parts: ScopeParts) -> Self {
        Self {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            global: parts.global,
            object_prototype: parts.object_prototype,
            function_prototype: parts.function_prototype,
            prototypes: parts.prototypes,
            aliases: parts.aliases,
            host_types: parts.host_types,
            constructors: parts.constructors,
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// The global (window) object.
    pub fn global(&self) -> &HostObjectRef {
        &self.global
    }

    /// Root of every prototype chain.
    pub fn object_prototype(&self) -> &HostObjectRef {
        &self.object_prototype
    }

    pub fn function_prototype(&self) -> &HostObjectRef {
        &self.function_prototype
    }

    /// Prototype by class name or alias.
    pub fn prototype(&self, name: &str) -> Option<&HostObjectRef> {
        let canonical = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.prototypes.get(canonical)
    }

    /// Prototype of the class registered for host type `T`.
    pub fn prototype_for<T: 'static>(&self) -> Option<&HostObjectRef> {
        self.host_types.get(&TypeId::of::<T>())
    }

    /// Constructor by class name or alias.
    pub fn constructor(&self, name: &str) -> Option<&HostObjectRef> {
        let canonical = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.constructors.get(canonical)
    }

    /// Canonical class name an alias resolves to.
    pub fn resolve_alias(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    /// Canonical class names, sorted.
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.prototypes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Class name of the prototype `name` inherits from.
    pub fn parent_of(&self, name: &str) -> Option<String> {
        self.prototype(name)?
            .prototype()
            .map(|parent| parent.class_name().to_string())
    }

    /// Class names from `name` up to the root object prototype.
    pub fn prototype_chain(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut cursor = self.prototype(name).cloned();
        while let Some(proto) = cursor {
            chain.push(proto.class_name().to_string());
            cursor = proto.prototype();
        }
        chain
    }

    /// `class -> parent class` for every canonical class. Two scopes built
    /// from the same catalog and flags compare equal here.
    pub fn structure(&self) -> BTreeMap<String, Option<String>> {
        self.prototypes
            .keys()
            .map(|name| (name.clone(), self.parent_of(name)))
            .collect()
    }

    /// Resolve a global binding (`window[name]`).
    pub fn lookup(&self, name: &str) -> HostResult<Value> {
        self.global.get(&PropertyKey::string(name))
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Release the graph. Clears every registered object so the
    /// `prototype`/`constructor` reference cycles are broken.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for obj in self.prototypes.values().chain(self.constructors.values()) {
            obj.clear();
        }
        self.global.clear();
        self.function_prototype.clear();
        self.object_prototype.clear();
        tracing::debug!(scope = self.id, "global scope torn down");
    }
}

impl std::fmt::Debug for GlobalScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalScope")
            .field("id", &self.id)
            .field("global", &self.global.class_name())
            .field("classes", &self.prototypes.len())
            .field("aliases", &self.aliases.len())
            .finish()
    }
}
