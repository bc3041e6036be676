//! Host object graph construction.
//!
//! Builds a [`GlobalScope`] from a [`ClassCatalog`] in two phases, so classes
//! may name parents (or be aliased) before those are allocated:
//!
//! 1. **Allocate**: one prototype (and constructor) per applicable class,
//!    members installed through [`wire`], registered by name.
//! 2. **Alias**: the catalog's alias table maps extra names onto existing
//!    prototypes.
//! 3. **Link**: every prototype's `[[Prototype]]` is set by parent-name lookup,
//!    or to the root object prototype.
//!
//! A class that fails to wire is logged and left out; the rest of the graph
//! is still built.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::{ClassCatalog, ClassDescriptor, ConstructorRef};
use crate::error::HostError;
use crate::features::FeatureFlags;
use crate::object::{HostObject, HostObjectRef, ObjectKind, PropertyDescriptor};
use crate::scope::{GlobalScope, ScopeParts};
use crate::value::{NativeFn, Value};
use crate::wire::{WireTarget, wire};

/// Name of the root object prototype.
pub const OBJECT_CLASS: &str = "Object";

/// Name of the function prototype.
pub const FUNCTION_CLASS: &str = "Function";

/// Class name used for the global object when the catalog has no global class.
pub const DEFAULT_GLOBAL_CLASS: &str = "Global";

/// A class that survived phase 1.
struct Allocated<'c> {
    descriptor: &'c ClassDescriptor,
    prototype: HostObjectRef,
    constructor: Option<HostObjectRef>,
}

/// Builds the object graph of one browsing context.
pub struct HostObjectGraphBuilder<'a> {
    catalog: &'a ClassCatalog,
    flags: &'a dyn FeatureFlags,
}

impl<'a> HostObjectGraphBuilder<'a> {
    pub fn new(catalog: &'a ClassCatalog, flags: &'a dyn FeatureFlags) -> Self {
        Self { catalog, flags }
    }

    /// Run all phases and return the finished scope.
    pub fn build(&self) -> GlobalScope {
        let object_prototype = HostObject::new(OBJECT_CLASS, ObjectKind::Prototype, None);
        let function_prototype = HostObject::new(
            FUNCTION_CLASS,
            ObjectKind::Prototype,
            Some(Arc::clone(&object_prototype)),
        );
        let default_ctor: NativeFn =
            Arc::new(|_: &Value, _: &[Value]| Err(HostError::type_error("Illegal constructor")));

        // Phase 1: allocate + wire members
        let mut allocated: Vec<Allocated<'_>> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();
        for descriptor in self.catalog.classes() {
            if !descriptor.is_applicable(self.flags) {
                debug!(class = %descriptor.name, "class not available for this configuration");
                continue;
            }
            match self.allocate(descriptor, &function_prototype, &default_ctor) {
                Ok(entry) => {
                    debug!(
                        class = %descriptor.name,
                        members = descriptor.members.len(),
                        "allocated prototype"
                    );
                    by_name.insert(descriptor.name.clone(), allocated.len());
                    allocated.push(entry);
                }
                Err(error) => {
                    warn!(class = %descriptor.name, %error, "class skipped");
                }
            }
        }

        // Aliases reuse the canonical entry
        let mut aliases = BTreeMap::new();
        for entry in self.catalog.aliases() {
            if !entry.availability.is_satisfied(self.flags) {
                continue;
            }
            if by_name.contains_key(&entry.alias) {
                warn!(alias = %entry.alias, "alias shadows a real class, ignored");
                continue;
            }
            match by_name.get(&entry.canonical) {
                Some(&idx) => {
                    aliases.insert(entry.alias.clone(), entry.canonical.clone());
                    by_name.insert(entry.alias.clone(), idx);
                }
                None => {
                    debug!(
                        alias = %entry.alias,
                        canonical = %entry.canonical,
                        "alias target not available"
                    );
                }
            }
        }

        // Phase 2: prototype chains, only after every class exists
        for entry in &allocated {
            let parent = self.resolve_parent(entry.descriptor, &allocated, &by_name);
            let parent_proto = parent
                .map(|p| Arc::clone(&p.prototype))
                .unwrap_or_else(|| Arc::clone(&object_prototype));
            if let Err(error) = entry.prototype.set_prototype(Some(parent_proto)) {
                warn!(class = %entry.descriptor.name, %error, "falling back to Object prototype");
                if let Err(error) = entry
                    .prototype
                    .set_prototype(Some(Arc::clone(&object_prototype)))
                {
                    warn!(class = %entry.descriptor.name, %error, "prototype left unlinked");
                }
            }

            // Custom constructors resolve static lookups through the parent
            // class's constructor.
            if let (Some(ctor), ConstructorRef::Custom { .. }) =
                (&entry.constructor, &entry.descriptor.constructor)
            {
                if let Some(parent_ctor) = parent.and_then(|p| p.constructor.as_ref()) {
                    if let Err(error) = ctor.set_prototype(Some(Arc::clone(parent_ctor))) {
                        warn!(class = %entry.descriptor.name, %error, "constructor falls back to Function prototype");
                        if let Err(error) =
                            ctor.set_prototype(Some(Arc::clone(&function_prototype)))
                        {
                            warn!(class = %entry.descriptor.name, %error, "constructor left unlinked");
                        }
                    }
                }
            }
        }

        let global = self.global_object(&allocated, &object_prototype);
        let mut prototypes = HashMap::new();
        let mut host_types = HashMap::new();
        let mut constructors = HashMap::new();
        for entry in &allocated {
            let name = &entry.descriptor.name;
            entry.prototype.set_parent_scope(&global);
            if let Some(type_id) = entry.descriptor.host_type {
                host_types.insert(type_id, Arc::clone(&entry.prototype));
            }
            if let Some(ctor) = &entry.constructor {
                ctor.set_parent_scope(&global);
                expose(&global, name, ctor);
                constructors.insert(name.clone(), Arc::clone(ctor));
            }
            prototypes.insert(name.clone(), Arc::clone(&entry.prototype));
        }
        for (alias, canonical) in &aliases {
            if let Some(ctor) = constructors.get(canonical) {
                expose(&global, alias, ctor);
            }
        }

        GlobalScope::from_parts(ScopeParts {
            global,
            object_prototype,
            function_prototype,
            prototypes,
            aliases,
            host_types,
            constructors,
        })
    }

    fn allocate<'c>(
        &self,
        descriptor: &'c ClassDescriptor,
        function_prototype: &HostObjectRef,
        default_ctor: &NativeFn,
    ) -> Result<Allocated<'c>, HostError> {
        let prototype = HostObject::new(descriptor.name.as_str(), ObjectKind::Prototype, None);
        let constructor = match &descriptor.constructor {
            ConstructorRef::None => None,
            ConstructorRef::Default => Some((Arc::clone(default_ctor), 0, false)),
            ConstructorRef::Custom { func, length } => Some((Arc::clone(func), *length, true)),
        }
        .map(|(func, length, custom)| {
            let ctor = HostObject::new(
                descriptor.name.as_str(),
                ObjectKind::Constructor {
                    func,
                    length,
                    custom,
                },
                Some(Arc::clone(function_prototype)),
            );
            ctor.install_function_metadata(&descriptor.name, length);
            ctor
        });

        wire(
            descriptor,
            &WireTarget {
                prototype: &prototype,
                constructor: constructor.as_ref(),
                function_prototype,
            },
            self.flags,
        )?;

        Ok(Allocated {
            descriptor,
            prototype,
            constructor,
        })
    }

    fn resolve_parent<'e, 'c>(
        &self,
        descriptor: &ClassDescriptor,
        allocated: &'e [Allocated<'c>],
        by_name: &HashMap<String, usize>,
    ) -> Option<&'e Allocated<'c>> {
        let parent = descriptor.parent.as_deref()?;
        match by_name.get(parent) {
            Some(&idx) => Some(&allocated[idx]),
            None => {
                warn!(
                    class = %descriptor.name,
                    parent,
                    "parent class not available, inheriting from Object"
                );
                None
            }
        }
    }

    fn global_object(
        &self,
        allocated: &[Allocated<'_>],
        object_prototype: &HostObjectRef,
    ) -> HostObjectRef {
        match allocated.iter().find(|entry| entry.descriptor.global) {
            Some(entry) => HostObject::new(
                entry.descriptor.name.as_str(),
                ObjectKind::Global,
                Some(Arc::clone(&entry.prototype)),
            ),
            None => HostObject::new(
                DEFAULT_GLOBAL_CLASS,
                ObjectKind::Global,
                Some(Arc::clone(object_prototype)),
            ),
        }
    }
}

/// Bind `name` to `ctor` on the global object.
fn expose(global: &HostObjectRef, name: &str, ctor: &HostObjectRef) {
    if let Err(error) = global.define_property(
        name,
        PropertyDescriptor::builtin_method(Value::Object(Arc::clone(ctor))),
    ) {
        warn!(binding = name, %error, "global binding skipped");
    }
}

/// Build a [`GlobalScope`] from `catalog` under `flags`.
pub fn build(catalog: &ClassCatalog, flags: &dyn FeatureFlags) -> GlobalScope {
    HostObjectGraphBuilder::new(catalog, flags).build()
}
