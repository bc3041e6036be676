//! Declarative class metadata.
//!
//! A [`ClassCatalog`] is the ahead-of-time table the graph builder consumes:
//! one [`ClassDescriptor`] per exposed class plus an alias table. Descriptors
//! are assembled with [`ClassBuilder`] and are immutable afterwards.
//!
//! ```ignore
//! let element = ClassBuilder::new("Element")
//!     .parent("Node")
//!     .property("id", Some(get_id), Some(set_id))
//!     .function("getAttribute", get_attribute, 1)
//!     .symbol_function(WellKnownSymbol::Iterator, "values", values, 0)
//!     .gated_by(Availability::feature("JS_ELEMENT_ITERABLE"))
//!     .build();
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{HostError, HostResult};
use crate::features::{Availability, FeatureFlags};
use crate::object::WellKnownSymbol;
use crate::value::{NativeFn, Value};

/// Legacy and vendor-prefixed constructor names resolved to canonical
/// classes. Entries whose canonical class is absent are ignored.
pub const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("webkitURL", "URL"),
    ("WebKitCSSMatrix", "DOMMatrix"),
    ("webkitMediaStream", "MediaStream"),
    ("webkitRTCPeerConnection", "RTCPeerConnection"),
    ("webkitSpeechGrammar", "SpeechGrammar"),
    ("webkitSpeechGrammarList", "SpeechGrammarList"),
    ("webkitSpeechRecognition", "SpeechRecognition"),
    ("webkitSpeechRecognitionError", "SpeechRecognitionErrorEvent"),
    ("webkitSpeechRecognitionEvent", "SpeechRecognitionEvent"),
    ("webkitAudioContext", "AudioContext"),
    ("webkitOfflineAudioContext", "OfflineAudioContext"),
];

/// How a class is constructed from script.
#[derive(Clone, Default)]
pub enum ConstructorRef {
    /// No constructor is exposed on the global object
    None,
    /// Shared generated constructor that rejects `new`
    #[default]
    Default,
    /// Custom constructor implementation
    Custom { func: NativeFn, length: u32 },
}

impl fmt::Debug for ConstructorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Default => write!(f, "Default"),
            Self::Custom { length, .. } => write!(f, "Custom({length})"),
        }
    }
}

/// Where a member is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Prototype,
    Constructor,
}

/// The member itself.
#[derive(Clone)]
pub enum MemberKind {
    /// Constant, installed on both prototype and constructor
    Constant(Value),
    /// Accessor property
    Property {
        getter: Option<NativeFn>,
        setter: Option<NativeFn>,
    },
    /// Data property with an initial value
    Data(Value),
    Function { func: NativeFn, length: u32 },
    SymbolFunction {
        symbol: WellKnownSymbol,
        func: NativeFn,
        length: u32,
    },
}

impl fmt::Debug for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => write!(f, "Constant({value:?})"),
            Self::Property { getter, setter } => write!(
                f,
                "Property(get: {}, set: {})",
                getter.is_some(),
                setter.is_some()
            ),
            Self::Data(value) => write!(f, "Data({value:?})"),
            Self::Function { length, .. } => write!(f, "Function({length})"),
            Self::SymbolFunction { symbol, length, .. } => {
                write!(f, "SymbolFunction({}, {length})", symbol.description())
            }
        }
    }
}

/// One member of a class descriptor.
#[derive(Debug, Clone)]
pub struct MemberDescriptor {
    pub name: String,
    pub kind: MemberKind,
    pub placement: Placement,
    pub availability: Availability,
}

/// Declarative description of one exposed class.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub name: String,
    pub parent: Option<String>,
    pub constructor: ConstructorRef,
    pub members: Vec<MemberDescriptor>,
    pub availability: Availability,
    /// Rust host type this class represents, if any
    pub host_type: Option<TypeId>,
    /// The class of the browsing context's global object
    pub global: bool,
}

impl ClassDescriptor {
    pub fn is_applicable(&self, flags: &dyn FeatureFlags) -> bool {
        self.availability.is_satisfied(flags)
    }

    /// Members enabled under `flags`, in declaration order.
    pub fn members_for<'a>(
        &'a self,
        flags: &'a dyn FeatureFlags,
    ) -> impl Iterator<Item = &'a MemberDescriptor> + 'a {
        self.members
            .iter()
            .filter(move |member| member.availability.is_satisfied(flags))
    }
}

/// Builder for a [`ClassDescriptor`].
pub struct ClassBuilder {
    descriptor: ClassDescriptor,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            descriptor: ClassDescriptor {
                name: name.to_string(),
                parent: None,
                constructor: ConstructorRef::Default,
                members: Vec::new(),
                availability: Availability::Always,
                host_type: None,
                global: false,
            },
        }
    }

    /// Parent class name. Resolved by name after all classes are allocated.
    pub fn parent(mut self, name: &str) -> Self {
        self.descriptor.parent = Some(name.to_string());
        self
    }

    /// Set the constructor implementation and its arity.
    pub fn constructor_fn<F>(mut self, f: F, length: u32) -> Self
    where
        F: Fn(&Value, &[Value]) -> HostResult<Value> + Send + Sync + 'static,
    {
        self.descriptor.constructor = ConstructorRef::Custom {
            func: Arc::new(f),
            length,
        };
        self
    }

    /// Do not expose a constructor for this class.
    pub fn no_constructor(mut self) -> Self {
        self.descriptor.constructor = ConstructorRef::None;
        self
    }

    /// Only include the class when `availability` holds.
    pub fn available_when(mut self, availability: Availability) -> Self {
        self.descriptor.availability = availability;
        self
    }

    /// Shorthand for `available_when(Availability::feature(id))`.
    pub fn requires(self, feature: &str) -> Self {
        self.available_when(Availability::feature(feature))
    }

    pub fn host_type<T: 'static>(mut self) -> Self {
        self.descriptor.host_type = Some(TypeId::of::<T>());
        self
    }

    /// Mark as the class of the global object.
    pub fn global(mut self) -> Self {
        self.descriptor.global = true;
        self
    }

    fn push(mut self, name: &str, kind: MemberKind, placement: Placement) -> Self {
        self.descriptor.members.push(MemberDescriptor {
            name: name.to_string(),
            kind,
            placement,
            availability: Availability::Always,
        });
        self
    }

    /// Gate the most recently added member.
    pub fn gated_by(mut self, availability: Availability) -> Self {
        if let Some(member) = self.descriptor.members.last_mut() {
            member.availability = availability;
        }
        self
    }

    pub fn constant(self, name: &str, value: impl Into<Value>) -> Self {
        self.push(name, MemberKind::Constant(value.into()), Placement::Prototype)
    }

    pub fn property(self, name: &str, getter: Option<NativeFn>, setter: Option<NativeFn>) -> Self {
        self.push(
            name,
            MemberKind::Property { getter, setter },
            Placement::Prototype,
        )
    }

    pub fn static_property(
        self,
        name: &str,
        getter: Option<NativeFn>,
        setter: Option<NativeFn>,
    ) -> Self {
        self.push(
            name,
            MemberKind::Property { getter, setter },
            Placement::Constructor,
        )
    }

    pub fn data(self, name: &str, value: impl Into<Value>) -> Self {
        self.push(name, MemberKind::Data(value.into()), Placement::Prototype)
    }

    pub fn function<F>(self, name: &str, f: F, length: u32) -> Self
    where
        F: Fn(&Value, &[Value]) -> HostResult<Value> + Send + Sync + 'static,
    {
        self.function_native(name, Arc::new(f), length)
    }

    /// Add a function using a pre-built `NativeFn` Arc.
    pub fn function_native(self, name: &str, func: NativeFn, length: u32) -> Self {
        self.push(name, MemberKind::Function { func, length }, Placement::Prototype)
    }

    pub fn static_function<F>(self, name: &str, f: F, length: u32) -> Self
    where
        F: Fn(&Value, &[Value]) -> HostResult<Value> + Send + Sync + 'static,
    {
        self.push(
            name,
            MemberKind::Function {
                func: Arc::new(f),
                length,
            },
            Placement::Constructor,
        )
    }

    pub fn symbol_function<F>(
        self,
        symbol: WellKnownSymbol,
        name: &str,
        f: F,
        length: u32,
    ) -> Self
    where
        F: Fn(&Value, &[Value]) -> HostResult<Value> + Send + Sync + 'static,
    {
        self.push(
            name,
            MemberKind::SymbolFunction {
                symbol,
                func: Arc::new(f),
                length,
            },
            Placement::Prototype,
        )
    }

    pub fn build(self) -> ClassDescriptor {
        self.descriptor
    }
}

/// One alias table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEntry {
    pub alias: String,
    pub canonical: String,
    pub availability: Availability,
}

/// The full set of class descriptors and aliases for a host.
#[derive(Debug, Clone, Default)]
pub struct ClassCatalog {
    classes: Vec<Arc<ClassDescriptor>>,
    by_name: HashMap<String, usize>,
    aliases: Vec<AliasEntry>,
}

impl ClassCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Names are unique within a catalog.
    pub fn add(&mut self, descriptor: ClassDescriptor) -> HostResult<()> {
        if self.by_name.contains_key(&descriptor.name) {
            return Err(HostError::config(format!(
                "class '{}' is registered twice",
                descriptor.name
            )));
        }
        if descriptor.global && self.classes.iter().any(|c| c.global) {
            return Err(HostError::config(format!(
                "class '{}' is marked global but another global class exists",
                descriptor.name
            )));
        }
        self.by_name
            .insert(descriptor.name.clone(), self.classes.len());
        self.classes.push(Arc::new(descriptor));
        Ok(())
    }

    /// Builder-style [`add`](Self::add).
    pub fn with_class(mut self, descriptor: ClassDescriptor) -> HostResult<Self> {
        self.add(descriptor)?;
        Ok(self)
    }

    /// Map `alias` to the prototype of `canonical`.
    pub fn alias(&mut self, alias: &str, canonical: &str) {
        self.alias_when(alias, canonical, Availability::Always);
    }

    pub fn alias_when(&mut self, alias: &str, canonical: &str, availability: Availability) {
        self.aliases.push(AliasEntry {
            alias: alias.to_string(),
            canonical: canonical.to_string(),
            availability,
        });
    }

    /// Add every entry of [`LEGACY_ALIASES`].
    pub fn with_legacy_aliases(mut self) -> Self {
        for (alias, canonical) in LEGACY_ALIASES {
            self.alias(alias, canonical);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ClassDescriptor>> {
        self.by_name.get(name).map(|&idx| &self.classes[idx])
    }

    pub fn classes(&self) -> &[Arc<ClassDescriptor>] {
        &self.classes
    }

    pub fn aliases(&self) -> &[AliasEntry] {
        &self.aliases
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FlagSet;

    #[test]
    fn test_builder_members_and_gating() {
        let desc = ClassBuilder::new("Element")
            .parent("Node")
            .constant("ELEMENT_NODE", 1)
            .function("click", |_, _| Ok(Value::Undefined), 0)
            .function("animate", |_, _| Ok(Value::Undefined), 2)
            .gated_by(Availability::feature("WEB_ANIMATIONS"))
            .build();

        assert_eq!(desc.parent.as_deref(), Some("Node"));
        assert_eq!(desc.members.len(), 3);

        let without = FlagSet::new();
        let names: Vec<_> = desc.members_for(&without).map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["ELEMENT_NODE", "click"]);

        let with = FlagSet::new().with("WEB_ANIMATIONS");
        assert_eq!(desc.members_for(&with).count(), 3);
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let mut catalog = ClassCatalog::new();
        catalog.add(ClassBuilder::new("Node").build()).unwrap();
        assert!(catalog.add(ClassBuilder::new("Node").build()).is_err());
    }

    #[test]
    fn test_single_global_class() {
        let mut catalog = ClassCatalog::new();
        catalog
            .add(ClassBuilder::new("Window").global().build())
            .unwrap();
        assert!(
            catalog
                .add(ClassBuilder::new("OtherWindow").global().build())
                .is_err()
        );
    }

    #[test]
    fn test_legacy_aliases() {
        let catalog = ClassCatalog::new().with_legacy_aliases();
        assert!(
            catalog
                .aliases()
                .iter()
                .any(|entry| entry.alias == "webkitURL" && entry.canonical == "URL")
        );
    }
}
