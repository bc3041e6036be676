//! Generic member wiring.
//!
//! [`wire`] installs the members of one [`ClassDescriptor`] on a pre-allocated
//! prototype/constructor pair. Every property gets the attributes of its kind
//! and every function object gets correct `name` and `length` values.
//! Allocation and chain wiring happen elsewhere; this only adds members.

use std::sync::Arc;

use crate::catalog::{ClassDescriptor, MemberKind, Placement};
use crate::error::HostResult;
use crate::features::FeatureFlags;
use crate::object::{HostObject, HostObjectRef, PropertyAttributes, PropertyDescriptor, PropertyKey};
use crate::value::{NativeFn, Value};

/// The pre-allocated objects of one class.
pub struct WireTarget<'a> {
    pub prototype: &'a HostObjectRef,
    pub constructor: Option<&'a HostObjectRef>,
    pub function_prototype: &'a HostObjectRef,
}

/// Install all members of `descriptor` enabled under `flags`.
///
/// Fails on the first name collision; the caller decides whether to drop
/// the class.
pub fn wire(
    descriptor: &ClassDescriptor,
    target: &WireTarget<'_>,
    flags: &dyn FeatureFlags,
) -> HostResult<()> {
    for member in descriptor.members_for(flags) {
        let holder = match member.placement {
            Placement::Prototype => target.prototype,
            Placement::Constructor => match target.constructor {
                Some(ctor) => ctor,
                None => {
                    tracing::debug!(
                        class = %descriptor.name,
                        member = %member.name,
                        "static member dropped, class has no constructor"
                    );
                    continue;
                }
            },
        };

        match &member.kind {
            MemberKind::Constant(value) => {
                let desc =
                    PropertyDescriptor::data_with_attrs(value.clone(), PropertyAttributes::constant());
                target
                    .prototype
                    .define_property(member.name.as_str(), desc.clone())?;
                if let Some(ctor) = target.constructor {
                    ctor.define_property(member.name.as_str(), desc)?;
                }
            }
            MemberKind::Property { getter, setter } => {
                holder.define_property(
                    member.name.as_str(),
                    PropertyDescriptor::Accessor {
                        get: getter.clone(),
                        set: setter.clone(),
                        attributes: PropertyAttributes::builtin_accessor(),
                    },
                )?;
            }
            MemberKind::Data(value) => {
                holder.define_property(
                    member.name.as_str(),
                    PropertyDescriptor::data(value.clone()),
                )?;
            }
            MemberKind::Function { func, length } => {
                let fn_val =
                    make_native_fn(target.function_prototype, func.clone(), &member.name, *length);
                holder.define_property(
                    member.name.as_str(),
                    PropertyDescriptor::builtin_method(fn_val),
                )?;
            }
            MemberKind::SymbolFunction {
                symbol,
                func,
                length,
            } => {
                let fn_val = make_native_fn(
                    target.function_prototype,
                    func.clone(),
                    &format!("[{}]", symbol.description()),
                    *length,
                );
                holder.define_property(
                    PropertyKey::Symbol(*symbol),
                    PropertyDescriptor::builtin_method(fn_val),
                )?;
            }
        }
    }

    if let Some(ctor) = target.constructor {
        link_constructor(ctor, target.prototype)?;
    }
    Ok(())
}

/// `constructor.prototype = prototype` and `prototype.constructor = constructor`.
fn link_constructor(constructor: &HostObjectRef, prototype: &HostObjectRef) -> HostResult<()> {
    constructor.define_property(
        "prototype",
        PropertyDescriptor::data_with_attrs(
            Value::Object(Arc::clone(prototype)),
            PropertyAttributes::frozen(),
        ),
    )?;
    prototype.define_property(
        "constructor",
        PropertyDescriptor::builtin_method(Value::Object(Arc::clone(constructor))),
    )
}

/// Create a native function value with correct `length` and `name` properties,
/// using `function_prototype` as `[[Prototype]]`.
fn make_native_fn(
    function_prototype: &HostObjectRef,
    func: NativeFn,
    name: &str,
    length: u32,
) -> Value {
    Value::Object(HostObject::native_function(
        name,
        func,
        length,
        function_prototype,
    ))
}
