//! Typed port handles and descriptors.
//!
//! A port is owned by exactly one stage. User code holds lightweight, `Copy`
//! handles ([`InputPort<T>`], [`OutputPort<T>`]) that carry the element type
//! at compile time; the owning stage's [`StageCore`](super::StageCore) keeps
//! the runtime [`PortDescriptor`] with the declared type used by validation.

pub use crate::pipeline::id::PortDirection;
use crate::pipeline::id::{PortId, StageId};
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;

/// Declared element type of a port.
///
/// `PortType::any()` accepts every element type; otherwise a target port only
/// accepts a source port declaring the same type.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PortType {
    id: Option<TypeId>,
    name: &'static str,
}

impl PortType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: Some(TypeId::of::<T>()),
            name: std::any::type_name::<T>(),
        }
    }

    pub const fn any() -> Self {
        Self {
            id: None,
            name: "*",
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_any(&self) -> bool {
        self.id.is_none()
    }

    /// Whether a port of this type may receive elements from a port of `source` type.
    pub fn accepts(&self, source: &PortType) -> bool {
        match (self.id, source.id) {
            (None, _) | (_, None) => true,
            (Some(target), Some(source)) => target == source,
        }
    }
}

impl fmt::Debug for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortType({})", self.name)
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Runtime descriptor of a port, kept by the owning stage.
#[derive(Debug, Clone)]
pub struct PortDescriptor {
    pub id: PortId,
    pub ty: PortType,
    pub name: Option<String>,
}

impl PortDescriptor {
    pub fn new(id: PortId, ty: PortType) -> Self {
        Self { id, ty, name: None }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn direction(&self) -> PortDirection {
        self.id.direction()
    }

    pub fn owning_stage(&self) -> StageId {
        self.id.stage()
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}<{}>", self.ty),
            None => write!(f, "{:?}<{}>", self.id, self.ty),
        }
    }
}

macro_rules! port_handle {
    ($name:ident, $direction:expr) => {
        /// Typed handle to a port owned by some stage.
        pub struct $name<T> {
            id: PortId,
            _marker: PhantomData<fn() -> T>,
        }

        impl<T> $name<T> {
            pub(crate) fn from_id(id: PortId) -> Self {
                debug_assert_eq!(id.direction(), $direction);
                Self {
                    id,
                    _marker: PhantomData,
                }
            }

            #[inline]
            pub fn id(&self) -> PortId {
                self.id
            }

            #[inline]
            pub fn owning_stage(&self) -> StageId {
                self.id.stage()
            }
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $name<T> {}

        impl<T> PartialEq for $name<T> {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl<T> Eq for $name<T> {}

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    "{}<{}>({:?})",
                    stringify!($name),
                    std::any::type_name::<T>(),
                    self.id
                )
            }
        }
    };
}

port_handle!(InputPort, PortDirection::Input);
port_handle!(OutputPort, PortDirection::Output);
