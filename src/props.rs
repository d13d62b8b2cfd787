//! Named, typed properties shared between resources.
//!
//! A [`Property`] is created once per logical kind (DPMS, zpos, ...) and
//! attached by reference to every resource that exposes it. Values are never
//! cached: each read calls back into [`PropertyOps::get`] so callers always
//! see live state.

#[cfg(test)]
mod tests;

use core::fmt;
use core::ops::{BitAnd, BitOr};
use std::sync::Arc;

use crate::handle::HandleTable;
use crate::modeset::PropertyId;
use crate::result::{Error, Result};

pub type PropertyRef = Arc<Property>;

/// Raw flag bits of a property, matching the kernel's encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct PropertyFlags(pub u32);

impl PropertyFlags {
    pub const NONE: Self = Self(0);
    pub const RANGE: Self = Self(1 << 1);
    pub const IMMUTABLE: Self = Self(1 << 2);
    pub const ENUM: Self = Self(1 << 3);
    pub const BLOB: Self = Self(1 << 4);
    pub const BITMASK: Self = Self(1 << 5);

    #[inline(always)]
    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl BitOr for PropertyFlags {
    type Output = Self;

    #[inline(always)]
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for PropertyFlags {
    type Output = Self;

    #[inline(always)]
    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PropertyType {
    Unknown,
    Range,
    Enum,
    Blob,
    Bitmask,
}

impl PropertyType {
    pub fn from_flags(flags: PropertyFlags) -> (Self, bool) {
        let immutable = flags.contains(PropertyFlags::IMMUTABLE);
        let typ = match flags.0 & !PropertyFlags::IMMUTABLE.0 {
            v if v == PropertyFlags::RANGE.0 => Self::Range,
            v if v == PropertyFlags::ENUM.0 => Self::Enum,
            v if v == PropertyFlags::BLOB.0 => Self::Blob,
            v if v == PropertyFlags::BITMASK.0 => Self::Bitmask,
            _ => Self::Unknown,
        };
        (typ, immutable)
    }
}

/// The set of values a property accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValues {
    None,
    Range { min: u64, max: u64 },
    /// Named members of an enum, or named bits of a bitmask.
    Members(Vec<PropertyEnumMember>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyEnumMember {
    pub value: u64,
    pub name: String,
}

impl PropertyEnumMember {
    pub fn new(value: u64, name: &str) -> Self {
        Self {
            value,
            name: name.to_owned(),
        }
    }
}

/// Live accessors for a property, called with the id of the resource the
/// property is read from or written to.
pub trait PropertyOps: Send + Sync {
    fn get(&self, object: u32) -> Result<u64>;
    fn set(&self, object: u32, value: u64) -> Result<()>;
}

pub struct Property {
    id: u32,
    name: String,
    flags: PropertyFlags,
    values: PropertyValues,
    ops: Box<dyn PropertyOps>,
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

impl Property {
    pub fn new(
        id: u32,
        name: &str,
        flags: PropertyFlags,
        values: PropertyValues,
        ops: Box<dyn PropertyOps>,
    ) -> Self {
        Self {
            id,
            name: name.to_owned(),
            flags,
            values,
            ops,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn property_id(&self) -> PropertyId {
        PropertyId(self.id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn flags(&self) -> PropertyFlags {
        self.flags
    }

    #[inline]
    pub fn property_type(&self) -> PropertyType {
        PropertyType::from_flags(self.flags).0
    }

    #[inline]
    pub fn is_immutable(&self) -> bool {
        PropertyType::from_flags(self.flags).1
    }

    pub fn values(&self) -> &PropertyValues {
        &self.values
    }

    pub fn get(&self, object: u32) -> Result<u64> {
        self.ops.get(object)
    }

    /// Validates `value` against the property's type and forwards it to the
    /// setter.
    pub fn set(&self, object: u32, value: u64) -> Result<()> {
        if self.is_immutable() {
            return Err(Error::Permission);
        }
        match (&self.values, self.property_type()) {
            (PropertyValues::Range { min, max }, _) => {
                if value < *min || value > *max {
                    return Err(Error::Invalid);
                }
            }
            (PropertyValues::Members(members), PropertyType::Enum) => {
                if !members.iter().any(|m| m.value == value) {
                    return Err(Error::Invalid);
                }
            }
            (PropertyValues::Members(members), PropertyType::Bitmask) => {
                let allowed = members.iter().fold(0u64, |acc, m| {
                    acc | 1u64.checked_shl(m.value as u32).unwrap_or(0)
                });
                if value & !allowed != 0 {
                    return Err(Error::Invalid);
                }
            }
            _ => {}
        }
        self.ops.set(object, value)
    }
}

/// Payload types of a [`HandleTable`] that can hold properties.
///
/// Properties share the id space of the resources they are attached to, so
/// the registry stores them in the same table.
pub trait PropertyObject: Clone {
    fn from_property(prop: PropertyRef) -> Self;
    fn as_property(&self) -> Option<&PropertyRef>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeProp {
    pub prop_id: PropertyId,
    pub value: u64,
}

/// Creates properties and routes get/set calls through a shared
/// [`HandleTable`].
#[derive(Debug)]
pub struct PropertyRegistry<T> {
    table: Arc<HandleTable<T>>,
}

impl<T> Clone for PropertyRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<T: PropertyObject> PropertyRegistry<T> {
    pub fn new(table: Arc<HandleTable<T>>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<HandleTable<T>> {
        &self.table
    }

    pub fn create_property(
        &self,
        name: &str,
        flags: PropertyFlags,
        values: PropertyValues,
        ops: Box<dyn PropertyOps>,
    ) -> Result<PropertyRef> {
        let mut prop = None;
        self.table.allocate_with(|id| {
            let p = Arc::new(Property::new(id, name, flags, values, ops));
            prop = Some(Arc::clone(&p));
            T::from_property(p)
        })?;
        let prop = prop.ok_or(Error::SystemMem)?;
        log::debug!("created property {} ({})", prop.id(), name);
        Ok(prop)
    }

    pub fn attach(&self, resource: u32, prop: &PropertyRef) -> Result<()> {
        self.table.attach_property(resource, Arc::clone(prop))
    }

    /// Looks up a property by its own id.
    pub fn property(&self, id: PropertyId) -> Option<PropertyRef> {
        self.table
            .lookup(id.0)
            .and_then(|obj| obj.as_property().cloned())
    }

    /// Reads every property attached to `resource`, evaluating each getter
    /// on the spot.
    pub fn get_all(&self, resource: u32) -> Result<Vec<ModeProp>> {
        let props = self.table.properties(resource).ok_or(Error::NonExist)?;
        let mut ret = Vec::new();
        ret.try_reserve_exact(props.len())?;
        for prop in props {
            ret.push(ModeProp {
                prop_id: prop.property_id(),
                value: prop.get(resource)?,
            });
        }
        Ok(ret)
    }

    pub fn get(&self, resource: u32, prop_id: PropertyId) -> Result<u64> {
        let prop = self.attached(resource, prop_id)?;
        prop.get(resource)
    }

    /// Sets `prop_id` on `resource`. The property must be attached to the
    /// resource.
    pub fn set(&self, resource: u32, prop_id: PropertyId, value: u64) -> Result<()> {
        let prop = self.attached(resource, prop_id)?;
        prop.set(resource, value)
    }

    fn attached(&self, resource: u32, prop_id: PropertyId) -> Result<PropertyRef> {
        let prop = self.property(prop_id).ok_or(Error::Invalid)?;
        let attached = self.table.properties(resource).ok_or(Error::NonExist)?;
        if !attached.iter().any(|p| p.id() == prop.id()) {
            return Err(Error::Invalid);
        }
        Ok(prop)
    }
}
