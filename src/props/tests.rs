use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::handle::HandleTable;
use crate::modeset::PropertyId;
use crate::props::{
    PropertyEnumMember, PropertyFlags, PropertyObject, PropertyOps, PropertyRef,
    PropertyRegistry, PropertyType, PropertyValues,
};
use crate::result::{Error, Result};

#[derive(Clone)]
enum Obj {
    Thing,
    Prop(PropertyRef),
}

impl PropertyObject for Obj {
    fn from_property(prop: PropertyRef) -> Self {
        Self::Prop(prop)
    }

    fn as_property(&self) -> Option<&PropertyRef> {
        match self {
            Self::Prop(p) => Some(p),
            Self::Thing => None,
        }
    }
}

/// Stores one value per process and counts reads.
#[derive(Default)]
struct Cell {
    value: AtomicU64,
    reads: AtomicUsize,
}

struct CellOps(Arc<Cell>);

impl PropertyOps for CellOps {
    fn get(&self, _object: u32) -> Result<u64> {
        self.0.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.0.value.load(Ordering::SeqCst))
    }

    fn set(&self, _object: u32, value: u64) -> Result<()> {
        self.0.value.store(value, Ordering::SeqCst);
        Ok(())
    }
}

fn registry() -> PropertyRegistry<Obj> {
    PropertyRegistry::new(Arc::new(HandleTable::new()))
}

fn dpms_values() -> PropertyValues {
    PropertyValues::Members(vec![
        PropertyEnumMember::new(0, "On"),
        PropertyEnumMember::new(1, "Standby"),
        PropertyEnumMember::new(2, "Suspend"),
        PropertyEnumMember::new(3, "Off"),
    ])
}

#[test]
fn set_is_visible_to_next_get_all() {
    let reg = registry();
    let cell = Arc::new(Cell::default());
    let dpms = reg
        .create_property(
            "DPMS",
            PropertyFlags::ENUM,
            dpms_values(),
            Box::new(CellOps(cell.clone())),
        )
        .unwrap();
    let conn = reg.table().allocate(Obj::Thing).unwrap();
    reg.attach(conn, &dpms).unwrap();

    reg.set(conn, dpms.property_id(), 3).unwrap();
    let all = reg.get_all(conn).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].prop_id, dpms.property_id());
    assert_eq!(all[0].value, 3);

    reg.set(conn, dpms.property_id(), 0).unwrap();
    assert_eq!(reg.get_all(conn).unwrap()[0].value, 0);
    assert_eq!(cell.reads.load(Ordering::SeqCst), 2);
}

#[test]
fn one_property_is_shared_by_many_resources() {
    let reg = registry();
    let cell = Arc::new(Cell::default());
    let prop = reg
        .create_property(
            "zpos",
            PropertyFlags::RANGE,
            PropertyValues::Range { min: 0, max: 1 },
            Box::new(CellOps(cell)),
        )
        .unwrap();
    let ids: Vec<u32> = (0..3)
        .map(|_| reg.table().allocate(Obj::Thing).unwrap())
        .collect();
    for id in &ids {
        reg.attach(*id, &prop).unwrap();
    }
    // registry's table entry + three attachments + our handle
    assert_eq!(Arc::strong_count(&prop), 5);
    assert!(reg.property(prop.property_id()).is_some());
}

#[test]
fn property_ids_come_from_the_shared_table() {
    let reg = registry();
    let first = reg.table().allocate(Obj::Thing).unwrap();
    let prop = reg
        .create_property(
            "p",
            PropertyFlags::RANGE,
            PropertyValues::Range { min: 0, max: 5 },
            Box::new(CellOps(Arc::default())),
        )
        .unwrap();
    assert_eq!(prop.id(), first + 1);
    assert!(reg.property(PropertyId(first)).is_none());
}

#[test]
fn set_validates_values() {
    let reg = registry();
    let range = reg
        .create_property(
            "range",
            PropertyFlags::RANGE,
            PropertyValues::Range { min: 1, max: 4 },
            Box::new(CellOps(Arc::default())),
        )
        .unwrap();
    let enm = reg
        .create_property(
            "enum",
            PropertyFlags::ENUM,
            dpms_values(),
            Box::new(CellOps(Arc::default())),
        )
        .unwrap();
    let id = reg.table().allocate(Obj::Thing).unwrap();
    reg.attach(id, &range).unwrap();
    reg.attach(id, &enm).unwrap();

    assert_eq!(reg.set(id, range.property_id(), 0), Err(Error::Invalid));
    assert_eq!(reg.set(id, range.property_id(), 5), Err(Error::Invalid));
    assert_eq!(reg.set(id, range.property_id(), 4), Ok(()));
    assert_eq!(reg.set(id, enm.property_id(), 7), Err(Error::Invalid));
    assert_eq!(reg.set(id, enm.property_id(), 1), Ok(()));
}

#[test]
fn immutable_properties_reject_set() {
    let reg = registry();
    let prop = reg
        .create_property(
            "type",
            PropertyFlags::ENUM | PropertyFlags::IMMUTABLE,
            dpms_values(),
            Box::new(CellOps(Arc::default())),
        )
        .unwrap();
    assert_eq!(prop.property_type(), PropertyType::Enum);
    assert!(prop.is_immutable());
    let id = reg.table().allocate(Obj::Thing).unwrap();
    reg.attach(id, &prop).unwrap();
    assert_eq!(reg.set(id, prop.property_id(), 0), Err(Error::Permission));
    assert_eq!(reg.get(id, prop.property_id()), Ok(0));
}

#[test]
fn set_requires_attachment() {
    let reg = registry();
    let prop = reg
        .create_property(
            "p",
            PropertyFlags::RANGE,
            PropertyValues::Range { min: 0, max: 5 },
            Box::new(CellOps(Arc::default())),
        )
        .unwrap();
    let id = reg.table().allocate(Obj::Thing).unwrap();
    assert_eq!(reg.set(id, prop.property_id(), 1), Err(Error::Invalid));
    assert_eq!(reg.set(999, prop.property_id(), 1), Err(Error::NonExist));
    // a resource id is not a property id
    assert_eq!(reg.set(id, PropertyId(id), 1), Err(Error::Invalid));
    assert_eq!(reg.get_all(999), Err(Error::NonExist));
}
