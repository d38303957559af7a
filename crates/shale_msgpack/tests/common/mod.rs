//! Shape fixtures shared by the integration tests. Each `Shaped` impl here
//! plays the role of the external shape provider.
#![allow(dead_code)]

use std::any::Any;

use shale_msgpack::{
    property, ConstructorShape, MessagePackSerializer, ObjectShape, SerializerOptions, Shaped,
    Shared, TypeShape, UnionCaseShape, UnionShape,
};

pub fn serializer() -> MessagePackSerializer {
    MessagePackSerializer::default()
}

pub fn serializer_with(options: SerializerOptions) -> MessagePackSerializer {
    MessagePackSerializer::new(options)
}

// ---------------------------------------------------------------------------
// Plain mutable object

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Person {
    pub first_name: String,
    pub last_name: String,
}

impl Person {
    pub fn new(first_name: &str, last_name: &str) -> Person {
        Person {
            first_name: first_name.to_owned(),
            last_name: last_name.to_owned(),
        }
    }
}

impl Shaped for Person {
    fn shape() -> TypeShape<Self> {
        fn first_name(p: &Person) -> &String {
            &p.first_name
        }
        fn last_name(p: &Person) -> &String {
            &p.last_name
        }

        TypeShape::object(
            ObjectShape::new("Person")
                .constructor(ConstructorShape::parameterless(Person::default))
                .property(
                    property("FirstName", first_name)
                        .setter(|p, v| p.first_name = v)
                        .suppress_default(),
                )
                .property(
                    property("LastName", last_name)
                        .setter(|p, v| p.last_name = v)
                        .suppress_default(),
                ),
        )
    }
}

// ---------------------------------------------------------------------------
// Read-only object with a parameterized constructor

#[derive(Debug, Clone, PartialEq)]
pub struct Employee {
    pub name: String,
    pub level: u32,
}

#[derive(Default)]
pub struct EmployeeArgs {
    name: Option<String>,
    level: Option<u32>,
}

impl Shaped for Employee {
    fn shape() -> TypeShape<Self> {
        fn name(e: &Employee) -> &String {
            &e.name
        }
        fn level(e: &Employee) -> &u32 {
            &e.level
        }

        TypeShape::object(
            ObjectShape::new("Employee")
                .constructor(
                    ConstructorShape::with_state::<EmployeeArgs>()
                        .parameter("Name", |s: &mut EmployeeArgs, v| s.name = Some(v))
                        .parameter("Level", |s: &mut EmployeeArgs, v| s.level = Some(v))
                        .construct(|s| {
                            Ok(Employee {
                                name: s.name.unwrap_or_default(),
                                level: s.level.unwrap_or_default(),
                            })
                        }),
                )
                .property(property("Name", name))
                .property(property("Level", level)),
        )
    }
}

// ---------------------------------------------------------------------------
// Array-shaped (keyed) object, with gaps in the index space

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Packet {
    pub id: u32,
    pub payload: String,
    pub priority: Option<i32>,
}

impl Shaped for Packet {
    fn shape() -> TypeShape<Self> {
        fn id(p: &Packet) -> &u32 {
            &p.id
        }
        fn payload(p: &Packet) -> &String {
            &p.payload
        }
        fn priority(p: &Packet) -> &Option<i32> {
            &p.priority
        }

        TypeShape::object(
            ObjectShape::new("Packet")
                .constructor(ConstructorShape::parameterless(Packet::default))
                .property(property("Id", id).setter(|p, v| p.id = v).key(0))
                .property(property("Payload", payload).setter(|p, v| p.payload = v).key(2))
                .property(
                    property("Priority", priority)
                        .setter(|p, v| p.priority = v)
                        .key(4),
                ),
        )
    }
}

// ---------------------------------------------------------------------------
// Recursive linked node

#[derive(Debug, Default)]
pub struct Node {
    pub value: i32,
    pub next: Option<Shared<Node>>,
}

impl Shaped for Node {
    fn shape() -> TypeShape<Self> {
        fn value(n: &Node) -> &i32 {
            &n.value
        }
        fn next(n: &Node) -> &Option<Shared<Node>> {
            &n.next
        }

        TypeShape::object(
            ObjectShape::new("Node")
                .constructor(ConstructorShape::parameterless(Node::default))
                .property(property("Value", value).setter(|n, v| n.value = v))
                .property(property("Next", next).setter(|n, v| n.next = v)),
        )
    }
}

/// An acyclic chain of `len` nodes valued `1..=len`, front first.
pub fn node_chain(len: usize) -> Node {
    let mut next = None;
    for value in (2..=len as i32).rev() {
        next = Some(Shared::new(Node { value, next }));
    }
    Node { value: 1, next }
}

// ---------------------------------------------------------------------------
// Getter-only collection property, populated in place

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Inventory {
    items: Vec<String>,
}

impl Inventory {
    pub fn with_items(items: Vec<String>) -> Inventory {
        Inventory { items }
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }
}

impl Shaped for Inventory {
    fn shape() -> TypeShape<Self> {
        fn items(i: &Inventory) -> &Vec<String> {
            &i.items
        }
        fn items_mut(i: &mut Inventory) -> &mut Vec<String> {
            &mut i.items
        }

        TypeShape::object(
            ObjectShape::new("Inventory")
                .constructor(ConstructorShape::parameterless(Inventory::default))
                .property(property("Items", items).mut_getter(items_mut)),
        )
    }
}

// ---------------------------------------------------------------------------
// Enum over an integer base

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red = 1,
    Green = 2,
    Blue = 4,
}

impl Shaped for Color {
    fn shape() -> TypeShape<Self> {
        TypeShape::enumeration(
            |c| *c as i64,
            |raw| match raw {
                1 => Some(Color::Red),
                2 => Some(Color::Green),
                4 => Some(Color::Blue),
                _ => None,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Closed polymorphic family over a trait object

pub trait VehicleLike: Send + Sync + Any {
    fn as_any(&self) -> &dyn Any;
    fn wheels(&self) -> u32;
}

impl std::fmt::Debug for dyn VehicleLike {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VehicleLike")
            .field("wheels", &self.wheels())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Vehicle {
    pub wheels: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Truck {
    pub wheels: u32,
    pub axles: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Motorcycle {
    pub wheels: u32,
}

impl VehicleLike for Vehicle {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn wheels(&self) -> u32 {
        self.wheels
    }
}

impl VehicleLike for Truck {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn wheels(&self) -> u32 {
        self.wheels
    }
}

impl VehicleLike for Motorcycle {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn wheels(&self) -> u32 {
        self.wheels
    }
}

impl Shaped for Vehicle {
    fn shape() -> TypeShape<Self> {
        fn wheels(v: &Vehicle) -> &u32 {
            &v.wheels
        }
        TypeShape::object(
            ObjectShape::new("Vehicle")
                .constructor(ConstructorShape::parameterless(Vehicle::default))
                .property(property("Wheels", wheels).setter(|v, w| v.wheels = w)),
        )
    }
}

impl Shaped for Truck {
    fn shape() -> TypeShape<Self> {
        fn wheels(t: &Truck) -> &u32 {
            &t.wheels
        }
        fn axles(t: &Truck) -> &u32 {
            &t.axles
        }
        TypeShape::object(
            ObjectShape::new("Truck")
                .constructor(ConstructorShape::parameterless(Truck::default))
                .property(property("Wheels", wheels).setter(|t, w| t.wheels = w))
                .property(property("Axles", axles).setter(|t, a| t.axles = a)),
        )
    }
}

impl Shaped for Motorcycle {
    fn shape() -> TypeShape<Self> {
        fn wheels(m: &Motorcycle) -> &u32 {
            &m.wheels
        }
        TypeShape::object(
            ObjectShape::new("Motorcycle")
                .constructor(ConstructorShape::parameterless(Motorcycle::default))
                .property(property("Wheels", wheels).setter(|m, w| m.wheels = w)),
        )
    }
}

impl Shaped for Box<dyn VehicleLike> {
    fn shape() -> TypeShape<Self> {
        fn as_vehicle(v: &Box<dyn VehicleLike>) -> Option<&Vehicle> {
            v.as_any().downcast_ref()
        }
        fn as_truck(v: &Box<dyn VehicleLike>) -> Option<&Truck> {
            v.as_any().downcast_ref()
        }
        fn as_motorcycle(v: &Box<dyn VehicleLike>) -> Option<&Motorcycle> {
            v.as_any().downcast_ref()
        }
        fn erase_vehicle(v: Vehicle) -> Box<dyn VehicleLike> {
            Box::new(v)
        }
        fn erase_truck(t: Truck) -> Box<dyn VehicleLike> {
            Box::new(t)
        }
        fn erase_motorcycle(m: Motorcycle) -> Box<dyn VehicleLike> {
            Box::new(m)
        }

        TypeShape::union(
            UnionShape::new(
                "VehicleLike",
                UnionCaseShape::base(as_vehicle, erase_vehicle),
            )
            .subtype(UnionCaseShape::subtype(1, as_truck, erase_truck))
            .subtype(UnionCaseShape::subtype(2, as_motorcycle, erase_motorcycle)),
        )
    }
}

// ---------------------------------------------------------------------------
// Shared-identity fixtures

#[derive(Debug, Default)]
pub struct Labels {
    pub primary: Shared<String>,
    pub secondary: Shared<String>,
}

impl Shaped for Labels {
    fn shape() -> TypeShape<Self> {
        fn primary(l: &Labels) -> &Shared<String> {
            &l.primary
        }
        fn secondary(l: &Labels) -> &Shared<String> {
            &l.secondary
        }

        TypeShape::object(
            ObjectShape::new("Labels")
                .constructor(ConstructorShape::parameterless(Labels::default))
                .property(property("Primary", primary).setter(|l, v| l.primary = v))
                .property(property("Secondary", secondary).setter(|l, v| l.secondary = v)),
        )
    }
}

// ---------------------------------------------------------------------------
// Rank-2 rectangular grid

#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub rows: usize,
    pub cols: usize,
    pub cells: Vec<f64>,
}

impl Shaped for Grid {
    fn shape() -> TypeShape<Self> {
        fn dims(g: &Grid) -> Vec<usize> {
            vec![g.rows, g.cols]
        }
        fn flat(g: &Grid) -> Box<dyn Iterator<Item = &f64> + Send + '_> {
            Box::new(g.cells.iter())
        }
        fn from_parts(dims: Vec<usize>, cells: Vec<f64>) -> anyhow::Result<Grid> {
            anyhow::ensure!(
                dims.len() == 2 && dims[0] * dims[1] == cells.len(),
                "grid dimensions do not match cell count"
            );
            Ok(Grid {
                rows: dims[0],
                cols: dims[1],
                cells,
            })
        }

        TypeShape::multi_dimensional(2, dims, flat, from_parts)
    }
}
