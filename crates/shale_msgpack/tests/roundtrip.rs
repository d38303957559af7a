mod common;

use std::collections::HashMap;

use common::*;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use shale_msgpack::{property, ConstructorShape, ObjectShape, Shaped, TypeShape};

/// A struct exercising most of the primitive table at once. The serde derive
/// is the cross-check peer: `rmp-serde` in struct-as-map mode must produce
/// byte-identical output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct Mixed {
    flag: bool,
    count: i64,
    size: u64,
    ratio: f64,
    name: String,
    readings: Vec<i32>,
    comment: Option<String>,
}

impl Shaped for Mixed {
    fn shape() -> TypeShape<Self> {
        fn flag(m: &Mixed) -> &bool {
            &m.flag
        }
        fn count(m: &Mixed) -> &i64 {
            &m.count
        }
        fn size(m: &Mixed) -> &u64 {
            &m.size
        }
        fn ratio(m: &Mixed) -> &f64 {
            &m.ratio
        }
        fn name(m: &Mixed) -> &String {
            &m.name
        }
        fn readings(m: &Mixed) -> &Vec<i32> {
            &m.readings
        }
        fn comment(m: &Mixed) -> &Option<String> {
            &m.comment
        }

        TypeShape::object(
            ObjectShape::new("Mixed")
                .constructor(ConstructorShape::parameterless(Mixed::default))
                .property(property("flag", flag).setter(|m, v| m.flag = v))
                .property(property("count", count).setter(|m, v| m.count = v))
                .property(property("size", size).setter(|m, v| m.size = v))
                .property(property("ratio", ratio).setter(|m, v| m.ratio = v))
                .property(property("name", name).setter(|m, v| m.name = v))
                .property(property("readings", readings).setter(|m, v| m.readings = v))
                .property(property("comment", comment).setter(|m, v| m.comment = v)),
        )
    }
}

fn mixed_strategy() -> impl Strategy<Value = Mixed> {
    (
        any::<bool>(),
        any::<i64>(),
        any::<u64>(),
        -1.0e12f64..1.0e12,
        ".{0,40}",
        prop::collection::vec(any::<i32>(), 0..8),
        prop::option::of(".{0,16}"),
    )
        .prop_map(
            |(flag, count, size, ratio, name, readings, comment)| Mixed {
                flag,
                count,
                size,
                ratio,
                name,
                readings,
                comment,
            },
        )
}

proptest! {
    #[test]
    fn mixed_round_trips(value in mixed_strategy()) {
        let ser = serializer();
        let encoded = ser.to_vec(&value).unwrap();
        let decoded: Mixed = ser.from_slice(&encoded).unwrap();
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn encoding_matches_rmp_serde(value in mixed_strategy()) {
        let encoded = serializer().to_vec(&value).unwrap();
        let peer = rmp_serde::to_vec_named(&value).unwrap();
        prop_assert_eq!(&encoded, &peer);

        // Both decoders accept the other's output.
        let from_peer: Mixed = serializer().from_slice(&peer).unwrap();
        prop_assert_eq!(&from_peer, &value);
        let peer_decoded: Mixed = rmp_serde::from_slice(&encoded).unwrap();
        prop_assert_eq!(&peer_decoded, &value);
    }

    #[test]
    fn string_maps_round_trip(entries in prop::collection::hash_map(".{0,12}", any::<i32>(), 0..16)) {
        let ser = serializer();
        let encoded = ser.to_vec(&entries).unwrap();
        let decoded: HashMap<String, i32> = ser.from_slice(&encoded).unwrap();
        prop_assert_eq!(decoded, entries);
    }

    #[test]
    fn optimized_arrays_round_trip(values in prop::collection::vec(any::<i64>(), 0..64)) {
        let ser = serializer();
        let encoded = ser.to_vec(&values).unwrap();
        let decoded: Vec<i64> = ser.from_slice(&encoded).unwrap();
        prop_assert_eq!(&decoded, &values);

        let peer = rmp_serde::to_vec(&values).unwrap();
        prop_assert_eq!(&encoded, &peer);
    }

    #[test]
    fn nested_options_and_vectors_round_trip(values in prop::collection::vec(prop::option::of(".{0,8}"), 0..12)) {
        let ser = serializer();
        let encoded = ser.to_vec(&values).unwrap();
        let decoded: Vec<Option<String>> = ser.from_slice(&encoded).unwrap();
        prop_assert_eq!(decoded, values);
    }

    #[test]
    fn people_round_trip(first in ".{0,20}", last in ".{0,20}") {
        let person = Person { first_name: first, last_name: last };
        let ser = serializer();
        let decoded: Person = ser.from_slice(&ser.to_vec(&person).unwrap()).unwrap();
        prop_assert_eq!(decoded, person);
    }
}
