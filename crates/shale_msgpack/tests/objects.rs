mod common;

use common::*;
use serde::Serialize;
use shale_msgpack::{
    property, ConstructorShape, MessagePackSerializer, NamingPolicy, ObjectShape, Reader,
    SerializationError, SerializerOptions, Shaped, TypeShape,
};

fn is_tag(err: &anyhow::Error, tag: fn(&SerializationError) -> bool) -> bool {
    SerializationError::is(err, tag)
}

fn rmp_map_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut ser = rmp_serde::Serializer::new(&mut buf).with_struct_map();
    value.serialize(&mut ser).unwrap();
    buf
}

#[test]
fn person_map_encoding_matches_peer_encoder() {
    #[derive(Serialize)]
    #[serde(rename_all = "PascalCase")]
    struct PersonWire {
        first_name: String,
        last_name: String,
    }

    let person = Person::new("Andrew", "Arnott");
    let encoded = serializer().to_vec(&person).unwrap();
    let expected = rmp_map_bytes(&PersonWire {
        first_name: "Andrew".into(),
        last_name: "Arnott".into(),
    });
    assert_eq!(encoded, expected);

    let decoded: Person = serializer().from_slice(&encoded).unwrap();
    assert_eq!(decoded, person);
}

#[test]
fn naming_policy_rewrites_keys() {
    let options = SerializerOptions {
        naming_policy: NamingPolicy::CamelCase,
        ..Default::default()
    };
    let ser = serializer_with(options);
    let encoded = ser.to_vec(&Person::new("A", "B")).unwrap();

    let mut reader = Reader::new(&encoded);
    assert_eq!(reader.read_map_header().unwrap(), 2);
    assert_eq!(reader.read_str().unwrap(), "firstName");

    // The same serializer decodes its own naming.
    let decoded: Person = ser.from_slice(&encoded).unwrap();
    assert_eq!(decoded, Person::new("A", "B"));
}

#[test]
fn rename_overrides_policy() {
    #[derive(Debug, PartialEq, Default)]
    struct Tagged {
        value: i32,
    }
    impl Shaped for Tagged {
        fn shape() -> TypeShape<Self> {
            fn value(t: &Tagged) -> &i32 {
                &t.value
            }
            TypeShape::object(
                ObjectShape::new("Tagged")
                    .constructor(ConstructorShape::parameterless(Tagged::default))
                    .property(property("Value", value).setter(|t, v| t.value = v).rename("v")),
            )
        }
    }

    let encoded = serializer().to_vec(&Tagged { value: 3 }).unwrap();
    let mut reader = Reader::new(&encoded);
    reader.read_map_header().unwrap();
    assert_eq!(reader.read_str().unwrap(), "v");
    let decoded: Tagged = serializer().from_slice(&encoded).unwrap();
    assert_eq!(decoded, Tagged { value: 3 });
}

#[test]
fn constructor_flow_round_trips_read_only_properties() {
    let employee = Employee {
        name: "Iris".to_owned(),
        level: 7,
    };
    let ser = serializer();
    let encoded = ser.to_vec(&employee).unwrap();
    let decoded: Employee = ser.from_slice(&encoded).unwrap();
    assert_eq!(decoded, employee);
}

#[test]
fn constructor_parameters_match_either_casing() {
    // Encode under camelCase naming; decode with a serializer whose shape
    // matches parameters case-insensitively via both casings.
    let options = SerializerOptions {
        naming_policy: NamingPolicy::CamelCase,
        ..Default::default()
    };
    let employee = Employee {
        name: "Sam".to_owned(),
        level: 2,
    };
    let encoded = serializer_with(options).to_vec(&employee).unwrap();

    let mut reader = Reader::new(&encoded);
    reader.read_map_header().unwrap();
    assert_eq!(reader.read_str().unwrap(), "name");

    let decoded: Employee = serializer().from_slice(&encoded).unwrap();
    assert_eq!(decoded, employee);
}

#[test]
fn unknown_keys_are_skipped() {
    use shale_msgpack::{OutputBuffer, Writer};

    let mut buffer = OutputBuffer::new();
    {
        let mut writer = Writer::new(&mut buffer);
        writer.write_map_header(3);
        writer.write_str("FirstName");
        writer.write_str("Ada");
        writer.write_str("Unknown");
        writer.write_array_header(2);
        writer.write_int(1);
        writer.write_map_header(0);
        writer.write_str("LastName");
        writer.write_str("Lovelace");
    }
    let bytes = buffer.into_written();

    let decoded: Person = serializer().from_slice(&bytes).unwrap();
    assert_eq!(decoded, Person::new("Ada", "Lovelace"));
}

#[test]
fn default_values_can_be_suppressed() {
    let options = SerializerOptions {
        serialize_default_values: false,
        ..Default::default()
    };
    let ser = serializer_with(options);

    let person = Person::new("", "Arnott");
    let encoded = ser.to_vec(&person).unwrap();

    let mut reader = Reader::new(&encoded);
    assert_eq!(reader.read_map_header().unwrap(), 1);
    assert_eq!(reader.read_str().unwrap(), "LastName");

    // The absent field decodes to its default.
    let decoded: Person = ser.from_slice(&encoded).unwrap();
    assert_eq!(decoded, person);

    // With suppression off (the default) both fields are present.
    let encoded = serializer().to_vec(&person).unwrap();
    let mut reader = Reader::new(&encoded);
    assert_eq!(reader.read_map_header().unwrap(), 2);
}

#[test]
fn keyed_properties_encode_positionally_with_nil_gaps() {
    let packet = Packet {
        id: 9,
        payload: "p".to_owned(),
        priority: Some(-1),
    };
    let encoded = serializer().to_vec(&packet).unwrap();

    let mut reader = Reader::new(&encoded);
    assert_eq!(reader.read_array_header().unwrap(), 5);
    assert_eq!(reader.read_uint().unwrap(), 9);
    assert!(reader.try_read_nil().unwrap());
    assert_eq!(reader.read_str().unwrap(), "p");
    assert!(reader.try_read_nil().unwrap());
    assert_eq!(reader.read_int().unwrap(), -1);
    assert!(reader.is_empty());

    let decoded: Packet = serializer().from_slice(&encoded).unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn keyed_decoding_tolerates_short_and_long_arrays() {
    use shale_msgpack::{OutputBuffer, Writer};

    // Shorter than max index: missing slots keep defaults.
    let mut buffer = OutputBuffer::new();
    {
        let mut writer = Writer::new(&mut buffer);
        writer.write_array_header(1);
        writer.write_uint(4);
    }
    let decoded: Packet = serializer().from_slice(&buffer.into_written()).unwrap();
    assert_eq!(
        decoded,
        Packet {
            id: 4,
            payload: String::new(),
            priority: None,
        }
    );

    // Longer than known slots: extras are skipped.
    let mut buffer = OutputBuffer::new();
    {
        let mut writer = Writer::new(&mut buffer);
        writer.write_array_header(7);
        writer.write_uint(4);
        writer.write_nil();
        writer.write_str("x");
        writer.write_nil();
        writer.write_nil();
        writer.write_str("future");
        writer.write_int(12);
    }
    let decoded: Packet = serializer().from_slice(&buffer.into_written()).unwrap();
    assert_eq!(decoded.id, 4);
    assert_eq!(decoded.payload, "x");
}

#[test]
fn mixed_keyed_and_named_properties_fail_to_construct() {
    #[derive(Debug, Default)]
    struct Mixed {
        a: i32,
        b: i32,
    }
    impl Shaped for Mixed {
        fn shape() -> TypeShape<Self> {
            fn a(m: &Mixed) -> &i32 {
                &m.a
            }
            fn b(m: &Mixed) -> &i32 {
                &m.b
            }
            TypeShape::object(
                ObjectShape::new("Mixed")
                    .constructor(ConstructorShape::parameterless(Mixed::default))
                    .property(property("A", a).setter(|m, v| m.a = v).key(0))
                    .property(property("B", b).setter(|m, v| m.b = v)),
            )
        }
    }

    let err = serializer().converter::<Mixed>().unwrap_err();
    assert!(is_tag(&err, |e| matches!(
        e,
        SerializationError::ShapeConstruction(_)
    )));
}

#[test]
fn duplicate_key_indexes_fail_to_construct() {
    #[derive(Debug, Default)]
    struct Dup {
        a: i32,
        b: i32,
    }
    impl Shaped for Dup {
        fn shape() -> TypeShape<Self> {
            fn a(d: &Dup) -> &i32 {
                &d.a
            }
            fn b(d: &Dup) -> &i32 {
                &d.b
            }
            TypeShape::object(
                ObjectShape::new("Dup")
                    .constructor(ConstructorShape::parameterless(Dup::default))
                    .property(property("A", a).setter(|d, v| d.a = v).key(1))
                    .property(property("B", b).setter(|d, v| d.b = v).key(1)),
            )
        }
    }

    let err = serializer().converter::<Dup>().unwrap_err();
    assert!(is_tag(&err, |e| matches!(
        e,
        SerializationError::ShapeConstruction(_)
    )));
}

#[test]
fn nil_into_non_optional_object_fails() {
    let err = serializer().from_slice::<Person>(&[0xc0]).unwrap_err();
    assert!(is_tag(&err, |e| matches!(
        e,
        SerializationError::UnexpectedNil("Person")
    )));
}

#[test]
fn trailing_bytes_are_rejected() {
    let mut encoded = serializer().to_vec(&Person::new("A", "B")).unwrap();
    encoded.push(0x00);
    let err = serializer().from_slice::<Person>(&encoded).unwrap_err();
    assert!(is_tag(&err, |e| matches!(
        e,
        SerializationError::DecodeFormat(_)
    )));
}

#[test]
fn depth_limit_is_enforced_on_both_sides() {
    let shallow_options = SerializerOptions {
        max_depth: 4,
        ..Default::default()
    };

    let ok = node_chain(4);
    let too_deep = node_chain(5);

    let shallow = serializer_with(shallow_options.clone());
    let encoded = shallow.to_vec(&ok).unwrap();
    let _: Node = shallow.from_slice(&encoded).unwrap();

    let err = shallow.to_vec(&too_deep).unwrap_err();
    assert!(is_tag(&err, |e| matches!(e, SerializationError::DepthExceeded)));

    // A permissive serializer can encode it, but the shallow one refuses to
    // decode the result.
    let encoded = serializer().to_vec(&too_deep).unwrap();
    let err = shallow.from_slice::<Node>(&encoded).unwrap_err();
    assert!(is_tag(&err, |e| matches!(e, SerializationError::DepthExceeded)));
}

#[test]
fn getter_only_collections_deserialize_in_place() {
    let inventory = Inventory::with_items(vec!["a".into(), "b".into()]);
    let encoded = serializer().to_vec(&inventory).unwrap();
    let decoded: Inventory = serializer().from_slice(&encoded).unwrap();
    assert_eq!(decoded.items(), inventory.items());
}

#[test]
fn enums_serialize_as_their_underlying_integer() {
    let encoded = serializer().to_vec(&Color::Blue).unwrap();
    assert_eq!(encoded, [0x04]);
    let decoded: Color = serializer().from_slice(&encoded).unwrap();
    assert_eq!(decoded, Color::Blue);

    let err = serializer().from_slice::<Color>(&[0x03]).unwrap_err();
    assert!(is_tag(&err, |e| matches!(
        e,
        SerializationError::DecodeFormat(_)
    )));
}

#[test]
fn multi_dimensional_nested_and_flat_formats() {
    use shale_msgpack::MultiDimensionalArrayFormat;

    let grid = Grid {
        rows: 2,
        cols: 3,
        cells: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
    };

    // Nested (the default): [[1,2,3],[4,5,6]]
    let encoded = serializer().to_vec(&grid).unwrap();
    let mut reader = Reader::new(&encoded);
    assert_eq!(reader.read_array_header().unwrap(), 2);
    assert_eq!(reader.read_array_header().unwrap(), 3);
    let decoded: Grid = serializer().from_slice(&encoded).unwrap();
    assert_eq!(decoded, grid);

    // Flat: [2, 3, 1, 2, 3, 4, 5, 6]
    let options = SerializerOptions {
        multi_dimensional_array_format: MultiDimensionalArrayFormat::Flat,
        ..Default::default()
    };
    let flat = serializer_with(options);
    let encoded = flat.to_vec(&grid).unwrap();
    let mut reader = Reader::new(&encoded);
    assert_eq!(reader.read_array_header().unwrap(), 8);
    assert_eq!(reader.read_uint().unwrap(), 2);
    assert_eq!(reader.read_uint().unwrap(), 3);
    let decoded: Grid = flat.from_slice(&encoded).unwrap();
    assert_eq!(decoded, grid);
}

#[test]
fn ragged_nested_arrays_are_rejected() {
    use shale_msgpack::{OutputBuffer, Writer};

    let mut buffer = OutputBuffer::new();
    {
        let mut writer = Writer::new(&mut buffer);
        writer.write_array_header(2);
        writer.write_array_header(2);
        writer.write_f64(1.0);
        writer.write_f64(2.0);
        writer.write_array_header(1);
        writer.write_f64(3.0);
    }
    let err = serializer()
        .from_slice::<Grid>(&buffer.into_written())
        .unwrap_err();
    assert!(is_tag(&err, |e| matches!(
        e,
        SerializationError::DecodeFormat(_)
    )));
}

#[test]
fn user_converters_take_precedence() {
    use shale_msgpack::{
        Converter, OutputBuffer, SerializationContext, Writer,
    };

    #[derive(Debug, PartialEq)]
    struct UserId(u64);
    impl Shaped for UserId {
        fn shape() -> TypeShape<Self> {
            TypeShape::primitive()
        }
    }

    // With no converter registered, a primitive shape without a built-in
    // entry is a construction error.
    let err = serializer().converter::<UserId>().unwrap_err();
    assert!(is_tag(&err, |e| matches!(
        e,
        SerializationError::ShapeConstruction(_)
    )));

    struct UserIdConverter;

    #[async_trait::async_trait]
    impl Converter<UserId> for UserIdConverter {
        fn write(
            &self,
            writer: &mut Writer<'_>,
            value: &UserId,
            _ctx: &mut SerializationContext,
        ) -> anyhow::Result<()> {
            writer.write_str(&format!("user:{}", value.0));
            Ok(())
        }

        fn read(
            &self,
            reader: &mut Reader<'_>,
            _ctx: &mut SerializationContext,
        ) -> anyhow::Result<UserId> {
            let text = reader.read_str()?;
            let id = text
                .strip_prefix("user:")
                .and_then(|rest| rest.parse().ok())
                .ok_or_else(|| anyhow::anyhow!("malformed user id `{text}`"))?;
            Ok(UserId(id))
        }
    }

    let mut ser = MessagePackSerializer::default();
    ser.register_converter(UserIdConverter);
    let encoded = ser.to_vec(&UserId(17)).unwrap();

    let mut reader = Reader::new(&encoded);
    assert_eq!(reader.read_str().unwrap(), "user:17");

    let decoded: UserId = ser.from_slice(&encoded).unwrap();
    assert_eq!(decoded, UserId(17));

    let mut buffer = OutputBuffer::new();
    Writer::new(&mut buffer).write_str("not-a-user");
    assert!(ser.from_slice::<UserId>(&buffer.into_written()).is_err());
}
