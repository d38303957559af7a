mod common;

use common::*;
use shale_msgpack::{format, OutputBuffer, SerializationError, SerializerOptions, Shared, Writer};

fn preserving() -> shale_msgpack::MessagePackSerializer {
    serializer_with(SerializerOptions {
        preserve_references: true,
        ..Default::default()
    })
}

/// Counts occurrences of a byte pattern in the encoded output.
fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .filter(|window| *window == needle)
        .count()
}

#[test]
fn shared_values_are_emitted_once_and_rejoined() {
    let label = Shared::new(String::from("x"));
    let labels = Labels {
        primary: label.clone(),
        secondary: label,
    };

    let ser = preserving();
    let encoded = ser.to_vec(&labels).unwrap();

    // The string literal appears once; the second occurrence is a
    // reference-extension token.
    assert_eq!(count_occurrences(&encoded, &[0xa1, b'x']), 1);
    assert_eq!(
        count_occurrences(&encoded, &[0xd4, format::EXT_REFERENCE as u8]),
        1
    );

    let decoded: Labels = ser.from_slice(&encoded).unwrap();
    assert!(Shared::ptr_eq(&decoded.primary, &decoded.secondary));
    assert_eq!(&**decoded.primary, "x");
}

#[test]
fn without_preservation_shared_values_duplicate() {
    let label = Shared::new(String::from("x"));
    let labels = Labels {
        primary: label.clone(),
        secondary: label,
    };

    let ser = serializer();
    let encoded = ser.to_vec(&labels).unwrap();
    assert_eq!(count_occurrences(&encoded, &[0xa1, b'x']), 2);

    let decoded: Labels = ser.from_slice(&encoded).unwrap();
    assert!(!Shared::ptr_eq(&decoded.primary, &decoded.secondary));
    assert_eq!(&**decoded.primary, "x");
    assert_eq!(&**decoded.secondary, "x");
}

#[test]
fn three_node_chain_encodes_as_nested_maps() {
    let chain = node_chain(3);
    let ser = serializer();
    let encoded = ser.to_vec(&chain).unwrap();

    // Three 2-entry maps, nested through the Next field.
    assert_eq!(count_occurrences(&encoded, &[0x82]), 3);

    let decoded: Node = ser.from_slice(&encoded).unwrap();
    assert_eq!(decoded.value, 1);
    let second = decoded.next.as_ref().unwrap();
    assert_eq!(second.value, 2);
    let third = second.next.as_ref().unwrap();
    assert_eq!(third.value, 3);
    assert!(third.next.is_none());
}

#[test]
fn self_loop_round_trips_with_identity() {
    let root = Shared::<Node>::new_cyclic(|me| Node {
        value: 42,
        next: Some(me.clone()),
    });

    let ser = preserving();
    let encoded = ser.to_vec(&root).unwrap();

    let decoded: Shared<Node> = ser.from_slice(&encoded).unwrap();
    assert_eq!(decoded.value, 42);
    let next = decoded.next.as_ref().unwrap();
    assert!(Shared::ptr_eq(&decoded, next));
}

#[test]
fn cycles_without_preservation_hit_the_depth_limit() {
    let root = Shared::<Node>::new_cyclic(|me| Node {
        value: 1,
        next: Some(me.clone()),
    });

    let err = serializer().to_vec(&root).unwrap_err();
    assert!(SerializationError::is(&err, |e| matches!(
        e,
        SerializationError::DepthExceeded
    )));
}

#[test]
fn diamond_graphs_preserve_sharing() {
    let tail = Shared::new(Node {
        value: 3,
        next: None,
    });
    let left = Shared::new(Node {
        value: 1,
        next: Some(tail.clone()),
    });
    let right = Shared::new(Node {
        value: 2,
        next: Some(tail),
    });
    let roots = vec![left, right];

    let ser = preserving();
    let encoded = ser.to_vec(&roots).unwrap();
    let decoded: Vec<Shared<Node>> = ser.from_slice(&encoded).unwrap();

    let left_tail = decoded[0].next.as_ref().unwrap();
    let right_tail = decoded[1].next.as_ref().unwrap();
    assert!(Shared::ptr_eq(left_tail, right_tail));
    assert_eq!(left_tail.value, 3);
}

#[test]
fn unknown_reference_ids_are_rejected() {
    let mut buffer = OutputBuffer::new();
    {
        let mut writer = Writer::new(&mut buffer);
        // A reference token for id 5 with nothing recorded.
        writer.write_ext(format::EXT_REFERENCE, &[0x05]);
    }
    let err = preserving()
        .from_slice::<Shared<String>>(&buffer.into_written())
        .unwrap_err();
    assert!(SerializationError::is(&err, |e| matches!(
        e,
        SerializationError::NotSupported(_)
    )));
}

#[test]
fn reference_tokens_are_scoped_to_one_operation() {
    let ser = preserving();
    let label = Shared::new(String::from("scoped"));
    let labels = Labels {
        primary: label.clone(),
        secondary: label,
    };

    // Two operations back to back: sequence numbers restart, so both outputs
    // are identical and decode independently.
    let first = ser.to_vec(&labels).unwrap();
    let second = ser.to_vec(&labels).unwrap();
    assert_eq!(first, second);

    let decoded: Labels = ser.from_slice(&second).unwrap();
    assert!(Shared::ptr_eq(&decoded.primary, &decoded.secondary));
}
