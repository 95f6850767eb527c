//! Ownership and content tests for the segmented string builder

use proptest::prelude::*;
use shmlog::StringBuilder;

#[derive(Debug, Clone)]
enum Op {
    Copy(Vec<u8>),
    Adopt(Vec<u8>),
    Reference(Vec<u8>),
    Formatted(u32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..48).prop_map(Op::Copy),
        prop::collection::vec(any::<u8>(), 0..48).prop_map(Op::Adopt),
        prop::collection::vec(any::<u8>(), 0..48).prop_map(Op::Reference),
        any::<u32>().prop_map(Op::Formatted),
    ]
}

proptest! {
    /// Content always equals the concatenation of every appended piece,
    /// whatever discipline each piece used
    #[test]
    fn content_is_concatenation(ops in prop::collection::vec(op(), 0..24)) {
        let referenced: Vec<Vec<u8>> = ops
            .iter()
            .map(|op| match op {
                Op::Reference(bytes) => bytes.clone(),
                _ => Vec::new(),
            })
            .collect();

        let mut expected = Vec::new();
        let mut sb = StringBuilder::new();
        for (op, borrowed) in ops.iter().zip(&referenced) {
            match op {
                Op::Copy(bytes) => {
                    sb.append_copy(bytes);
                    expected.extend_from_slice(bytes);
                }
                Op::Adopt(bytes) => {
                    sb.append_adopt(bytes.clone());
                    expected.extend_from_slice(bytes);
                }
                Op::Reference(_) => {
                    sb.append_reference(borrowed.as_slice());
                    expected.extend_from_slice(borrowed);
                }
                Op::Formatted(value) => {
                    sb.append_formatted(format_args!("<{value}>")).unwrap();
                    expected.extend_from_slice(format!("<{value}>").as_bytes());
                }
            }
        }

        prop_assert_eq!(sb.len(), expected.len());
        prop_assert_eq!(sb.to_vec(), expected.clone());
        prop_assert_eq!(sb.bytes().collect::<Vec<_>>(), expected.clone());
        prop_assert_eq!(sb.into_bytes(), expected);
    }

    /// Positions and byte offsets convert back and forth
    #[test]
    fn positions_round_trip(pieces in prop::collection::vec("[a-z]{1,8}", 1..8), pick in any::<prop::sample::Index>()) {
        let mut sb = StringBuilder::new();
        for piece in &pieces {
            sb.append_adopt(piece.clone());
        }
        let index = pick.index(sb.len());
        prop_assert_eq!(sb.offset_of(sb.position_at(index)), index);
    }
}

/// A copied buffer is independent of its source
#[test]
fn test_copy_survives_source_mutation_and_drop() {
    let mut sb = StringBuilder::new();
    {
        let mut source = String::from("volatile");
        sb.append_copy(&source);
        source.clear();
        source.push_str("changed!");
    }
    assert_eq!(sb.to_string(), "volatile");
}

/// Adopted buffers are owned without copying and released with the builder
#[test]
fn test_adopt_moves_buffer() {
    let buffer = b"owned bytes".to_vec();
    let address = buffer.as_ptr();

    let mut sb = StringBuilder::new();
    sb.append_adopt(buffer);
    let bytes = sb.into_bytes();
    assert_eq!(bytes.as_ptr(), address, "Adopted buffer should not be copied");
    assert_eq!(bytes, b"owned bytes");
}

/// Referenced bytes are read in place
#[test]
fn test_reference_reads_in_place() {
    let header = String::from("header:");
    let mut sb = StringBuilder::new();
    sb.append_reference(header.as_str()).append_copy(" body");
    assert_eq!(sb.segment_count(), 2);
    assert_eq!(sb.to_string(), "header: body");
}

/// One builder can pull another's content under each discipline
#[test]
fn test_builder_to_builder_disciplines() {
    let mut source = StringBuilder::new();
    source.append_copy("alpha ").append_adopt(b"beta ".to_vec()).append_copy("gamma");

    let mut copied = StringBuilder::new();
    copied.append_copy_builder(&source);
    assert_eq!(copied.segment_count(), 1, "Copies coalesce into one arena");

    {
        let mut referenced = StringBuilder::new();
        referenced.append_reference_builder(&source);
        assert_eq!(referenced.to_string(), "alpha beta gamma");
    }

    let beta = source.find("beta").unwrap();
    let gamma = source.find("gamma").unwrap();
    let mut range = StringBuilder::new();
    range.append_copy_range(&source, beta, gamma);
    assert_eq!(range.to_string(), "beta ");

    let mut adopted = StringBuilder::new();
    adopted.append_copy("[");
    adopted.append_adopt_builder(source);
    adopted.append_copy("]");
    assert_eq!(adopted.to_string(), "[alpha beta gamma]");
}
