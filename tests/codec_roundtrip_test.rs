use proptest::prelude::*;
use serde_json::Number;

use treestream::streaming::protocol::{decode, encode, Chunk, MAX_NESTING};
use treestream::{EncodeError, Node, PlaceholderId, Props, Scalar};

fn scalar() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        Just(Scalar::Null),
        any::<bool>().prop_map(Scalar::Bool),
        any::<i64>().prop_map(|n| Scalar::Number(n.into())),
        any::<u64>().prop_map(|n| Scalar::Number(n.into())),
        any::<f64>().prop_filter_map("finite", |f| Number::from_f64(f).map(Scalar::Number)),
        ".*".prop_map(Scalar::String),
    ]
}

fn tree() -> impl Strategy<Value = Node> {
    let leaf = prop_oneof![
        scalar().prop_map(Node::Leaf),
        any::<u32>().prop_map(|n| Node::placeholder(PlaceholderId::new(u64::from(n)))),
    ];
    leaf.prop_recursive(8, 96, 6, |inner| {
        let props = prop::collection::btree_map("[a-z][a-zA-Z0-9_-]{0,7}", inner.clone(), 0..4);
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Node::Sequence),
            ("[a-z][a-z0-9]{0,5}", props.clone(), inner)
                .prop_map(|(tag, props, children)| Node::element(tag, props, children)),
            ("[A-Z][A-Za-z]{0,8}", props).prop_map(|(name, props): (String, Props)| Node::lazy(name, props)),
        ]
    })
}

proptest! {
    #[test]
    fn prop_decode_inverts_encode(node in tree()) {
        let text = encode(&node).unwrap();
        prop_assert!(!text.contains('\n'));
        prop_assert_eq!(decode(&text).unwrap(), node);
    }

    #[test]
    fn prop_chunk_record_roundtrip(node in tree(), seq in any::<u32>()) {
        let chunk = Chunk::resolved(PlaceholderId::new(u64::from(seq)), node);
        let record = chunk.encode().unwrap();
        prop_assert_eq!(record.last(), Some(&b'\n'));
        prop_assert_eq!(Chunk::decode(&record[..record.len() - 1]).unwrap(), chunk);
    }

    #[test]
    fn prop_deep_chains_roundtrip_up_to_limit(depth in 1..=MAX_NESTING + 40, tag in "[a-z]{1,4}") {
        // Alternate sequences and elements; an element nests its props object too
        let mut node = Node::text("leaf");
        let mut wrappers = 0;
        while wrappers < depth {
            node = if wrappers % 2 == 0 {
                Node::Sequence(vec![node])
            } else {
                Node::element(tag.clone(), Props::new(), node)
            };
            wrappers += 1;
        }
        let nesting = nesting_of(&node);

        match encode(&node) {
            Ok(text) => {
                prop_assert!(nesting <= MAX_NESTING);
                prop_assert_eq!(decode(&text).unwrap(), node);
            }
            Err(EncodeError::TooDeep { max }) => {
                prop_assert_eq!(max, MAX_NESTING);
                prop_assert!(nesting > MAX_NESTING);
            }
            Err(other) => prop_assert!(false, "unexpected error {}", other),
        }
    }
}

/// JSON container nesting of an encoded tree
fn nesting_of(node: &Node) -> usize {
    match node {
        Node::Leaf(_) => 0,
        Node::Sequence(items) => 1 + items.iter().map(nesting_of).max().unwrap_or(0),
        Node::Element { props, children, .. } => {
            let props_depth = 1 + props.values().map(nesting_of).max().unwrap_or(0);
            1 + props_depth.max(nesting_of(children))
        }
        Node::Placeholder { .. } => 1,
        Node::LazyRef { props, .. } => 2 + props.values().map(nesting_of).max().unwrap_or(0),
        Node::ComponentRef { .. } => 0,
    }
}
