//! Property tests for the storage key codec.

use proptest::prelude::*;
use tollgate_storage::StorageKey;

fn segment_strategy() -> impl Strategy<Value = String> {
    // Heavy on the two special characters so escaping actually gets hit.
    proptest::collection::vec(
        prop_oneof![
            Just('\\'),
            Just('\u{1f}'),
            proptest::char::range('a', 'z'),
            proptest::char::range('0', '9'),
            Just(':'),
        ],
        1..24,
    )
    .prop_map(|chars| chars.into_iter().collect::<String>())
    .prop_filter("segments must not be whitespace-only", |s| {
        !s.trim().is_empty()
    })
}

proptest! {
    #[test]
    fn round_trip(segments in proptest::collection::vec(segment_strategy(), 1..6)) {
        let key = StorageKey::new(segments.clone()).unwrap();
        let decoded = StorageKey::decode(&key.encode()).unwrap();
        prop_assert_eq!(decoded.segments(), segments.as_slice());
    }

    #[test]
    fn encoding_is_injective(
        a in proptest::collection::vec(segment_strategy(), 1..5),
        b in proptest::collection::vec(segment_strategy(), 1..5),
    ) {
        let ka = StorageKey::new(a.clone()).unwrap();
        let kb = StorageKey::new(b.clone()).unwrap();
        if a != b {
            prop_assert_ne!(ka.encode(), kb.encode());
        } else {
            prop_assert_eq!(ka.encode(), kb.encode());
        }
    }
}
