use data_contracts::labels::{AgeLabel, GenderLabel, MaskLabel, MultiLabel, NUM_CLASSES};
use proptest::prelude::*;
use std::collections::HashSet;

#[test]
fn all_combinations_round_trip() {
    let mut seen = HashSet::new();
    for mask in MaskLabel::ALL {
        for gender in GenderLabel::ALL {
            for age in AgeLabel::ALL {
                let label = MultiLabel::new(mask, gender, age);
                let id = label.encode();
                assert!((id as usize) < NUM_CLASSES);
                assert_eq!(MultiLabel::decode(id), Some(label));
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
    }
    assert_eq!(seen.len(), NUM_CLASSES);
}

#[test]
fn all_is_ordered_by_id() {
    let ids: Vec<u8> = MultiLabel::all().map(MultiLabel::encode).collect();
    assert_eq!(ids, (0..NUM_CLASSES as u8).collect::<Vec<_>>());
}

proptest! {
    #[test]
    fn decode_then_encode_is_identity(id in 0u8..18) {
        let label = MultiLabel::decode(id).expect("id in range");
        prop_assert_eq!(label.encode(), id);
        let [m, g, a] = label.indices();
        prop_assert_eq!(MultiLabel::from_indices(m, g, a).expect("indices"), label);
    }
}
