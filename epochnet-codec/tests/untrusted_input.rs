use epochnet_codec::{from_slice_with_limits, to_vec, utils::Bytes, Limits};
use proptest::prelude::*;

fn tight_limits() -> Limits {
    Limits {
        max_message_bytes: 512,
        max_sequence_len: 16,
        max_depth: 4,
    }
}

proptest! {
    #[test]
    fn arbitrary_input_never_panics(input in proptest::collection::vec(any::<u8>(), 0..600)) {
        let _ = from_slice_with_limits::<Vec<Bytes>>(&input, tight_limits());
        let _ = from_slice_with_limits::<Vec<String>>(&input, tight_limits());
        let _ = from_slice_with_limits::<Vec<Vec<u64>>>(&input, tight_limits());
    }

    #[test]
    fn strings_survive_roundtrip(values in proptest::collection::vec(".{0,20}", 0..16)) {
        let bytes = to_vec(&values);
        let decoded: Vec<String> = from_slice_with_limits(&bytes, Limits::default()).unwrap();
        prop_assert_eq!(decoded, values);
    }
}
