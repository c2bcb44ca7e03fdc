//! Property tests for fingerprints and identifiers

use datum_core::fingerprint::{fingerprint_reader_with, fingerprint_with, verify};
use datum_core::{DigestAlgorithm, Fingerprint, Identifier};
use proptest::prelude::*;

fn algorithm() -> impl Strategy<Value = DigestAlgorithm> {
    prop_oneof![Just(DigestAlgorithm::Sha256), Just(DigestAlgorithm::Blake3)]
}

proptest! {
    #[test]
    fn fingerprint_verifies_its_own_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..4096), alg in algorithm()) {
        let fp = fingerprint_with(alg, &bytes);
        prop_assert!(verify(&bytes, &fp));
    }

    #[test]
    fn distinct_bytes_have_distinct_fingerprints(
        a in proptest::collection::vec(any::<u8>(), 0..256),
        b in proptest::collection::vec(any::<u8>(), 0..256),
        alg in algorithm(),
    ) {
        prop_assume!(a != b);
        prop_assert_ne!(fingerprint_with(alg, &a), fingerprint_with(alg, &b));
    }

    #[test]
    fn streaming_equals_one_shot(bytes in proptest::collection::vec(any::<u8>(), 0..200_000), alg in algorithm()) {
        let streamed = fingerprint_reader_with(alg, bytes.as_slice()).unwrap();
        prop_assert_eq!(streamed, fingerprint_with(alg, &bytes));
    }

    #[test]
    fn fingerprint_text_form_is_lossless(bytes in proptest::collection::vec(any::<u8>(), 0..64), alg in algorithm()) {
        let fp = fingerprint_with(alg, &bytes);
        let parsed: Fingerprint = fp.to_string().parse().unwrap();
        prop_assert_eq!(parsed, fp);
    }

    #[test]
    fn identifiers_round_trip(
        ns in "[a-z0-9]([a-z0-9.-]{0,20}[a-z0-9])?",
        slug in "[a-z0-9]([a-z0-9-]{0,20}[a-z0-9])?",
    ) {
        let id = Identifier::new(ns.clone(), slug.clone()).unwrap();
        let parsed = Identifier::parse(&id.to_string()).unwrap();
        prop_assert_eq!(parsed.namespace(), ns.as_str());
        prop_assert_eq!(parsed.slug(), slug.as_str());
        prop_assert_eq!(parsed, id);
    }
}
