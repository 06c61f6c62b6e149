use proptest::prelude::*;
use s4t_crypto::Envelope;

proptest! {
    /// Any envelope survives the double base64 encoding.
    #[test]
    fn roundtrip_envelope(
        wrapped_key in prop::collection::vec(any::<u8>(), 0..512),
        ciphertext in prop::collection::vec(any::<u8>(), 0..4096),
        tag in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let envelope = Envelope { wrapped_key, ciphertext, tag };
        let token = envelope.encode();

        prop_assert!(token.as_str().bytes().all(|b| b.is_ascii_graphic()));
        prop_assert_eq!(Envelope::decode(token.as_str()).unwrap(), envelope);
    }

    /// Arbitrary text never panics the decoder.
    #[test]
    fn decode_arbitrary_text(text in ".{0,256}") {
        let _ = Envelope::decode(&text);
    }
}
