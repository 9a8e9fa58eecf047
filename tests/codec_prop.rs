use std::time::Duration;

use proptest::prelude::*;

use procontroller::controller::report::{
    decode_input_report, encode_indicator, encode_rumble, DecodeError, IndicatorPattern,
    RumbleCommand, MIN_INPUT_REPORT_LEN, RUMBLE_REPORT_LEN,
};
use procontroller::pipeline::features::{derive, BUTTON_FLAGS, FEATURE_COUNT, TIME_DELTA};
use procontroller::pipeline::{FeatureQueue, FeatureVector};

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn rumble_frame_layout(low in any::<u16>(), high in any::<u16>(), duration in any::<u32>()) {
        let command = RumbleCommand::new(low, high, duration);
        let frame = encode_rumble(command);

        prop_assert_eq!(frame.len(), RUMBLE_REPORT_LEN);
        prop_assert_eq!(&frame[5..7], &high.to_le_bytes()[..]);
        prop_assert_eq!(&frame[7..9], &low.to_le_bytes()[..]);
        prop_assert!(frame[9..].iter().all(|b| *b == 0));
        prop_assert_eq!(frame, encode_rumble(command));
    }

    #[test]
    fn indicator_keeps_low_nibble(mask in any::<u8>()) {
        let frame = encode_indicator(IndicatorPattern::new(mask));
        prop_assert_eq!(frame[1], mask & 0x0f);
        prop_assert_eq!(frame.len(), 2);
    }

    #[test]
    fn short_reports_always_fail(bytes in prop::collection::vec(any::<u8>(), 0..MIN_INPUT_REPORT_LEN)) {
        let len = bytes.len();
        prop_assert_eq!(
            decode_input_report(&bytes, Duration::ZERO),
            Err(DecodeError::TooShort { len })
        );
    }

    #[test]
    fn any_long_report_yields_bounded_features(
        bytes in prop::collection::vec(any::<u8>(), MIN_INPUT_REPORT_LEN..64),
        previous_ms in prop::option::of(0u64..10_000),
        now_ms in 0u64..10_000,
    ) {
        let state = decode_input_report(&bytes, Duration::from_millis(now_ms)).unwrap();
        let vector = derive(&state, previous_ms.map(Duration::from_millis));
        let values = vector.values();

        prop_assert_eq!(values.len(), FEATURE_COUNT);
        prop_assert!(values[..BUTTON_FLAGS].iter().all(|v| (0.0..=1.0).contains(v)));
        prop_assert!(vector.button_flags().iter().all(|v| *v == 0.0 || *v == 1.0));
        prop_assert!(values[TIME_DELTA] >= 0.0);
        if previous_ms.is_none() {
            prop_assert_eq!(values[TIME_DELTA], 0.0);
        }
    }

    #[test]
    fn queue_is_bounded_and_ordered(count in 0usize..300) {
        let queue = FeatureQueue::new();
        for i in 0..count {
            let mut values = [0.0; FEATURE_COUNT];
            values[0] = i as f64;
            queue.enqueue(FeatureVector(values));
            prop_assert!(queue.len() <= queue.capacity());
        }

        let drained: Vec<usize> = std::iter::from_fn(|| queue.dequeue())
            .map(|v| v.values()[0] as usize)
            .collect();
        let first = count.saturating_sub(queue.capacity());
        prop_assert_eq!(drained, (first..count).collect::<Vec<_>>());
    }
}
