//! Property-based tests for rate splitting, scheduling periods and STOMP
//! frame decoding.

use bytes::BytesMut;
use proptest::prelude::*;
use rsload::scheduler::period_for;
use rsload::{Command, Limits, Message, decode_frame, distribute_rate, encode_frame};
use std::time::Duration;

fn header_text_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just(':'),
            Just('\\'),
            Just('\n'),
            Just('\r'),
            prop::char::range('a', 'z'),
        ],
        1..20,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

proptest! {
    #[test]
    fn test_distribute_rate_sums_to_total(total in 0u32..1_000_000, connections in 1usize..500) {
        let shares = distribute_rate(total, connections);
        prop_assert_eq!(shares.len(), connections);
        prop_assert_eq!(shares.iter().map(|&s| u64::from(s)).sum::<u64>(), u64::from(total));
    }

    #[test]
    fn test_distribute_rate_is_fair(total in 0u32..1_000_000, connections in 1usize..500) {
        let shares = distribute_rate(total, connections);
        let max = *shares.iter().max().unwrap();
        let min = *shares.iter().min().unwrap();
        prop_assert!(max - min <= 1);
        prop_assert!(shares.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_period_never_exceeds_rate(rate in 1u32..=u32::MAX) {
        let period = period_for(rate).unwrap();
        prop_assert!(period > Duration::ZERO);
        if rate <= 1_000_000_000 {
            prop_assert!(period * rate <= Duration::from_secs(1));
        } else {
            prop_assert_eq!(period, Duration::from_nanos(1));
        }
    }

    #[test]
    fn test_decode_arbitrary_bytes_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = decode_frame(&data, &Limits::default());
    }

    #[test]
    fn test_any_content_length_is_bounded(
        len in any::<u64>(),
        body in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let limits = Limits::default();
        let mut raw = format!("SEND\ndestination:/x\ncontent-length:{len}\n\n").into_bytes();
        let head = raw.len();
        raw.extend_from_slice(&body);
        raw.push(0);

        match decode_frame(&raw, &limits) {
            Ok(Some((message, consumed))) => {
                prop_assert_eq!(message.body.len() as u64, len);
                prop_assert!(consumed <= raw.len());
            }
            Ok(None) => prop_assert!(len > body.len() as u64),
            Err(_) => prop_assert!(
                len as u128 + head as u128 + 1 > limits.max_frame_size as u128
                    || len as usize != body.len()
            ),
        }
    }

    #[test]
    fn test_escaped_headers_survive_framing(
        name in header_text_strategy(),
        value in header_text_strategy(),
        body in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let message = Message::new(Command::Message)
            .with_header(name.clone(), value.clone())
            .with_body(body.clone());
        let mut buf = BytesMut::new();
        encode_frame(&message, &mut buf);

        let (decoded, consumed) = decode_frame(&buf, &Limits::default()).unwrap().unwrap();
        prop_assert_eq!(consumed, buf.len());
        prop_assert_eq!(decoded.header(&name), Some(value.as_str()));
        prop_assert_eq!(&decoded.body[..], &body[..]);
    }

    #[test]
    fn test_truncated_frame_needs_more_bytes(
        body in prop::collection::vec(any::<u8>(), 1..128),
        cut in 1usize..64,
    ) {
        let message = Message::send("/app/x", body);
        let mut buf = BytesMut::new();
        encode_frame(&message, &mut buf);
        let cut = cut.min(buf.len() - 1);
        let partial = &buf[..buf.len() - cut];
        prop_assert!(decode_frame(partial, &Limits::default()).unwrap().is_none());
    }
}
