//! Sharder implementation.

/// Size of the bucketing space. Traffic allocation ranges end at most at this value.
pub const MAX_TRAFFIC_VALUE: u32 = 10_000;

const HASH_SEED: u32 = 1;

/// Hash function used for bucketing.
pub trait Sharder {
    /// 32-bit hash of `input`.
    fn hash(&self, input: impl AsRef<[u8]>) -> u32;

    /// Bucket value of `input` in `[0, MAX_TRAFFIC_VALUE)`.
    fn bucket_value(&self, input: impl AsRef<[u8]>) -> u32 {
        bucket_value(self.hash(input))
    }
}

/// MurmurHash3 x86_32 with seed 1. Every SDK of the family buckets with this exact function,
/// so a user lands in the same bucket regardless of the SDK evaluating it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Murmur3Sharder;

impl Sharder for Murmur3Sharder {
    fn hash(&self, input: impl AsRef<[u8]>) -> u32 {
        let mut bytes = input.as_ref();
        // Reading from a byte slice never fails.
        murmur3::murmur3_32(&mut bytes, HASH_SEED).unwrap()
    }
}

/// `floor(hash * MAX_TRAFFIC_VALUE / 2^32)`, computed exactly in integers.
pub fn bucket_value(hash: u32) -> u32 {
    ((u64::from(hash) * u64::from(MAX_TRAFFIC_VALUE)) >> 32) as u32
}

#[cfg(test)]
mod tests {
    use super::{bucket_value, Murmur3Sharder, Sharder, MAX_TRAFFIC_VALUE};

    #[test]
    fn cross_sdk_golden_bucket_values() {
        let experiment_id = "1886780721";
        let cases = [
            ("ppid1", experiment_id, 5254),
            ("ppid2", experiment_id, 4299),
            ("ppid2", "1886780722", 2434),
            ("ppid3", experiment_id, 5439),
            (
                "a very very very very very very very very very very very very very very very long ppd string",
                experiment_id,
                6128,
            ),
        ];

        for (user_id, entity_id, expected) in cases {
            assert_eq!(
                Murmur3Sharder.bucket_value(format!("{user_id}{entity_id}")),
                expected,
                "{user_id}{entity_id}"
            );
        }
    }

    #[test]
    fn bucket_value_bounds() {
        assert_eq!(bucket_value(0), 0);
        assert_eq!(bucket_value(u32::MAX), MAX_TRAFFIC_VALUE - 1);
        assert_eq!(bucket_value(1 << 31), MAX_TRAFFIC_VALUE / 2);
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(Murmur3Sharder.hash(""), Murmur3Sharder.hash(b""));
        assert_eq!(
            Murmur3Sharder.hash("ppid11886780721"),
            Murmur3Sharder.hash("ppid11886780721".as_bytes())
        );
        // Reference value of MurmurHash3 x86_32 for an empty input with seed 1.
        assert_eq!(Murmur3Sharder.hash(""), 0x514E_28B7);
    }
}
