//! Padding shaper (spec.md §4.E): chooses a per-`DATA`-record padding length
//! from the session's configured `max_padding` bound, so small control
//! packets aren't forced to a fixed size.

use rand::Rng;

/// Padding is never zero for a `DATA` record, and never exceeds 32 bytes
/// below `max_padding`.
const MIN_PADDING_CAP: u16 = 32;

#[derive(Debug, Clone, Copy)]
pub struct PaddingShaper {
    max_padding: u16,
}

impl PaddingShaper {
    pub fn new(max_padding: u16) -> Self {
        Self { max_padding }
    }

    /// Chooses a padding length for a record carrying `payload_len` bytes of
    /// plaintext, per the two-stage draw in spec.md §4.E.
    pub fn choose(&self, payload_len: usize) -> u32 {
        let mut rng = rand::thread_rng();

        let min_bound = MIN_PADDING_CAP.min(self.max_padding) as u32;
        let min_padding = 1 + rng.gen_range(0..=min_bound);

        if self.max_padding as u32 > min_padding {
            let extra_bound = (self.max_padding as u32 - min_padding).min(255 + payload_len as u32);
            let extra = rng.gen_range(0..=extra_bound);
            min_padding + extra
        } else {
            min_padding
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_is_never_zero() {
        let shaper = PaddingShaper::new(128);
        for payload_len in [0, 1, 64, 4096] {
            for _ in 0..200 {
                assert!(shaper.choose(payload_len) >= 1);
            }
        }
    }

    #[test]
    fn padding_respects_small_max() {
        // max_padding=0 still needs the `1 + uniform(0, min(32, 0))` draw,
        // i.e. always exactly 1.
        let shaper = PaddingShaper::new(0);
        for _ in 0..50 {
            assert_eq!(shaper.choose(10), 1);
        }
    }

    #[test]
    fn padding_is_payload_sensitive_when_room_allows() {
        let shaper = PaddingShaper::new(u16::MAX);
        let small: Vec<_> = (0..200).map(|_| shaper.choose(0)).collect();
        let large: Vec<_> = (0..200).map(|_| shaper.choose(4096)).collect();
        // Larger payloads allow a wider extra-padding draw; the observed
        // maximum should reflect that (not a strict proof, but catches a
        // shaper that ignores payload_len entirely).
        assert!(large.iter().max() >= small.iter().max());
    }
}
