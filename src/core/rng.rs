//! Reward Random Number Generator
//!
//! Draws mystery-box and gift rewards. Production rounds seed from a v4
//! UUID; tests pass a fixed seed and get the same rewards every run.

/// Xorshift128+ reward generator.
///
/// # Example
///
/// ```
/// use mtc_core::core::rng::RewardRng;
///
/// let mut rng = RewardRng::new(12345);
/// let reward = rng.next_int_range(10, 200);
/// assert!((10..=200).contains(&reward));
/// ```
#[derive(Clone, Debug)]
pub struct RewardRng {
    state: [u64; 2],
}

impl RewardRng {
    /// Seeded generator. Nearby seeds still give unrelated reward sequences.
    pub fn new(seed: u64) -> Self {
        let mut counter = seed;
        let state = [mix_seed(&mut counter), mix_seed(&mut counter)];
        // All-zero state would only ever yield zeros
        if state == [0, 0] {
            return Self { state: [1, 1] };
        }
        Self { state }
    }

    /// Generator seeded from a random v4 UUID.
    pub fn from_entropy() -> Self {
        let bits = uuid::Uuid::new_v4().as_u128();
        Self::new((bits >> 64) as u64 ^ bits as u64)
    }

    /// Reward in `[min, max]`, both inclusive. Returns `min` if the range
    /// is empty.
    pub fn next_int_range(&mut self, min: u32, max: u32) -> u32 {
        if min >= max {
            return min;
        }
        // Modulo bias is negligible for reward-sized spans
        let span = u64::from(max - min) + 1;
        min + (self.next_u64() % span) as u32
    }

    fn next_u64(&mut self) -> u64 {
        let [a, b] = self.state;
        let out = a.wrapping_add(b);
        let x = a ^ b;
        self.state = [a.rotate_left(24) ^ x ^ (x << 16), x.rotate_left(37)];
        out
    }
}

/// SplitMix64 step.
fn mix_seed(counter: &mut u64) -> u64 {
    *counter = counter.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *counter;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

// =============================================================================
// TESTS
// =============================================================================
