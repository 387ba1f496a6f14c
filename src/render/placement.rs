use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One random placement decision for a face instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Horizontal translation in normalized device coordinates, `[-1, 1)`
    pub tx: f32,
    /// Vertical translation in normalized device coordinates (y up), `[-1, 1)`
    pub ty: f32,
    /// Signed rotation as a fraction of a full turn
    pub turns: f32,
}

/// Seeded pseudo-random stream driving face placement.
///
/// Identical seed bytes always produce the identical sequence of draws for the identical
/// sequence of calls.
pub struct PlacementRng {
    rng: StdRng,
}

impl PlacementRng {
    pub fn from_seed_bytes(seed: &[u8]) -> Self {
        Self {
            rng: StdRng::from_seed(derive_seed(seed)),
        }
    }

    /// Uniform float in `[0, 1)`.
    pub fn next_uniform(&mut self) -> f32 {
        self.rng.random::<f32>()
    }

    /// Uniform integer in `[0, n)`. Returns 0 when `n` is 0.
    pub fn next_int(&mut self, n: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        self.rng.random_range(0..n)
    }

    /// Draws the four values of one instance in their fixed order: x, y, rotation, sign.
    pub fn next_placement(&mut self, max_rotation: f32) -> Placement {
        let tx = self.next_uniform() * 2.0 - 1.0;
        let ty = self.next_uniform() * 2.0 - 1.0;
        let fraction = self.next_uniform() * max_rotation;
        let sign = if self.next_int(2) == 0 { -1.0 } else { 1.0 };

        Placement {
            tx,
            ty,
            turns: fraction * sign,
        }
    }
}

/// Folds arbitrary seed bytes into a 32 byte generator seed.
///
/// Every step on a lane is a bijection, so two inputs that differ in any byte end up with
/// different seeds.
fn derive_seed(bytes: &[u8]) -> [u8; 32] {
    let mut lanes: [u64; 4] = [
        0x243F_6A88_85A3_08D3,
        0x1319_8A2E_0370_7344,
        0xA409_3822_299F_31D0,
        0x082E_FA98_EC4E_6C89,
    ];

    for (i, &b) in bytes.iter().enumerate() {
        let lane = &mut lanes[i % 4];
        *lane ^= b as u64;
        *lane = lane.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(29);
    }

    let mut seed = [0u8; 32];
    for (i, lane) in lanes.iter().enumerate() {
        let mixed = splitmix64(lane ^ bytes.len() as u64);
        seed[i * 8..(i + 1) * 8].copy_from_slice(&mixed.to_le_bytes());
    }
    seed
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
