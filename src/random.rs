use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

/// All random draws for one run come from here. The generator is seeded
/// once, from wall-clock seconds; pseudonyms only need to be unlinkable to
/// the original values by eye, not cryptographically.
pub struct RandomSource {
    rng: StdRng,
}

impl RandomSource {
    pub fn from_clock() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::with_seed(seconds)
    }

    pub fn with_seed(seed: u64) -> Self {
        RandomSource {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform id in `[min, max)`. Used for uids, gids and pids alike;
    /// callers only ask when the kind is enabled, which guarantees
    /// `min < max`.
    pub fn id_in_range(&mut self, min: u32, max: u32) -> u32 {
        self.rng.random_range(min..max)
    }

    /// The per-run timestamp shift, uniform in `[0, max)`.
    pub fn time_shift(&mut self, max: u32) -> u32 {
        self.rng.random_range(0..max)
    }

    /// Overwrites `out` with something that reads like a path fragment:
    /// lowercase runs, occasional capitalized components, a '/' every few
    /// characters but never doubled, never leading, and never in the last
    /// two positions.
    ///
    /// Quirk: at position 0 the "previous byte" check reads whatever
    /// already sits in `out[0]`, i.e. the first byte of the text being
    /// replaced, so the case of the first letter can depend on the input.
    pub fn path_suffix(&mut self, out: &mut [u8]) {
        let n = out.len();
        for i in 0..n {
            let u: f64 = self.rng.random();
            let b: u8 = self.rng.random();
            let prev = if i == 0 { out[0] } else { out[i - 1] };
            out[i] = if u > 0.80 && i != 0 && i + 2 < n && prev != b'/' {
                b'/'
            } else if u > 0.35 && prev < b'Z' {
                b'A' + b % 26
            } else {
                b'a' + b % 26
            };
        }
    }

    /// Fills `out` with a random internet address of the same width.
    /// The first byte stays inside [60, 200] and the last byte avoids 0 and
    /// 255, so the result never looks like a reserved, multicast or
    /// broadcast address at a glance.
    pub fn address(&mut self, out: &mut [u8]) {
        let n = out.len();
        for i in 0..n {
            loop {
                let c: u8 = self.rng.random();
                if i == 0 && !(60..=200).contains(&c) {
                    continue;
                }
                if i == n - 1 && (c == 0 || c == 255) {
                    continue;
                }
                out[i] = c;
                break;
            }
        }
    }
}
