/// Small non-cryptographic generator used to spread protocol timers.
#[derive(Debug, Clone)]
pub(crate) struct Rand {
    state: u64,
}

impl Rand {
    pub(crate) const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub(crate) fn rand_u32(&mut self) -> u32 {
        // sPCG32 from https://www.pcg-random.org/paper.html
        // see also https://nullprogram.com/blog/2017/09/21/
        const M: u64 = 0xbb2efcec3c39611d;
        const A: u64 = 0x7590ef39;

        let s = self.state.wrapping_mul(M).wrapping_add(A);
        self.state = s;

        let shift = 29 - (s >> 61);
        (s >> shift) as u32
    }

    /// Return a value in `low..high`, or `low` if the range is empty.
    pub(crate) fn rand_range(&mut self, low: u32, high: u32) -> u32 {
        if high <= low {
            return low;
        }
        low + self.rand_u32() % (high - low)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_range_bounds() {
        let mut rand = Rand::new(0x1234);
        for _ in 0..1000 {
            let value = rand.rand_range(15_000, 45_000);
            assert!((15_000..45_000).contains(&value));
        }
    }

    #[test]
    fn test_empty_range() {
        let mut rand = Rand::new(1);
        assert_eq!(rand.rand_range(7, 7), 7);
        assert_eq!(rand.rand_range(9, 3), 9);
    }
}
