/*++

Licensed under the Apache-2.0 license.

File Name:

    comparator.rs

Abstract:

    File contains the per-bit password comparator bank of the JTAG lock.

--*/

//! The lock checks a password with 30 independent one-bit comparators that
//! are all evaluated on every clock cycle. The hardware names this bank a
//! "comparison window" and generates it with a loop, which reads as if one
//! bit were checked per cycle; the synthesized logic is fully parallel and
//! that is what is modelled here.
//!
//! Only 30 of the 32 register bits are wired to a comparator. The two
//! unchecked bits never influence the result.

/// Number of comparators in the bank.
pub const COMPARATOR_COUNT: usize = 30;

/// Width of the password registers.
pub const REGISTER_BITS: u32 = 32;

/// How comparator `i` is wired to the registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    /// Comparator `i` checks bit `31 - i`: bits 31..2 are checked, 1..0 are not.
    /// Used against a key packed from ASCII.
    MsbFirst,

    /// Comparator `i` checks bit `i`: bits 0..29 are checked, 31..30 are not.
    /// Used against a firmware-written reference.
    LsbFirst,
}

impl BitOrder {
    /// Register bit checked by comparator `index`.
    pub fn bit_for(&self, index: usize) -> u32 {
        assert!(index < COMPARATOR_COUNT, "comparator {index} out of range");
        match self {
            BitOrder::MsbFirst => REGISTER_BITS - 1 - index as u32,
            BitOrder::LsbFirst => index as u32,
        }
    }
}

/// A single XNOR between one presented bit and one reference bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitComparator {
    index: usize,
    bit: u32,
}

impl BitComparator {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Register bit this comparator is wired to.
    pub fn bit(&self) -> u32 {
        self.bit
    }

    pub fn equal(&self, presented: u32, reference: u32) -> bool {
        ((presented ^ reference) >> self.bit) & 1 == 0
    }
}

/// Bank of [`COMPARATOR_COUNT`] comparators sharing one wiring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSerialComparator {
    order: BitOrder,
    comparators: [BitComparator; COMPARATOR_COUNT],
}

impl BitSerialComparator {
    pub fn new(order: BitOrder) -> Self {
        Self {
            order,
            comparators: std::array::from_fn(|index| BitComparator {
                index,
                bit: order.bit_for(index),
            }),
        }
    }

    pub fn order(&self) -> BitOrder {
        self.order
    }

    pub fn comparators(&self) -> &[BitComparator; COMPARATOR_COUNT] {
        &self.comparators
    }

    /// Mask of the register bits that reach a comparator.
    pub fn compared_mask(&self) -> u32 {
        self.comparators.iter().fold(0, |mask, c| mask | (1 << c.bit))
    }

    /// Evaluates every comparator against the current register contents.
    pub fn compare(&self, presented: u32, reference: u32) -> Comparison {
        Comparison {
            equal: self.comparators.map(|c| c.equal(presented, reference)),
        }
    }
}

/// Outputs of one evaluation of the comparator bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    equal: [bool; COMPARATOR_COUNT],
}

impl Comparison {
    /// AND of all per-bit equalities.
    pub fn is_match(&self) -> bool {
        self.equal.iter().all(|&eq| eq)
    }

    /// Output of comparator `index`.
    pub fn equal_at(&self, index: usize) -> bool {
        self.equal[index]
    }

    /// Indices of the comparators that see a difference.
    pub fn mismatches(&self) -> impl Iterator<Item = usize> + '_ {
        self.equal
            .iter()
            .enumerate()
            .filter_map(|(index, &eq)| (!eq).then_some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_wiring() {
        let msb = BitSerialComparator::new(BitOrder::MsbFirst);
        assert_eq!(msb.comparators()[0].bit(), 31);
        assert_eq!(msb.comparators()[29].bit(), 2);
        assert_eq!(msb.compared_mask(), 0xffff_fffc);

        let lsb = BitSerialComparator::new(BitOrder::LsbFirst);
        assert_eq!(lsb.comparators()[0].bit(), 0);
        assert_eq!(lsb.comparators()[29].bit(), 29);
        assert_eq!(lsb.compared_mask(), 0x3fff_ffff);
    }

    #[test]
    fn test_unchecked_bits_never_matter() {
        let reference = 0x7061_7373;
        let msb = BitSerialComparator::new(BitOrder::MsbFirst);
        for low in 0..4 {
            assert!(msb.compare((reference & !0b11) | low, reference).is_match());
        }
        let lsb = BitSerialComparator::new(BitOrder::LsbFirst);
        for high in 0..4u32 {
            assert!(lsb
                .compare((reference & 0x3fff_ffff) | (high << 30), reference)
                .is_match());
        }
    }

    #[test]
    fn test_match_is_masked_equality() {
        let mut rng = StdRng::seed_from_u64(0x6a74_6167);
        for order in [BitOrder::MsbFirst, BitOrder::LsbFirst] {
            let bank = BitSerialComparator::new(order);
            let mask = bank.compared_mask();
            for _ in 0..10_000 {
                let presented: u32 = rng.gen();
                // Bias towards near-misses so both outcomes are exercised.
                let reference = if rng.gen_bool(0.5) {
                    presented ^ (1 << rng.gen_range(0..32))
                } else {
                    rng.gen()
                };
                assert_eq!(
                    bank.compare(presented, reference).is_match(),
                    (presented & mask) == (reference & mask)
                );
            }
        }
    }

    #[test]
    fn test_single_bit_flip_is_observable() {
        let reference = 0x7061_7373;
        for order in [BitOrder::MsbFirst, BitOrder::LsbFirst] {
            let bank = BitSerialComparator::new(order);
            for bit in 0..REGISTER_BITS {
                let result = bank.compare(reference ^ (1 << bit), reference);
                let wired = bank.comparators().iter().find(|c| c.bit() == bit);
                match wired {
                    Some(c) => {
                        assert!(!result.is_match());
                        assert_eq!(result.mismatches().collect::<Vec<_>>(), [c.index()]);
                        assert!(!result.equal_at(c.index()));
                    }
                    None => assert!(result.is_match()),
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "comparator 30 out of range")]
    fn test_bit_for_out_of_range() {
        BitOrder::LsbFirst.bit_for(COMPARATOR_COUNT);
    }
}
