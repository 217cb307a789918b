use std::fmt::Debug;
use std::hash::{Hash, Hasher};

use crate::fst::Label;

/// ⊕ is a left semiring operation: w ⊗ (x ⊕ y) = (w ⊗ x) ⊕ (w ⊗ y).
pub const LEFT_SEMIRING: u64 = 1 << 0;
/// ⊗ right-distributes over ⊕.
pub const RIGHT_SEMIRING: u64 = 1 << 1;
/// ⊗ is commutative.
pub const COMMUTATIVE: u64 = 1 << 2;
/// x ⊕ x = x.
pub const IDEMPOTENT: u64 = 1 << 3;
/// Idempotent and the natural order is total: x ⊕ y ∈ {x, y}.
pub const PATH: u64 = 1 << 4;

/// Both-sided semiring.
pub const SEMIRING: u64 = LEFT_SEMIRING | RIGHT_SEMIRING;

/// Default convergence / quantization tolerance.
pub const DELTA: f32 = 1.0 / 1024.0;

/// Weight in an algebraic semiring `(W, ⊕, ⊗, 0̄, 1̄)`.
///
/// `zero()` is the ⊕ identity and annihilates ⊗; `one()` is the ⊗ identity.
/// `PROPERTIES` reports the algebraic facts the algorithms are allowed to
/// rely on. `is_member` is false for weights that left the semiring domain
/// (overflow, NaN); algorithms treat a non-member weight as an error signal.
pub trait Semiring: Clone + PartialEq + Debug + 'static {
    const PROPERTIES: u64;

    fn zero() -> Self;
    fn one() -> Self;

    fn plus(&self, rhs: &Self) -> Self;
    fn times(&self, rhs: &Self) -> Self;

    /// Equality at tolerance `delta`; exact for discrete weights.
    fn approx_eq(&self, rhs: &Self, delta: f32) -> bool;

    /// Rounds to the nearest `delta` bucket; identity for discrete weights.
    fn quantize(&self, delta: f32) -> Self;

    /// Content hash, deterministic across runs. Callers comparing hashes
    /// of quantized weights must detect collisions themselves.
    fn weight_hash(&self) -> u64;

    /// Weight of the reversed path. Identity for commutative semirings;
    /// reverses the label sequence for string weights.
    fn reverse(&self) -> Self;

    fn is_member(&self) -> bool {
        true
    }

    fn is_zero(&self) -> bool {
        *self == Self::zero()
    }
}

/// Natural order: `a < b` iff `a ⊕ b = a` and `a ≠ b`.
///
/// A total order only when the semiring has the `PATH` property; callers gate
/// on `IDEMPOTENT`/`PATH` before relying on it.
pub fn natural_less<W: Semiring>(a: &W, b: &W) -> bool {
    a.plus(b) == *a && a != b
}

fn quantize_f32(v: f32, delta: f32) -> f32 {
    if v.is_infinite() || v.is_nan() {
        v
    } else {
        (v / delta + 0.5).floor() * delta
    }
}

fn quantize_f64(v: f64, delta: f64) -> f64 {
    if v.is_infinite() || v.is_nan() {
        v
    } else {
        (v / delta + 0.5).floor() * delta
    }
}

fn approx_eq_f32(a: f32, b: f32, delta: f32) -> bool {
    if a.is_infinite() || b.is_infinite() {
        a == b
    } else {
        (a - b).abs() < delta
    }
}

// -ln(e^-a + e^-b), computed from the smaller argument for stability.
fn log_add_f64(a: f64, b: f64) -> f64 {
    if a == f64::INFINITY {
        return b;
    }
    if b == f64::INFINITY {
        return a;
    }
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    lo - (-(hi - lo)).exp().ln_1p()
}

/// Tropical semiring: (min, +, +∞, 0).
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct TropicalWeight(pub f32);

impl Semiring for TropicalWeight {
    const PROPERTIES: u64 = SEMIRING | COMMUTATIVE | IDEMPOTENT | PATH;

    fn zero() -> Self {
        TropicalWeight(f32::INFINITY)
    }

    fn one() -> Self {
        TropicalWeight(0.0)
    }

    fn plus(&self, rhs: &Self) -> Self {
        if self.0 <= rhs.0 {
            *self
        } else {
            *rhs
        }
    }

    fn times(&self, rhs: &Self) -> Self {
        if self.0 == f32::INFINITY || rhs.0 == f32::INFINITY {
            Self::zero()
        } else {
            TropicalWeight(self.0 + rhs.0)
        }
    }

    fn approx_eq(&self, rhs: &Self, delta: f32) -> bool {
        approx_eq_f32(self.0, rhs.0, delta)
    }

    fn quantize(&self, delta: f32) -> Self {
        TropicalWeight(quantize_f32(self.0, delta))
    }

    fn weight_hash(&self) -> u64 {
        self.0.to_bits() as u64
    }

    fn reverse(&self) -> Self {
        *self
    }

    fn is_member(&self) -> bool {
        !self.0.is_nan() && self.0 != f32::NEG_INFINITY
    }
}

/// Log semiring: (⊕_log, +, +∞, 0) with x ⊕_log y = -ln(e⁻ˣ + e⁻ʸ).
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct LogWeight(pub f32);

impl Semiring for LogWeight {
    const PROPERTIES: u64 = SEMIRING | COMMUTATIVE;

    fn zero() -> Self {
        LogWeight(f32::INFINITY)
    }

    fn one() -> Self {
        LogWeight(0.0)
    }

    fn plus(&self, rhs: &Self) -> Self {
        LogWeight(log_add_f64(self.0 as f64, rhs.0 as f64) as f32)
    }

    fn times(&self, rhs: &Self) -> Self {
        if self.0 == f32::INFINITY || rhs.0 == f32::INFINITY {
            Self::zero()
        } else {
            LogWeight(self.0 + rhs.0)
        }
    }

    fn approx_eq(&self, rhs: &Self, delta: f32) -> bool {
        approx_eq_f32(self.0, rhs.0, delta)
    }

    fn quantize(&self, delta: f32) -> Self {
        LogWeight(quantize_f32(self.0, delta))
    }

    fn weight_hash(&self) -> u64 {
        self.0.to_bits() as u64
    }

    fn reverse(&self) -> Self {
        *self
    }

    fn is_member(&self) -> bool {
        !self.0.is_nan() && self.0 != f32::NEG_INFINITY
    }
}

/// Log semiring over f64, for accumulations where f32 rounding bites.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Log64Weight(pub f64);

impl Semiring for Log64Weight {
    const PROPERTIES: u64 = SEMIRING | COMMUTATIVE;

    fn zero() -> Self {
        Log64Weight(f64::INFINITY)
    }

    fn one() -> Self {
        Log64Weight(0.0)
    }

    fn plus(&self, rhs: &Self) -> Self {
        Log64Weight(log_add_f64(self.0, rhs.0))
    }

    fn times(&self, rhs: &Self) -> Self {
        if self.0 == f64::INFINITY || rhs.0 == f64::INFINITY {
            Self::zero()
        } else {
            Log64Weight(self.0 + rhs.0)
        }
    }

    fn approx_eq(&self, rhs: &Self, delta: f32) -> bool {
        if self.0.is_infinite() || rhs.0.is_infinite() {
            self.0 == rhs.0
        } else {
            (self.0 - rhs.0).abs() < delta as f64
        }
    }

    fn quantize(&self, delta: f32) -> Self {
        Log64Weight(quantize_f64(self.0, delta as f64))
    }

    fn weight_hash(&self) -> u64 {
        self.0.to_bits()
    }

    fn reverse(&self) -> Self {
        *self
    }

    fn is_member(&self) -> bool {
        !self.0.is_nan() && self.0 != f64::NEG_INFINITY
    }
}

/// Probability semiring: (+, ×, 0, 1) over non-negative reals.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct ProbabilityWeight(pub f32);

impl Semiring for ProbabilityWeight {
    const PROPERTIES: u64 = SEMIRING | COMMUTATIVE;

    fn zero() -> Self {
        ProbabilityWeight(0.0)
    }

    fn one() -> Self {
        ProbabilityWeight(1.0)
    }

    fn plus(&self, rhs: &Self) -> Self {
        ProbabilityWeight(self.0 + rhs.0)
    }

    fn times(&self, rhs: &Self) -> Self {
        ProbabilityWeight(self.0 * rhs.0)
    }

    fn approx_eq(&self, rhs: &Self, delta: f32) -> bool {
        approx_eq_f32(self.0, rhs.0, delta)
    }

    fn quantize(&self, delta: f32) -> Self {
        ProbabilityWeight(quantize_f32(self.0, delta))
    }

    fn weight_hash(&self) -> u64 {
        self.0.to_bits() as u64
    }

    fn reverse(&self) -> Self {
        *self
    }

    fn is_member(&self) -> bool {
        !self.0.is_nan() && self.0 >= 0.0 && self.0 != f32::INFINITY
    }
}

/// Boolean semiring: (∨, ∧, false, true).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BooleanWeight(pub bool);

impl Semiring for BooleanWeight {
    const PROPERTIES: u64 = SEMIRING | COMMUTATIVE | IDEMPOTENT | PATH;

    fn zero() -> Self {
        BooleanWeight(false)
    }

    fn one() -> Self {
        BooleanWeight(true)
    }

    fn plus(&self, rhs: &Self) -> Self {
        BooleanWeight(self.0 || rhs.0)
    }

    fn times(&self, rhs: &Self) -> Self {
        BooleanWeight(self.0 && rhs.0)
    }

    fn approx_eq(&self, rhs: &Self, _delta: f32) -> bool {
        self == rhs
    }

    fn quantize(&self, _delta: f32) -> Self {
        *self
    }

    fn weight_hash(&self) -> u64 {
        self.0 as u64
    }

    fn reverse(&self) -> Self {
        *self
    }
}

/// Left string semiring: ⊕ is longest common prefix, ⊗ is concatenation.
/// `Infinity` is 0̄, the empty label sequence is 1̄.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StringWeight {
    Infinity,
    Labels(Vec<Label>),
}

impl StringWeight {
    pub fn from_labels(labels: &[Label]) -> Self {
        StringWeight::Labels(labels.to_vec())
    }
}

impl Semiring for StringWeight {
    const PROPERTIES: u64 = LEFT_SEMIRING | IDEMPOTENT;

    fn zero() -> Self {
        StringWeight::Infinity
    }

    fn one() -> Self {
        StringWeight::Labels(Vec::new())
    }

    fn plus(&self, rhs: &Self) -> Self {
        match (self, rhs) {
            (StringWeight::Infinity, _) => rhs.clone(),
            (_, StringWeight::Infinity) => self.clone(),
            (StringWeight::Labels(a), StringWeight::Labels(b)) => {
                let n = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
                StringWeight::Labels(a[..n].to_vec())
            }
        }
    }

    fn times(&self, rhs: &Self) -> Self {
        match (self, rhs) {
            (StringWeight::Infinity, _) | (_, StringWeight::Infinity) => StringWeight::Infinity,
            (StringWeight::Labels(a), StringWeight::Labels(b)) => {
                let mut r = a.clone();
                r.extend_from_slice(b);
                StringWeight::Labels(r)
            }
        }
    }

    fn approx_eq(&self, rhs: &Self, _delta: f32) -> bool {
        self == rhs
    }

    fn quantize(&self, _delta: f32) -> Self {
        self.clone()
    }

    fn weight_hash(&self) -> u64 {
        let mut h = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut h);
        h.finish()
    }

    fn reverse(&self) -> Self {
        match self {
            StringWeight::Infinity => StringWeight::Infinity,
            StringWeight::Labels(a) => {
                StringWeight::Labels(a.iter().rev().copied().collect())
            }
        }
    }
}

/// Component-wise product of two semirings.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductWeight<W1, W2>(pub W1, pub W2);

impl<W1: Semiring, W2: Semiring> Semiring for ProductWeight<W1, W2> {
    // PATH does not survive products: the componentwise natural order need
    // not be total even when both factors' orders are.
    const PROPERTIES: u64 =
        W1::PROPERTIES & W2::PROPERTIES & (LEFT_SEMIRING | RIGHT_SEMIRING | COMMUTATIVE | IDEMPOTENT);

    fn zero() -> Self {
        ProductWeight(W1::zero(), W2::zero())
    }

    fn one() -> Self {
        ProductWeight(W1::one(), W2::one())
    }

    fn plus(&self, rhs: &Self) -> Self {
        ProductWeight(self.0.plus(&rhs.0), self.1.plus(&rhs.1))
    }

    fn times(&self, rhs: &Self) -> Self {
        ProductWeight(self.0.times(&rhs.0), self.1.times(&rhs.1))
    }

    fn approx_eq(&self, rhs: &Self, delta: f32) -> bool {
        self.0.approx_eq(&rhs.0, delta) && self.1.approx_eq(&rhs.1, delta)
    }

    fn quantize(&self, delta: f32) -> Self {
        ProductWeight(self.0.quantize(delta), self.1.quantize(delta))
    }

    fn weight_hash(&self) -> u64 {
        self.0
            .weight_hash()
            .wrapping_mul(7853)
            .wrapping_add(self.1.weight_hash().wrapping_mul(7867))
    }

    fn reverse(&self) -> Self {
        ProductWeight(self.0.reverse(), self.1.reverse())
    }

    fn is_member(&self) -> bool {
        self.0.is_member() && self.1.is_member()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tropical_identities() {
        let w = TropicalWeight(1.5);
        assert_eq!(w.plus(&TropicalWeight::zero()), w);
        assert_eq!(w.times(&TropicalWeight::one()), w);
        assert_eq!(w.times(&TropicalWeight::zero()), TropicalWeight::zero());
        assert!(TropicalWeight::zero().is_zero());
    }

    #[test]
    fn test_tropical_natural_order() {
        let a = TropicalWeight(1.0);
        let b = TropicalWeight(2.0);
        assert!(natural_less(&a, &b));
        assert!(!natural_less(&b, &a));
        assert!(!natural_less(&a, &a));
    }

    #[test]
    fn test_log_plus_matches_probability() {
        // -ln(e^-1 + e^-2) against the direct computation
        let w = LogWeight(1.0).plus(&LogWeight(2.0));
        let expected = -(((-1.0f64).exp() + (-2.0f64).exp()).ln());
        assert!((w.0 as f64 - expected).abs() < 1e-6);
    }

    #[test]
    fn test_log_zero_is_plus_identity() {
        let w = LogWeight(3.25);
        assert_eq!(w.plus(&LogWeight::zero()), w);
        assert_eq!(LogWeight::zero().plus(&w), w);
    }

    #[test]
    fn test_quantize_buckets() {
        let delta = 0.5;
        assert_eq!(TropicalWeight(1.2).quantize(delta), TropicalWeight(1.0));
        assert_eq!(TropicalWeight(1.3).quantize(delta), TropicalWeight(1.5));
        assert_eq!(TropicalWeight::zero().quantize(delta), TropicalWeight::zero());
    }

    #[test]
    fn test_string_lcp_and_concat() {
        let ab = StringWeight::from_labels(&[1, 2]);
        let ac = StringWeight::from_labels(&[1, 3]);
        assert_eq!(ab.plus(&ac), StringWeight::from_labels(&[1]));
        assert_eq!(
            ab.times(&ac),
            StringWeight::from_labels(&[1, 2, 1, 3])
        );
        assert_eq!(ab.plus(&StringWeight::zero()), ab);
        assert_eq!(ab.times(&StringWeight::zero()), StringWeight::zero());
        assert_eq!(ab.reverse(), StringWeight::from_labels(&[2, 1]));
    }

    #[test]
    fn test_product_weight() {
        type TW = ProductWeight<TropicalWeight, TropicalWeight>;
        let a = ProductWeight(TropicalWeight(1.0), TropicalWeight(4.0));
        let b = ProductWeight(TropicalWeight(2.0), TropicalWeight(3.0));
        assert_eq!(a.plus(&b), ProductWeight(TropicalWeight(1.0), TropicalWeight(3.0)));
        assert_eq!(a.times(&b), ProductWeight(TropicalWeight(3.0), TropicalWeight(7.0)));
        assert_eq!(TW::PROPERTIES & PATH, 0);
        assert_ne!(TW::PROPERTIES & IDEMPOTENT, 0);
    }

    #[test]
    fn test_member_flags() {
        assert!(!TropicalWeight(f32::NAN).is_member());
        assert!(!TropicalWeight(f32::NEG_INFINITY).is_member());
        assert!(TropicalWeight::zero().is_member());
        assert!(!ProbabilityWeight(-1.0).is_member());
    }

    proptest! {
        #[test]
        fn prop_tropical_axioms(a in -100.0f32..100.0, b in -100.0f32..100.0, c in -100.0f32..100.0) {
            let (a, b, c) = (TropicalWeight(a), TropicalWeight(b), TropicalWeight(c));
            // ⊕ associative + commutative, ⊗ associative
            prop_assert_eq!(a.plus(&b).plus(&c), a.plus(&b.plus(&c)));
            prop_assert_eq!(a.plus(&b), b.plus(&a));
            prop_assert!(a.times(&b).times(&c).approx_eq(&a.times(&b.times(&c)), DELTA));
            // idempotence and distributivity
            prop_assert_eq!(a.plus(&a), a);
            prop_assert!(a.times(&b.plus(&c)).approx_eq(&a.times(&b).plus(&a.times(&c)), DELTA));
        }

        #[test]
        fn prop_log_axioms(a in -20.0f32..20.0, b in -20.0f32..20.0, c in -20.0f32..20.0) {
            let (a, b, c) = (LogWeight(a), LogWeight(b), LogWeight(c));
            prop_assert!(a.plus(&b).plus(&c).approx_eq(&a.plus(&b.plus(&c)), 1e-3));
            prop_assert!(a.plus(&b).approx_eq(&b.plus(&a), 1e-4));
            prop_assert!(a.times(&b.plus(&c)).approx_eq(&a.times(&b).plus(&a.times(&c)), 1e-3));
        }

        #[test]
        fn prop_string_idempotent_prefix(a in proptest::collection::vec(1u32..20, 0..6),
                                         b in proptest::collection::vec(1u32..20, 0..6)) {
            let (wa, wb) = (StringWeight::Labels(a), StringWeight::Labels(b));
            prop_assert_eq!(wa.plus(&wa.clone()), wa.clone());
            // lcp is a prefix of both operands
            if let (StringWeight::Labels(p), StringWeight::Labels(x)) = (wa.plus(&wb), wa.clone()) {
                prop_assert!(x.starts_with(&p));
            }
        }
    }
}
