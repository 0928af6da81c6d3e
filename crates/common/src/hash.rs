//! Python hash values and the hashing scheme for the numeric tower.
//!
//! Numbers that compare equal must hash equal, so integers and floats share
//! the CPython reduction modulo the Mersenne prime `2**61 - 1`.

use malachite_bigint::BigInt;
use num_traits::ToPrimitive;
use siphasher::sip::SipHasher24;
use std::hash::{Hash, Hasher};

pub type PyHash = i64;
pub type PyUHash = u64;

/// A PyHash value of -1 is reserved for signalling errors in the C API, so
/// objects that would naturally hash to it report -2 instead.
pub const SENTINEL: PyHash = -1;

/// Prime multiplier used in string and various other hashes.
pub const MULTIPLIER: PyHash = 1_000_003;
/// Numeric hashes are equivalent to the mathematical value modulo this prime.
pub const MODULUS: PyUHash = (1 << BITS) - 1;
pub const BITS: usize = 61;

pub const INF: PyHash = 314_159;
pub const NAN: PyHash = 0;

#[inline]
pub const fn fix_sentinel(x: PyHash) -> PyHash {
    if x == SENTINEL { -2 } else { x }
}

/// Process-wide key material for keyed hashes (strings, bytes).
#[derive(Clone, Copy, Debug)]
pub struct HashSecret {
    k0: u64,
    k1: u64,
}

impl HashSecret {
    pub const fn new(seed: u32) -> Self {
        // splitmix-style expansion of the 32-bit seed
        let mut x = seed as u64;
        x = x.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        let k0 = x ^ (x >> 30);
        x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let k1 = x ^ (x >> 27);
        Self { k0, k1 }
    }

    pub fn hash_bytes(&self, value: &[u8]) -> PyHash {
        if value.is_empty() {
            return 0;
        }
        let mut hasher = SipHasher24::new_with_keys(self.k0, self.k1);
        value.hash(&mut hasher);
        fix_sentinel(hasher.finish() as PyHash)
    }

    #[inline]
    pub fn hash_str(&self, value: &str) -> PyHash {
        self.hash_bytes(value.as_bytes())
    }
}

impl Default for HashSecret {
    fn default() -> Self {
        Self::new(0)
    }
}

#[inline]
pub fn hash_pointer(value: usize) -> PyHash {
    // bottom bits are likely zero from alignment, rotate them away
    let hash = (value >> 4) | (value << (8 * std::mem::size_of::<usize>() - 4));
    fix_sentinel(hash as PyHash)
}

pub fn hash_float(value: f64) -> Option<PyHash> {
    // cpython _Py_HashDouble
    if !value.is_finite() {
        return if value.is_infinite() {
            Some(if value > 0.0 { INF } else { -INF })
        } else {
            None
        };
    }

    let frexp = {
        if 0. == value {
            (value, 0)
        } else {
            let bits = value.to_bits();
            let exponent: i32 = ((bits >> 52) & 0x7ff) as i32 - 1022;
            let mantissa_bits = bits & (0x000f_ffff_ffff_ffff) | (1022 << 52);
            (f64::from_bits(mantissa_bits), exponent)
        }
    };
    let (mut m, mut e) = frexp;

    let mut x: PyUHash = 0;
    while m != 0.0 {
        x = ((x << 28) & MODULUS) | (x >> (BITS - 28));
        m *= 268_435_456.0; // 2**28
        e -= 28;
        let y = m as PyUHash; // pull out integer part
        m -= y as f64;
        x += y;
        if x >= MODULUS {
            x -= MODULUS;
        }
    }

    // adjust for the exponent; first reduce it modulo BITS
    const BITS32: i32 = BITS as i32;
    e = if e >= 0 {
        e % BITS32
    } else {
        BITS32 - 1 - ((-1 - e) % BITS32)
    };
    x = ((x << e) & MODULUS) | (x >> (BITS32 - e));

    let x = x as PyHash;
    Some(fix_sentinel(if value.is_sign_negative() { -x } else { x }))
}

pub fn hash_bigint(value: &BigInt) -> PyHash {
    let ret = match value.to_i64() {
        Some(i) => mod_int(i),
        None => (value % BigInt::from(MODULUS))
            .to_i64()
            .unwrap_or_else(|| unreachable!()),
    };
    fix_sentinel(ret)
}

#[inline]
pub fn hash_usize(data: usize) -> PyHash {
    fix_sentinel(mod_int(data as i64))
}

#[inline(always)]
pub const fn mod_int(value: i64) -> PyHash {
    value % MODULUS as i64
}

/// Combine the hashes of the items of an iterable, in order.
/// cpython tuple_hash (xxPrime-based in 3.8+, this keeps the classic FNV-style mix).
pub fn hash_iter<'a, I: IntoIterator<Item = &'a PyHash>>(iter: I) -> PyHash {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for element in iter {
        let item_hash = *element;
        item_hash.hash(&mut hasher);
    }
    fix_sentinel(hasher.finish() as PyHash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_of_equal_int_and_float_matches() {
        let f = hash_float(3.0).unwrap();
        let i = hash_bigint(&BigInt::from(3));
        assert_eq!(f, i);
    }

    #[test]
    fn sentinel_is_never_returned() {
        assert_eq!(fix_sentinel(-1), -2);
        assert_eq!(hash_float(-1.0).unwrap(), hash_bigint(&BigInt::from(-1)));
        assert_ne!(hash_bigint(&BigInt::from(-1)), SENTINEL);
    }

    #[test]
    fn float_hash_handles_non_finite() {
        assert_eq!(hash_float(f64::INFINITY), Some(INF));
        assert_eq!(hash_float(f64::NEG_INFINITY), Some(-INF));
        assert_eq!(hash_float(f64::NAN), None);
    }

    #[test]
    fn keyed_string_hash_is_stable_per_secret() {
        let secret = HashSecret::new(7);
        assert_eq!(secret.hash_str("spam"), secret.hash_str("spam"));
        assert_eq!(secret.hash_str(""), 0);
    }
}
