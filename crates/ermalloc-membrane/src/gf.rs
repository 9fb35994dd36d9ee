//! GF(2^8) arithmetic for the Reed-Solomon codec.
//!
//! Field elements are bytes. Multiplication and division go through
//! log/antilog tables generated at compile time for the primitive polynomial
//! x^8 + x^4 + x^3 + x^2 + 1 (0x11d) with generator alpha = 2.
//!
//! Addition and subtraction are both XOR and are not wrapped here.

/// Primitive polynomial used to reduce products.
pub const PRIMITIVE_POLY: u16 = 0x11d;

/// Number of non-zero field elements (the multiplicative group order).
pub const FIELD_ORDER: usize = 255;

struct Tables {
    /// `exp[i] = alpha^i`, doubled so that `exp[log a + log b]` never wraps.
    exp: [u8; 2 * FIELD_ORDER + 2],
    /// `log[alpha^i] = i`; `log[0]` is unused.
    log: [u8; 256],
}

impl Tables {
    const fn new() -> Self {
        let mut exp = [0u8; 2 * FIELD_ORDER + 2];
        let mut log = [0u8; 256];
        let mut x: u16 = 1;
        let mut i = 0usize;
        while i < FIELD_ORDER {
            exp[i] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= PRIMITIVE_POLY;
            }
            i += 1;
        }
        while i < exp.len() {
            exp[i] = exp[i - FIELD_ORDER];
            i += 1;
        }
        Self { exp, log }
    }
}

static TABLES: Tables = Tables::new();

/// `alpha^power`.
#[inline]
#[must_use]
pub fn exp(power: usize) -> u8 {
    TABLES.exp[power % FIELD_ORDER]
}

/// Discrete logarithm of a non-zero element.
#[inline]
#[must_use]
pub fn log(a: u8) -> usize {
    debug_assert_ne!(a, 0, "log of zero is undefined");
    TABLES.log[a as usize] as usize
}

#[inline]
#[must_use]
pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    TABLES.exp[TABLES.log[a as usize] as usize + TABLES.log[b as usize] as usize]
}

/// `a / b`. The divisor must be non-zero.
#[inline]
#[must_use]
pub fn div(a: u8, b: u8) -> u8 {
    debug_assert_ne!(b, 0, "division by the zero element");
    if a == 0 {
        return 0;
    }
    TABLES.exp[TABLES.log[a as usize] as usize + FIELD_ORDER - TABLES.log[b as usize] as usize]
}

/// Multiplicative inverse of a non-zero element.
#[inline]
#[must_use]
pub fn inv(a: u8) -> u8 {
    debug_assert_ne!(a, 0, "zero has no inverse");
    TABLES.exp[FIELD_ORDER - TABLES.log[a as usize] as usize]
}

/// `a^n`, with `0^0 = 1`.
#[must_use]
pub fn pow(a: u8, n: usize) -> u8 {
    if n == 0 {
        return 1;
    }
    if a == 0 {
        return 0;
    }
    exp((log(a) * (n % FIELD_ORDER)) % FIELD_ORDER)
}

/// Evaluate a polynomial stored highest degree first (Horner).
#[must_use]
pub fn eval_high_first(poly: &[u8], x: u8) -> u8 {
    poly.iter().fold(0u8, |acc, &c| mul(acc, x) ^ c)
}

/// Evaluate a polynomial stored lowest degree first.
#[must_use]
pub fn eval_low_first(poly: &[u8], x: u8) -> u8 {
    poly.iter().rev().fold(0u8, |acc, &c| mul(acc, x) ^ c)
}

/// Product of two polynomials stored in the same coefficient order.
#[must_use]
pub fn poly_mul(a: &[u8], b: &[u8]) -> Vec<u8> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0u8; a.len() + b.len() - 1];
    for (i, &ca) in a.iter().enumerate() {
        if ca == 0 {
            continue;
        }
        for (j, &cb) in b.iter().enumerate() {
            out[i + j] ^= mul(ca, cb);
        }
    }
    out
}
