//! Bounded arbitrary-precision signed integer.
//!
//! All guest integers are `BigInt`s: sign-magnitude, little-endian limbs in
//! base 10^9, stored in a fixed-capacity buffer. Any arithmetic whose
//! magnitude would not fit the buffer fails with an integer-overflow error
//! instead of truncating.
//!
//! Canonical form invariants:
//! - `len == 0` iff the value is zero
//! - the top limb is non-zero when `len > 0`
//! - `negative` is false when `len == 0`
//! - limbs at and above `len` are zero

use std::cmp::Ordering;
use std::fmt;

use super::error::RuntimeError;

/// Limb base: each limb holds nine decimal digits.
pub const BASE: u32 = 1_000_000_000;

/// Decimal digits per limb.
pub const BASE_DIGITS: usize = 9;

/// Capacity in limbs. 20 limbs hold up to 180 decimal digits, which bounds
/// per-value memory at 80 bytes of magnitude.
pub const MAX_LIMBS: usize = 20;

/// A bounded-precision signed integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigInt {
    negative: bool,
    len: usize,
    limbs: [u32; MAX_LIMBS],
}

impl BigInt {
    pub fn zero() -> BigInt {
        BigInt {
            negative: false,
            len: 0,
            limbs: [0; MAX_LIMBS],
        }
    }

    pub fn from_i64(v: i64) -> BigInt {
        let mut out = BigInt::zero();
        if v == 0 {
            return out;
        }
        out.negative = v < 0;
        let mut mag = v.unsigned_abs();
        while mag > 0 {
            out.limbs[out.len] = (mag % BASE as u64) as u32;
            out.len += 1;
            mag /= BASE as u64;
        }
        out
    }

    pub fn is_zero(&self) -> bool {
        self.len == 0
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Attempt to narrow to an `i64`. Accepts magnitudes up to `i64::MAX`,
    /// or `i64::MAX + 1` when negative so that `i64::MIN` round-trips.
    pub fn try_to_i64(&self) -> Option<i64> {
        if self.len == 0 {
            return Some(0);
        }

        let limit: u64 = if self.negative {
            i64::MAX as u64 + 1
        } else {
            i64::MAX as u64
        };

        let mut acc: u64 = 0;
        for i in (0..self.len).rev() {
            let digit = self.limbs[i] as u64;
            if acc > (limit - digit) / BASE as u64 {
                return None;
            }
            acc = acc * BASE as u64 + digit;
        }

        if !self.negative {
            return Some(acc as i64);
        }
        if acc == i64::MAX as u64 + 1 {
            return Some(i64::MIN);
        }
        Some(-(acc as i64))
    }

    pub fn neg(&self) -> BigInt {
        let mut out = *self;
        if !out.is_zero() {
            out.negative = !out.negative;
        }
        out
    }

    pub fn add(&self, other: &BigInt) -> Result<BigInt, RuntimeError> {
        if self.negative == other.negative {
            let mut out = Self::add_abs(self, other)?;
            out.negative = self.negative;
            out.normalize_zero();
            return Ok(out);
        }

        match Self::cmp_abs(self, other) {
            Ordering::Equal => Ok(BigInt::zero()),
            Ordering::Greater => {
                let mut out = Self::sub_abs(self, other);
                out.negative = self.negative;
                out.normalize_zero();
                Ok(out)
            }
            Ordering::Less => {
                let mut out = Self::sub_abs(other, self);
                out.negative = other.negative;
                out.normalize_zero();
                Ok(out)
            }
        }
    }

    pub fn sub(&self, other: &BigInt) -> Result<BigInt, RuntimeError> {
        self.add(&other.neg())
    }

    pub fn mul(&self, other: &BigInt) -> Result<BigInt, RuntimeError> {
        if self.is_zero() || other.is_zero() {
            return Ok(BigInt::zero());
        }

        let mut out = Self::mul_abs(self, other)?;
        out.negative = self.negative != other.negative;
        out.normalize_zero();
        Ok(out)
    }

    /// Quotient and remainder, truncated toward zero. The quotient is
    /// negative iff the signs differ and it is non-zero; the remainder
    /// takes the sign of the dividend and is zero when the division is
    /// exact.
    pub fn div_rem(&self, other: &BigInt) -> Result<(BigInt, BigInt), RuntimeError> {
        if other.len == 0 {
            return Err(RuntimeError::DivisionByZero);
        }

        let (mut q, mut r) = Self::div_rem_abs(&self.abs(), &other.abs())?;
        q.negative = self.negative != other.negative && !q.is_zero();
        r.negative = self.negative && !r.is_zero();
        q.normalize_zero();
        r.normalize_zero();
        Ok((q, r))
    }

    pub fn div(&self, other: &BigInt) -> Result<BigInt, RuntimeError> {
        Ok(self.div_rem(other)?.0)
    }

    pub fn rem(&self, other: &BigInt) -> Result<BigInt, RuntimeError> {
        Ok(self.div_rem(other)?.1)
    }

    fn abs(&self) -> BigInt {
        let mut out = *self;
        out.negative = false;
        out
    }

    fn normalize_zero(&mut self) {
        if self.len == 0 {
            self.negative = false;
        }
    }

    fn trim(&mut self) {
        while self.len > 0 && self.limbs[self.len - 1] == 0 {
            self.len -= 1;
        }
        self.normalize_zero();
    }

    fn cmp_abs(a: &BigInt, b: &BigInt) -> Ordering {
        if a.len != b.len {
            return a.len.cmp(&b.len);
        }
        for i in (0..a.len).rev() {
            match a.limbs[i].cmp(&b.limbs[i]) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        Ordering::Equal
    }

    fn add_abs(a: &BigInt, b: &BigInt) -> Result<BigInt, RuntimeError> {
        let mut out = BigInt::zero();
        let mut carry: u64 = 0;
        let max_len = a.len.max(b.len);

        let mut i = 0;
        while i < max_len || carry != 0 {
            if i >= MAX_LIMBS {
                return Err(RuntimeError::IntegerOverflow);
            }

            let mut sum = carry;
            if i < a.len {
                sum += a.limbs[i] as u64;
            }
            if i < b.len {
                sum += b.limbs[i] as u64;
            }

            out.limbs[i] = (sum % BASE as u64) as u32;
            carry = sum / BASE as u64;
            out.len = i + 1;
            i += 1;
        }

        out.trim();
        Ok(out)
    }

    /// Magnitude subtraction; requires `|a| >= |b|`.
    fn sub_abs(a: &BigInt, b: &BigInt) -> BigInt {
        let mut out = BigInt::zero();
        let mut borrow: i64 = 0;
        out.len = a.len;

        for i in 0..a.len {
            let mut cur = a.limbs[i] as i64 - borrow;
            if i < b.len {
                cur -= b.limbs[i] as i64;
            }
            if cur < 0 {
                cur += BASE as i64;
                borrow = 1;
            } else {
                borrow = 0;
            }
            out.limbs[i] = cur as u32;
        }

        out.trim();
        out
    }

    fn mul_abs(a: &BigInt, b: &BigInt) -> Result<BigInt, RuntimeError> {
        let mut out = BigInt::zero();
        if a.len == 0 || b.len == 0 {
            return Ok(out);
        }

        for i in 0..a.len {
            let mut carry: u64 = 0;
            let mut j = 0;
            while j < b.len || carry != 0 {
                let idx = i + j;
                if idx >= MAX_LIMBS {
                    return Err(RuntimeError::IntegerOverflow);
                }

                let mut cur = out.limbs[idx] as u64 + carry;
                if j < b.len {
                    cur += a.limbs[i] as u64 * b.limbs[j] as u64;
                }

                out.limbs[idx] = (cur % BASE as u64) as u32;
                carry = cur / BASE as u64;
                if idx + 1 > out.len {
                    out.len = idx + 1;
                }
                j += 1;
            }
        }

        out.trim();
        Ok(out)
    }

    /// Magnitude times a single limb; `None` when the result would not fit.
    fn mul_limb_abs(a: &BigInt, m: u32) -> Option<BigInt> {
        let mut out = BigInt::zero();
        if a.len == 0 || m == 0 {
            return Some(out);
        }

        let mut carry: u64 = 0;
        for i in 0..a.len {
            let cur = carry + a.limbs[i] as u64 * m as u64;
            out.limbs[i] = (cur % BASE as u64) as u32;
            carry = cur / BASE as u64;
            out.len = i + 1;
        }

        if carry != 0 {
            if out.len >= MAX_LIMBS {
                return None;
            }
            out.limbs[out.len] = carry as u32;
            out.len += 1;
        }

        out.trim();
        Some(out)
    }

    /// Shift the magnitude up by one limb and insert `digit` at the bottom.
    fn shift_base_add(&mut self, digit: u32) -> Result<(), RuntimeError> {
        if self.len == 0 {
            if digit != 0 {
                self.limbs[0] = digit;
                self.len = 1;
            }
            return Ok(());
        }
        if self.len >= MAX_LIMBS {
            return Err(RuntimeError::IntegerOverflow);
        }
        for i in (1..=self.len).rev() {
            self.limbs[i] = self.limbs[i - 1];
        }
        self.limbs[0] = digit;
        self.len += 1;
        Ok(())
    }

    /// Magnitude division; both inputs are non-negative.
    fn div_rem_abs(a: &BigInt, b: &BigInt) -> Result<(BigInt, BigInt), RuntimeError> {
        if b.len == 0 {
            return Err(RuntimeError::DivisionByZero);
        }
        if a.len == 0 {
            return Ok((BigInt::zero(), BigInt::zero()));
        }

        match Self::cmp_abs(a, b) {
            Ordering::Less => return Ok((BigInt::zero(), *a)),
            Ordering::Equal => return Ok((BigInt::from_i64(1), BigInt::zero())),
            Ordering::Greater => {}
        }

        if b.len == 1 {
            // Long division by a single limb.
            let divisor = b.limbs[0] as u64;
            let mut q = BigInt::zero();
            let mut rem: u64 = 0;
            q.len = a.len;
            for i in (0..a.len).rev() {
                let cur = a.limbs[i] as u64 + rem * BASE as u64;
                q.limbs[i] = (cur / divisor) as u32;
                rem = cur % divisor;
            }
            q.trim();
            return Ok((q, BigInt::from_i64(rem as i64)));
        }

        // Multi-limb divisor: process dividend limbs high to low, binary
        // searching each quotient limb in [0, BASE - 1].
        let mut q = BigInt::zero();
        let mut r = BigInt::zero();
        q.len = a.len;

        for i in (0..a.len).rev() {
            r.shift_base_add(a.limbs[i])?;

            let mut lo: u32 = 0;
            let mut hi: u32 = BASE - 1;
            let mut best: u32 = 0;

            while lo <= hi {
                let mid = lo + (hi - lo) / 2;
                let fits = match Self::mul_limb_abs(b, mid) {
                    Some(prod) => Self::cmp_abs(&prod, &r) != Ordering::Greater,
                    None => false,
                };
                if fits {
                    best = mid;
                    lo = mid + 1;
                } else {
                    match mid.checked_sub(1) {
                        Some(h) => hi = h,
                        None => break,
                    }
                }
            }

            q.limbs[i] = best;
            if best != 0 {
                let prod = Self::mul_limb_abs(b, best).ok_or(RuntimeError::IntegerOverflow)?;
                r = Self::sub_abs(&r, &prod);
            }
        }

        q.trim();
        r.trim();
        Ok((q, r))
    }
}

impl From<i64> for BigInt {
    fn from(v: i64) -> BigInt {
        BigInt::from_i64(v)
    }
}

impl PartialOrd for BigInt {
    fn partial_cmp(&self, other: &BigInt) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BigInt {
    fn cmp(&self, other: &BigInt) -> Ordering {
        if self.negative != other.negative {
            return if self.negative {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }
        let cmp = Self::cmp_abs(self, other);
        if self.negative {
            cmp.reverse()
        } else {
            cmp
        }
    }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len == 0 {
            return write!(f, "0");
        }
        if self.negative {
            write!(f, "-")?;
        }
        write!(f, "{}", self.limbs[self.len - 1])?;
        for i in (0..self.len - 1).rev() {
            write!(f, "{:0width$}", self.limbs[i], width = BASE_DIGITS)?;
        }
        Ok(())
    }
}
