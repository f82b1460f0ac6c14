// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Module for floating-point arithmetic, defined in terms of *significant
//! decimal digits*. The implementation is generic over P digits of precision.
//! This implementation is backed by a [`BigInt`] mantissa and a base-10
//! exponent.

use num::bigint::{BigInt, BigUint, Sign};
use num::traits::{One, ToPrimitive, Zero};
use num::Integer;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::iter::{Product, Sum};
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub};
use std::sync::OnceLock;

/// A decimal floating-point number with P significant digits. This type
/// represents a number `x` as `mantissa * 10^exponent`, where the mantissa
/// has at most P decimal digits.
///
/// Every operation computes the exact result and then rounds it to P
/// significant digits, rounding half to even.
#[derive(Clone, Debug)]
pub struct BigFloatDecimal<const P: u32> {
    mantissa: BigInt,
    exponent: i64,
}

/// Number of powers of ten kept in a lookup table. Aligning two mantissas of
/// P digits never needs more than `2 * P + 2` digits.
const CACHED_POWERS_OF_TEN: u32 = 160;

fn pow10(n: u32) -> Cow<'static, BigUint> {
    static POWERS: OnceLock<Vec<BigUint>> = OnceLock::new();
    let powers = POWERS.get_or_init(|| {
        let mut result = Vec::with_capacity(CACHED_POWERS_OF_TEN as usize);
        let mut x = BigUint::one();
        for _ in 0..CACHED_POWERS_OF_TEN {
            result.push(x.clone());
            x *= 10u32;
        }
        result
    });
    match powers.get(n as usize) {
        Some(x) => Cow::Borrowed(x),
        None => Cow::Owned(BigUint::from(10u32).pow(n)),
    }
}

/// Number of decimal digits of the given integer, zero having no digit.
fn num_digits(x: &BigUint) -> u32 {
    if x.is_zero() {
        return 0;
    }
    let bits = x.bits();
    let mut digits = ((bits - 1) as f64 * std::f64::consts::LOG10_2) as u32 + 1;
    while digits > 1 && *x < *pow10(digits - 1) {
        digits -= 1;
    }
    while *x >= *pow10(digits) {
        digits += 1;
    }
    digits
}

fn scaled(mantissa: &BigInt, shift: u32) -> BigInt {
    if shift == 0 {
        mantissa.clone()
    } else {
        mantissa * BigInt::from(pow10(shift).into_owned())
    }
}

impl<const P: u32> BigFloatDecimal<P> {
    /// Creates the number `mantissa * 10^exponent`, rounded to P significant
    /// digits.
    pub fn new(mantissa: BigInt, exponent: i64) -> Self {
        Self::round(mantissa.sign(), mantissa.magnitude().clone(), exponent, false)
    }

    /// Obtains a number equal to the ratio between the given numerator and
    /// denominator.
    pub fn ratio(num: u64, denom: u64) -> Self {
        Self::from(num) / Self::from(denom)
    }

    /// Mantissa of this number, with at most P digits.
    pub fn mantissa(&self) -> &BigInt {
        &self.mantissa
    }

    /// Base-10 exponent of this number.
    pub fn exponent(&self) -> i64 {
        self.exponent
    }

    /// Shortest representation of this number as `(mantissa, exponent)`,
    /// i.e. without trailing zeros in the mantissa. Zero is `(0, 0)`.
    pub fn normalized_parts(&self) -> (BigInt, i64) {
        if self.is_zero() {
            return (BigInt::zero(), 0);
        }
        let ten = BigInt::from(10u32);
        let mut mantissa = self.mantissa.clone();
        let mut exponent = self.exponent;
        loop {
            let (quotient, remainder) = mantissa.div_rem(&ten);
            if !remainder.is_zero() {
                break;
            }
            mantissa = quotient;
            exponent += 1;
        }
        (mantissa, exponent)
    }

    /// Whether this number is strictly negative.
    pub fn is_negative(&self) -> bool {
        self.mantissa.sign() == Sign::Minus
    }

    /// Converts a number into its floating-point approximation. Numbers
    /// outside of the range of [`f64`] saturate to zero or infinity.
    pub fn to_f64(&self) -> f64 {
        if self.is_zero() {
            return 0.0;
        }
        let digits = num_digits(self.mantissa.magnitude()) as i64;
        let Some(mantissa) = self.mantissa.to_f64() else {
            return f64::NAN;
        };
        let normalized = mantissa / 10f64.powi(digits as i32 - 1);
        let exponent = (self.exponent + digits - 1).clamp(-400, 400) as i32;
        normalized * 10f64.powi(exponent)
    }

    /// Position of the most significant digit, i.e. `floor(log10(|x|)) + 1`.
    /// Only meaningful for non-zero numbers.
    fn order(&self) -> i64 {
        num_digits(self.mantissa.magnitude()) as i64 + self.exponent
    }

    /// Rounds `magnitude * 10^exponent` to P significant digits, half to even.
    /// The `sticky` flag indicates that the exact value is slightly above the
    /// given magnitude, i.e. that some non-zero digits were already discarded.
    fn round(sign: Sign, magnitude: BigUint, exponent: i64, sticky: bool) -> Self {
        let digits = num_digits(&magnitude);
        if digits == 0 {
            return Self::zero();
        }
        if digits <= P {
            return BigFloatDecimal {
                mantissa: BigInt::from_biguint(sign, magnitude),
                exponent,
            };
        }

        let dropped = digits - P;
        let divisor = pow10(dropped);
        let (mut quotient, remainder) = magnitude.div_rem(&*divisor);
        let round_up = match (remainder * 2u32).cmp(&*divisor) {
            Ordering::Less => false,
            Ordering::Greater => true,
            Ordering::Equal => sticky || quotient.is_odd(),
        };
        let mut exponent = exponent + i64::from(dropped);
        if round_up {
            quotient += 1u32;
            // 99...9 rounded up to 10^P.
            if num_digits(&quotient) > P {
                quotient /= 10u32;
                exponent += 1;
            }
        }

        BigFloatDecimal {
            mantissa: BigInt::from_biguint(sign, quotient),
            exponent,
        }
    }

    fn add_ref(&self, rhs: &Self) -> Self {
        if rhs.is_zero() {
            return self.clone();
        }
        if self.is_zero() {
            return rhs.clone();
        }

        // Beyond this gap, the smaller operand is below half a unit in the last
        // place of the larger one, and rounding gives back the larger one.
        let gap = self.order() - rhs.order();
        let limit = i64::from(P) + 1;
        if gap > limit {
            return self.clone();
        }
        if gap < -limit {
            return rhs.clone();
        }

        let exponent = self.exponent.min(rhs.exponent);
        let sum = scaled(&self.mantissa, (self.exponent - exponent) as u32)
            + scaled(&rhs.mantissa, (rhs.exponent - exponent) as u32);
        Self::round(sum.sign(), sum.magnitude().clone(), exponent, false)
    }

    fn mul_ref(&self, rhs: &Self) -> Self {
        let product = &self.mantissa * &rhs.mantissa;
        Self::round(
            product.sign(),
            product.magnitude().clone(),
            self.exponent + rhs.exponent,
            false,
        )
    }

    fn mul_u64(&self, rhs: u64) -> Self {
        let product = &self.mantissa * rhs;
        Self::round(product.sign(), product.magnitude().clone(), self.exponent, false)
    }

    fn div_ref(&self, rhs: &Self) -> Self {
        assert!(!rhs.is_zero(), "Division by zero");
        if self.is_zero() {
            return Self::zero();
        }

        let num = self.mantissa.magnitude();
        let denom = rhs.mantissa.magnitude();
        // Enough digits in the quotient to round it correctly.
        let shift = (P + 1 + num_digits(denom)).saturating_sub(num_digits(num));
        let (quotient, remainder) = (num * &*pow10(shift)).div_rem(denom);
        let sign = if self.mantissa.sign() == rhs.mantissa.sign() {
            Sign::Plus
        } else {
            Sign::Minus
        };
        Self::round(
            sign,
            quotient,
            self.exponent - rhs.exponent - i64::from(shift),
            !remainder.is_zero(),
        )
    }

    fn cmp_magnitude(&self, other: &Self) -> Ordering {
        self.order().cmp(&other.order()).then_with(|| {
            let exponent = self.exponent.min(other.exponent);
            let lhs = self.mantissa.magnitude() * &*pow10((self.exponent - exponent) as u32);
            let rhs = other.mantissa.magnitude() * &*pow10((other.exponent - exponent) as u32);
            lhs.cmp(&rhs)
        })
    }
}

impl<const P: u32> Display for BigFloatDecimal<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        let sign = if self.is_negative() { "-" } else { "" };
        let digits = self.mantissa.magnitude().to_string();
        let exponent = self.exponent + digits.len() as i64 - 1;
        let (head, tail) = digits.split_at(1);
        if tail.is_empty() {
            write!(f, "{sign}{head}E{exponent}")
        } else {
            write!(f, "{sign}{head}.{tail}E{exponent}")
        }
    }
}

impl<const P: u32> From<u64> for BigFloatDecimal<P> {
    fn from(x: u64) -> Self {
        Self::new(BigInt::from(x), 0)
    }
}

impl<const P: u32> PartialEq for BigFloatDecimal<P> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<const P: u32> Eq for BigFloatDecimal<P> {}

impl<const P: u32> PartialOrd for BigFloatDecimal<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<const P: u32> Ord for BigFloatDecimal<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        let sign = self.mantissa.sign();
        let other_sign = other.mantissa.sign();
        if sign != other_sign {
            return sign.cmp(&other_sign);
        }
        match sign {
            Sign::NoSign => Ordering::Equal,
            Sign::Plus => self.cmp_magnitude(other),
            Sign::Minus => other.cmp_magnitude(self),
        }
    }
}

impl<const P: u32> Zero for BigFloatDecimal<P> {
    fn zero() -> Self {
        BigFloatDecimal {
            mantissa: BigInt::zero(),
            exponent: 0,
        }
    }
    fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }
}
impl<const P: u32> One for BigFloatDecimal<P> {
    fn one() -> Self {
        BigFloatDecimal {
            mantissa: BigInt::one(),
            exponent: 0,
        }
    }
}

impl<const P: u32> Neg for BigFloatDecimal<P> {
    type Output = Self;
    fn neg(self) -> Self {
        BigFloatDecimal {
            mantissa: -self.mantissa,
            exponent: self.exponent,
        }
    }
}

macro_rules! forward_binop {
    ( $trait:ident, $method:ident, $impl_fn:ident ) => {
        impl<const P: u32> $trait for BigFloatDecimal<P> {
            type Output = Self;
            fn $method(self, rhs: Self) -> Self {
                self.$impl_fn(&rhs)
            }
        }
        impl<const P: u32> $trait<&'_ Self> for BigFloatDecimal<P> {
            type Output = Self;
            fn $method(self, rhs: &'_ Self) -> Self {
                self.$impl_fn(rhs)
            }
        }
        impl<const P: u32> $trait<&'_ BigFloatDecimal<P>> for &'_ BigFloatDecimal<P> {
            type Output = BigFloatDecimal<P>;
            fn $method(self, rhs: &'_ BigFloatDecimal<P>) -> BigFloatDecimal<P> {
                self.$impl_fn(rhs)
            }
        }
    };
}

forward_binop!(Add, add, add_ref);
forward_binop!(Mul, mul, mul_ref);
forward_binop!(Div, div, div_ref);

impl<const P: u32> Sub for BigFloatDecimal<P> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.add_ref(&-rhs)
    }
}
impl<const P: u32> Sub<&'_ BigFloatDecimal<P>> for &'_ BigFloatDecimal<P> {
    type Output = BigFloatDecimal<P>;
    fn sub(self, rhs: &'_ BigFloatDecimal<P>) -> BigFloatDecimal<P> {
        self.add_ref(&-rhs.clone())
    }
}

impl<const P: u32> Mul<u64> for BigFloatDecimal<P> {
    type Output = Self;
    fn mul(self, rhs: u64) -> Self {
        self.mul_u64(rhs)
    }
}
impl<const P: u32> Mul<u64> for &'_ BigFloatDecimal<P> {
    type Output = BigFloatDecimal<P>;
    fn mul(self, rhs: u64) -> BigFloatDecimal<P> {
        self.mul_u64(rhs)
    }
}
impl<const P: u32> Div<u64> for BigFloatDecimal<P> {
    type Output = Self;
    fn div(self, rhs: u64) -> Self {
        self.div_ref(&Self::from(rhs))
    }
}
impl<const P: u32> Div<u64> for &'_ BigFloatDecimal<P> {
    type Output = BigFloatDecimal<P>;
    fn div(self, rhs: u64) -> BigFloatDecimal<P> {
        self.div_ref(&BigFloatDecimal::from(rhs))
    }
}

impl<const P: u32> AddAssign for BigFloatDecimal<P> {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.add_ref(&rhs);
    }
}
impl<const P: u32> AddAssign<&'_ Self> for BigFloatDecimal<P> {
    fn add_assign(&mut self, rhs: &'_ Self) {
        *self = self.add_ref(rhs);
    }
}
impl<const P: u32> MulAssign<&'_ Self> for BigFloatDecimal<P> {
    fn mul_assign(&mut self, rhs: &'_ Self) {
        *self = self.mul_ref(rhs);
    }
}
impl<const P: u32> MulAssign<u64> for BigFloatDecimal<P> {
    fn mul_assign(&mut self, rhs: u64) {
        *self = self.mul_u64(rhs);
    }
}

impl<const P: u32> Sum for BigFloatDecimal<P> {
    fn sum<I>(iter: I) -> Self
    where
        I: Iterator<Item = Self>,
    {
        iter.fold(Self::zero(), |acc, x| acc.add_ref(&x))
    }
}

impl<'a, const P: u32> Sum<&'a Self> for BigFloatDecimal<P> {
    fn sum<I>(iter: I) -> Self
    where
        I: Iterator<Item = &'a Self>,
    {
        iter.fold(Self::zero(), |acc, x| acc.add_ref(x))
    }
}

impl<const P: u32> Product for BigFloatDecimal<P> {
    fn product<I>(iter: I) -> Self
    where
        I: Iterator<Item = Self>,
    {
        iter.fold(Self::one(), |acc, x| acc.mul_ref(&x))
    }
}
