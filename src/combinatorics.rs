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

//! Binomial coefficients in high-precision decimal arithmetic.

use crate::arithmetic::Decimal;
use num::traits::One;

/// Computes the binomial coefficient `C(n, k)`, i.e. the number of ways to
/// choose `k` elements among `n`.
///
/// The numerator `n * (n - 1) * ... * (n - k + 1)` and the denominator `k!`
/// are accumulated separately and divided once at the end, which loses less
/// precision than interleaving multiplications and divisions. The symmetry
/// `C(n, k) = C(n, n - k)` bounds the number of multiplications by `n / 2`.
///
/// Panics if `k > n`.
pub fn binomial_coefficient(n: u64, k: u64) -> Decimal {
    assert!(k <= n, "Invalid binomial coefficient C({n}, {k})");
    let k = k.min(n - k);

    let mut numerator = Decimal::one();
    let mut denominator = Decimal::one();
    for i in 1..=k {
        numerator *= n + 1 - i;
        denominator *= i;
    }
    numerator / denominator
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_small_values() {
        assert_eq!(binomial_coefficient(0, 0), Decimal::one());
        assert_eq!(binomial_coefficient(5, 2), Decimal::from(10u64));
        assert_eq!(binomial_coefficient(10, 3), Decimal::from(120u64));
        assert_eq!(binomial_coefficient(52, 5), Decimal::from(2_598_960u64));
        assert_eq!(
            binomial_coefficient(1_000_000, 3),
            Decimal::from(166_666_166_667_000_000u64)
        );
    }

    #[test]
    fn test_zero_and_full() {
        for n in [0, 1, 2, 17, 1_000, 10_000_000] {
            assert_eq!(binomial_coefficient(n, 0), Decimal::one(), "C({n}, 0)");
            assert_eq!(binomial_coefficient(n, n), Decimal::one(), "C({n}, {n})");
        }
    }

    #[test]
    fn test_symmetry() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..100 {
            let n = rng.gen_range(0..2_000);
            let k = rng.gen_range(0..=n);
            assert_eq!(
                binomial_coefficient(n, k),
                binomial_coefficient(n, n - k),
                "C({n}, {k}) != C({n}, {})",
                n - k
            );
        }
    }

    /// Below 25! all intermediate products fit in 34 digits, so the Pascal
    /// triangle rule holds exactly.
    #[test]
    fn test_pascal_triangle() {
        for n in 1..25 {
            for k in 1..n {
                assert_eq!(
                    binomial_coefficient(n, k),
                    binomial_coefficient(n - 1, k - 1) + binomial_coefficient(n - 1, k),
                    "Pascal rule failed for C({n}, {k})"
                );
            }
        }
    }

    #[test]
    fn test_large_values_relative_precision() {
        // C(60, 30) = 118264581564861424, whose numerator overflows 34 digits.
        let exact = Decimal::from(118_264_581_564_861_424u64);
        let approx = binomial_coefficient(60, 30);
        let error = (&approx - &exact) / exact;
        assert!(error.to_f64().abs() < 1e-30, "relative error {error}");

        // C(10^7, 1000) has about 4434 digits.
        let x = binomial_coefficient(10_000_000, 1_000);
        assert!(x.exponent() > 4_000);
    }

    #[test]
    #[should_panic(expected = "Invalid binomial coefficient C(3, 4)")]
    fn test_invalid_input() {
        binomial_coefficient(3, 4);
    }
}
