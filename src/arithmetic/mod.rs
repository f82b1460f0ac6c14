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

//! Module providing the high-precision decimal arithmetic used to compute
//! probability masses.
//!
//! Unnormalized hypergeometric masses are products of binomial coefficients
//! whose magnitude ranges from `10^-1000` to `10^+10000` for populations in
//! the millions, so neither [`f64`] nor fixed-point arithmetic is usable. The
//! [`BigFloatDecimal`] type keeps a fixed number of significant decimal digits
//! instead, with an explicit rounding mode applied after every operation. This
//! makes all computations deterministic across runs and platforms.

mod big_float;

pub use big_float::BigFloatDecimal;

/// Number of significant decimal digits used for all probability masses.
pub const PRECISION: u32 = 34;

/// Decimal arithmetic used throughout the crate: 34 significant digits,
/// rounding half to even.
pub type Decimal = BigFloatDecimal<PRECISION>;
