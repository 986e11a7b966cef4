//! Simple zero-overhead unit of measure types
//!
//! FIT stores most quantities as scaled integers (milliseconds, centimeters,
//! millimeters per second), while TCX and workout descriptions use plain SI or
//! sport-specific units such as pace in seconds per kilometer. Wrapping the
//! numbers in unit types keeps these conversions correct by construction.

use std::fmt::{Display, Formatter};
use std::ops::{Add, AddAssign, Div, Mul, Sub};

use approx::{AbsDiffEq, RelativeEq, relative_eq};
use num_traits::{Float, Num, NumCast};

macro_rules! unit_of_measure {
    ($u:ident, $suffix:literal) => {
        #[derive(Clone, Copy, Default, PartialEq, PartialOrd, Debug)]
        pub struct $u<N: Num>(pub N);

        impl<N> Add for $u<N>
        where
            N: Num,
        {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl<N> Sub for $u<N>
        where
            N: Num,
        {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl<N> AddAssign for $u<N>
        where
            N: Num + AddAssign,
        {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl<N> $u<N>
        where
            N: Num + NumCast,
        {
            /// Cast the underlying numeric type.
            ///
            /// Returns `None` if the value can't be represented in the target
            /// type. Casts from floating point truncate toward zero.
            pub fn cast<M>(self) -> Option<$u<M>>
            where
                M: Num + NumCast,
            {
                <M as NumCast>::from(self.0).map($u)
            }
        }

        impl<N> Display for $u<N>
        where
            N: Num + Display,
        {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                match f.precision() {
                    Some(p) => write!(f, "{:.*}{}", p, self.0, $suffix),
                    None => write!(f, "{}{}", self.0, $suffix),
                }
            }
        }

        // Relative equality traits for approx support

        impl<N> AbsDiffEq for $u<N>
        where
            N: Num + Float + AbsDiffEq<N, Epsilon = N>,
        {
            type Epsilon = N;

            fn default_epsilon() -> Self::Epsilon {
                N::epsilon()
            }

            fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
                self.0.abs_diff_eq(&other.0, epsilon)
            }
        }

        impl<N> RelativeEq for $u<N>
        where
            N: Num + Float + AbsDiffEq<N, Epsilon = N> + RelativeEq<N>,
        {
            fn default_max_relative() -> Self::Epsilon {
                N::epsilon()
            }

            fn relative_eq(
                &self,
                other: &Self,
                epsilon: Self::Epsilon,
                max_relative: Self::Epsilon,
            ) -> bool {
                relative_eq!(
                    self.0,
                    other.0,
                    epsilon = epsilon,
                    max_relative = max_relative
                )
            }
        }
    };
}

macro_rules! unit_conversion {
    ($from:ident => $to:ident, $coeff:expr) => {
        impl From<$from<f64>> for $to<f64> {
            fn from(value: $from<f64>) -> Self {
                $to(value.0 * ($coeff as f64))
            }
        }
    };
}

macro_rules! unit_ratio_impl {
    ($ratio:ident, $num:ident, $denom:ident) => {
        impl<N> Div<$denom<N>> for $num<N>
        where
            N: Num + Div,
        {
            type Output = $ratio<N>;

            fn div(self, rhs: $denom<N>) -> Self::Output {
                $ratio(self.0 / rhs.0)
            }
        }

        impl<N> Mul<$denom<N>> for $ratio<N>
        where
            N: Num + Mul,
        {
            type Output = $num<N>;

            fn mul(self, rhs: $denom<N>) -> Self::Output {
                $num(self.0 * rhs.0)
            }
        }
    };
}

macro_rules! unit_ratio {
    ($ratio:ident, $num:ident, $denom:ident) => {
        unit_ratio_impl!($ratio, $num, $denom);
        unit_ratio_impl!($denom, $num, $ratio);
    };
}

// Time units:
unit_of_measure!(Milliseconds, "ms");
unit_of_measure!(Seconds, "s");
unit_of_measure!(Minutes, "min");

// Distance units:
unit_of_measure!(Centimeters, "cm");
unit_of_measure!(Meters, "m");
unit_of_measure!(Kilometers, "km");
unit_of_measure!(Miles, "mi");

// Speed and pace units:
unit_of_measure!(MillimetersPerSecond, "mm/s");
unit_of_measure!(MetersPerSecond, "m/s");
unit_of_measure!(SecondsPerKilometer, "s/km");

unit_conversion!(Minutes => Seconds, 60);
unit_conversion!(Seconds => Milliseconds, 1000);
unit_conversion!(Kilometers => Meters, 1000);
unit_conversion!(Meters => Kilometers, 0.001);
unit_conversion!(Meters => Centimeters, 100);
unit_conversion!(Meters => Miles, 1.0 / 1609.344);
unit_conversion!(MetersPerSecond => MillimetersPerSecond, 1000);

unit_ratio![MetersPerSecond, Meters, Seconds];

impl SecondsPerKilometer<f64> {
    /// The speed corresponding to this pace.
    ///
    /// `None` for a pace that is zero, negative, or not finite.
    pub fn to_speed(self) -> Option<MetersPerSecond<f64>> {
        if self.0.is_finite() && self.0 > 0.0 {
            Some(MetersPerSecond(1000.0 / self.0))
        } else {
            None
        }
    }
}

impl MetersPerSecond<f64> {
    /// The pace corresponding to this speed.
    ///
    /// `None` for a speed that is zero, negative, or not finite.
    pub fn to_pace(self) -> Option<SecondsPerKilometer<f64>> {
        if self.0.is_finite() && self.0 > 0.0 {
            Some(SecondsPerKilometer(1000.0 / self.0))
        } else {
            None
        }
    }
}
