use std::fmt;
use std::ops::Add;
use std::ops::AddAssign;
use std::ops::Neg;
use std::ops::Sub;

use serde::Deserialize;
use serde::Serialize;

/// The value of a numeric relation entry when one state does not simulate the other at all.
pub const MINUS_INFINITY: i32 = i32::MIN;

/// The quantity stored by the numeric relations: a bound on how much cost a
/// state can save compared to another state.
///
/// Both sentinels absorb every addition, `INFINITY` is used as the neutral
/// element of minimisations and `MINUS_INFINITY` means "does not simulate".
pub trait Credit: Copy + Ord + fmt::Debug + fmt::Display {
    const ZERO: Self;
    const INFINITY: Self;
    const MINUS_INFINITY: Self;

    fn from_cost(cost: i32) -> Self;

    /// The cost of a label used as a tau label, zero costs become strictly positive when possible.
    fn epsilon_if_zero(cost: i32) -> Self;

    /// The integer part of the quantity.
    fn value(self) -> i32;

    fn plus(self, other: Self) -> Self;

    fn negate(self) -> Self;

    fn minus(self, other: Self) -> Self {
        self.plus(other.negate())
    }

    fn is_finite(self) -> bool {
        self != Self::INFINITY && self != Self::MINUS_INFINITY
    }

    /// The cost of the round trip bound of a fully invertible transition
    /// system, rounded up such that it covers every epsilon.
    fn round_up(self) -> Self;
}

impl Credit for i32 {
    const ZERO: Self = 0;
    const INFINITY: Self = i32::MAX;
    const MINUS_INFINITY: Self = MINUS_INFINITY;

    fn from_cost(cost: i32) -> Self {
        cost
    }

    fn epsilon_if_zero(cost: i32) -> Self {
        cost
    }

    fn value(self) -> i32 {
        self
    }

    fn plus(self, other: Self) -> Self {
        if self == MINUS_INFINITY || other == MINUS_INFINITY {
            MINUS_INFINITY
        } else if self == i32::MAX || other == i32::MAX {
            i32::MAX
        } else {
            self.saturating_add(other).clamp(MINUS_INFINITY + 1, i32::MAX - 1)
        }
    }

    fn negate(self) -> Self {
        match self {
            MINUS_INFINITY => i32::MAX,
            i32::MAX => MINUS_INFINITY,
            value => -value,
        }
    }

    fn round_up(self) -> Self {
        self
    }
}

/// An integer extended with a number of infinitesimal epsilons, ordered
/// lexicographically. Zero cost labels cost one epsilon, which separates
/// states that reach the goal with the same cost in a different number of
/// zero cost steps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntEpsilon {
    value: i32,
    epsilon: i32,
}

impl IntEpsilon {
    pub const EPSILON: IntEpsilon = IntEpsilon { value: 0, epsilon: 1 };

    pub fn new(value: i32, epsilon: i32) -> Self {
        Self { value, epsilon }
    }

    pub fn epsilon(&self) -> i32 {
        self.epsilon
    }
}

impl From<i32> for IntEpsilon {
    fn from(value: i32) -> Self {
        Self::new(value, 0)
    }
}

impl Credit for IntEpsilon {
    const ZERO: Self = IntEpsilon { value: 0, epsilon: 0 };
    const INFINITY: Self = IntEpsilon {
        value: i32::MAX,
        epsilon: 0,
    };
    const MINUS_INFINITY: Self = IntEpsilon {
        value: MINUS_INFINITY,
        epsilon: 0,
    };

    fn from_cost(cost: i32) -> Self {
        IntEpsilon::from(cost)
    }

    fn epsilon_if_zero(cost: i32) -> Self {
        if cost == 0 {
            IntEpsilon::EPSILON
        } else {
            IntEpsilon::from(cost)
        }
    }

    fn value(self) -> i32 {
        self.value
    }

    fn plus(self, other: Self) -> Self {
        if self == Self::MINUS_INFINITY || other == Self::MINUS_INFINITY {
            Self::MINUS_INFINITY
        } else if self == Self::INFINITY || other == Self::INFINITY {
            Self::INFINITY
        } else {
            IntEpsilon::new(
                self.value.plus(other.value),
                self.epsilon.saturating_add(other.epsilon),
            )
        }
    }

    fn negate(self) -> Self {
        if self == Self::MINUS_INFINITY {
            Self::INFINITY
        } else if self == Self::INFINITY {
            Self::MINUS_INFINITY
        } else {
            IntEpsilon::new(-self.value, -self.epsilon)
        }
    }

    fn round_up(self) -> Self {
        if self.is_finite() && self.epsilon != 0 {
            IntEpsilon::from(self.value.plus(1))
        } else {
            self
        }
    }
}

impl Add for IntEpsilon {
    type Output = IntEpsilon;

    fn add(self, other: Self) -> Self {
        self.plus(other)
    }
}

impl AddAssign for IntEpsilon {
    fn add_assign(&mut self, other: Self) {
        *self = self.plus(other);
    }
}

impl Sub for IntEpsilon {
    type Output = IntEpsilon;

    fn sub(self, other: Self) -> Self {
        self.minus(other)
    }
}

impl Neg for IntEpsilon {
    type Output = IntEpsilon;

    fn neg(self) -> Self {
        self.negate()
    }
}

impl fmt::Display for IntEpsilon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::MINUS_INFINITY {
            write!(f, "-inf")
        } else if *self == Self::INFINITY {
            write!(f, "inf")
        } else if self.epsilon == 0 {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{}{:+}e", self.value, self.epsilon)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_sentinels_absorb() {
        assert_eq!(5i32.plus(MINUS_INFINITY), MINUS_INFINITY);
        assert_eq!(i32::MAX.plus(-3), i32::MAX);
        assert_eq!(MINUS_INFINITY.plus(i32::MAX), MINUS_INFINITY);
        assert_eq!(3i32.minus(i32::MAX), MINUS_INFINITY);
        assert_eq!(4i32.minus(7), -3);

        let minus = <IntEpsilon as Credit>::MINUS_INFINITY;
        assert_eq!(IntEpsilon::from(3) + minus, minus);
        assert_eq!(-minus, <IntEpsilon as Credit>::INFINITY);
    }

    #[test]
    fn test_epsilon_ordering() {
        let zero = IntEpsilon::ZERO;
        let eps = IntEpsilon::EPSILON;
        assert!(zero < eps);
        assert!(-eps < zero);
        assert!(eps < IntEpsilon::from(1));
        assert!(IntEpsilon::from(-1) < -eps);
        assert_eq!(eps + eps - eps, eps);
        assert_eq!((eps + eps).epsilon(), 2);

        assert_eq!(IntEpsilon::epsilon_if_zero(0), eps);
        assert_eq!(IntEpsilon::epsilon_if_zero(4), IntEpsilon::from(4));
        assert_eq!(<i32 as Credit>::epsilon_if_zero(0), 0);
    }

    #[test]
    fn test_round_up() {
        assert_eq!(IntEpsilon::new(3, 2).round_up(), IntEpsilon::from(4));
        assert_eq!(IntEpsilon::from(3).round_up(), IntEpsilon::from(3));
        assert_eq!(7i32.round_up(), 7);
        assert_eq!(IntEpsilon::new(2, -1).to_string(), "2-1e");
    }
}
