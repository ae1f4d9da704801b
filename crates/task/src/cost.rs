use std::fmt;

use clap::ValueEnum;

/// Determines how operator costs are adjusted before they are used as label costs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CostType {
    /// The cost as given by the task.
    #[default]
    Normal,
    /// Every operator costs one.
    One,
    /// Every operator costs one more than given, unless the task has unit cost.
    PlusOne,
}

impl CostType {
    /// Returns the adjusted cost of an operator with the given original cost.
    pub fn adjust(self, cost: i32, is_unit_cost_task: bool) -> i32 {
        match self {
            CostType::Normal => cost,
            CostType::One => 1,
            CostType::PlusOne => {
                if is_unit_cost_task {
                    1
                } else {
                    cost + 1
                }
            }
        }
    }
}

impl fmt::Display for CostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostType::Normal => write!(f, "normal"),
            CostType::One => write!(f, "one"),
            CostType::PlusOne => write!(f, "plusone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_adjusted_costs() {
        assert_eq!(CostType::Normal.adjust(3, false), 3);
        assert_eq!(CostType::One.adjust(3, false), 1);
        assert_eq!(CostType::PlusOne.adjust(3, false), 4);
        assert_eq!(CostType::PlusOne.adjust(1, true), 1);
        assert_eq!(CostType::PlusOne.adjust(0, false), 1);
    }
}
