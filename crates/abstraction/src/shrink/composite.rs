use log::info;

use ldsim_utilities::LdsimError;

use crate::Abstraction;
use crate::Labels;
use crate::ShrinkOptions;
use crate::ShrinkStrategy;

/// Applies a sequence of shrink strategies one after the other.
pub struct ShrinkComposite {
    options: ShrinkOptions,
    strategies: Vec<Box<dyn ShrinkStrategy>>,
}

impl ShrinkComposite {
    pub fn new(options: ShrinkOptions, strategies: Vec<Box<dyn ShrinkStrategy>>) -> Result<Self, LdsimError> {
        if strategies.is_empty() {
            return Err(LdsimError::config("a composite shrink strategy needs at least one strategy"));
        }

        Ok(Self { options, strategies })
    }

    pub fn create_default(strategies: Vec<Box<dyn ShrinkStrategy>>) -> Result<Self, LdsimError> {
        Self::new(ShrinkOptions::unlimited(), strategies)
    }
}

impl ShrinkStrategy for ShrinkComposite {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn options(&self) -> &ShrinkOptions {
        &self.options
    }

    fn shrink(&mut self, abs: &mut Abstraction, labels: &mut Labels, target: usize, force: bool) -> Result<(), LdsimError> {
        for (i, strategy) in self.strategies.iter_mut().enumerate() {
            if i != 0 {
                abs.compute_distances(labels)?;
                abs.normalize(labels);
                debug_assert!(abs.is_solvable());
            }
            strategy.shrink(abs, labels, target, force)?;
        }
        Ok(())
    }

    fn shrink_atomic(&mut self, abs: &mut Abstraction, labels: &mut Labels) -> Result<(), LdsimError> {
        for (i, strategy) in self.strategies.iter_mut().enumerate() {
            if i != 0 {
                abs.normalize(labels);
                abs.compute_distances(labels)?;
            }
            strategy.shrink_atomic(abs, labels)?;
        }
        Ok(())
    }

    fn shrink_before_merge(
        &mut self,
        abs1: &mut Abstraction,
        abs2: &mut Abstraction,
        labels: &mut Labels,
    ) -> Result<(), LdsimError> {
        for (i, strategy) in self.strategies.iter_mut().enumerate() {
            if i != 0 {
                abs1.normalize(labels);
                abs2.normalize(labels);
                abs1.compute_distances(labels)?;
                abs2.compute_distances(labels)?;
            }
            strategy.shrink_before_merge(abs1, abs2, labels)?;
        }
        Ok(())
    }

    fn reduce_labels_before_shrinking(&self) -> bool {
        self.strategies
            .iter()
            .any(|strategy| strategy.reduce_labels_before_shrinking())
    }

    fn dump_options(&self) {
        info!("Shrink strategy: {}", self.name());
        for strategy in &self.strategies {
            strategy.dump_options();
        }
    }
}
