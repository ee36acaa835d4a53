use anyhow::Result;
use std::fmt::Debug;

/// Tunable parameters for one stage.
///
/// Configs are immutable values. A new config replaces the old one between frames;
/// `validate` runs when the config is installed, so stages may assume valid values.
pub trait StageConfig: Clone + Debug + PartialEq + Send + Sync {
    fn validate(&self) -> Result<()>;
}

/// Common shape of every pipeline stage: `(input, config) -> owned output`.
///
/// Stages may hold state across calls (previous frame, tracked points, accumulators).
/// `&mut self` makes that state exclusive to the single worker that owns the stage.
/// The input is borrowed; the stage never retains it, and anything it allocates
/// internally is dropped before returning.
pub trait FrameProcessor {
    type Input: ?Sized;
    type Output;
    type Config: StageConfig;

    /// Stage identifier used in logs.
    fn name(&self) -> &'static str;

    fn process(&mut self, input: &Self::Input, config: &Self::Config) -> Result<Self::Output>;

    /// Drop any cross-frame state. Stateless stages keep the default no-op.
    fn reset(&mut self) {}
}
