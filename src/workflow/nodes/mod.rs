// Stage functions of the generation pipeline
use super::state::{SceneId, Step, TaskState, UnitResult};
use std::collections::BTreeMap;

pub mod aggregate;
pub mod audio;
pub mod compose;
pub mod fan_out;
pub mod init;
pub mod writer;

pub use aggregate::AggregateNode;
pub use audio::{AddAudioNode, NarratorNode};
pub use compose::ComposeNode;
pub use fan_out::FanOutNode;
pub use init::InitNode;
pub use writer::WriterNode;

/// The two fan-out rounds of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Round {
    Images,
    Videos,
}

impl Round {
    pub fn name(&self) -> &'static str {
        match self {
            Round::Images => "image",
            Round::Videos => "video",
        }
    }

    /// Step the round runs under.
    pub fn step(&self) -> Step {
        match self {
            Round::Images => Step::Imaging,
            Round::Videos => Step::Animating,
        }
    }

    /// Step after a round with at least one success.
    pub fn next_step(&self) -> Step {
        match self {
            Round::Images => Step::Animating,
            Round::Videos => Step::Composing,
        }
    }

    pub fn results<'a>(&self, state: &'a TaskState) -> &'a BTreeMap<SceneId, UnitResult> {
        match self {
            Round::Images => &*state.image_results,
            Round::Videos => &*state.video_results,
        }
    }
}
