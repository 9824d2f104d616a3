// Generation pipeline - the fixed stage graph and its executor
//
// init -> writer -> generate_images -> aggregate_images -?-> generate_videos
//      -> aggregate_videos -?-> compose -> narrator -?-> add_audio
use super::checkpoint::CheckpointStore;
use super::dispatch::{ImageWorker, VideoWorker};
use super::executor::{ExecutorBuilder, ExecutorConfig, PipelineExecutor};
use super::graph::{NodeType, StateGraph, StateGraphBuilder};
use super::nodes::{
    AddAudioNode, AggregateNode, ComposeNode, FanOutNode, InitNode, NarratorNode, Round, WriterNode,
};
use super::progress::ProgressObserver;
use super::router::{conditions, continue_if, narration_router};
use crate::error::Result;
use crate::services::Services;
use std::sync::Arc;

pub const INIT: &str = "init";
pub const WRITER: &str = "writer";
pub const GENERATE_IMAGES: &str = "generate_images";
pub const AGGREGATE_IMAGES: &str = "aggregate_images";
pub const GENERATE_VIDEOS: &str = "generate_videos";
pub const AGGREGATE_VIDEOS: &str = "aggregate_videos";
pub const COMPOSE: &str = "compose";
pub const NARRATOR: &str = "narrator";
pub const ADD_AUDIO: &str = "add_audio";

/// Build the generation pipeline graph
pub fn build_pipeline_graph() -> Result<StateGraph> {
    StateGraphBuilder::new()
        .add_node(INIT, NodeType::Start, Arc::new(InitNode), "Derive the style seed")
        .add_node(WRITER, NodeType::Stage, Arc::new(WriterNode), "Write the scene list")
        .add_node(
            GENERATE_IMAGES,
            NodeType::FanOut,
            Arc::new(FanOutNode::new(Round::Images, Arc::new(ImageWorker))),
            "Render one image per scene",
        )
        .add_node(
            AGGREGATE_IMAGES,
            NodeType::Aggregate,
            Arc::new(AggregateNode::new(Round::Images)),
            "Merge image results into scenes",
        )
        .add_node(
            GENERATE_VIDEOS,
            NodeType::FanOut,
            Arc::new(FanOutNode::new(Round::Videos, Arc::new(VideoWorker))),
            "Animate every scene with a usable image",
        )
        .add_node(
            AGGREGATE_VIDEOS,
            NodeType::Aggregate,
            Arc::new(AggregateNode::new(Round::Videos)),
            "Merge video results into scenes",
        )
        .add_node(COMPOSE, NodeType::Stage, Arc::new(ComposeNode), "Concatenate scene media")
        .add_node(NARRATOR, NodeType::Stage, Arc::new(NarratorNode), "Synthesize narration")
        .add_node(ADD_AUDIO, NodeType::End, Arc::new(AddAudioNode), "Mix narration onto the video")
        .set_entry_point(INIT)
        .add_edge(INIT, WRITER)
        .add_edge(WRITER, GENERATE_IMAGES)
        .add_edge(GENERATE_IMAGES, AGGREGATE_IMAGES)
        .add_conditional_edge(
            AGGREGATE_IMAGES,
            continue_if(conditions::has_completed_images(), GENERATE_VIDEOS),
            &[GENERATE_VIDEOS],
        )
        .add_edge(GENERATE_VIDEOS, AGGREGATE_VIDEOS)
        .add_conditional_edge(
            AGGREGATE_VIDEOS,
            continue_if(conditions::has_completed_videos(), COMPOSE),
            &[COMPOSE],
        )
        .add_edge(COMPOSE, NARRATOR)
        .add_conditional_edge(NARRATOR, narration_router(ADD_AUDIO), &[ADD_AUDIO])
        .build()
}

/// Create the pipeline executor over the given collaborators
pub fn create_pipeline_executor(
    services: Services,
    checkpointer: Arc<dyn CheckpointStore>,
    observer: Arc<dyn ProgressObserver>,
    config: ExecutorConfig,
) -> Result<PipelineExecutor> {
    ExecutorBuilder::new()
        .with_graph(build_pipeline_graph()?)
        .with_services(services)
        .with_checkpointer(checkpointer)
        .with_observer(observer)
        .with_config(config)
        .build()
}
