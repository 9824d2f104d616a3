// TaskState - Typed pipeline state with per-field reducers
use super::reducer::{AppendOnly, Forward, Overwrite, Progression, Reducer, SetOnce, UnionMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub type SceneId = u32;
pub type ResultMap = BTreeMap<SceneId, UnitResult>;

/// Pipeline step. Strictly forward-moving; `Failed` is reachable from any
/// non-terminal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[default]
    Init,
    Writing,
    Imaging,
    Animating,
    Composing,
    Narrating,
    AddingAudio,
    Done,
    Failed,
}

impl Step {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::Done | Step::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Init => "init",
            Step::Writing => "writing",
            Step::Imaging => "imaging",
            Step::Animating => "animating",
            Step::Composing => "composing",
            Step::Narrating => "narrating",
            Step::AddingAudio => "adding_audio",
            Step::Done => "done",
            Step::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Progression for Step {
    fn can_advance_to(&self, next: &Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        *next == Step::Failed || next > self
    }
}

/// Immutable task input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub topic: String,
    pub style: String,
    pub theme: Option<String>,
}

impl TaskConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            style: "dark_healing".to_string(),
            theme: None,
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = Some(theme.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub text: String,
    #[serde(rename = "type")]
    pub scene_type: String,
    pub duration: f64,
    pub emotion: String,
    pub image_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Short-lived locator only the video generator can use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_transient_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

impl Scene {
    /// Copy any artifact locators present on `other` onto this scene.
    fn enrich_from(&mut self, other: Scene) {
        if other.image_url.is_some() {
            self.image_url = other.image_url;
        }
        if other.image_transient_url.is_some() {
            self.image_transient_url = other.image_transient_url;
        }
        if other.video_url.is_some() {
            self.video_url = other.video_url;
        }
    }

    /// Best artifact for composition: the clip if one exists, else the still.
    pub fn media_url(&self) -> Option<&str> {
        self.video_url.as_deref().or(self.image_url.as_deref())
    }
}

/// Scene list: written once by the writer, afterwards only enriched by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneBook(Vec<Scene>);

impl std::ops::Deref for SceneBook {
    type Target = [Scene];

    fn deref(&self) -> &[Scene] {
        &self.0
    }
}

impl Reducer for SceneBook {
    type Delta = Vec<Scene>;

    fn reduce(&mut self, delta: Vec<Scene>) -> bool {
        if self.0.is_empty() {
            let mut seen = HashSet::new();
            if !delta.iter().all(|s| seen.insert(s.id)) {
                return false;
            }
            self.0 = delta;
            return true;
        }

        let mut all_known = true;
        for incoming in delta {
            match self.0.iter_mut().find(|s| s.id == incoming.id) {
                Some(scene) => scene.enrich_from(incoming),
                None => all_known = false,
            }
        }
        all_known
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Succeeded,
    Failed,
}

/// Outcome of one fan-out unit for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transient_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

impl UnitResult {
    pub fn succeeded(artifact_url: String, transient_url: Option<String>, attempts: u32) -> Self {
        Self {
            status: UnitStatus::Succeeded,
            artifact_url: Some(artifact_url),
            transient_url,
            error: None,
            attempts,
        }
    }

    pub fn failed(error: String, attempts: u32) -> Self {
        Self {
            status: UnitStatus::Failed,
            artifact_url: None,
            transient_url: None,
            error: Some(error),
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UnitStatus::Succeeded
    }
}

/// TaskState - one per generation request, owned by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub config: TaskConfig,
    pub step: Forward<Step>,
    pub scenes: SceneBook,
    pub style_seed: Overwrite<u32>,

    pub image_results: UnionMap<SceneId, UnitResult>,
    pub video_results: UnionMap<SceneId, UnitResult>,
    pub total_images: Overwrite<usize>,
    pub total_videos: Overwrite<usize>,
    pub completed_images: Overwrite<usize>,
    pub completed_videos: Overwrite<usize>,

    pub composed_artifact_url: SetOnce<String>,
    pub audio_url: SetOnce<String>,
    pub final_artifact_url: SetOnce<String>,

    pub errors: AppendOnly<String>,
    /// Recovered conditions (e.g. narration skipped); never fail the task.
    pub warnings: AppendOnly<String>,

    /// Node to execute next; drives resumption from a checkpoint.
    pub current_node: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    pub fn new(task_id: String, config: TaskConfig) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            config,
            step: Forward::new(Step::Init),
            scenes: SceneBook::default(),
            style_seed: Overwrite::new(0),
            image_results: UnionMap::default(),
            video_results: UnionMap::default(),
            total_images: Overwrite::new(0),
            total_videos: Overwrite::new(0),
            completed_images: Overwrite::new(0),
            completed_videos: Overwrite::new(0),
            composed_artifact_url: SetOnce::default(),
            audio_url: SetOnce::default(),
            final_artifact_url: SetOnce::default(),
            errors: AppendOnly::default(),
            warnings: AppendOnly::default(),
            current_node: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step(&self) -> Step {
        *self.step
    }

    pub fn is_terminal(&self) -> bool {
        self.step.is_terminal()
    }

    /// Scenes sorted by ascending id.
    pub fn scenes_in_order(&self) -> Vec<&Scene> {
        let mut ordered: Vec<&Scene> = self.scenes.iter().collect();
        ordered.sort_by_key(|s| s.id);
        ordered
    }

    /// Apply a partial update. Terminal states accept nothing.
    pub fn apply_update(&mut self, update: StateUpdate) {
        if self.is_terminal() {
            tracing::warn!(
                "Ignoring update for task {}: already {}",
                self.task_id,
                self.step()
            );
            return;
        }
        self.updated_at = Utc::now();

        if let Some(scenes) = update.scenes {
            if !self.scenes.reduce(scenes) {
                tracing::warn!("Task {}: scene update rejected (unknown or duplicate ids)", self.task_id);
            }
        }
        if let Some(seed) = update.style_seed {
            self.style_seed.reduce(seed);
        }
        if let Some(results) = update.image_results {
            if !self.image_results.reduce(results) {
                tracing::warn!("Task {}: duplicate image result keys dropped", self.task_id);
            }
        }
        if let Some(results) = update.video_results {
            if !self.video_results.reduce(results) {
                tracing::warn!("Task {}: duplicate video result keys dropped", self.task_id);
            }
        }
        if let Some(n) = update.total_images {
            self.total_images.reduce(n);
        }
        if let Some(n) = update.total_videos {
            self.total_videos.reduce(n);
        }
        if let Some(n) = update.completed_images {
            self.completed_images.reduce(n);
        }
        if let Some(n) = update.completed_videos {
            self.completed_videos.reduce(n);
        }
        if let Some(url) = update.composed_artifact_url {
            if !self.composed_artifact_url.reduce(url) {
                tracing::warn!("Task {}: composed artifact already set", self.task_id);
            }
        }
        if let Some(url) = update.audio_url {
            if !self.audio_url.reduce(url) {
                tracing::warn!("Task {}: audio already set", self.task_id);
            }
        }
        if let Some(url) = update.final_artifact_url {
            if !self.final_artifact_url.reduce(url) {
                tracing::warn!("Task {}: final artifact already set", self.task_id);
            }
        }
        if let Some(errors) = update.errors {
            self.errors.reduce(errors);
        }
        if let Some(warnings) = update.warnings {
            self.warnings.reduce(warnings);
        }

        // Step last so the rest of the update lands before a terminal lock.
        if let Some(step) = update.step {
            let from = self.step();
            if !self.step.reduce(step) {
                tracing::warn!(
                    "Task {}: rejected step transition {} -> {}",
                    self.task_id,
                    from,
                    step
                );
            }
        }
    }
}

/// Partial update returned by a stage; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub step: Option<Step>,
    pub scenes: Option<Vec<Scene>>,
    pub style_seed: Option<u32>,
    pub image_results: Option<ResultMap>,
    pub video_results: Option<ResultMap>,
    pub total_images: Option<usize>,
    pub total_videos: Option<usize>,
    pub completed_images: Option<usize>,
    pub completed_videos: Option<usize>,
    pub composed_artifact_url: Option<String>,
    pub audio_url: Option<String>,
    pub final_artifact_url: Option<String>,
    pub errors: Option<Vec<String>>,
    pub warnings: Option<Vec<String>>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.get_or_insert_with(Vec::new).push(error.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.get_or_insert_with(Vec::new).push(warning.into());
        self
    }

    /// Terminal failure with an explanation.
    pub fn failed(error: impl Into<String>) -> Self {
        Self::new().with_step(Step::Failed).with_error(error)
    }
}
