// Router - Conditional routing between pipeline stages
//
// Routers are pure functions of the task state. Returning `None` ends the
// graph at the current node.
use super::state::{Step, TaskState};
use std::sync::Arc;

pub type RouterFunction = Arc<dyn Fn(&TaskState) -> Option<String> + Send + Sync>;

type Condition = Box<dyn Fn(&TaskState) -> bool + Send + Sync>;

/// Route to `target` while `predicate` holds and the task is still live,
/// otherwise end the graph.
pub fn continue_if<F>(predicate: F, target: &str) -> RouterFunction
where
    F: Fn(&TaskState) -> bool + Send + Sync + 'static,
{
    RouterBuilder::new()
        .when(move |state| !state.is_terminal() && predicate(state), target)
        .build()
}

/// Go on to mixing unless narration already finished the task.
pub fn narration_router(mix_node: &str) -> RouterFunction {
    RouterBuilder::new()
        .when(conditions::step_is(Step::Done), "")
        .when(conditions::is_live(), mix_node)
        .build()
}

/// First matching condition wins; an empty target means END.
pub struct RouterBuilder {
    conditions: Vec<(Condition, String)>,
    default: Option<String>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
            default: None,
        }
    }

    /// Add condition with target node
    pub fn when<F>(mut self, condition: F, target: &str) -> Self
    where
        F: Fn(&TaskState) -> bool + Send + Sync + 'static,
    {
        self.conditions.push((Box::new(condition), target.to_string()));
        self
    }

    /// Target when no condition matches
    pub fn otherwise(mut self, target: &str) -> Self {
        self.default = Some(target.to_string());
        self
    }

    pub fn build(self) -> RouterFunction {
        Arc::new(move |state: &TaskState| {
            let target = self
                .conditions
                .iter()
                .find(|(condition, _)| condition(state))
                .map(|(_, target)| target.clone())
                .or_else(|| self.default.clone())?;
            if target.is_empty() {
                None
            } else {
                Some(target)
            }
        })
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Predefined condition helpers
pub mod conditions {
    use super::*;

    pub fn has_completed_images() -> impl Fn(&TaskState) -> bool + Send + Sync + 'static {
        |state: &TaskState| *state.completed_images > 0
    }

    pub fn has_completed_videos() -> impl Fn(&TaskState) -> bool + Send + Sync + 'static {
        |state: &TaskState| *state.completed_videos > 0
    }

    pub fn step_is(step: Step) -> impl Fn(&TaskState) -> bool + Send + Sync + 'static {
        move |state: &TaskState| state.step() == step
    }

    pub fn is_live() -> impl Fn(&TaskState) -> bool + Send + Sync + 'static {
        |state: &TaskState| !state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::{StateUpdate, TaskConfig};

    fn state() -> TaskState {
        TaskState::new("t".to_string(), TaskConfig::new("topic"))
    }

    #[test]
    fn test_continue_requires_one_success() {
        let router = continue_if(conditions::has_completed_images(), "generate_videos");
        let mut s = state();
        assert_eq!(router(&s), None);
        s.apply_update(StateUpdate {
            completed_images: Some(2),
            ..Default::default()
        });
        assert_eq!(router(&s).as_deref(), Some("generate_videos"));
    }

    #[test]
    fn test_continue_stops_on_failure() {
        let router = continue_if(|_| true, "next");
        let mut s = state();
        s.apply_update(StateUpdate::failed("boom"));
        assert_eq!(router(&s), None);
    }

    #[test]
    fn test_narration_router() {
        let router = narration_router("add_audio");
        let mut s = state();
        s.apply_update(StateUpdate::new().with_step(Step::AddingAudio));
        assert_eq!(router(&s).as_deref(), Some("add_audio"));
        s.apply_update(StateUpdate::new().with_step(Step::Done));
        assert_eq!(router(&s), None);
    }

    #[test]
    fn test_builder_default() {
        let router = RouterBuilder::new().when(|_| false, "never").otherwise("fallback").build();
        assert_eq!(router(&state()).as_deref(), Some("fallback"));
    }
}
