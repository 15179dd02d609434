//! Recursive scene visibility and transition-aware activation tracking.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// One place where a scene is nested as a source inside another scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedUse {
    pub parent: String,
    /// Whether the nested source item is enabled in the parent.
    pub visible: bool,
}

/// Read-only view of the host's scene graph.
pub trait SceneTree {
    /// Scene currently on the program output.
    fn program_scene(&self) -> Option<String>;
    /// Every scene that nests `scene` as a source.
    fn nested_in(&self, scene: &str) -> Vec<NestedUse>;
}

fn visible_from(tree: &dyn SceneTree, scene: &str, program: &str, seen: &mut BTreeSet<String>) -> bool {
    if scene == program {
        return true;
    }
    if !seen.insert(scene.to_string()) {
        return false;
    }
    tree.nested_in(scene)
        .into_iter()
        .filter(|nested| nested.visible)
        .any(|nested| visible_from(tree, &nested.parent, program, seen))
}

/// `scene` is on program directly, or nested visibly in something that is.
pub fn is_scene_visible(tree: &dyn SceneTree, scene: &str) -> bool {
    let Some(program) = tree.program_scene() else {
        return false;
    };
    is_scene_visible_under(tree, scene, &program)
}

/// Same check against a hypothetical program scene, e.g. a transition target.
pub fn is_scene_visible_under(tree: &dyn SceneTree, scene: &str, program: &str) -> bool {
    visible_from(tree, scene, program, &mut BTreeSet::new())
}

/// Turns raw visibility plus transition notices into "should be playing".
///
/// Leaving the scene through a transition keeps it active until the transition
/// has run its course; becoming visible activates it immediately.
#[derive(Debug, Default)]
pub struct SceneActivation {
    was_visible: bool,
    deferred_stop_at: Option<Instant>,
}

impl SceneActivation {
    /// A transition just started and will take `duration`.
    pub fn on_transition(&mut self, visible_after: bool, duration: Duration, now: Instant) {
        if visible_after {
            self.deferred_stop_at = None;
        } else if self.was_visible || self.deferred_stop_at.is_some() {
            self.deferred_stop_at = Some(now + duration);
        }
        self.was_visible = visible_after;
    }

    /// Effective activation for this tick.
    pub fn observe(&mut self, visible_now: bool, now: Instant) -> bool {
        if visible_now {
            self.deferred_stop_at = None;
            self.was_visible = true;
            return true;
        }
        self.was_visible = false;
        match self.deferred_stop_at {
            Some(deadline) if now < deadline => true,
            Some(_) => {
                self.deferred_stop_at = None;
                false
            }
            None => false,
        }
    }

    pub fn deferred_stop_pending(&self) -> bool {
        self.deferred_stop_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{is_scene_visible, is_scene_visible_under, NestedUse, SceneActivation, SceneTree};
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Graph {
        program: Option<String>,
        /// child -> uses
        nests: BTreeMap<String, Vec<NestedUse>>,
    }

    impl Graph {
        fn nest(&mut self, parent: &str, child: &str, visible: bool) {
            self.nests.entry(child.to_string()).or_default().push(NestedUse {
                parent: parent.to_string(),
                visible,
            });
        }
    }

    impl SceneTree for Graph {
        fn program_scene(&self) -> Option<String> {
            self.program.clone()
        }

        fn nested_in(&self, scene: &str) -> Vec<NestedUse> {
            self.nests.get(scene).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn test_direct_and_nested_visibility() {
        let mut graph = Graph {
            program: Some("Show".to_string()),
            ..Graph::default()
        };
        graph.nest("Show", "Wrapper", true);
        graph.nest("Wrapper", "Music", true);
        graph.nest("Backstage", "Other", true);

        assert!(is_scene_visible(&graph, "Show"));
        assert!(is_scene_visible(&graph, "Music"));
        assert!(!is_scene_visible(&graph, "Other"));
    }

    #[test]
    fn test_hidden_nested_source_hides_the_scene() {
        let mut graph = Graph {
            program: Some("Show".to_string()),
            ..Graph::default()
        };
        graph.nest("Show", "Music", false);
        assert!(!is_scene_visible(&graph, "Music"));

        graph.nest("Show", "Music", true);
        assert!(is_scene_visible(&graph, "Music"));
    }

    #[test]
    fn test_nesting_cycles_terminate() {
        let mut graph = Graph {
            program: Some("Elsewhere".to_string()),
            ..Graph::default()
        };
        graph.nest("B", "A", true);
        graph.nest("A", "B", true);
        assert!(!is_scene_visible(&graph, "A"));
    }

    #[test]
    fn test_no_program_scene_means_invisible() {
        assert!(!is_scene_visible(&Graph::default(), "Music"));
    }

    #[test]
    fn test_visibility_under_transition_target() {
        let mut graph = Graph {
            program: Some("Intro".to_string()),
            ..Graph::default()
        };
        graph.nest("Show", "Music", true);
        assert!(!is_scene_visible(&graph, "Music"));
        assert!(is_scene_visible_under(&graph, "Music", "Show"));
        assert!(!is_scene_visible_under(&graph, "Music", "Intro"));
    }

    #[test]
    fn test_transition_out_defers_the_stop() {
        let start = Instant::now();
        let mut activation = SceneActivation::default();
        assert!(activation.observe(true, start));

        activation.on_transition(false, Duration::from_millis(800), start);
        assert!(activation.observe(false, start + Duration::from_millis(500)));
        assert!(activation.deferred_stop_pending());
        assert!(!activation.observe(false, start + Duration::from_millis(800)));
        assert!(!activation.deferred_stop_pending());
    }

    #[test]
    fn test_transition_in_activates_immediately_and_cancels_pending_stop() {
        let start = Instant::now();
        let mut activation = SceneActivation::default();
        activation.observe(true, start);
        activation.on_transition(false, Duration::from_secs(2), start);
        activation.on_transition(true, Duration::from_secs(2), start + Duration::from_millis(100));
        assert!(!activation.deferred_stop_pending());
        assert!(activation.observe(true, start + Duration::from_millis(100)));
    }

    #[test]
    fn test_raw_loss_of_visibility_without_transition_stops_at_once() {
        let start = Instant::now();
        let mut activation = SceneActivation::default();
        activation.observe(true, start);
        assert!(!activation.observe(false, start + Duration::from_millis(10)));
    }
}
