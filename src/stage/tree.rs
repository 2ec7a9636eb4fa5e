//! The stage tree.

use log::{debug, error};

use crate::error::StageError;
use crate::stage::hooks::{FrameContext, Group, StageHooks, StageKind, StartContext};

/// Where a stage is in its lifecycle.
///
/// ```text
/// Uninitialized ──start──▶ Started ──▶ PreRendering ──▶ Rendering ──▶ PostRendering
///                                           ▲                              │
///                                           └────────── next frame ────────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageState {
    Uninitialized,
    Started,
    PreRendering,
    Rendering,
    PostRendering,
}

/// A node of the stage tree: hooks, ordered children and an enabled flag.
///
/// A frame of a stage runs its pre-render hook, then its render hook followed
/// by the full frame of each enabled child in registration order, then its
/// post-render hook:
///
/// ```text
/// root.pre_render
/// root.render
///   ├─ a.pre_render, a.render (a's children...), a.post_render
///   └─ b.pre_render, b.render (b's children...), b.post_render
/// root.post_render
/// ```
///
/// Disabled stages and their subtrees are skipped entirely. A stage that was
/// disabled when its parent started is started the first frame it is enabled.
pub struct RenderStage {
    hooks: Box<dyn StageHooks>,
    children: Vec<RenderStage>,
    enabled: bool,
    state: StageState,
}

impl RenderStage {
    pub fn new<H: StageHooks + 'static>(hooks: H) -> Self {
        Self {
            hooks: Box::new(hooks),
            children: Vec::new(),
            enabled: true,
            state: StageState::Uninitialized,
        }
    }

    /// A stage with no behavior of its own.
    pub fn group(name: impl Into<String>) -> Self {
        Self::new(Group::new(name))
    }

    /// Appends a child, builder style.
    pub fn with_child(mut self, child: RenderStage) -> Self {
        self.children.push(child);
        self
    }

    /// Marks the stage disabled, builder style.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Appends a child and returns it.
    pub fn add_child(&mut self, child: RenderStage) -> &mut RenderStage {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn name(&self) -> &str {
        self.hooks.name()
    }

    pub fn kind(&self) -> StageKind {
        self.hooks.kind()
    }

    pub fn hooks(&self) -> &dyn StageHooks {
        self.hooks.as_ref()
    }

    pub fn children(&self) -> &[RenderStage] {
        &self.children
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state != StageState::Uninitialized
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Takes effect from the next frame of this stage.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// The first stage named `name` in depth-first order, this stage included.
    /// Post-process generators are searched before children.
    pub fn find(&self, name: &str) -> Option<&RenderStage> {
        if self.name() == name {
            return Some(self);
        }
        if let Some(found) = self.hooks.generator().and_then(|g| g.find(name)) {
            return Some(found);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut RenderStage> {
        if self.name() == name {
            return Some(self);
        }
        if self.hooks.generator().is_some_and(|g| g.find(name).is_some()) {
            return self.hooks.generator_mut().and_then(|g| g.find_mut(name));
        }
        self.children.iter_mut().find_map(|child| child.find_mut(name))
    }

    /// Starts this stage and its enabled children. On a stage that is already
    /// started, only the enabled children that have not started yet are
    /// started, so a start retried after a failure picks up where it stopped.
    ///
    /// # Errors
    ///
    /// Returns the first configuration failure of this subtree. Stages started
    /// before the failure stay started.
    pub fn start(&mut self, cx: &mut StartContext<'_>) -> Result<(), StageError> {
        if !self.is_started() {
            self.hooks.on_start(cx, &mut self.children)?;
            self.state = StageState::Started;
        }

        let kind = self.hooks.kind();
        let deferred = self.hooks.deferred();
        for child in self.children.iter_mut().filter(|child| child.enabled) {
            child.start(&mut cx.nested(kind, deferred))?;
        }
        Ok(())
    }

    /// Runs a full frame of this stage: pre-render, render, post-render.
    ///
    /// Does nothing while disabled. A stage that has not started yet is started
    /// first; if that fails the error is logged and the stage disabled.
    pub fn frame(&mut self, cx: &mut FrameContext<'_>) {
        if !self.enabled {
            return;
        }

        if !self.is_started() {
            debug!("starting stage '{}' on first enabled frame", self.name());
            if let Err(err) = self.start(&mut cx.as_start()) {
                error!("stage '{}' failed to start: {}", self.name(), err);
                self.enabled = false;
                return;
            }
        }

        self.pre_render(cx);
        self.render(cx);
        self.post_render(cx);
    }

    pub fn pre_render(&mut self, cx: &mut FrameContext<'_>) {
        self.state = StageState::PreRendering;
        self.hooks.on_pre_render(cx);
    }

    pub fn render(&mut self, cx: &mut FrameContext<'_>) {
        self.state = StageState::Rendering;
        self.hooks.on_render(cx);

        let kind = self.hooks.kind();
        let deferred = self.hooks.deferred();
        for child in &mut self.children {
            child.frame(&mut cx.nested(kind, deferred));
        }
    }

    pub fn post_render(&mut self, cx: &mut FrameContext<'_>) {
        self.state = StageState::PostRendering;
        self.hooks.on_post_render(cx);
    }
}

impl std::fmt::Debug for RenderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderStage")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("enabled", &self.enabled)
            .field("state", &self.state)
            .field("children", &self.children)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingContext;
    use crate::camera::Camera;
    use crate::options::EngineOptions;
    use crate::scene::EcsScene;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Logs each phase as "name.phase".
    struct Probe {
        name: String,
        log: Log,
        fail_start: bool,
    }

    impl Probe {
        fn stage(name: &str, log: &Log) -> RenderStage {
            RenderStage::new(Probe {
                name: name.to_string(),
                log: log.clone(),
                fail_start: false,
            })
        }

        fn failing(name: &str, log: &Log) -> RenderStage {
            RenderStage::new(Probe {
                name: name.to_string(),
                log: log.clone(),
                fail_start: true,
            })
        }

        fn push(&self, phase: &str) {
            self.log.borrow_mut().push(format!("{}.{}", self.name, phase));
        }
    }

    impl StageHooks for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_start(
            &mut self,
            _cx: &mut StartContext<'_>,
            _children: &mut [RenderStage],
        ) -> Result<(), StageError> {
            self.push("start");
            if self.fail_start {
                return Err(StageError::MissingProgram {
                    stage: self.name.clone(),
                    program: "missing".into(),
                });
            }
            Ok(())
        }

        fn on_pre_render(&mut self, _cx: &mut FrameContext<'_>) {
            self.push("pre");
        }

        fn on_render(&mut self, _cx: &mut FrameContext<'_>) {
            self.push("render");
        }

        fn on_post_render(&mut self, _cx: &mut FrameContext<'_>) {
            self.push("post");
        }
    }

    struct Harness {
        gfx: RecordingContext,
        scene: EcsScene,
        camera: Camera,
        options: EngineOptions,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                gfx: RecordingContext::new(),
                scene: EcsScene::new(),
                camera: Camera::new(),
                options: EngineOptions::default(),
            }
        }

        fn start(&mut self, stage: &mut RenderStage) -> Result<(), StageError> {
            stage.start(&mut StartContext::new(
                &mut self.gfx,
                &self.options,
                &self.camera,
            ))
        }

        fn frame(&mut self, stage: &mut RenderStage) {
            stage.frame(&mut FrameContext::new(
                &mut self.gfx,
                &self.scene,
                &mut self.camera,
                &self.options,
                &[],
            ));
        }
    }

    fn take(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.borrow_mut())
    }

    #[test]
    fn phases_run_depth_first_in_registration_order() {
        let log = Log::default();
        let mut root = Probe::stage("root", &log)
            .with_child(Probe::stage("a", &log).with_child(Probe::stage("a1", &log)))
            .with_child(Probe::stage("b", &log));
        let mut harness = Harness::new();

        harness.start(&mut root).unwrap();
        assert_eq!(take(&log), ["root.start", "a.start", "a1.start", "b.start"]);

        harness.frame(&mut root);
        assert_eq!(
            take(&log),
            [
                "root.pre",
                "root.render",
                "a.pre",
                "a.render",
                "a1.pre",
                "a1.render",
                "a1.post",
                "a.post",
                "b.pre",
                "b.render",
                "b.post",
                "root.post",
            ]
        );
        assert_eq!(root.state(), StageState::PostRendering);
    }

    #[test]
    fn disabled_subtrees_are_skipped() {
        let log = Log::default();
        let mut root = Probe::stage("root", &log)
            .with_child(Probe::stage("a", &log).with_child(Probe::stage("a1", &log)))
            .with_child(Probe::stage("b", &log));
        let mut harness = Harness::new();
        harness.start(&mut root).unwrap();
        take(&log);

        root.find_mut("a").unwrap().disable();
        harness.frame(&mut root);

        let entries = take(&log);
        assert!(entries.iter().all(|e| !e.starts_with("a")));
        assert!(entries.contains(&"b.render".to_string()));
    }

    #[test]
    fn disabled_children_start_on_first_enabled_frame() {
        let log = Log::default();
        let mut root = Probe::stage("root", &log).with_child(Probe::stage("late", &log).disabled());
        let mut harness = Harness::new();

        harness.start(&mut root).unwrap();
        assert_eq!(take(&log), ["root.start"]);
        assert!(!root.find("late").unwrap().is_started());

        root.find_mut("late").unwrap().enable();
        harness.frame(&mut root);

        assert_eq!(
            take(&log),
            [
                "root.pre",
                "root.render",
                "late.start",
                "late.pre",
                "late.render",
                "late.post",
                "root.post",
            ]
        );
    }

    #[test]
    fn failed_lazy_start_disables_the_stage() {
        let log = Log::default();
        let mut root =
            Probe::stage("root", &log).with_child(Probe::failing("broken", &log).disabled());
        let mut harness = Harness::new();
        harness.start(&mut root).unwrap();
        root.find_mut("broken").unwrap().enable();

        harness.frame(&mut root);
        harness.frame(&mut root);

        let entries = take(&log);
        assert_eq!(entries.iter().filter(|e| *e == "broken.start").count(), 1);
        assert!(!root.find("broken").unwrap().is_enabled());
    }

    #[test]
    fn start_failures_propagate() {
        let log = Log::default();
        let mut root = Probe::stage("root", &log).with_child(Probe::failing("broken", &log));
        let mut harness = Harness::new();

        let err = harness.start(&mut root).unwrap_err();
        assert!(matches!(err, StageError::MissingProgram { ref stage, .. } if stage == "broken"));
    }

    #[test]
    fn retried_start_resumes_at_the_failed_child() {
        let log = Log::default();
        let mut root = Probe::stage("root", &log)
            .with_child(Probe::stage("a", &log))
            .with_child(Probe::failing("broken", &log));
        let mut harness = Harness::new();

        assert!(harness.start(&mut root).is_err());
        assert!(harness.start(&mut root).is_err());

        assert_eq!(
            take(&log),
            ["root.start", "a.start", "broken.start", "broken.start"]
        );
        assert!(root.find("a").unwrap().is_started());
        assert!(!root.find("broken").unwrap().is_started());
    }

    #[test]
    fn start_is_idempotent() {
        let log = Log::default();
        let mut root = Probe::stage("root", &log);
        let mut harness = Harness::new();

        harness.start(&mut root).unwrap();
        harness.start(&mut root).unwrap();

        assert_eq!(take(&log), ["root.start"]);
    }
}
