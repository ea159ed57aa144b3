use anyhow::Context;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::core::io::Storage;
use crate::core::narrative::{PointOfView, Technique};
use crate::core::state::{
    Chapter, Generated, PipelineState, Project, SliceStatus, StageResult, MAX_CHAPTERS,
    MIN_CHAPTERS,
};
use crate::error::{MissingSlice, StageError};
use crate::services::llm::LlmClient;
use crate::services::prompts::PromptContext;
use crate::services::stages::{OutputKind, Slot, Stage, Target};

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The output was parsed and written to its slice.
    Committed,
    /// The output did not parse; the raw text was stored and the last error explains why.
    RawFallback,
}

/// Drives one session's pipeline. The only writer of its [`PipelineState`].
pub struct WorkflowManager {
    llm: Box<dyn LlmClient>,
    model: String,
    state: PipelineState,
    storage: Arc<dyn Storage>,
}

impl WorkflowManager {
    pub fn new(llm: Box<dyn LlmClient>, model: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            llm,
            model: model.into(),
            state: PipelineState::new(),
            storage,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_theme(&mut self, theme: impl Into<String>) {
        self.state.set_theme(theme);
    }

    /// Stored as given; the range is enforced when the table of contents runs.
    pub fn set_chapter_count(&mut self, count: u32) {
        self.state.set_chapter_count(count);
    }

    pub fn select_technique(&mut self, technique: Technique) {
        self.state.narrative_mut().select_technique(technique);
    }

    pub fn select_point_of_view(&mut self, pov: PointOfView) -> Result<(), StageError> {
        self.state.narrative_mut().select_point_of_view(pov)
    }

    /// Validates scope and prerequisites of a stage without running it.
    pub fn check(&self, stage: Stage, chapter: Option<usize>) -> Result<Target, StageError> {
        let def = stage.definition();
        let target = def.target(chapter)?;

        let missing: Vec<MissingSlice> = def
            .requires
            .iter()
            .filter_map(|&slice| match self.state.slice_status(slice) {
                SliceStatus::Ready => None,
                SliceStatus::Missing => Some(MissingSlice { slice, unparsed: false }),
                SliceStatus::Unparsed => Some(MissingSlice { slice, unparsed: true }),
            })
            .collect();
        if !missing.is_empty() {
            return Err(StageError::Prerequisite { stage, missing });
        }

        if let Target::Chapter(index) = target {
            let len = self.state.chapters().map_or(0, <[Chapter]>::len);
            if index >= len {
                return Err(StageError::ChapterOutOfRange { stage, index, len });
            }
        }

        if stage == Stage::Toc {
            let count = self.state.inputs().chapter_count;
            if !(MIN_CHAPTERS..=MAX_CHAPTERS).contains(&count) {
                return Err(StageError::Validation(format!(
                    "The number of chapters must be between {} and {}, got {}",
                    MIN_CHAPTERS, MAX_CHAPTERS, count
                )));
            }
        }

        Ok(target)
    }

    /// Runs one stage: check, prompt, complete, interpret, commit.
    ///
    /// The last error is cleared first and set again by any failure or raw
    /// fallback. On error no slice is written.
    pub async fn run_stage(
        &mut self,
        stage: Stage,
        chapter: Option<usize>,
    ) -> Result<StageOutcome, StageError> {
        self.state.clear_error();

        let result = self.execute(stage, chapter).await;
        if let Err(e) = &result {
            warn!("Stage '{}' failed: {}", stage, e);
            self.state.set_error(e.to_string());
        }
        result
    }

    async fn execute(
        &mut self,
        stage: Stage,
        chapter: Option<usize>,
    ) -> Result<StageOutcome, StageError> {
        let def = stage.definition();
        let target = self.check(stage, chapter)?;

        let _busy = self
            .state
            .busy()
            .try_acquire(stage)
            .map_err(|running| StageError::Busy {
                requested: stage,
                running,
            })?;

        let prompt = (def.prompt)(&PromptContext::new(&self.state, target.chapter()));
        match target {
            Target::Global => info!("Running stage '{}'", stage),
            Target::Chapter(index) => info!("Running stage '{}' for chapter {}", stage, index + 1),
        }
        debug!("Prompt for '{}': {} chars", stage, prompt.chars().count());

        let raw = self
            .llm
            .complete(&self.model, &prompt)
            .await
            .map_err(|e| StageError::Transport {
                stage,
                message: format!("{:#}", e),
            })?;
        debug!("Response for '{}': {} chars", stage, raw.chars().count());

        let interpreted = def.interpret(raw, target)?;
        if let Generated::Chapters(StageResult::Parsed(chapters)) = &interpreted.generated {
            let requested = self.state.inputs().chapter_count as usize;
            if chapters.len() != requested {
                warn!(
                    "Asked for {} chapters, the table of contents has {}",
                    requested,
                    chapters.len()
                );
            }
        }

        self.state.commit(interpreted.generated);

        match interpreted.parse_error {
            Some(err) => {
                self.state.set_error(err.to_string());
                Ok(StageOutcome::RawFallback)
            }
            None => {
                info!("Stage '{}' committed", stage);
                Ok(StageOutcome::Committed)
            }
        }
    }

    /// Raw text kept for a structured stage whose output did not parse.
    pub fn raw_response(&self, stage: Stage) -> Option<&str> {
        let project = self.state.project();
        match stage.definition().slot {
            Slot::Outline => project.outline.as_ref().and_then(StageResult::raw_content),
            Slot::Characters => project.characters.as_ref().and_then(StageResult::raw_content),
            Slot::Chapters => project.chapters.as_ref().and_then(StageResult::raw_content),
            _ => None,
        }
    }

    /// Commits hand-corrected output for a structured stage without calling the service.
    pub fn recover(&mut self, stage: Stage, text: &str) -> Result<(), StageError> {
        self.state.clear_error();

        let result = self.apply_recovery(stage, text);
        if let Err(e) = &result {
            self.state.set_error(e.to_string());
        }
        result
    }

    fn apply_recovery(&mut self, stage: Stage, text: &str) -> Result<(), StageError> {
        let def = stage.definition();
        if def.output != OutputKind::Structured {
            return Err(StageError::Validation(format!(
                "'{}' produces free text; there is nothing to recover",
                stage
            )));
        }

        let interpreted = def.interpret(text.to_string(), Target::Global)?;
        if let Some(err) = interpreted.parse_error {
            return Err(err);
        }

        self.state.commit(interpreted.generated);
        info!("Stage '{}' recovered from edited text", stage);
        Ok(())
    }

    /// Writes the project document as JSON.
    pub async fn export(&self, path: &str) -> anyhow::Result<()> {
        let content = self.state.project().to_json()?;
        self.storage.write(path, content.as_bytes()).await?;
        info!("Exported project to {}", path);
        Ok(())
    }

    /// Replaces the project with a previously exported document.
    pub async fn import(&mut self, path: &str) -> anyhow::Result<()> {
        if !self.storage.exists(path).await? {
            anyhow::bail!("No project file at {}", path);
        }
        let bytes = self.storage.read(path).await?;
        let content = String::from_utf8(bytes).context("Project file is not valid UTF-8")?;
        let project = Project::from_json(&content)
            .with_context(|| format!("Failed to parse project file {}", path))?;

        self.state.replace_project(project);
        self.state.clear_error();
        info!("Imported project from {}", path);
        Ok(())
    }
}
