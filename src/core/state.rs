use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::narrative::NarrativeChoice;
use crate::services::stages::Stage;

pub const MIN_CHAPTERS: u32 = 9;
pub const MAX_CHAPTERS: u32 = 30;
pub const DEFAULT_CHAPTERS: u32 = 25;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Outline {
    pub synthesis: String,
    pub description: String,
    pub plot: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Character {
    pub name: String,
    pub role: String,
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Chapter {
    pub title: String,
    pub description: String,
}

/// Outcome of a structured stage: the parsed value, or the untouched response
/// text when it could not be parsed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum StageResult<T> {
    Parsed(T),
    RawFallback {
        #[serde(rename = "rawContent")]
        raw_content: String,
    },
}

impl<T> StageResult<T> {
    pub fn parsed(&self) -> Option<&T> {
        match self {
            StageResult::Parsed(value) => Some(value),
            StageResult::RawFallback { .. } => None,
        }
    }

    pub fn raw_content(&self) -> Option<&str> {
        match self {
            StageResult::Parsed(_) => None,
            StageResult::RawFallback { raw_content } => Some(raw_content),
        }
    }
}

/// State slices a stage can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slice {
    Outline,
    Characters,
    Setting,
    Twists,
    Chapters,
    NarrativeChoice,
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Slice::Outline => "outline",
            Slice::Characters => "characters",
            Slice::Setting => "setting",
            Slice::Twists => "plot twists",
            Slice::Chapters => "table of contents",
            Slice::NarrativeChoice => "narrative technique and point of view",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceStatus {
    Missing,
    Unparsed,
    Ready,
}

/// The per-chapter artifact maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Conflict,
    SceneDescription,
    DialogueSnippet,
    SubPlotIdeas,
    KeyEvents,
    Content,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 6] = [
        ArtifactKind::KeyEvents,
        ArtifactKind::Conflict,
        ArtifactKind::SubPlotIdeas,
        ArtifactKind::SceneDescription,
        ArtifactKind::DialogueSnippet,
        ArtifactKind::Content,
    ];

    /// The five artifacts that prepare a chapter before its full text.
    pub const DETAILS: [ArtifactKind; 5] = [
        ArtifactKind::KeyEvents,
        ArtifactKind::Conflict,
        ArtifactKind::SubPlotIdeas,
        ArtifactKind::SceneDescription,
        ArtifactKind::DialogueSnippet,
    ];

    pub fn title(self) -> &'static str {
        match self {
            ArtifactKind::Conflict => "Conflict",
            ArtifactKind::SceneDescription => "Scene description",
            ArtifactKind::DialogueSnippet => "Dialogue snippet",
            ArtifactKind::SubPlotIdeas => "Sub-plot ideas",
            ArtifactKind::KeyEvents => "Key events",
            ArtifactKind::Content => "Chapter content",
        }
    }
}

/// The persisted project document. Field names are the export keys.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct Project {
    pub outline: Option<StageResult<Outline>>,
    pub characters: Option<StageResult<Vec<Character>>>,
    pub setting: Option<String>,
    pub plot_twist: Option<String>,
    pub chapters: Option<StageResult<Vec<Chapter>>>,
    #[serde(default)]
    pub chapter_contents: BTreeMap<usize, String>,
    #[serde(default)]
    pub chapter_conflicts: BTreeMap<usize, String>,
    #[serde(default)]
    pub chapter_scene_descriptions: BTreeMap<usize, String>,
    #[serde(default)]
    pub chapter_dialogue_snippets: BTreeMap<usize, String>,
    #[serde(default)]
    pub chapter_sub_plot_ideas: BTreeMap<usize, String>,
    #[serde(default)]
    pub chapter_key_events: BTreeMap<usize, String>,
}

impl Project {
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        Ok(content)
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    pub fn artifacts(&self, kind: ArtifactKind) -> &BTreeMap<usize, String> {
        match kind {
            ArtifactKind::Conflict => &self.chapter_conflicts,
            ArtifactKind::SceneDescription => &self.chapter_scene_descriptions,
            ArtifactKind::DialogueSnippet => &self.chapter_dialogue_snippets,
            ArtifactKind::SubPlotIdeas => &self.chapter_sub_plot_ideas,
            ArtifactKind::KeyEvents => &self.chapter_key_events,
            ArtifactKind::Content => &self.chapter_contents,
        }
    }

    fn artifacts_mut(&mut self, kind: ArtifactKind) -> &mut BTreeMap<usize, String> {
        match kind {
            ArtifactKind::Conflict => &mut self.chapter_conflicts,
            ArtifactKind::SceneDescription => &mut self.chapter_scene_descriptions,
            ArtifactKind::DialogueSnippet => &mut self.chapter_dialogue_snippets,
            ArtifactKind::SubPlotIdeas => &mut self.chapter_sub_plot_ideas,
            ArtifactKind::KeyEvents => &mut self.chapter_key_events,
            ArtifactKind::Content => &mut self.chapter_contents,
        }
    }

    fn clear_artifacts(&mut self) {
        for kind in ArtifactKind::ALL {
            self.artifacts_mut(kind).clear();
        }
    }
}

/// What the user typed or picked, as opposed to what was generated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInputs {
    pub theme: String,
    pub chapter_count: u32,
    pub narrative: NarrativeChoice,
}

impl Default for SessionInputs {
    fn default() -> Self {
        Self {
            theme: String::new(),
            chapter_count: DEFAULT_CHAPTERS,
            narrative: NarrativeChoice::default(),
        }
    }
}

/// A parsed stage output, ready to be written into its slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generated {
    Outline(StageResult<Outline>),
    Characters(StageResult<Vec<Character>>),
    Setting(String),
    Twists(String),
    Chapters(StageResult<Vec<Chapter>>),
    Artifact {
        kind: ArtifactKind,
        index: usize,
        text: String,
    },
}

/// Stages currently in flight. Clones share the same set.
#[derive(Debug, Default, Clone)]
pub struct BusyTracker {
    inner: Arc<Mutex<HashSet<Stage>>>,
}

impl BusyTracker {
    /// Marks `stage` busy unless any stage already is; the error carries the
    /// running stage.
    pub fn try_acquire(&self, stage: Stage) -> Result<BusyGuard, Stage> {
        let mut busy = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = busy.iter().next() {
            return Err(*running);
        }
        busy.insert(stage);
        Ok(BusyGuard {
            tracker: self.clone(),
            stage,
        })
    }

    pub fn running(&self) -> Vec<Stage> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    fn release(&self, stage: Stage) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&stage);
    }
}

/// Releases its stage from the tracker when dropped.
#[derive(Debug)]
pub struct BusyGuard {
    tracker: BusyTracker,
    stage: Stage,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.tracker.release(self.stage);
    }
}

#[derive(Debug, Default)]
pub struct PipelineState {
    project: Project,
    inputs: SessionInputs,
    last_error: Option<String>,
    busy: BusyTracker,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn inputs(&self) -> &SessionInputs {
        &self.inputs
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn busy(&self) -> &BusyTracker {
        &self.busy
    }

    pub fn outline(&self) -> Option<&Outline> {
        self.project.outline.as_ref().and_then(StageResult::parsed)
    }

    pub fn characters(&self) -> Option<&[Character]> {
        self.project
            .characters
            .as_ref()
            .and_then(StageResult::parsed)
            .map(Vec::as_slice)
    }

    pub fn setting(&self) -> Option<&str> {
        non_blank(self.project.setting.as_deref())
    }

    pub fn plot_twist(&self) -> Option<&str> {
        non_blank(self.project.plot_twist.as_deref())
    }

    pub fn chapters(&self) -> Option<&[Chapter]> {
        self.project
            .chapters
            .as_ref()
            .and_then(StageResult::parsed)
            .map(Vec::as_slice)
    }

    pub fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.chapters().and_then(|chapters| chapters.get(index))
    }

    pub fn artifact(&self, kind: ArtifactKind, index: usize) -> Option<&str> {
        non_blank(self.project.artifacts(kind).get(&index).map(String::as_str))
    }

    /// All five preparatory artifacts exist for the chapter.
    pub fn chapter_details_complete(&self, index: usize) -> bool {
        ArtifactKind::DETAILS
            .iter()
            .all(|kind| self.artifact(*kind, index).is_some())
    }

    pub fn slice_status(&self, slice: Slice) -> SliceStatus {
        match slice {
            Slice::Outline => structured_status(self.project.outline.as_ref(), |_| true),
            Slice::Characters => {
                structured_status(self.project.characters.as_ref(), |c| !c.is_empty())
            }
            Slice::Chapters => {
                structured_status(self.project.chapters.as_ref(), |c| !c.is_empty())
            }
            Slice::Setting => text_status(self.setting()),
            Slice::Twists => text_status(self.plot_twist()),
            Slice::NarrativeChoice => {
                if self.inputs.narrative.is_ready() {
                    SliceStatus::Ready
                } else {
                    SliceStatus::Missing
                }
            }
        }
    }

    pub(crate) fn set_theme(&mut self, theme: impl Into<String>) {
        self.inputs.theme = theme.into();
    }

    pub(crate) fn set_chapter_count(&mut self, count: u32) {
        self.inputs.chapter_count = count;
    }

    pub(crate) fn narrative_mut(&mut self) -> &mut NarrativeChoice {
        &mut self.inputs.narrative
    }

    pub(crate) fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub(crate) fn set_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub(crate) fn replace_project(&mut self, project: Project) {
        self.project = project;
    }

    /// Writes one stage output into its slice. A new chapter list invalidates
    /// every per-chapter artifact.
    pub(crate) fn commit(&mut self, generated: Generated) {
        match generated {
            Generated::Outline(outline) => self.project.outline = Some(outline),
            Generated::Characters(characters) => self.project.characters = Some(characters),
            Generated::Setting(text) => self.project.setting = Some(text),
            Generated::Twists(text) => self.project.plot_twist = Some(text),
            Generated::Chapters(chapters) => {
                self.project.chapters = Some(chapters);
                self.project.clear_artifacts();
            }
            Generated::Artifact { kind, index, text } => {
                self.project.artifacts_mut(kind).insert(index, text);
            }
        }
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}

fn structured_status<T>(value: Option<&StageResult<T>>, non_empty: impl Fn(&T) -> bool) -> SliceStatus {
    match value {
        None => SliceStatus::Missing,
        Some(StageResult::RawFallback { .. }) => SliceStatus::Unparsed,
        Some(StageResult::Parsed(v)) if non_empty(v) => SliceStatus::Ready,
        Some(StageResult::Parsed(_)) => SliceStatus::Missing,
    }
}

fn text_status(text: Option<&str>) -> SliceStatus {
    if text.is_some() {
        SliceStatus::Ready
    } else {
        SliceStatus::Missing
    }
}
