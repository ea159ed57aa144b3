//! The fixed catalog of pipeline stages.
//!
//! Each stage is described by a [`StageDef`]: the slices it needs, where its
//! output goes, whether that output is JSON or prose, and how its prompt is
//! rendered. The orchestrator only ever consults this table.

use log::warn;
use serde::de::DeserializeOwned;
use std::fmt;
use std::str::FromStr;

use crate::core::state::{ArtifactKind, Chapter, Character, Generated, Outline, Slice, StageResult};
use crate::error::StageError;
use crate::services::extract::{extract_structured, normalize_dialogue};
use crate::services::prompts::{self, PromptContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Outline,
    Characters,
    Setting,
    Twists,
    Toc,
    ChapterConflict,
    ChapterScene,
    ChapterDialogue,
    ChapterSubplot,
    ChapterKeyEvents,
    ChapterContent,
}

/// Where a stage's output is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Outline,
    Characters,
    Setting,
    Twists,
    Chapters,
    Artifact(ArtifactKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Structured,
    Text { normalize_dialogue: bool },
}

/// Resolved scope of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Global,
    Chapter(usize),
}

impl Target {
    pub fn chapter(self) -> Option<usize> {
        match self {
            Target::Global => None,
            Target::Chapter(index) => Some(index),
        }
    }
}

#[derive(Clone, Copy)]
pub struct StageDef {
    pub stage: Stage,
    pub requires: &'static [Slice],
    pub slot: Slot,
    pub output: OutputKind,
    pub prompt: fn(&PromptContext<'_>) -> String,
}

const CHAPTER_REQUIRES: &[Slice] = &[Slice::Outline, Slice::Chapters, Slice::NarrativeChoice];

fn def(
    stage: Stage,
    requires: &'static [Slice],
    slot: Slot,
    output: OutputKind,
    prompt: fn(&PromptContext<'_>) -> String,
) -> StageDef {
    StageDef {
        stage,
        requires,
        slot,
        output,
        prompt,
    }
}

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::Outline,
        Stage::Characters,
        Stage::Setting,
        Stage::Twists,
        Stage::Toc,
        Stage::ChapterKeyEvents,
        Stage::ChapterConflict,
        Stage::ChapterSubplot,
        Stage::ChapterScene,
        Stage::ChapterDialogue,
        Stage::ChapterContent,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Stage::Outline => "outline",
            Stage::Characters => "characters",
            Stage::Setting => "setting",
            Stage::Twists => "twists",
            Stage::Toc => "toc",
            Stage::ChapterConflict => "chapter_conflict",
            Stage::ChapterScene => "chapter_scene",
            Stage::ChapterDialogue => "chapter_dialogue",
            Stage::ChapterSubplot => "chapter_subplot",
            Stage::ChapterKeyEvents => "chapter_keyevents",
            Stage::ChapterContent => "chapter_content",
        }
    }

    pub fn is_chapter_scoped(self) -> bool {
        matches!(self.definition().slot, Slot::Artifact(_))
    }

    pub fn definition(self) -> StageDef {
        let prose = OutputKind::Text { normalize_dialogue: false };
        let dialogue = OutputKind::Text { normalize_dialogue: true };

        match self {
            Stage::Outline => def(self, &[], Slot::Outline, OutputKind::Structured, prompts::outline),
            Stage::Characters => def(
                self,
                &[Slice::Outline, Slice::NarrativeChoice],
                Slot::Characters,
                OutputKind::Structured,
                prompts::characters,
            ),
            Stage::Setting => def(
                self,
                &[Slice::Outline, Slice::Characters, Slice::NarrativeChoice],
                Slot::Setting,
                prose,
                prompts::setting,
            ),
            Stage::Twists => def(
                self,
                &[Slice::Outline, Slice::Characters, Slice::Setting, Slice::NarrativeChoice],
                Slot::Twists,
                prose,
                prompts::twists,
            ),
            Stage::Toc => def(
                self,
                &[
                    Slice::Outline,
                    Slice::Characters,
                    Slice::Setting,
                    Slice::Twists,
                    Slice::NarrativeChoice,
                ],
                Slot::Chapters,
                OutputKind::Structured,
                prompts::table_of_contents,
            ),
            Stage::ChapterConflict => def(
                self,
                CHAPTER_REQUIRES,
                Slot::Artifact(ArtifactKind::Conflict),
                prose,
                prompts::chapter_conflict,
            ),
            Stage::ChapterScene => def(
                self,
                CHAPTER_REQUIRES,
                Slot::Artifact(ArtifactKind::SceneDescription),
                prose,
                prompts::chapter_scene,
            ),
            Stage::ChapterDialogue => def(
                self,
                CHAPTER_REQUIRES,
                Slot::Artifact(ArtifactKind::DialogueSnippet),
                dialogue,
                prompts::chapter_dialogue,
            ),
            Stage::ChapterSubplot => def(
                self,
                CHAPTER_REQUIRES,
                Slot::Artifact(ArtifactKind::SubPlotIdeas),
                prose,
                prompts::chapter_sub_plot,
            ),
            Stage::ChapterKeyEvents => def(
                self,
                CHAPTER_REQUIRES,
                Slot::Artifact(ArtifactKind::KeyEvents),
                prose,
                prompts::chapter_key_events,
            ),
            Stage::ChapterContent => def(
                self,
                CHAPTER_REQUIRES,
                Slot::Artifact(ArtifactKind::Content),
                dialogue,
                prompts::chapter_content,
            ),
        }
    }

    /// Menu label.
    pub fn title(self) -> &'static str {
        match self {
            Stage::Outline => "Outline",
            Stage::Characters => "Characters",
            Stage::Setting => "Setting",
            Stage::Twists => "Plot twists",
            Stage::Toc => "Table of contents",
            Stage::ChapterConflict => "Conflict",
            Stage::ChapterScene => "Scene description",
            Stage::ChapterDialogue => "Dialogue snippet",
            Stage::ChapterSubplot => "Sub-plot ideas",
            Stage::ChapterKeyEvents => "Key events",
            Stage::ChapterContent => "Chapter content",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Stage {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.key() == s)
            .ok_or_else(|| StageError::Validation(format!("unknown stage '{}'", s)))
    }
}

/// A stage output plus the parse diagnostic, if the raw text had to be kept.
pub struct Interpreted {
    pub generated: Generated,
    pub parse_error: Option<StageError>,
}

impl StageDef {
    /// Checks that a chapter index is given exactly when the stage is chapter-scoped.
    pub fn target(&self, chapter: Option<usize>) -> Result<Target, StageError> {
        match (self.slot, chapter) {
            (Slot::Artifact(_), Some(index)) => Ok(Target::Chapter(index)),
            (Slot::Artifact(_), None) => Err(StageError::Validation(format!(
                "'{}' works on a single chapter; choose one",
                self.stage
            ))),
            (_, None) => Ok(Target::Global),
            (_, Some(_)) => Err(StageError::Validation(format!(
                "'{}' applies to the whole novel and takes no chapter",
                self.stage
            ))),
        }
    }

    /// Turns the raw completion into the value for this stage's slot.
    pub fn interpret(&self, raw: String, target: Target) -> Result<Interpreted, StageError> {
        let text = match self.output {
            OutputKind::Text { normalize_dialogue: true } => normalize_dialogue(&raw),
            _ => raw,
        };

        let interpreted = match (self.slot, target) {
            (Slot::Outline, _) => {
                let (value, parse_error) = self.parse_or_keep::<Outline>(text);
                Interpreted {
                    generated: Generated::Outline(value),
                    parse_error,
                }
            }
            (Slot::Characters, _) => {
                let (value, parse_error) = self.parse_or_keep::<Vec<Character>>(text);
                if let StageResult::Parsed(characters) = &value {
                    let count = characters.len();
                    if !(3..=5).contains(&count) {
                        warn!("expected 3-5 characters, got {}", count);
                    }
                }
                Interpreted {
                    generated: Generated::Characters(value),
                    parse_error,
                }
            }
            (Slot::Chapters, _) => {
                let (value, parse_error) = self.parse_or_keep::<Vec<Chapter>>(text);
                Interpreted {
                    generated: Generated::Chapters(value),
                    parse_error,
                }
            }
            (Slot::Setting, _) => Interpreted {
                generated: Generated::Setting(text),
                parse_error: None,
            },
            (Slot::Twists, _) => Interpreted {
                generated: Generated::Twists(text),
                parse_error: None,
            },
            (Slot::Artifact(kind), Target::Chapter(index)) => Interpreted {
                generated: Generated::Artifact { kind, index, text },
                parse_error: None,
            },
            (Slot::Artifact(_), Target::Global) => {
                return Err(StageError::Validation(format!(
                    "'{}' works on a single chapter; choose one",
                    self.stage
                )))
            }
        };
        Ok(interpreted)
    }

    fn parse_or_keep<T: DeserializeOwned>(&self, raw: String) -> (StageResult<T>, Option<StageError>) {
        match extract_structured(&raw) {
            Ok(value) => (StageResult::Parsed(value), None),
            Err(source) => {
                warn!("'{}' response did not parse ({}), keeping raw text", self.stage, source);
                let error = StageError::Parse {
                    stage: self.stage,
                    source,
                    raw: raw.clone(),
                };
                (StageResult::RawFallback { raw_content: raw }, Some(error))
            }
        }
    }
}
