use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{CustomType, InquireError, Select, Text};
use std::fmt;
use std::time::Duration;

use crate::core::narrative::Technique;
use crate::core::state::{PipelineState, Slice, SliceStatus, MAX_CHAPTERS, MIN_CHAPTERS};
use crate::services::stages::{OutputKind, Slot, Stage};
use crate::services::workflow::{StageOutcome, WorkflowManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    SetTheme,
    SetChapterCount,
    ChooseNarrative,
    RunStage,
    RunChapterStage,
    ShowProject,
    Recover,
    Export,
    Import,
    Quit,
}

impl Action {
    const ALL: [Action; 10] = [
        Action::RunStage,
        Action::RunChapterStage,
        Action::SetTheme,
        Action::SetChapterCount,
        Action::ChooseNarrative,
        Action::ShowProject,
        Action::Recover,
        Action::Export,
        Action::Import,
        Action::Quit,
    ];
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::SetTheme => "Set theme",
            Action::SetChapterCount => "Set number of chapters",
            Action::ChooseNarrative => "Choose narrative technique",
            Action::RunStage => "Generate novel element",
            Action::RunChapterStage => "Generate chapter element",
            Action::ShowProject => "Show project",
            Action::Recover => "Fix an unparsed response",
            Action::Export => "Export project",
            Action::Import => "Import project",
            Action::Quit => "Quit",
        };
        f.write_str(label)
    }
}

/// A menu entry that shows a label but yields a value.
struct Labeled<T> {
    value: T,
    label: String,
}

impl<T> fmt::Display for Labeled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

fn labeled<T>(value: T, label: impl Into<String>) -> Labeled<T> {
    Labeled {
        value,
        label: label.into(),
    }
}

// Esc goes back to the menu instead of ending the program.
fn answer<T>(result: Result<T, InquireError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(InquireError::OperationCanceled) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Interactive terminal session around a [`WorkflowManager`].
pub struct Session {
    manager: WorkflowManager,
    export_path: String,
}

impl Session {
    pub fn new(manager: WorkflowManager, export_path: impl Into<String>) -> Self {
        Self {
            manager,
            export_path: export_path.into(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        println!("Novel generator, model: {}", self.manager.model());

        loop {
            println!();
            print!("{}", render_status(self.manager.state()));

            let action = match Select::new("What next?", Action::ALL.to_vec()).prompt() {
                Ok(action) => action,
                Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => break,
                Err(e) => return Err(e.into()),
            };

            match action {
                Action::SetTheme => self.set_theme()?,
                Action::SetChapterCount => self.set_chapter_count()?,
                Action::ChooseNarrative => self.choose_narrative()?,
                Action::RunStage => self.run_global_stage().await?,
                Action::RunChapterStage => self.run_chapter_stage().await?,
                Action::ShowProject => println!("{}", render_project(self.manager.state())),
                Action::Recover => self.recover()?,
                Action::Export => self.export().await?,
                Action::Import => self.import().await?,
                Action::Quit => break,
            }
        }

        Ok(())
    }

    fn set_theme(&mut self) -> Result<()> {
        let current = self.manager.state().inputs().theme.clone();
        let prompt = Text::new("Theme (leave blank for the default):")
            .with_initial_value(&current)
            .prompt();
        if let Some(theme) = answer(prompt)? {
            self.manager.set_theme(theme);
        }
        Ok(())
    }

    fn set_chapter_count(&mut self) -> Result<()> {
        let current = self.manager.state().inputs().chapter_count;
        let message = format!("Number of chapters ({}-{}):", MIN_CHAPTERS, MAX_CHAPTERS);
        let prompt = CustomType::<u32>::new(&message)
            .with_default(current)
            .with_error_message("Please type a whole number")
            .prompt();

        if let Some(count) = answer(prompt)? {
            if !(MIN_CHAPTERS..=MAX_CHAPTERS).contains(&count) {
                println!(
                    "{} is outside {}-{}; the table of contents will refuse to run.",
                    count, MIN_CHAPTERS, MAX_CHAPTERS
                );
            }
            self.manager.set_chapter_count(count);
        }
        Ok(())
    }

    fn choose_narrative(&mut self) -> Result<()> {
        let options = Technique::ALL
            .into_iter()
            .map(|t| labeled(t, t.label()))
            .collect();
        let Some(technique) = answer(Select::new("Narrative technique:", options).prompt())? else {
            return Ok(());
        };
        self.manager.select_technique(technique.value);

        let allowed = technique.value.allowed_points_of_view();
        if allowed.len() > 1 {
            let options = allowed.iter().map(|&p| labeled(p, p.label())).collect();
            let Some(pov) = answer(Select::new("Point of view:", options).prompt())? else {
                return Ok(());
            };
            if let Err(e) = self.manager.select_point_of_view(pov.value) {
                println!("{}", e);
            }
        }
        Ok(())
    }

    async fn run_global_stage(&mut self) -> Result<()> {
        let options = Stage::ALL
            .into_iter()
            .filter(|s| !s.is_chapter_scoped())
            .map(|s| labeled(s, s.title()))
            .collect();
        if let Some(stage) = answer(Select::new("Generate:", options).prompt())? {
            self.run_with_spinner(stage.value, None).await?;
        }
        Ok(())
    }

    async fn run_chapter_stage(&mut self) -> Result<()> {
        let state = self.manager.state();
        let Some(chapters) = state.chapters() else {
            println!("Generate the table of contents first.");
            return Ok(());
        };

        let options = chapters
            .iter()
            .enumerate()
            .map(|(i, c)| labeled(i, format!("{}. {}", i + 1, c.title)))
            .collect();
        let Some(chapter) = answer(Select::new("Chapter:", options).prompt())? else {
            return Ok(());
        };
        let index = chapter.value;

        let options = Stage::ALL
            .into_iter()
            .filter(|s| s.is_chapter_scoped())
            .map(|s| {
                let done = chapter_stage_done(state, s, index);
                labeled(s, format!("{} {}", if done { "[x]" } else { "[ ]" }, s.title()))
            })
            .collect();
        let Some(stage) = answer(Select::new("Generate:", options).prompt())? else {
            return Ok(());
        };

        if stage.value == Stage::ChapterContent && !state.chapter_details_complete(index) {
            println!("Some chapter details are missing; the chapter will be written without them.");
        }
        self.run_with_spinner(stage.value, Some(index)).await
    }

    async fn run_with_spinner(&mut self, stage: Stage, chapter: Option<usize>) -> Result<()> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]")?);
        spinner.set_message(format!("Generating {}...", stage.title().to_lowercase()));
        spinner.enable_steady_tick(Duration::from_millis(120));

        let result = self.manager.run_stage(stage, chapter).await;
        spinner.finish_and_clear();

        match result {
            Ok(StageOutcome::Committed) => {
                println!("{} done.", stage.title());
                if let Some(index) = chapter {
                    if let Some(text) = chapter_stage_text(self.manager.state(), stage, index) {
                        println!("\n{}", text);
                    }
                }
            }
            Ok(StageOutcome::RawFallback) => {
                println!("The response could not be parsed. The raw text was kept; use the fix option to correct it.");
            }
            // Reported through the last error in the status block.
            Err(_) => {}
        }
        Ok(())
    }

    fn recover(&mut self) -> Result<()> {
        let options: Vec<_> = Stage::ALL
            .into_iter()
            .filter(|s| s.definition().output == OutputKind::Structured)
            .filter(|s| self.manager.raw_response(*s).is_some())
            .map(|s| labeled(s, s.title()))
            .collect();
        if options.is_empty() {
            println!("There are no unparsed responses.");
            return Ok(());
        }

        let Some(stage) = answer(Select::new("Fix which response?", options).prompt())? else {
            return Ok(());
        };
        if let Some(raw) = self.manager.raw_response(stage.value) {
            println!("Raw response:\n{}\n", raw);
        }

        let Some(text) = answer(Text::new("Corrected JSON:").prompt())? else {
            return Ok(());
        };
        match self.manager.recover(stage.value, &text) {
            Ok(()) => println!("{} recovered.", stage.value.title()),
            Err(_) => println!("That still does not parse."),
        }
        Ok(())
    }

    async fn export(&mut self) -> Result<()> {
        let prompt = Text::new("Export to:").with_default(&self.export_path).prompt();
        let Some(path) = answer(prompt)? else {
            return Ok(());
        };

        match self.manager.export(&path).await {
            Ok(()) => {
                println!("Saved {}", path);
                self.export_path = path;
            }
            Err(e) => println!("Export failed: {:#}", e),
        }
        Ok(())
    }

    async fn import(&mut self) -> Result<()> {
        let prompt = Text::new("Import from:").with_default(&self.export_path).prompt();
        let Some(path) = answer(prompt)? else {
            return Ok(());
        };

        match self.manager.import(&path).await {
            Ok(()) => println!("Loaded {}", path),
            Err(e) => println!("Import failed: {:#}", e),
        }
        Ok(())
    }
}

fn chapter_stage_text(state: &PipelineState, stage: Stage, index: usize) -> Option<&str> {
    match stage.definition().slot {
        Slot::Artifact(kind) => state.artifact(kind, index),
        _ => None,
    }
}

fn chapter_stage_done(state: &PipelineState, stage: Stage, index: usize) -> bool {
    chapter_stage_text(state, stage, index).is_some()
}

fn status_label(status: SliceStatus) -> &'static str {
    match status {
        SliceStatus::Ready => "ready",
        SliceStatus::Unparsed => "unparsed",
        SliceStatus::Missing => "-",
    }
}

/// One-screen summary of inputs, slice progress and the last error.
pub fn render_status(state: &PipelineState) -> String {
    let inputs = state.inputs();
    let theme = inputs.theme.trim();
    let narrative = inputs
        .narrative
        .labels()
        .map(|(t, p)| format!("{} / {}", t, p))
        .unwrap_or_else(|| "not chosen".to_string());

    let mut out = String::new();
    out.push_str(&format!(
        "Theme: {}\nChapters: {}\nNarrative: {}\n",
        if theme.is_empty() { "(default)" } else { theme },
        inputs.chapter_count,
        narrative
    ));

    let progress = [
        Slice::Outline,
        Slice::Characters,
        Slice::Setting,
        Slice::Twists,
        Slice::Chapters,
    ]
    .into_iter()
    .map(|slice| format!("{}: {}", slice, status_label(state.slice_status(slice))))
    .collect::<Vec<_>>()
    .join(" | ");
    out.push_str(&progress);
    out.push('\n');

    if let Some(err) = state.last_error() {
        out.push_str(&format!("Last error: {}\n", err));
    }
    out
}

/// Readable dump of everything generated so far.
pub fn render_project(state: &PipelineState) -> String {
    const NONE: &str = "(not generated)";
    let mut out = String::new();

    out.push_str("== Outline ==\n");
    match state.outline() {
        Some(o) => out.push_str(&format!(
            "Synthesis: {}\nDescription: {}\nPlot: {}\n",
            o.synthesis, o.description, o.plot
        )),
        None => out.push_str(&format!("{}\n", NONE)),
    }

    out.push_str("\n== Characters ==\n");
    match state.characters() {
        Some(chars) => {
            for c in chars {
                out.push_str(&format!("- {} ({}): {}\n", c.name, c.role, c.description));
            }
        }
        None => out.push_str(&format!("{}\n", NONE)),
    }

    out.push_str(&format!("\n== Setting ==\n{}\n", state.setting().unwrap_or(NONE)));
    out.push_str(&format!("\n== Plot twists ==\n{}\n", state.plot_twist().unwrap_or(NONE)));

    out.push_str("\n== Table of contents ==\n");
    match state.chapters() {
        Some(chapters) => {
            for (i, c) in chapters.iter().enumerate() {
                let done: Vec<&str> = Stage::ALL
                    .into_iter()
                    .filter(|s| chapter_stage_done(state, *s, i))
                    .map(Stage::title)
                    .collect();
                out.push_str(&format!("{}. {}: {}\n", i + 1, c.title, c.description));
                if !done.is_empty() {
                    out.push_str(&format!("   generated: {}\n", done.join(", ")));
                }
            }
        }
        None => out.push_str(&format!("{}\n", NONE)),
    }
    out
}
