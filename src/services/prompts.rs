use crate::core::state::{ArtifactKind, Chapter, PipelineState};

/// Theme used when the user leaves the theme blank.
pub const DEFAULT_THEME: &str = "una novela histórica de aventuras ambientada en la Guerra de Independencia Española (1808-1814), con un protagonista que lucha contra la ocupación napoleónica, intrigas, resistencia popular, y una visión realista de la época.";

/// Short theme name for prompts that only need the period.
pub const DEFAULT_THEME_SHORT: &str = "Guerra de Independencia Española";

const NOT_SPECIFIED: &str = "No especificado";
const NOT_SPECIFIED_PLURAL: &str = "No especificados";
const NOT_AVAILABLE: &str = "No disponibles";

/// Read-only view of the state a prompt is rendered from.
pub struct PromptContext<'a> {
    state: &'a PipelineState,
    chapter: Option<(usize, &'a Chapter)>,
}

impl<'a> PromptContext<'a> {
    pub fn new(state: &'a PipelineState, chapter: Option<usize>) -> Self {
        let chapter = chapter.and_then(|index| state.chapter(index).map(|c| (index, c)));
        Self { state, chapter }
    }

    fn theme(&self) -> &str {
        self.state.inputs().theme.trim()
    }

    fn theme_clause(&self) -> String {
        if self.theme().is_empty() {
            DEFAULT_THEME.to_string()
        } else {
            format!(
                "una novela histórica de aventuras ambientada en {}. La novela debe presentar un protagonista fuerte, intrigas, y una visión realista de la época.",
                self.theme()
            )
        }
    }

    fn theme_short(&self) -> &str {
        if self.theme().is_empty() {
            DEFAULT_THEME_SHORT
        } else {
            self.theme()
        }
    }

    fn synthesis(&self) -> &str {
        self.state.outline().map_or("", |o| o.synthesis.as_str())
    }

    fn description(&self) -> &str {
        self.state.outline().map_or("", |o| o.description.as_str())
    }

    fn plot(&self) -> &str {
        self.state.outline().map_or("", |o| o.plot.as_str())
    }

    fn technique(&self) -> &str {
        self.state.inputs().narrative.labels().map_or("", |(t, _)| t)
    }

    fn point_of_view(&self) -> &str {
        self.state.inputs().narrative.labels().map_or("", |(_, p)| p)
    }

    fn character_names(&self) -> String {
        match self.state.characters() {
            Some(chars) => chars.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", "),
            None => NOT_AVAILABLE.to_string(),
        }
    }

    fn characters_with_roles(&self) -> String {
        match self.state.characters() {
            Some(chars) => chars
                .iter()
                .map(|c| format!("{} ({})", c.name, c.role))
                .collect::<Vec<_>>()
                .join(", "),
            None => NOT_AVAILABLE.to_string(),
        }
    }

    fn setting(&self) -> &str {
        self.state.setting().unwrap_or(NOT_SPECIFIED)
    }

    fn twists(&self) -> &str {
        self.state.plot_twist().unwrap_or(NOT_SPECIFIED_PLURAL)
    }

    fn chapter_title(&self) -> &str {
        self.chapter.map_or("", |(_, c)| c.title.as_str())
    }

    fn chapter_description(&self) -> &str {
        self.chapter.map_or("", |(_, c)| c.description.as_str())
    }

    fn chapter_number(&self) -> usize {
        self.chapter.map_or(0, |(i, _)| i + 1)
    }

    fn artifact_or(&self, kind: ArtifactKind, fallback: &'a str) -> &str {
        self.chapter
            .and_then(|(i, _)| self.state.artifact(kind, i))
            .unwrap_or(fallback)
    }

    /// Shared opening of the per-chapter detail prompts.
    fn chapter_preamble(&self) -> String {
        format!(
            "Basándote en la síntesis general de la novela: \"{}\", la trama general: \"{}\", la técnica narrativa: {} y el punto de vista del narrador: {}, y específicamente en el capítulo '{}' (descripción: '{}')",
            self.synthesis(),
            self.plot(),
            self.technique(),
            self.point_of_view(),
            self.chapter_title(),
            self.chapter_description()
        )
    }
}

pub fn outline(ctx: &PromptContext) -> String {
    format!(
        "Genera la síntesis, la descripción y la trama de {} La respuesta debe estar en formato JSON, como un objeto con las propiedades \"synthesis\", \"description\" y \"plot\".",
        ctx.theme_clause()
    )
}

pub fn characters(ctx: &PromptContext) -> String {
    format!(
        "Basándote en la siguiente información de la novela:\n\
         Síntesis General: {}\n\
         Trama General: {}\n\
         Técnica Narrativa: {}\n\
         Punto de Vista del Narrador: {}\n\n\
         Genera 3-5 personajes principales para esta novela. Para cada personaje, proporciona su nombre, su rol en la historia (ej. \"protagonista\", \"antagonista\", \"aliado\", \"interés amoroso\"), y una breve descripción de su personalidad y su relevancia para la trama. Responde en formato JSON como un array de objetos, donde cada objeto tiene las propiedades \"name\", \"role\", y \"description\".",
        ctx.synthesis(),
        ctx.plot(),
        ctx.technique(),
        ctx.point_of_view()
    )
}

pub fn setting(ctx: &PromptContext) -> String {
    format!(
        "Basándote en el tema de la novela: '{}', la descripción general de la novela: '{}', la técnica narrativa: {} y el punto de vista del narrador: {}, genera una descripción detallada de la ambientación o un aspecto histórico/cultural clave de la novela. Incluye detalles sobre la atmósfera, la sociedad, la vida cotidiana, y elementos visuales relevantes. Aproximadamente 500-700 palabras.",
        ctx.theme_short(),
        ctx.description(),
        ctx.technique(),
        ctx.point_of_view()
    )
}

pub fn twists(ctx: &PromptContext) -> String {
    format!(
        "Basándote en la síntesis general: \"{}\", la trama general: \"{}\", los personajes: {}, la ambientación: \"{}\", la técnica narrativa: {} y el punto de vista del narrador: {}, sugiere 1-2 giros argumentales sorprendentes y significativos para la novela. Describe cómo podrían impactar la trama y los personajes. Aproximadamente 300-500 palabras.",
        ctx.synthesis(),
        ctx.plot(),
        ctx.character_names(),
        ctx.setting(),
        ctx.technique(),
        ctx.point_of_view()
    )
}

pub fn table_of_contents(ctx: &PromptContext) -> String {
    format!(
        "Basándote en la síntesis general: \"{}\", la trama general: \"{}\", la ambientación: \"{}\", los personajes principales: {}, los giros argumentales: \"{}\", la técnica narrativa: {} y el punto de vista del narrador: {}, genera una tabla de contenidos para una novela de {} capítulos. Cada capítulo debe tener un título y una breve descripción de su contenido, siguiendo el estilo de una novela histórica de aventuras. Responde en formato JSON como un array de objetos, donde cada objeto tiene las propiedades \"title\" y \"description\".",
        ctx.synthesis(),
        ctx.plot(),
        ctx.setting(),
        ctx.character_names(),
        ctx.twists(),
        ctx.technique(),
        ctx.point_of_view(),
        ctx.state.inputs().chapter_count
    )
}

pub fn chapter_conflict(ctx: &PromptContext) -> String {
    format!(
        "{}, sugiere un conflicto o un obstáculo significativo que podría surgir en este capítulo. Describe la naturaleza del conflicto, sus posibles implicaciones para el protagonista y la trama dentro de este capítulo, y cómo podría resolverse o evolucionar. Aproximadamente 300-500 palabras.",
        ctx.chapter_preamble()
    )
}

pub fn chapter_scene(ctx: &PromptContext) -> String {
    format!(
        "Basándote en el tema de la novela: '{}', la descripción general de la novela: '{}', la técnica narrativa: {} y el punto de vista del narrador: {}, y específicamente en el capítulo '{}' (descripción: '{}'), genera una descripción detallada de una escena clave o un lugar significativo dentro de este capítulo. Enfócate en los detalles sensoriales (vista, sonido, olfato, tacto), la atmósfera, y cómo el entorno influye en los personajes en esta escena. Aproximadamente 500-700 palabras.",
        ctx.theme_short(),
        ctx.description(),
        ctx.technique(),
        ctx.point_of_view(),
        ctx.chapter_title(),
        ctx.chapter_description()
    )
}

pub fn chapter_dialogue(ctx: &PromptContext) -> String {
    format!(
        "{}, genera un breve fragmento de diálogo (2-4 líneas) entre dos personajes relevantes para este capítulo. El diálogo debe ser relevante para la trama o los personajes en este punto de la historia, y debe utilizar rayas (guion largo '—') para indicar las intervenciones de los personajes, no comillas.",
        ctx.chapter_preamble()
    )
}

pub fn chapter_sub_plot(ctx: &PromptContext) -> String {
    format!(
        "{}, sugiere 1-2 ideas para subtramas que puedan enriquecer la narrativa principal en este capítulo o en los siguientes. Para cada idea, describe brevemente la subtrama y cómo podría conectarse con la historia principal o los personajes.",
        ctx.chapter_preamble()
    )
}

pub fn chapter_key_events(ctx: &PromptContext) -> String {
    format!(
        "Basándote en la síntesis general de la novela: \"{}\", la trama general: \"{}\", la ambientación: \"{}\", la técnica narrativa: {} y el punto de vista del narrador: {}, y específicamente en el capítulo '{}' (descripción: '{}'), sugiere 2-3 eventos clave o puntos de inflexión que deberían ocurrir en este capítulo. Describe brevemente cada evento y cómo contribuye al avance de la trama.",
        ctx.synthesis(),
        ctx.plot(),
        ctx.setting(),
        ctx.technique(),
        ctx.point_of_view(),
        ctx.chapter_title(),
        ctx.chapter_description()
    )
}

pub fn chapter_content(ctx: &PromptContext) -> String {
    format!(
        "Basándote en la siguiente información de la novela:\n\
         Síntesis General: {}\n\
         Trama General: {}\n\
         Ambientación: {}\n\
         Personajes Principales: {}\n\
         Giros Argumentales de la Novela: {}\n\
         Técnica Narrativa: {}\n\
         Punto de Vista del Narrador: {}\n\
         Conflicto del Capítulo: {}\n\
         Descripción de Escena del Capítulo: {}\n\
         Diálogo del Capítulo: {}\n\
         Subtramas del Capítulo: {}\n\
         Eventos Clave del Capítulo: {}\n\n\
         Escribe el contenido completo para el capítulo '{}' (Capítulo {}). El capítulo debe tener aproximadamente 1200 palabras y expandir la descripción: '{}'. Asegúrate de que el tono y estilo sean coherentes con una novela histórica de aventuras. Asegúrate de que los diálogos utilicen rayas (guion largo '—') en lugar de comillas.",
        ctx.synthesis(),
        ctx.plot(),
        ctx.setting(),
        ctx.characters_with_roles(),
        ctx.twists(),
        ctx.technique(),
        ctx.point_of_view(),
        ctx.artifact_or(ArtifactKind::Conflict, NOT_SPECIFIED),
        ctx.artifact_or(ArtifactKind::SceneDescription, NOT_SPECIFIED),
        ctx.artifact_or(ArtifactKind::DialogueSnippet, NOT_SPECIFIED),
        ctx.artifact_or(ArtifactKind::SubPlotIdeas, "No especificadas"),
        ctx.artifact_or(ArtifactKind::KeyEvents, NOT_SPECIFIED_PLURAL),
        ctx.chapter_title(),
        ctx.chapter_number(),
        ctx.chapter_description()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::narrative::Technique;
    use crate::core::state::{Character, Generated, Outline, StageResult};

    fn state_with_chapters() -> PipelineState {
        let mut state = PipelineState::new();
        state.set_theme("el Antiguo Egipto");
        state.narrative_mut().select_technique(Technique::ThirdPersonLimited);
        state.commit(Generated::Outline(StageResult::Parsed(Outline {
            synthesis: "SINTESIS".to_string(),
            description: "DESCRIPCION".to_string(),
            plot: "TRAMA".to_string(),
        })));
        state.commit(Generated::Characters(StageResult::Parsed(vec![Character {
            name: "Nefer".to_string(),
            role: "protagonista".to_string(),
            description: "Escriba".to_string(),
        }])));
        state.commit(Generated::Chapters(StageResult::Parsed(vec![
            Chapter {
                title: "El Nilo".to_string(),
                description: "Crecida".to_string(),
            },
            Chapter {
                title: "La Tumba".to_string(),
                description: "Saqueo".to_string(),
            },
        ])));
        state
    }

    #[test]
    fn test_outline_blank_theme_uses_default() {
        let mut state = PipelineState::new();
        state.set_theme("   ");
        let prompt = outline(&PromptContext::new(&state, None));
        assert!(prompt.contains(DEFAULT_THEME));
        assert!(prompt.contains("\"synthesis\""));
    }

    #[test]
    fn test_outline_user_theme() {
        let mut state = PipelineState::new();
        state.set_theme("  la Revolución Francesa ");
        let prompt = outline(&PromptContext::new(&state, None));
        assert!(prompt.contains("ambientada en la Revolución Francesa. La novela debe presentar"));
        assert!(!prompt.contains(DEFAULT_THEME));
    }

    #[test]
    fn test_characters_uses_narrative_labels() {
        let state = state_with_chapters();
        let prompt = characters(&PromptContext::new(&state, None));
        assert!(prompt.contains("Técnica Narrativa: Tercera Persona Limitada"));
        assert!(prompt.contains("Punto de Vista del Narrador: Limitado"));
        assert!(prompt.contains("SINTESIS"));
    }

    #[test]
    fn test_chapter_prompts_target_the_chapter() {
        let state = state_with_chapters();
        let ctx = PromptContext::new(&state, Some(1));
        assert!(chapter_conflict(&ctx).contains("'La Tumba' (descripción: 'Saqueo')"));
        assert!(chapter_scene(&ctx).contains("el Antiguo Egipto"));
        assert!(chapter_content(&ctx).contains("(Capítulo 2)"));
    }

    #[test]
    fn test_chapter_content_falls_back_for_missing_context() {
        let mut state = state_with_chapters();
        state.commit(Generated::Artifact {
            kind: ArtifactKind::Conflict,
            index: 0,
            text: "Una emboscada".to_string(),
        });
        let prompt = chapter_content(&PromptContext::new(&state, Some(0)));
        assert!(prompt.contains("Conflicto del Capítulo: Una emboscada"));
        assert!(prompt.contains("Subtramas del Capítulo: No especificadas"));
        assert!(prompt.contains("Giros Argumentales de la Novela: No especificados"));
        assert!(prompt.contains("Personajes Principales: Nefer (protagonista)"));
    }

    #[test]
    fn test_table_of_contents_mentions_count() {
        let mut state = state_with_chapters();
        state.set_chapter_count(12);
        let prompt = table_of_contents(&PromptContext::new(&state, None));
        assert!(prompt.contains("una novela de 12 capítulos"));
        assert!(prompt.contains("\"title\" y \"description\""));
    }
}
