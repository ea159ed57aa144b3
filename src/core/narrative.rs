use std::fmt;

use crate::error::StageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Technique {
    FirstPerson,
    ThirdPersonOmniscient,
    ThirdPersonLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointOfView {
    Protagonist,
    Witness,
    Omniscient,
    Limited,
}

impl Technique {
    pub const ALL: [Technique; 3] = [
        Technique::FirstPerson,
        Technique::ThirdPersonOmniscient,
        Technique::ThirdPersonLimited,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Technique::FirstPerson => "first_person",
            Technique::ThirdPersonOmniscient => "third_person_omniscient",
            Technique::ThirdPersonLimited => "third_person_limited",
        }
    }

    /// Label used inside prompts.
    pub fn label(self) -> &'static str {
        match self {
            Technique::FirstPerson => "Primera Persona",
            Technique::ThirdPersonOmniscient => "Tercera Persona Omnisciente",
            Technique::ThirdPersonLimited => "Tercera Persona Limitada",
        }
    }

    pub fn allowed_points_of_view(self) -> &'static [PointOfView] {
        match self {
            Technique::FirstPerson => &[PointOfView::Protagonist, PointOfView::Witness],
            Technique::ThirdPersonOmniscient => &[PointOfView::Omniscient],
            Technique::ThirdPersonLimited => &[PointOfView::Limited],
        }
    }

    pub fn allows(self, pov: PointOfView) -> bool {
        self.allowed_points_of_view().contains(&pov)
    }
}

impl PointOfView {
    pub fn key(self) -> &'static str {
        match self {
            PointOfView::Protagonist => "protagonist",
            PointOfView::Witness => "witness",
            PointOfView::Omniscient => "omniscient",
            PointOfView::Limited => "limited",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PointOfView::Protagonist => "Protagonista",
            PointOfView::Witness => "Testigo",
            PointOfView::Omniscient => "Omnisciente",
            PointOfView::Limited => "Limitado",
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl fmt::Display for PointOfView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Narration technique plus the narrator's point of view.
///
/// The point of view is always a member of the technique's allowed set, or unset.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct NarrativeChoice {
    technique: Option<Technique>,
    point_of_view: Option<PointOfView>,
}

impl NarrativeChoice {
    pub fn technique(&self) -> Option<Technique> {
        self.technique
    }

    pub fn point_of_view(&self) -> Option<PointOfView> {
        self.point_of_view
    }

    /// Switches technique. A point of view outside the new set is dropped; a
    /// technique with a single option selects it.
    pub fn select_technique(&mut self, technique: Technique) {
        self.technique = Some(technique);

        let allowed = technique.allowed_points_of_view();
        match self.point_of_view {
            Some(pov) if technique.allows(pov) => {}
            _ if allowed.len() == 1 => self.point_of_view = Some(allowed[0]),
            _ => self.point_of_view = None,
        }
    }

    pub fn select_point_of_view(&mut self, pov: PointOfView) -> Result<(), StageError> {
        let technique = self.technique.ok_or_else(|| {
            StageError::Validation("select a narrative technique before the point of view".to_string())
        })?;

        if !technique.allows(pov) {
            return Err(StageError::Validation(format!(
                "point of view '{}' is not available for technique '{}'",
                pov, technique
            )));
        }

        self.point_of_view = Some(pov);
        Ok(())
    }

    /// Both fields set to a valid combination.
    pub fn is_ready(&self) -> bool {
        matches!(
            (self.technique, self.point_of_view),
            (Some(t), Some(p)) if t.allows(p)
        )
    }

    /// `(technique label, point of view label)` once ready.
    pub fn labels(&self) -> Option<(&'static str, &'static str)> {
        match (self.technique, self.point_of_view) {
            (Some(t), Some(p)) if t.allows(p) => Some((t.label(), p.label())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unset() {
        let choice = NarrativeChoice::default();
        assert!(choice.technique().is_none());
        assert!(choice.point_of_view().is_none());
        assert!(!choice.is_ready());
    }

    #[test]
    fn test_first_person_leaves_point_of_view_open() {
        let mut choice = NarrativeChoice::default();
        choice.select_technique(Technique::FirstPerson);
        assert_eq!(choice.point_of_view(), None);
        assert!(!choice.is_ready());

        choice.select_point_of_view(PointOfView::Witness).unwrap();
        assert!(choice.is_ready());
        assert_eq!(choice.labels(), Some(("Primera Persona", "Testigo")));
    }

    #[test]
    fn test_omniscient_forces_single_option() {
        for prior in [PointOfView::Protagonist, PointOfView::Witness] {
            let mut choice = NarrativeChoice::default();
            choice.select_technique(Technique::FirstPerson);
            choice.select_point_of_view(prior).unwrap();

            choice.select_technique(Technique::ThirdPersonOmniscient);
            assert_eq!(choice.point_of_view(), Some(PointOfView::Omniscient));
            assert!(choice.is_ready());
        }

        let mut choice = NarrativeChoice::default();
        choice.select_technique(Technique::ThirdPersonLimited);
        choice.select_technique(Technique::ThirdPersonOmniscient);
        assert_eq!(choice.point_of_view(), Some(PointOfView::Omniscient));
    }

    #[test]
    fn test_switching_back_to_first_person_resets() {
        let mut choice = NarrativeChoice::default();
        choice.select_technique(Technique::ThirdPersonLimited);
        assert_eq!(choice.point_of_view(), Some(PointOfView::Limited));

        choice.select_technique(Technique::FirstPerson);
        assert_eq!(choice.point_of_view(), None);
    }

    #[test]
    fn test_keeps_valid_point_of_view() {
        let mut choice = NarrativeChoice::default();
        choice.select_technique(Technique::FirstPerson);
        choice.select_point_of_view(PointOfView::Protagonist).unwrap();
        choice.select_technique(Technique::FirstPerson);
        assert_eq!(choice.point_of_view(), Some(PointOfView::Protagonist));
    }

    #[test]
    fn test_rejects_out_of_set_point_of_view() {
        let mut choice = NarrativeChoice::default();
        assert!(choice.select_point_of_view(PointOfView::Omniscient).is_err());

        choice.select_technique(Technique::FirstPerson);
        let err = choice.select_point_of_view(PointOfView::Limited).unwrap_err();
        assert!(matches!(err, StageError::Validation(_)));
        assert_eq!(choice.point_of_view(), None);
    }

    #[test]
    fn test_every_technique_has_options() {
        for technique in Technique::ALL {
            assert!(!technique.allowed_points_of_view().is_empty());
        }
    }
}
