use strum::{Display, EnumString};

/// What the next forward pass generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum GenerationMode {
    #[default]
    Normal,
    /// Sequence is given in full and never masked. Evaluation only.
    Conditional,
    /// Part of the protein is fixed; its sequence and psi angles come from the batch.
    Scaffolding,
}

/// Training flag together with the two generation switches.
///
/// Scaffolding and conditional generation are tracked separately; scaffolding wins
/// when both are on. Switching the training flag always clears conditional
/// generation and leaves scaffolding in place. Conditional generation can only be
/// entered through [`ModeState::conditional_generation`], which also switches to
/// evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeState {
    training: bool,
    conditional: bool,
    scaffolding: bool,
}

impl Default for ModeState {
    fn default() -> Self {
        Self {
            training: true,
            conditional: false,
            scaffolding: false,
        }
    }
}

impl ModeState {
    pub fn training(&self) -> bool {
        self.training
    }

    /// Mode that drives the next forward pass.
    pub fn mode(&self) -> GenerationMode {
        if self.scaffolding {
            GenerationMode::Scaffolding
        } else if self.conditional {
            GenerationMode::Conditional
        } else {
            GenerationMode::Normal
        }
    }

    pub fn is_conditional_generation(&self) -> bool {
        self.conditional
    }

    pub fn is_scaffolding_generation(&self) -> bool {
        self.scaffolding
    }

    pub fn train(&mut self, training: bool) {
        self.conditional = false;
        self.training = training;
    }

    pub fn eval(&mut self) {
        self.train(false);
    }

    pub fn conditional_generation(&mut self) {
        self.eval();
        self.conditional = true;
    }

    pub fn scaffolding_generation(&mut self) {
        self.scaffolding = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditional_forces_eval() {
        let mut state = ModeState::default();
        assert!(state.training());
        state.conditional_generation();
        assert!(!state.training());
        assert!(state.is_conditional_generation());
    }

    #[test]
    fn test_eval_clears_conditional() {
        let mut state = ModeState::default();
        state.conditional_generation();
        state.train(false);
        assert!(!state.is_conditional_generation());
        assert_eq!(state.mode(), GenerationMode::Normal);

        state.conditional_generation();
        state.train(true);
        assert!(state.training());
        assert_eq!(state.mode(), GenerationMode::Normal);
    }

    #[test]
    fn test_training_switches_keep_scaffolding() {
        let mut state = ModeState::default();
        state.scaffolding_generation();
        state.eval();
        assert!(state.is_scaffolding_generation());
        state.train(true);
        assert!(state.is_scaffolding_generation());
        assert_eq!("scaffolding".parse::<GenerationMode>().unwrap(), GenerationMode::Scaffolding);
    }

    #[test]
    fn test_scaffolding_survives_conditional_generation() {
        let mut state = ModeState::default();
        state.scaffolding_generation();
        state.conditional_generation();
        assert!(state.is_scaffolding_generation());
        assert!(state.is_conditional_generation());
        assert_eq!(state.mode(), GenerationMode::Scaffolding);

        state.train(true);
        assert!(state.is_scaffolding_generation());
        assert!(!state.is_conditional_generation());
        assert_eq!(state.mode(), GenerationMode::Scaffolding);
    }
}
