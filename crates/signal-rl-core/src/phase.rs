//! Signal-phase programs applied to a junction after each decision
//!
//! A program is a short transition step (usually yellow) followed by a
//! longer green step. The table of programs is configuration: action `i`
//! selects `programs[i]`.

use serde::{Deserialize, Serialize};

use crate::{DiscreteAction, RLError, Result};

/// Signal characters accepted in a red-yellow-green state string
const SIGNAL_CHARS: &[char] = &['r', 'u', 'y', 'Y', 'g', 'G', 's', 'o', 'O'];

/// One timed signal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStep {
    /// Duration in simulation steps
    pub duration: u32,
    /// Red-yellow-green state, one character per controlled link
    pub state: String,
}

impl PhaseStep {
    /// Create a new phase step
    pub fn new(duration: u32, state: impl Into<String>) -> Self {
        Self {
            duration,
            state: state.into(),
        }
    }
}

/// Transition step followed by a green step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProgram {
    /// Short clearance step shown first
    pub transition: PhaseStep,
    /// Longer green step shown once the transition elapses
    pub green: PhaseStep,
}

impl PhaseProgram {
    /// Total number of steps the program occupies
    #[must_use]
    pub fn total_duration(&self) -> u32 {
        self.transition.duration + self.green.duration
    }
}

/// Ordered table of phase programs indexed by action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTable {
    /// Programs, one per action
    pub programs: Vec<PhaseProgram>,
}

impl Default for PhaseTable {
    /// Four-approach junction with three links per approach: each program
    /// shows yellow for 6 steps and then green for 15 on one approach.
    fn default() -> Self {
        Self::four_approach(6, 15)
    }
}

impl PhaseTable {
    /// One program per approach of a four-approach, twelve-link junction
    #[must_use]
    pub fn four_approach(transition_duration: u32, green_duration: u32) -> Self {
        let programs = (0..4)
            .map(|approach| {
                let state_with = |signal: char| -> String {
                    (0..12)
                        .map(|link| if link / 3 == approach { signal } else { 'r' })
                        .collect()
                };
                PhaseProgram {
                    transition: PhaseStep::new(transition_duration, state_with('y')),
                    green: PhaseStep::new(green_duration, state_with('G')),
                }
            })
            .collect();
        Self { programs }
    }

    /// Number of programs (and thus actions)
    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Check whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Look up the program for an action
    ///
    /// # Errors
    /// Returns [`RLError::InvalidAction`] for an action with no program.
    pub fn program(&self, action: DiscreteAction) -> Result<&PhaseProgram> {
        self.programs.get(action.index()).ok_or_else(|| {
            RLError::InvalidAction(format!(
                "no phase program for action {} ({} programs)",
                action,
                self.programs.len()
            ))
        })
    }

    /// Check the table against the agent's action count
    ///
    /// Every state string must use the same link count and only valid
    /// signal characters, and there must be exactly one program per action.
    ///
    /// # Errors
    /// Returns [`RLError::Config`] describing the first problem found.
    pub fn validate(&self, n_actions: usize) -> Result<()> {
        if self.programs.len() != n_actions {
            return Err(RLError::Config(format!(
                "phase table has {} programs but the agent has {} actions",
                self.programs.len(),
                n_actions
            )));
        }
        let Some(links) = self.programs.first().map(|p| p.green.state.chars().count()) else {
            return Err(RLError::Config("phase table is empty".to_string()));
        };

        for (index, program) in self.programs.iter().enumerate() {
            if program.green.duration == 0 {
                return Err(RLError::Config(format!(
                    "program {index} has a zero-length green step"
                )));
            }
            for step in [&program.transition, &program.green] {
                if step.state.chars().count() != links {
                    return Err(RLError::Config(format!(
                        "program {index} state '{}' does not control {links} links",
                        step.state
                    )));
                }
                if let Some(bad) = step.state.chars().find(|c| !SIGNAL_CHARS.contains(c)) {
                    return Err(RLError::Config(format!(
                        "program {index} state '{}' contains invalid signal '{bad}'",
                        step.state
                    )));
                }
            }
        }
        Ok(())
    }
}
