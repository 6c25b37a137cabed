use orthostream_logging::ortho_warn;
use thiserror::Error;

use crate::{StreamMessage, TreeChunkMessage};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProgressViolation {
    #[error("progress went from {previous} back to {current}")]
    ProgressDecreased { previous: f64, current: f64 },
    #[error("progress {value} is outside [0, 1]")]
    ProgressOutOfRange { value: f64 },
    #[error("`{tag}` message after the stream terminated")]
    MessageAfterTerminal { tag: &'static str },
}

/// Tracks how much of a tree has been delivered.
///
/// The reported fraction never goes backwards: a decreasing value from the
/// server is recorded as a violation and the previous fraction is kept.
#[derive(Debug, Clone, Default)]
pub struct TreeProgress {
    total_species: Option<u64>,
    species_delivered: u64,
    fraction: f64,
    complete: bool,
    terminated: bool,
    violations: Vec<ProgressViolation>,
}

impl TreeProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, message: &TreeChunkMessage) -> Vec<ProgressViolation> {
        let mut found = Vec::new();
        if self.terminated {
            found.push(ProgressViolation::MessageAfterTerminal { tag: message.tag() });
        }

        match message {
            TreeChunkMessage::Metadata { total_species, .. } => {
                if total_species.is_some() {
                    self.total_species = *total_species;
                }
            }
            TreeChunkMessage::SpeciesChunk {
                species, progress, ..
            } => {
                self.species_delivered = self
                    .species_delivered
                    .saturating_add(species.len() as u64);
                let progress = *progress;
                if !(0.0..=1.0).contains(&progress) {
                    found.push(ProgressViolation::ProgressOutOfRange { value: progress });
                } else if progress < self.fraction {
                    found.push(ProgressViolation::ProgressDecreased {
                        previous: self.fraction,
                        current: progress,
                    });
                } else {
                    self.fraction = progress;
                }
            }
            TreeChunkMessage::TreeComplete { total_species, .. } => {
                self.total_species = Some(*total_species);
                self.fraction = 1.0;
                self.complete = true;
                self.terminated = true;
            }
            TreeChunkMessage::Error { .. } => self.terminated = true,
        }

        for violation in &found {
            ortho_warn!("Tree stream progress: {}", violation);
        }
        self.violations.extend(found.iter().cloned());
        found
    }

    /// Fraction of the tree delivered, in [0, 1].
    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    pub fn species_delivered(&self) -> u64 {
        self.species_delivered
    }

    pub fn total_species(&self) -> Option<u64> {
        self.total_species
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn violations(&self) -> &[ProgressViolation] {
        &self.violations
    }
}
