use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod store;

pub use store::{KeyValueStore, MemoryStore, Persistence, SavedState, Slot, StoreError};

pub type Participant = String;

pub const MIN_PARTICIPANTS: usize = 2;

pub const TOO_FEW_MESSAGE: &str = "⚠️ Il faut au moins 2 personnes pour le tirage.";

pub const BLOCKED_MESSAGE: &str =
    "Efface d’abord les résultats ou modifie la liste pour relancer un tirage.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub giver: Participant,
    pub receiver: Participant,
}

impl Assignment {
    pub fn line(&self) -> String {
        format!("{} offre à {}", self.giver, self.receiver)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DrawOutcome {
    Drawn { lines: Vec<String> },
    TooFewParticipants,
}

impl DrawOutcome {
    pub fn into_lines(self) -> Vec<String> {
        match self {
            DrawOutcome::Drawn { lines } => lines,
            DrawOutcome::TooFewParticipants => vec![TOO_FEW_MESSAGE.to_string()],
        }
    }
}

pub fn clean_participants<S: AsRef<str>>(raw: &[S]) -> Vec<Participant> {
    raw.iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Sattolo shuffle of `0..n`: a single n-cycle, so `perm[i] != i` for all i
/// whenever `n >= 2`.
pub fn derangement<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = rng.gen_range(0..i);
        perm.swap(i, j);
    }
    perm
}

// Duplicate names are distinct slots, so two entries named alike may still
// be paired together.
pub fn draw_with<R: Rng + ?Sized>(participants: &[Participant], rng: &mut R) -> Vec<Assignment> {
    if participants.len() < MIN_PARTICIPANTS {
        return Vec::new();
    }

    let perm = derangement(participants.len(), rng);
    debug!(count = participants.len(), "drew secret santa assignments");
    participants
        .iter()
        .zip(perm)
        .map(|(giver, r)| Assignment {
            giver: giver.clone(),
            receiver: participants[r].clone(),
        })
        .collect()
}

pub fn draw(participants: &[Participant]) -> Vec<Assignment> {
    draw_with(participants, &mut rand::thread_rng())
}

pub fn draw_lines<R: Rng + ?Sized>(participants: &[Participant], rng: &mut R) -> DrawOutcome {
    let assignments = draw_with(participants, rng);
    if assignments.is_empty() {
        return DrawOutcome::TooFewParticipants;
    }
    DrawOutcome::Drawn {
        lines: assignments.iter().map(Assignment::line).collect(),
    }
}

pub fn same_participants(a: &[Participant], b: &[Participant]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.iter().collect::<Vec<_>>();
    let mut b = b.iter().collect::<Vec<_>>();
    a.sort();
    b.sort();
    a == b
}

/// Draw gate: blocked only when results exist and the list is unchanged
/// since the last successful draw.
pub fn can_draw(current: &[Participant], last_draw: &[Participant], has_results: bool) -> bool {
    !(has_results && same_participants(current, last_draw))
}
