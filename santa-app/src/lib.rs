use rand::Rng;
use santa_core::{
    can_draw, clean_participants, draw_lines, DrawOutcome, KeyValueStore, Participant,
    Persistence, SavedState, Slot,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub mod audio;
pub mod countdown;
pub mod file_store;

pub use file_store::FileStore;

pub struct AppState<S> {
    persistence: Persistence<S>,
    participants: Vec<Participant>,
    results: Vec<String>,
    last_draw: Vec<Participant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DrawReport {
    Drawn { lines: Vec<String> },
    TooFewParticipants,
    Blocked,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AppError {
    #[error("no participant at position {index} (list has {len})")]
    NoSuchParticipant { index: usize, len: usize },
}

impl<S: KeyValueStore> AppState<S> {
    pub fn load(store: S) -> Self {
        let mut persistence = Persistence::new(store);
        let SavedState {
            participants,
            results,
            last_draw,
        } = persistence.load();
        debug!(
            participants = participants.len(),
            results = results.len(),
            "loaded saved state"
        );
        Self {
            persistence,
            participants,
            results,
            last_draw,
        }
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn results(&self) -> &[String] {
        &self.results
    }

    pub fn last_draw(&self) -> &[Participant] {
        &self.last_draw
    }

    pub fn has_results(&self) -> bool {
        !self.results.is_empty()
    }

    pub fn store(&self) -> &S {
        self.persistence.store()
    }

    pub fn add_participant(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.participants.push(name.to_string());
        self.persistence.save(Slot::Participants, &self.participants);
        true
    }

    pub fn remove_participant(&mut self, index: usize) -> Result<Participant, AppError> {
        if index >= self.participants.len() {
            return Err(AppError::NoSuchParticipant {
                index,
                len: self.participants.len(),
            });
        }
        let removed = self.participants.remove(index);
        self.persistence.save(Slot::Participants, &self.participants);
        Ok(removed)
    }

    pub fn clear_participants(&mut self) {
        self.participants.clear();
        self.results.clear();
        self.last_draw.clear();
        self.persistence.save(Slot::Participants, &self.participants);
        self.persistence.save(Slot::Results, &self.results);
        self.persistence.save(Slot::LastDraw, &self.last_draw);
    }

    pub fn clear_results(&mut self) {
        self.results.clear();
        self.last_draw.clear();
        self.persistence.save(Slot::Results, &self.results);
        self.persistence.save(Slot::LastDraw, &self.last_draw);
    }

    pub fn is_blocked(&self) -> bool {
        let current = clean_participants(&self.participants);
        !can_draw(&current, &self.last_draw, self.has_results())
    }

    pub fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> DrawReport {
        let current = clean_participants(&self.participants);
        if current.len() < santa_core::MIN_PARTICIPANTS {
            self.results = DrawOutcome::TooFewParticipants.into_lines();
            self.persistence.save(Slot::Results, &self.results);
            return DrawReport::TooFewParticipants;
        }

        if !can_draw(&current, &self.last_draw, self.has_results()) {
            debug!("draw blocked: participant list unchanged");
            return DrawReport::Blocked;
        }

        match draw_lines(&current, rng) {
            DrawOutcome::Drawn { lines } => {
                info!(participants = current.len(), "secret santa drawn");
                self.results = lines.clone();
                self.last_draw = current;
                self.persistence.save(Slot::Results, &self.results);
                self.persistence.save(Slot::LastDraw, &self.last_draw);
                DrawReport::Drawn { lines }
            }
            DrawOutcome::TooFewParticipants => DrawReport::TooFewParticipants,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use santa_core::{MemoryStore, StoreError, TOO_FEW_MESSAGE};

    struct ReadOnlyStore(MemoryStore);

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key)
        }

        fn set(&mut self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("quota exceeded".into()))
        }

        fn remove(&mut self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("quota exceeded".into()))
        }
    }

    fn state_with(names: &[&str]) -> AppState<MemoryStore> {
        let mut state = AppState::load(MemoryStore::new());
        for name in names {
            assert!(state.add_participant(name));
        }
        state
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn add_trims_and_skips_blank_names() {
        let mut state = state_with(&["  Alice  "]);
        assert!(!state.add_participant("   "));
        assert_eq!(state.participants(), ["Alice".to_string()]);
    }

    #[test]
    fn draw_stores_lines_and_snapshot() {
        let mut state = state_with(&["Alice", "Bob", "Charlie"]);
        let DrawReport::Drawn { lines } = state.draw(&mut rng()) else {
            panic!("expected a draw");
        };

        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.contains(" offre à ")));
        assert_eq!(state.results(), lines.as_slice());
        assert_eq!(state.last_draw(), state.participants());
    }

    #[test]
    fn single_participant_stores_warning() {
        let mut state = state_with(&["Alice"]);
        assert_eq!(state.draw(&mut rng()), DrawReport::TooFewParticipants);
        assert_eq!(state.results(), [TOO_FEW_MESSAGE.to_string()]);
        assert!(state.last_draw().is_empty());
    }

    #[test]
    fn unchanged_list_is_blocked_until_results_cleared() {
        let mut state = state_with(&["A", "B"]);
        assert!(matches!(state.draw(&mut rng()), DrawReport::Drawn { .. }));
        let first = state.results().to_vec();

        assert!(state.is_blocked());
        assert_eq!(state.draw(&mut rng()), DrawReport::Blocked);
        assert_eq!(state.results(), first.as_slice());

        state.clear_results();
        assert!(!state.is_blocked());
        assert!(matches!(state.draw(&mut rng()), DrawReport::Drawn { .. }));
    }

    #[test]
    fn warning_keeps_previous_snapshot() {
        let mut state = state_with(&["A", "B"]);
        assert!(matches!(state.draw(&mut rng()), DrawReport::Drawn { .. }));

        state.remove_participant(1).unwrap();
        assert_eq!(state.draw(&mut rng()), DrawReport::TooFewParticipants);
        assert_eq!(state.last_draw(), ["A".to_string(), "B".to_string()]);

        assert!(state.add_participant("B"));
        assert!(state.is_blocked());
        assert_eq!(state.draw(&mut rng()), DrawReport::Blocked);
        assert_eq!(state.results(), [TOO_FEW_MESSAGE.to_string()]);
    }

    #[test]
    fn editing_the_list_reopens_the_gate() {
        let mut state = state_with(&["A", "B"]);
        state.draw(&mut rng());
        assert!(state.add_participant("C"));
        assert!(!state.is_blocked());
        let DrawReport::Drawn { lines } = state.draw(&mut rng()) else {
            panic!("expected a draw");
        };
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn remove_out_of_range_is_an_error() {
        let mut state = state_with(&["A", "B"]);
        assert_eq!(
            state.remove_participant(5),
            Err(AppError::NoSuchParticipant { index: 5, len: 2 })
        );
        assert_eq!(state.remove_participant(0), Ok("A".to_string()));
        assert_eq!(state.participants(), ["B".to_string()]);
    }

    #[test]
    fn clear_participants_resets_everything() {
        let mut state = state_with(&["A", "B"]);
        state.draw(&mut rng());
        state.clear_participants();
        assert!(state.participants().is_empty());
        assert!(state.results().is_empty());
        assert!(state.last_draw().is_empty());
    }

    #[test]
    fn state_survives_reload() {
        let mut state = state_with(&["Alice", "Bob"]);
        state.draw(&mut rng());
        let results = state.results().to_vec();

        let store = state.store().clone();
        let reloaded = AppState::load(store);
        assert_eq!(reloaded.participants(), ["Alice".to_string(), "Bob".to_string()]);
        assert_eq!(reloaded.results(), results.as_slice());
        assert!(reloaded.is_blocked());
    }

    #[test]
    fn legacy_results_load_flattened() {
        let mut store = MemoryStore::new();
        store
            .set(
                Slot::Results.key(),
                r#"[{"props":{"children":"A offre à B"}},"C offre à D"]"#,
            )
            .unwrap();
        let state = AppState::load(store);
        assert_eq!(
            state.results(),
            ["A offre à B".to_string(), "C offre à D".to_string()]
        );
    }

    #[test]
    fn failing_store_keeps_state_in_memory() {
        let mut state = AppState::load(ReadOnlyStore(MemoryStore::new()));
        assert!(state.add_participant("A"));
        assert!(state.add_participant("B"));
        assert!(matches!(state.draw(&mut rng()), DrawReport::Drawn { .. }));
        assert_eq!(state.participants().len(), 2);
        assert!(state.is_blocked());
    }
}
