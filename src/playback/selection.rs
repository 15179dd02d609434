//! No-repeat random selection over the cached ids.

use std::collections::BTreeSet;

use log::warn;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// What the scheduler should do with the play history for one pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub id: String,
    /// Every cached id has played (or only one exists); start a new round.
    pub reset_history: bool,
    /// Add `id` to the history. Never set for a lone cached id.
    pub record: bool,
}

pub struct Selector {
    rng: StdRng,
    last_selected: Option<String>,
}

impl Selector {
    /// Seeds from the OS, falling back to a clock-derived seed.
    pub fn from_os_seed() -> Self {
        let mut seed = [0u8; 32];
        if let Err(error) = getrandom::fill(&mut seed) {
            warn!("Selector: OS seed unavailable ({}), using clock seed", error);
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|duration| duration.as_nanos())
                .unwrap_or(0);
            seed[..16].copy_from_slice(&nanos.to_le_bytes());
        }
        Self {
            rng: StdRng::from_seed(seed),
            last_selected: None,
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            last_selected: None,
        }
    }

    /// Forgets the back-to-back guard, e.g. after a mode change.
    pub fn reset(&mut self) {
        self.last_selected = None;
    }

    /// Picks an id not yet in `history`, starting a new round when none is left.
    ///
    /// At a round boundary the previous pick is excluded so the same id never
    /// plays twice in a row while more than one id is cached.
    pub fn select(&mut self, cached: &BTreeSet<String>, history: &[String]) -> Option<Selection> {
        if cached.is_empty() {
            return None;
        }
        if cached.len() == 1 {
            let id = cached.iter().next()?.clone();
            self.last_selected = Some(id.clone());
            return Some(Selection {
                id,
                reset_history: !history.is_empty(),
                record: false,
            });
        }

        let played: BTreeSet<&str> = history.iter().map(String::as_str).collect();
        let mut candidates: Vec<&String> = cached
            .iter()
            .filter(|id| !played.contains(id.as_str()))
            .collect();
        let reset_history = candidates.is_empty();
        if reset_history {
            candidates = cached
                .iter()
                .filter(|id| self.last_selected.as_deref() != Some(id.as_str()))
                .collect();
        }

        let index = self.rng.random_range(0..candidates.len());
        let id = candidates[index].clone();
        self.last_selected = Some(id.clone());
        Some(Selection {
            id,
            reset_history,
            record: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Selector;
    use std::collections::BTreeSet;

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    /// Applies selections the way the scheduler does and returns the picks.
    fn simulate(selector: &mut Selector, cached: &BTreeSet<String>, picks: usize) -> Vec<String> {
        let mut history: Vec<String> = Vec::new();
        let mut played = Vec::new();
        for _ in 0..picks {
            let selection = selector
                .select(cached, &history)
                .expect("cache is not empty");
            if selection.reset_history {
                history.clear();
            }
            if selection.record && !history.contains(&selection.id) {
                history.push(selection.id.clone());
            }
            played.push(selection.id);
        }
        played
    }

    #[test]
    fn test_every_round_plays_each_id_exactly_once() {
        let cached = ids(&["a", "b", "c", "d", "e"]);
        for seed in 0..20 {
            let mut selector = Selector::seeded(seed);
            let played = simulate(&mut selector, &cached, 15);
            for round in played.chunks(5) {
                let unique: BTreeSet<&String> = round.iter().collect();
                assert_eq!(unique.len(), 5, "seed {seed}: {played:?}");
            }
        }
    }

    #[test]
    fn test_no_back_to_back_repeat_across_round_boundaries() {
        let cached = ids(&["a", "b"]);
        for seed in 0..20 {
            let mut selector = Selector::seeded(seed);
            let played = simulate(&mut selector, &cached, 12);
            for pair in played.windows(2) {
                assert_ne!(pair[0], pair[1], "seed {seed}: {played:?}");
            }
        }
    }

    #[test]
    fn test_single_cached_id_is_always_selected_and_never_recorded() {
        let cached = ids(&["only"]);
        let mut selector = Selector::seeded(7);
        for _ in 0..5 {
            let selection = selector.select(&cached, &[]).expect("one id is cached");
            assert_eq!(selection.id, "only");
            assert!(!selection.record);
            assert!(!selection.reset_history);
        }
        let stale_history = vec!["gone".to_string()];
        let selection = selector
            .select(&cached, &stale_history)
            .expect("one id is cached");
        assert!(selection.reset_history);
    }

    #[test]
    fn test_empty_cache_selects_nothing() {
        let mut selector = Selector::seeded(1);
        assert!(selector.select(&BTreeSet::new(), &[]).is_none());
    }

    #[test]
    fn test_same_seed_gives_same_sequence() {
        let cached = ids(&["a", "b", "c", "d"]);
        let first = simulate(&mut Selector::seeded(42), &cached, 8);
        let second = simulate(&mut Selector::seeded(42), &cached, 8);
        assert_eq!(first, second);
    }
}
