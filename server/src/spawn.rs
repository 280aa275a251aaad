//! Spawn point allocation with a per-point cooldown.

use crate::error::SessionError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::Vec2;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SpawnPoint {
    pub position: Vec2,
    occupied_until: Option<Instant>,
}

impl SpawnPoint {
    pub fn new(position: Vec2) -> Self {
        Self {
            position,
            occupied_until: None,
        }
    }

    /// A point becomes free again once its cooldown has elapsed.
    pub fn is_available(&self, now: Instant) -> bool {
        match self.occupied_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

/// Picks spawn positions so that no two avatars appear on the same point
/// within one cooldown window.
pub struct SpawnAllocator {
    points: Vec<SpawnPoint>,
    cooldown: Duration,
    rng: StdRng,
}

impl SpawnAllocator {
    pub fn new(positions: &[Vec2], cooldown: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            points: positions.iter().copied().map(SpawnPoint::new).collect(),
            cooldown,
            rng,
        }
    }

    /// Chooses uniformly among the points available at `now` and blocks the
    /// chosen one for the cooldown.
    ///
    /// Returns [`SessionError::SpawnUnavailable`] straight away when every
    /// point is still cooling down; callers retry on a later tick.
    pub fn allocate(&mut self, now: Instant) -> Result<Vec2, SessionError> {
        let available: Vec<usize> = self
            .points
            .iter()
            .enumerate()
            .filter(|(_, point)| point.is_available(now))
            .map(|(index, _)| index)
            .collect();

        let index = *available
            .choose(&mut self.rng)
            .ok_or(SessionError::SpawnUnavailable)?;

        let point = &mut self.points[index];
        point.occupied_until = Some(now + self.cooldown);
        Ok(point.position)
    }

    /// Earliest instant at which some point frees up, if all are busy.
    pub fn next_available_at(&self, now: Instant) -> Option<Instant> {
        if self.available_count(now) > 0 {
            return Some(now);
        }
        self.points.iter().filter_map(|point| point.occupied_until).min()
    }

    pub fn available_count(&self, now: Instant) -> usize {
        self.points.iter().filter(|point| point.is_available(now)).count()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn allocator(count: usize, cooldown_secs: u64) -> SpawnAllocator {
        let positions: Vec<Vec2> = (0..count).map(|i| Vec2::new(i as f32, 0.0)).collect();
        SpawnAllocator::new(&positions, Duration::from_secs(cooldown_secs), Some(7))
    }

    #[test]
    fn test_allocations_do_not_collide_within_cooldown() {
        let mut spawns = allocator(4, 3);
        let now = Instant::now();

        let mut seen = HashSet::new();
        for _ in 0..4 {
            let position = spawns.allocate(now).unwrap();
            assert!(seen.insert(position.x as i32));
        }
        assert_eq!(spawns.available_count(now), 0);
    }

    #[test]
    fn test_exhausted_allocator_fails_instead_of_spinning() {
        let mut spawns = allocator(1, 3);
        let now = Instant::now();

        spawns.allocate(now).unwrap();
        assert_eq!(spawns.allocate(now), Err(SessionError::SpawnUnavailable));
        assert_eq!(
            spawns.next_available_at(now),
            Some(now + Duration::from_secs(3))
        );
    }

    #[test]
    fn test_point_reverts_after_cooldown() {
        let mut spawns = allocator(1, 2);
        let now = Instant::now();

        let first = spawns.allocate(now).unwrap();
        assert!(spawns.allocate(now + Duration::from_secs(1)).is_err());

        let later = spawns.allocate(now + Duration::from_secs(2)).unwrap();
        assert_eq!(first, later);
    }

    #[test]
    fn test_seeded_allocators_agree() {
        let now = Instant::now();
        let mut a = allocator(6, 0);
        let mut b = allocator(6, 0);
        for _ in 0..10 {
            assert_eq!(a.allocate(now).unwrap(), b.allocate(now).unwrap());
        }
    }
}
