//! The physics collaborator the session drives avatars through.
//!
//! The session only keeps gameplay bookkeeping (health, jumps, posture,
//! cooldowns). Movement, collision and hit detection belong to a [`World`].
//! [`KinematicWorld`] is the stand-in the server binary runs with: point
//! masses under gravity on a flat floor, clamped to the arena walls.

use shared::{ClassStats, ParticipantId, Vec2};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle(pub u32);

pub trait World: Send {
    fn spawn_avatar(&mut self, owner: ParticipantId, position: Vec2, stats: ClassStats)
        -> EntityHandle;
    fn despawn(&mut self, entity: EntityHandle);
    fn teleport(&mut self, entity: EntityHandle, position: Vec2);
    /// Horizontal input in `[-1, 1]`; the vertical component is ignored.
    fn drive(&mut self, entity: EntityHandle, input: Vec2);
    fn jump(&mut self, entity: EntityHandle);
    fn is_grounded(&self, entity: EntityHandle) -> bool;
    /// Returns `true` when the hook found an anchor. A miss leaves any
    /// previous anchor in place.
    fn cast_hook(&mut self, entity: EntityHandle, direction: Vec2) -> bool;
    fn release_hook(&mut self, entity: EntityHandle);
    /// Owner of the first other avatar along the shot, if any.
    fn hit_test(&self, shooter: EntityHandle, direction: Vec2) -> Option<ParticipantId>;
    fn step(&mut self, dt: f32);
    fn position(&self, entity: EntityHandle) -> Option<Vec2>;
}

#[derive(Debug, Clone)]
struct Body {
    owner: ParticipantId,
    position: Vec2,
    velocity: Vec2,
    speed: f32,
    grounded: bool,
    anchor: Option<Vec2>,
}

#[derive(Debug, Clone)]
pub struct KinematicWorld {
    bodies: HashMap<EntityHandle, Body>,
    next_handle: u32,
    pub gravity: f32,
    pub floor: f32,
    pub half_width: f32,
    pub ceiling: f32,
    pub jump_speed: f32,
    pub hook_range: f32,
    pub hook_pull: f32,
    pub body_radius: f32,
    pub shot_range: f32,
}

impl Default for KinematicWorld {
    fn default() -> Self {
        Self {
            bodies: HashMap::new(),
            next_handle: 1,
            gravity: 9.81,
            floor: 0.0,
            half_width: 16.0,
            ceiling: 12.0,
            jump_speed: 6.0,
            hook_range: 10.0,
            hook_pull: 8.0,
            body_radius: 0.5,
            shot_range: 30.0,
        }
    }
}

impl KinematicWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Where a hook cast from `origin` along `direction` hits the arena
    /// walls or ceiling, if within range.
    fn hook_anchor(&self, origin: Vec2, direction: Vec2) -> Option<Vec2> {
        let dir = direction.normalized();
        if dir == Vec2::ZERO {
            return None;
        }

        let mut best: Option<f32> = None;
        if dir.y > 0.0 {
            best = Some((self.ceiling - origin.y) / dir.y);
        }
        if dir.x != 0.0 {
            let wall = if dir.x > 0.0 { self.half_width } else { -self.half_width };
            let t = (wall - origin.x) / dir.x;
            best = Some(best.map_or(t, |b| b.min(t)));
        }

        best.filter(|t| *t >= 0.0 && *t <= self.hook_range)
            .map(|t| origin.add(dir.scale(t)))
    }
}

impl World for KinematicWorld {
    fn spawn_avatar(
        &mut self,
        owner: ParticipantId,
        position: Vec2,
        stats: ClassStats,
    ) -> EntityHandle {
        let handle = EntityHandle(self.next_handle);
        self.next_handle += 1;
        self.bodies.insert(
            handle,
            Body {
                owner,
                position,
                velocity: Vec2::ZERO,
                speed: stats.movement_speed,
                grounded: position.y <= self.floor,
                anchor: None,
            },
        );
        handle
    }

    fn despawn(&mut self, entity: EntityHandle) {
        self.bodies.remove(&entity);
    }

    fn teleport(&mut self, entity: EntityHandle, position: Vec2) {
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.position = position;
            body.velocity = Vec2::ZERO;
            body.anchor = None;
            body.grounded = position.y <= self.floor;
        }
    }

    fn drive(&mut self, entity: EntityHandle, input: Vec2) {
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.velocity.x = input.x.clamp(-1.0, 1.0) * body.speed;
        }
    }

    fn jump(&mut self, entity: EntityHandle) {
        let jump_speed = self.jump_speed;
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.velocity.y = jump_speed;
            body.grounded = false;
        }
    }

    fn is_grounded(&self, entity: EntityHandle) -> bool {
        self.bodies.get(&entity).map_or(false, |body| body.grounded)
    }

    fn cast_hook(&mut self, entity: EntityHandle, direction: Vec2) -> bool {
        let origin = match self.bodies.get(&entity) {
            Some(body) => body.position,
            None => return false,
        };
        let anchor = match self.hook_anchor(origin, direction) {
            Some(anchor) => anchor,
            None => return false,
        };
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.anchor = Some(anchor);
        }
        true
    }

    fn release_hook(&mut self, entity: EntityHandle) {
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.anchor = None;
        }
    }

    fn hit_test(&self, shooter: EntityHandle, direction: Vec2) -> Option<ParticipantId> {
        let origin = self.bodies.get(&shooter)?;
        let dir = direction.normalized();
        if dir == Vec2::ZERO {
            return None;
        }

        let mut closest: Option<(f32, ParticipantId)> = None;
        for (handle, body) in &self.bodies {
            if *handle == shooter {
                continue;
            }
            // Ray against a circle around the target
            let to_target = body.position.sub(origin.position);
            let along = to_target.dot(dir);
            if along < 0.0 || along > self.shot_range {
                continue;
            }
            let closest_point = origin.position.add(dir.scale(along));
            if closest_point.sub(body.position).length() > self.body_radius {
                continue;
            }
            if closest.map_or(true, |(best, _)| along < best) {
                closest = Some((along, body.owner));
            }
        }
        closest.map(|(_, owner)| owner)
    }

    fn step(&mut self, dt: f32) {
        for body in self.bodies.values_mut() {
            match body.anchor {
                Some(anchor) => {
                    let pull = anchor.sub(body.position).normalized().scale(self.hook_pull);
                    body.velocity = pull;
                }
                None => body.velocity.y -= self.gravity * dt,
            }

            body.position = body.position.add(body.velocity.scale(dt));
            body.position.x = body.position.x.clamp(-self.half_width, self.half_width);
            body.position.y = body.position.y.min(self.ceiling);

            if body.position.y <= self.floor {
                body.position.y = self.floor;
                body.velocity.y = 0.0;
                body.grounded = true;
            } else {
                body.grounded = false;
            }
        }
    }

    fn position(&self, entity: EntityHandle) -> Option<Vec2> {
        self.bodies.get(&entity).map(|body| body.position)
    }
}
