//! Deterministic grid-world stepper.
//!
//! Coordinates are `(x, y)` with `(0, 0)` in the top-left corner. Moves that
//! would leave the grid keep the agent in place and report `bumped`.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{VerifyError, VerifyResult};

/// Reward for every step taken.
pub const STEP_REWARD: i64 = -1;
/// Bonus added on the step that reaches the goal.
pub const GOAL_REWARD: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Up,
    Down,
    Left,
    Right,
}

impl Action {
    fn delta(self) -> (i64, i64) {
        match self {
            Action::Up => (0, -1),
            Action::Down => (0, 1),
            Action::Left => (-1, 0),
            Action::Right => (1, 0),
        }
    }
}

/// Static description of a world instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSpec {
    pub width: i64,
    pub height: i64,
    pub start: (i64, i64),
    pub goal: (i64, i64),
}

impl WorldSpec {
    pub fn contains(&self, (x, y): (i64, i64)) -> bool {
        (0..self.width).contains(&x) && (0..self.height).contains(&y)
    }

    pub fn validate(&self) -> VerifyResult<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(VerifyError::World(format!(
                "grid must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if !self.contains(self.start) || !self.contains(self.goal) {
            return Err(VerifyError::World("start and goal must lie inside the grid".into()));
        }
        Ok(())
    }

    /// Parse `"5x5 start=0,0 goal=3,2"`.
    pub fn parse(text: &str) -> VerifyResult<WorldSpec> {
        let bad = || VerifyError::World(format!("malformed world description: {text}"));
        let mut size = None;
        let mut start = None;
        let mut goal = None;
        for part in text.split_whitespace() {
            if let Some(rest) = part.strip_prefix("start=") {
                start = Some(parse_point(rest).ok_or_else(bad)?);
            } else if let Some(rest) = part.strip_prefix("goal=") {
                goal = Some(parse_point(rest).ok_or_else(bad)?);
            } else if let Some((w, h)) = part.split_once('x') {
                let w = w.parse().map_err(|_| bad())?;
                let h = h.parse().map_err(|_| bad())?;
                size = Some((w, h));
            } else {
                return Err(bad());
            }
        }
        let (width, height) = size.ok_or_else(bad)?;
        let spec = WorldSpec {
            width,
            height,
            start: start.unwrap_or((0, 0)),
            goal: goal.ok_or_else(bad)?,
        };
        spec.validate()?;
        Ok(spec)
    }
}

fn parse_point(text: &str) -> Option<(i64, i64)> {
    let (x, y) = text.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// Result of one [`GridWorld::step`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub observation: (i64, i64),
    pub reward: i64,
    pub done: bool,
    pub info: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct GridWorld {
    spec: WorldSpec,
    position: (i64, i64),
    steps: u64,
    done: bool,
    seed: u64,
}

impl GridWorld {
    pub fn new(spec: WorldSpec) -> VerifyResult<Self> {
        spec.validate()?;
        Ok(Self {
            position: spec.start,
            spec,
            steps: 0,
            done: false,
            seed: 0,
        })
    }

    /// Return to the start position. The world has no stochastic dynamics;
    /// the seed is only echoed in step info.
    pub fn reset(&mut self, seed: u64) -> (i64, i64) {
        self.position = self.spec.start;
        self.steps = 0;
        self.done = self.position == self.spec.goal;
        self.seed = seed;
        self.position
    }

    pub fn step(&mut self, action: Action) -> StepOutcome {
        if self.done {
            return StepOutcome {
                observation: self.position,
                reward: 0,
                done: true,
                info: json!({"ignored": true, "seed": self.seed}),
            };
        }
        let (dx, dy) = action.delta();
        let next = (self.position.0 + dx, self.position.1 + dy);
        let bumped = !self.spec.contains(next);
        if !bumped {
            self.position = next;
        }
        self.steps += 1;
        self.done = self.position == self.spec.goal;
        let reward = STEP_REWARD + if self.done { GOAL_REWARD } else { 0 };
        StepOutcome {
            observation: self.position,
            reward,
            done: self.done,
            info: json!({"bumped": bumped, "steps": self.steps, "seed": self.seed}),
        }
    }

    pub fn position(&self) -> (i64, i64) {
        self.position
    }
}

/// Summary of replaying an action list from the start position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Replay {
    pub done: bool,
    pub position: (i64, i64),
    pub total_reward: i64,
    pub steps: usize,
    pub bumps: usize,
}

pub fn replay(spec: &WorldSpec, actions: &[Action], seed: u64) -> VerifyResult<Replay> {
    let mut world = GridWorld::new(spec.clone())?;
    world.reset(seed);
    let mut total_reward = 0;
    let mut bumps = 0;
    let mut done = world.done;
    for action in actions {
        let outcome = world.step(*action);
        total_reward += outcome.reward;
        if outcome.info.get("bumped").and_then(|b| b.as_bool()) == Some(true) {
            bumps += 1;
        }
        done = outcome.done;
    }
    Ok(Replay {
        done,
        position: world.position(),
        total_reward,
        steps: actions.len(),
        bumps,
    })
}

/// Shortest plan moving along one axis first.
pub fn plan(spec: &WorldSpec, horizontal_first: bool) -> Vec<Action> {
    let (dx, dy) = (spec.goal.0 - spec.start.0, spec.goal.1 - spec.start.1);
    let horizontal = std::iter::repeat(if dx >= 0 { Action::Right } else { Action::Left })
        .take(dx.unsigned_abs() as usize);
    let vertical = std::iter::repeat(if dy >= 0 { Action::Down } else { Action::Up })
        .take(dy.unsigned_abs() as usize);
    if horizontal_first {
        horizontal.chain(vertical).collect()
    } else {
        vertical.chain(horizontal).collect()
    }
}
