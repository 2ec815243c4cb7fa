use crate::clock;
use crate::config::Settings;
use crate::model::ScheduleState;
use chrono::{DateTime, Local, TimeDelta};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    OutsideWindow,
    QuotaExhausted,
}

impl GateReason {
    pub fn label(self) -> &'static str {
        match self {
            GateReason::OutsideWindow => "outside active window",
            GateReason::QuotaExhausted => "quota exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gate {
    pub reason: GateReason,
    pub recheck_at: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Planned(DateTime<Local>),
    Due(DateTime<Local>),
    /// A cycle consumed this fire time and has not re-planned yet.
    Running(DateTime<Local>),
    Gated(Gate),
}

impl Phase {
    pub fn label(&self) -> String {
        match self {
            Phase::Idle => "idle".to_string(),
            Phase::Planned(_) => "planned".to_string(),
            Phase::Due(_) => "due".to_string(),
            Phase::Running(_) => "running".to_string(),
            Phase::Gated(gate) => format!("gated ({})", gate.reason.label()),
        }
    }
}

/// Owns the single outstanding fire time.
///
/// A fire time and a gate are never held together, and neither survives
/// `stop`. The persisted part is [`Planner::persisted`]; the gate is rebuilt
/// on the next check after a restart.
#[derive(Debug, Clone)]
pub struct Planner {
    state: ScheduleState,
    gate: Option<Gate>,
    in_flight: Option<DateTime<Local>>,
}

impl Planner {
    pub fn restore(state: ScheduleState) -> Self {
        let mut planner = Self {
            state,
            gate: None,
            in_flight: None,
        };
        if !planner.state.is_enabled {
            planner.state.next_fire_time = None;
        }
        planner
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled
    }

    pub fn gate(&self) -> Option<Gate> {
        self.gate
    }

    /// What goes to disk. A consumed fire time is written until the cycle
    /// re-plans, so a crash mid-cycle still catches up on restart.
    pub fn persisted(&self) -> ScheduleState {
        ScheduleState {
            next_fire_time: self.state.next_fire_time.or(self.in_flight),
            is_enabled: self.state.is_enabled,
        }
    }

    pub fn phase(&self, now: DateTime<Local>) -> Phase {
        if !self.state.is_enabled {
            return Phase::Idle;
        }
        if let Some(at) = self.in_flight {
            return Phase::Running(at);
        }
        match (self.state.next_fire_time, self.gate) {
            (Some(at), _) if at <= now => Phase::Due(at),
            (Some(at), _) => Phase::Planned(at),
            (None, Some(gate)) => Phase::Gated(gate),
            (None, None) => Phase::Idle,
        }
    }

    pub fn start(&mut self) {
        self.state.is_enabled = true;
    }

    pub fn stop(&mut self) {
        self.state.is_enabled = false;
        self.state.next_fire_time = None;
        self.gate = None;
        self.in_flight = None;
    }

    /// Take the outstanding fire time; it stays in flight until re-planned.
    pub fn consume(&mut self) -> Option<DateTime<Local>> {
        let taken = self.state.next_fire_time.take();
        if taken.is_some() {
            self.in_flight = taken;
        }
        taken
    }

    /// Plan the next fire time, or record a gate when `blocked` is set.
    pub fn plan<R: Rng + ?Sized>(
        &mut self,
        now: DateTime<Local>,
        blocked: Option<GateReason>,
        settings: &Settings,
        rng: &mut R,
    ) -> Phase {
        if !self.state.is_enabled {
            self.stop();
            return Phase::Idle;
        }

        if let Some(reason) = blocked {
            self.set_gate(reason, now, settings);
            return self.phase(now);
        }

        let (min, max) = settings.interval_bounds();
        let delay = rng.gen_range(min..=max);
        let at = now + TimeDelta::seconds(delay as i64);
        self.state.next_fire_time = Some(at);
        self.gate = None;
        self.in_flight = None;
        Phase::Planned(at)
    }

    pub fn set_gate(&mut self, reason: GateReason, now: DateTime<Local>, settings: &Settings) {
        if !self.state.is_enabled {
            return;
        }
        let recheck_at = match reason {
            GateReason::OutsideWindow => now + settings.policy_recheck(),
            GateReason::QuotaExhausted => clock::next_local_midnight(now, settings.quota_recheck_offset()),
        };
        self.state.next_fire_time = None;
        self.gate = Some(Gate { reason, recheck_at });
        self.in_flight = None;
    }

    /// Next instant the foreground timer should wake the engine.
    pub fn wake_at(&self) -> Option<DateTime<Local>> {
        if !self.state.is_enabled {
            return None;
        }
        self.state
            .next_fire_time
            .or_else(|| self.gate.map(|g| g.recheck_at))
    }
}
