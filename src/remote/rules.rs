//! Safety predicates for the pendant.

use chrono::{DateTime, TimeDelta, Utc};

use crate::remote::state::RemoteControlState;

pub fn is_safe_to_operate(state: &RemoteControlState) -> bool {
    state.remote_ready && !state.e_stop && state.enable
}

pub fn can_move(state: &RemoteControlState) -> bool {
    is_safe_to_operate(state)
}

pub fn is_valid_joystick_input(linear: f64, angular: f64) -> bool {
    (-1.0..=1.0).contains(&linear) && (-1.0..=1.0).contains(&angular)
}

pub fn is_valid_speed(speed: f64) -> bool {
    (0.0..=1.0).contains(&speed)
}

/// No fresh block for longer than `max_age`.
pub fn is_heartbeat_stale(state: &RemoteControlState, max_age: TimeDelta, now: DateTime<Utc>) -> bool {
    now - state.updated_at > max_age
}

/// E-stop pressed or the radio link is down.
pub fn is_emergency_stop(state: &RemoteControlState) -> bool {
    state.e_stop || state.link_lost
}
