//! Decoded pendant state.

use chrono::{DateTime, Utc};
use strum_macros::{Display, EnumIter, IntoStaticStr};

/// Float fields closer than this compare equal.
pub const FLOAT_TOLERANCE: f64 = 0.01;

/// Joystick deflection below this counts as centred.
pub const AXIS_DEADBAND: f64 = 0.05;

/// Operating mode selected on the pendant (low nibble of byte 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, IntoStaticStr)]
pub enum RemoteMode {
    #[default]
    Default,
    Maintenance,
    Override,
    Unknown,
}

impl From<u8> for RemoteMode {
    fn from(code: u8) -> Self {
        match code {
            0 => RemoteMode::Default,
            1 => RemoteMode::Maintenance,
            2 => RemoteMode::Override,
            _ => RemoteMode::Unknown,
        }
    }
}

/// What the operator is asking for, in priority order of derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, IntoStaticStr)]
pub enum RemoteAction {
    #[strum(to_string = "Remote Not Ready")]
    NotReady,
    #[strum(to_string = "E-STOP")]
    EmergencyStop,
    Disabled,
    Forward,
    Backward,
    Right,
    Left,
    #[strum(to_string = "Lift Up")]
    LiftUp,
    #[strum(to_string = "Lift Down")]
    LiftDown,
    #[strum(to_string = "Rotate Left")]
    RotateLeft,
    #[strum(to_string = "Rotate Right")]
    RotateRight,
    Idle,
}

/// Discrete pendant buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Buttons {
    pub lift_up: bool,
    pub lift_down: bool,
    pub rotate_left: bool,
    pub rotate_right: bool,
    pub mode_select: bool,
}

/// One decoded register block.
///
/// `linear` and `angular` are already forced to zero whenever the pendant is
/// not safe to operate; the unclamped values are kept in `raw_linear` and
/// `raw_angular` for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct RemoteControlState {
    /// Rolling 0..=15 counter.
    pub heartbeat: u8,
    pub link_lost: bool,
    pub remote_ready: bool,
    pub e_stop: bool,
    pub enable: bool,
    pub mode: RemoteMode,
    pub buttons: Buttons,
    /// -1.0..=1.0, positive forward.
    pub linear: f64,
    /// -1.0..=1.0, positive right.
    pub angular: f64,
    /// 0.0..=1.0
    pub speed: f64,
    pub raw_linear: f64,
    pub raw_angular: f64,
    pub action: RemoteAction,
    pub updated_at: DateTime<Utc>,
}

impl RemoteControlState {
    pub fn action_label(&self) -> &'static str {
        self.action.into()
    }

    pub fn to_update(&self) -> RemoteControlUpdate {
        RemoteControlUpdate {
            heartbeat: self.heartbeat,
            remote_ready: self.remote_ready,
            e_stop: self.e_stop,
            enable: self.enable,
            mode: self.mode,
            linear: self.linear,
            angular: self.angular,
            speed: self.speed,
            action: self.action_label(),
            timestamp: self.updated_at,
        }
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < FLOAT_TOLERANCE
}

/// Equal when nothing an operator could notice has changed. The timestamp
/// and the raw axes are ignored.
impl PartialEq for RemoteControlState {
    fn eq(&self, other: &Self) -> bool {
        self.heartbeat == other.heartbeat
            && self.link_lost == other.link_lost
            && self.remote_ready == other.remote_ready
            && self.e_stop == other.e_stop
            && self.enable == other.enable
            && self.mode == other.mode
            && self.buttons == other.buttons
            && self.action == other.action
            && close(self.linear, other.linear)
            && close(self.angular, other.angular)
            && close(self.speed, other.speed)
    }
}

/// Derive the action from an already clamped state. First match wins.
pub fn derive_action(
    remote_ready: bool,
    e_stop: bool,
    enable: bool,
    linear: f64,
    angular: f64,
    buttons: &Buttons,
) -> RemoteAction {
    if !remote_ready {
        RemoteAction::NotReady
    } else if e_stop {
        RemoteAction::EmergencyStop
    } else if !enable {
        RemoteAction::Disabled
    } else if linear.abs() > AXIS_DEADBAND {
        if linear > 0.0 {
            RemoteAction::Forward
        } else {
            RemoteAction::Backward
        }
    } else if angular.abs() > AXIS_DEADBAND {
        if angular > 0.0 {
            RemoteAction::Right
        } else {
            RemoteAction::Left
        }
    } else if buttons.lift_up {
        RemoteAction::LiftUp
    } else if buttons.lift_down {
        RemoteAction::LiftDown
    } else if buttons.rotate_left {
        RemoteAction::RotateLeft
    } else if buttons.rotate_right {
        RemoteAction::RotateRight
    } else {
        RemoteAction::Idle
    }
}

/// Published to listeners when the pendant state changes.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteControlUpdate {
    pub heartbeat: u8,
    pub remote_ready: bool,
    pub e_stop: bool,
    pub enable: bool,
    pub mode: RemoteMode,
    pub linear: f64,
    pub angular: f64,
    pub speed: f64,
    pub action: &'static str,
    pub timestamp: DateTime<Utc>,
}
