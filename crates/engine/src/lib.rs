//! Presence and mute synchronization for group voice sessions.
//!
//! A [`Session`] tracks who is in one guild's voice channel and keeps their
//! server mute in line with the shared game state. The [`SessionRegistry`]
//! owns every session and routes normalized gateway events to them.

mod actuator;
mod commands;
mod error;
mod ingress;
mod member;
mod panel;
mod registry;
mod relay;
mod session;

pub use actuator::{Actuation, MuteActuator};
pub use commands::{help_text, parse_command, parse_toggles, Command};
pub use error::{ActuatorError, MuteReport, SessionError, Setting};
pub use member::{desired_mute, MemberStatus, RosterEntry, TrackedMember};
pub use panel::{render_panel, PanelRef, MUTE_TOGGLE_EMOJI, PANEL_REACTIONS, RELAY_EMOJI, RESET_EMOJI};
pub use registry::SessionRegistry;
pub use relay::RelaySettings;
pub use session::{IndexToggle, Session, SessionSettings, SessionSnapshot};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
