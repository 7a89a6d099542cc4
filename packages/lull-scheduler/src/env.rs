use serde::{Deserialize, Serialize};
use std::fmt;

/// Visibility of the host's foreground surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityState {
    Hidden,
    Visible,
    Prerender,
    Unloaded,
}

impl VisibilityState {
    /// Parses a DOM `document.visibilityState` value.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "hidden" => Some(VisibilityState::Hidden),
            "visible" => Some(VisibilityState::Visible),
            "prerender" => Some(VisibilityState::Prerender),
            "unloaded" => Some(VisibilityState::Unloaded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VisibilityState::Hidden => "hidden",
            VisibilityState::Visible => "visible",
            VisibilityState::Prerender => "prerender",
            VisibilityState::Unloaded => "unloaded",
        }
    }
}

impl fmt::Display for VisibilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of host we are running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostProfile {
    /// The host has windowing, visibility and document concepts.
    pub has_document: bool,
    /// Visibility events are known to be unreliable on this host (Safari),
    /// so shutdown must be observed through the unload path as well.
    pub unreliable_lifecycle_events: bool,
}

impl HostProfile {
    pub const HEADLESS: HostProfile = HostProfile {
        has_document: false,
        unreliable_lifecycle_events: false,
    };

    pub const DOCUMENT: HostProfile = HostProfile {
        has_document: true,
        unreliable_lifecycle_events: false,
    };
}

pub trait EnvironmentProbe {
    fn profile(&self) -> HostProfile;

    /// Raw visibility of the foreground surface. Only meaningful when the
    /// profile reports a document.
    fn visibility_state(&self) -> VisibilityState;

    /// Visibility as task snapshots should record it: hosts without a
    /// document are always considered visible.
    fn current_visibility(&self) -> VisibilityState {
        if self.profile().has_document {
            self.visibility_state()
        } else {
            VisibilityState::Visible
        }
    }

    fn is_hidden(&self) -> bool {
        self.profile().has_document && self.visibility_state() == VisibilityState::Hidden
    }
}
