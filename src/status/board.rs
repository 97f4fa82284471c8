//! Device status markup
//!
//! Each device is rendered as a status container:
//!
//! ```text
//! <div class="device-card" data-device-status data-device-id="ID">
//!   <span class="device-name">NAME</span>
//!   <span class="badge bg-secondary status-badge"><i class="fas fa-circle"></i> Unknown</span>
//!   <small class="last-ping">Never</small>
//! </div>
//! ```

use serde::Serialize;

use crate::config::DeviceEntry;
use crate::dom::{Document, NodeId};

pub const CONTAINER_SELECTOR: &str = "[data-device-status]";
pub const BADGE_SELECTOR: &str = ".status-badge";
pub const LAST_PING_SELECTOR: &str = ".last-ping";
pub const DEVICE_ID_ATTR: &str = "data-device-id";

const NEVER_SEEN: &str = "Never";
const ICON_CLASS: &str = "fas fa-circle";

/// Visual state of a status badge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeState {
    Online,
    Offline,
    Unknown,
}

impl BadgeState {
    pub fn from_online(is_online: bool) -> Self {
        if is_online {
            BadgeState::Online
        } else {
            BadgeState::Offline
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BadgeState::Online => "Online",
            BadgeState::Offline => "Offline",
            BadgeState::Unknown => "Unknown",
        }
    }

    pub fn class_name(self) -> &'static str {
        match self {
            BadgeState::Online => "badge bg-success status-badge",
            BadgeState::Offline => "badge bg-danger status-badge",
            BadgeState::Unknown => "badge bg-secondary status-badge",
        }
    }

    /// Read the state back from a badge's classes
    pub fn read(doc: &Document, badge: NodeId) -> Self {
        if doc.has_class(badge, "bg-success") {
            BadgeState::Online
        } else if doc.has_class(badge, "bg-danger") {
            BadgeState::Offline
        } else {
            BadgeState::Unknown
        }
    }

    /// Write the class string and `<i class="fas fa-circle"></i> LABEL`,
    /// reusing the icon and label nodes when they are already there
    pub fn render(self, doc: &mut Document, badge: NodeId) {
        doc.set_class_name(badge, self.class_name());
        let label = format!(" {}", self.label());

        if let &[icon, text] = doc.children(badge) {
            if doc.tag(icon) == Some("i") && !doc.is_element(text) {
                doc.set_text_content(text, &label);
                return;
            }
        }

        doc.set_text_content(badge, "");
        let icon = doc.create_element("i");
        doc.set_class_name(icon, ICON_CLASS);
        doc.append_child(badge, icon);
        let text = doc.create_text(&label);
        doc.append_child(badge, text);
    }
}

/// Handles to the elements of one rendered device
#[derive(Debug, Clone, Copy)]
pub struct DeviceCard {
    pub container: NodeId,
    pub badge: NodeId,
    pub last_ping: NodeId,
}

/// What a device card currently shows
#[derive(Debug, Clone, Serialize)]
pub struct CardSnapshot {
    pub id: String,
    pub status: BadgeState,
    pub last_seen: String,
}

/// Render one status container per device under `parent`
pub fn render_board(doc: &mut Document, parent: NodeId, devices: &[DeviceEntry]) -> Vec<DeviceCard> {
    devices
        .iter()
        .map(|device| {
            let container = doc.create_element("div");
            doc.add_class(container, "device-card");
            doc.set_attribute(container, "data-device-status", "");
            doc.set_attribute(container, DEVICE_ID_ATTR, &device.id);

            let name = doc.create_element("span");
            doc.add_class(name, "device-name");
            doc.set_text_content(name, device.display_name());
            doc.append_child(container, name);

            let badge = doc.create_element("span");
            BadgeState::Unknown.render(doc, badge);
            doc.append_child(container, badge);

            let last_ping = doc.create_element("small");
            doc.add_class(last_ping, "last-ping");
            doc.set_text_content(last_ping, NEVER_SEEN);
            doc.append_child(container, last_ping);

            doc.append_child(parent, container);
            DeviceCard {
                container,
                badge,
                last_ping,
            }
        })
        .collect()
}

pub fn snapshot(doc: &Document, card: &DeviceCard) -> CardSnapshot {
    CardSnapshot {
        id: doc
            .attribute(card.container, DEVICE_ID_ATTR)
            .unwrap_or_default()
            .to_string(),
        status: BadgeState::read(doc, card.badge),
        last_seen: doc.text_content(card.last_ping),
    }
}
