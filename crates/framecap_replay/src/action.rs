//! Events and actions of the replay timeline.
//!
//! An event is the record of one replayed chunk. An action is a node of
//! the user-visible tree (draw, pass boundary, present, marker region) and
//! owns the events that led up to it, its own event last.

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// What an action represents
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ActionFlags: u32 {
        /// Draw call
        const DRAW = 1 << 0;
        /// Compute dispatch
        const DISPATCH = 1 << 1;
        /// Buffer or texture copy
        const COPY = 1 << 2;
        /// Clear of an attachment or buffer
        const CLEAR = 1 << 3;
        /// Presentation of a texture
        const PRESENT = 1 << 4;
        /// Start of a render, compute or transfer pass
        const BEGIN_PASS = 1 << 5;
        /// End of a pass
        const END_PASS = 1 << 6;
        /// Synthetic boundary around a committed scope
        const SCOPE_BOUNDARY = 1 << 7;
        /// Marker region opened by a push
        const PUSH_MARKER = 1 << 8;
        /// Single point marker
        const SET_MARKER = 1 << 9;
    }
}

impl ActionFlags {
    /// Markers carry action ID 0 and are never re-based
    #[must_use]
    pub fn is_marker(self) -> bool {
        self.intersects(Self::PUSH_MARKER | Self::SET_MARKER)
    }
}

impl Serialize for ActionFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ActionFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bits = u32::deserialize(deserializer)?;
        Ok(ActionFlags::from_bits_truncate(bits))
    }
}

/// One replayed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiEvent {
    /// Position in the timeline, starting at 1
    pub event_id: u32,
    /// Index of the chunk in the stream
    pub chunk_index: u64,
    /// Byte offset of the chunk, used to seek for partial replay
    pub file_offset: u64,
}

impl ApiEvent {
    /// Copy of this event moved `base` IDs later
    #[must_use]
    pub fn rebased(self, base: u32) -> Self {
        Self {
            event_id: self.event_id + base,
            ..self
        }
    }
}

/// Node of the action tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescription {
    /// Event of the chunk that produced the action
    pub event_id: u32,
    /// Sequential action number, 0 for markers
    pub action_id: u32,
    /// Display name
    pub name: String,
    /// What the action is
    pub flags: ActionFlags,
    /// Events since the previous action, ending with this action's own
    pub events: Vec<ApiEvent>,
    /// Nested actions, only for marker regions
    pub children: Vec<ActionDescription>,
}

impl ActionDescription {
    /// Leaf action with no events attached yet
    pub fn new(name: impl Into<String>, flags: ActionFlags) -> Self {
        Self {
            event_id: 0,
            action_id: 0,
            name: name.into(),
            flags,
            events: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Shift every event ID in this subtree by `event_base` and every
    /// non-marker action ID by `action_base`
    pub fn rebase(&mut self, event_base: u32, action_base: u32) {
        self.event_id += event_base;
        if !self.flags.is_marker() {
            self.action_id += action_base;
        }
        for event in &mut self.events {
            *event = event.rebased(event_base);
        }
        for child in &mut self.children {
            child.rebase(event_base, action_base);
        }
    }

    /// Find the action produced by `event_id` in this subtree
    #[must_use]
    pub fn find(&self, event_id: u32) -> Option<&ActionDescription> {
        if self.event_id == event_id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(event_id))
    }

    /// Visit this subtree depth first
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a ActionDescription)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}
