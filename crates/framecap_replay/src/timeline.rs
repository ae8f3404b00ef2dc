//! Event/action timeline and scope re-basing.
//!
//! Root chunks get event IDs as they are read. Chunks belonging to a
//! deferred scope are counted from zero on that scope's own timeline.
//! When the scope commits, its events and actions are shifted by the root
//! counters at that point and spliced into the root tree between two
//! synthetic boundary actions. The start boundary takes the next root
//! event ID, the commit chunk is the end boundary.

use crate::action::{ActionDescription, ActionFlags, ApiEvent};
use framecap_core::{CoreError, CoreResult, ResourceId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Where a chunk landed on the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLocation {
    /// Root event ID after re-basing
    pub event_id: u32,
    /// Scope the chunk belongs to, `None` for root chunks
    pub scope: Option<ResourceId>,
    /// Chunk index in the stream
    pub chunk_index: u64,
    /// Chunk byte offset
    pub file_offset: u64,
}

/// Summary of a committed scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInfo {
    /// Original scope ID
    pub scope: ResourceId,
    /// Event of the synthetic start boundary
    pub start_event_id: u32,
    /// Amount the scope's local event IDs were shifted by
    pub base_event_id: u32,
    /// Amount the scope's local action IDs were shifted by
    pub base_action_id: u32,
    /// Events recorded inside the scope, boundaries excluded
    pub event_count: u32,
    /// Non-marker actions recorded inside the scope
    pub action_count: u32,
    /// Event of the commit chunk (end boundary)
    pub end_event_id: u32,
    /// First chunk of the scope
    pub first_chunk_index: u64,
    /// Byte offset of the first chunk
    pub first_chunk_offset: u64,
    /// Whether other chunks were read between the scope's chunks
    pub interleaved: bool,
}

impl ScopeInfo {
    /// Whether `event_id` lies between the boundaries, inclusive
    #[must_use]
    pub fn contains(&self, event_id: u32) -> bool {
        (self.start_event_id..=self.end_event_id).contains(&event_id)
    }
}

#[derive(Debug, Default)]
struct ActionTree {
    top: Vec<ActionDescription>,
    markers: Vec<ActionDescription>,
    pending: Vec<ApiEvent>,
}

impl ActionTree {
    fn parent(&mut self) -> &mut Vec<ActionDescription> {
        match self.markers.last_mut() {
            Some(marker) => &mut marker.children,
            None => &mut self.top,
        }
    }

    fn push(&mut self, mut action: ActionDescription) {
        action.events = std::mem::take(&mut self.pending);
        self.parent().push(action);
    }

    fn open_marker(&mut self, mut action: ActionDescription) {
        action.events = std::mem::take(&mut self.pending);
        self.markers.push(action);
    }

    fn close_marker(&mut self) -> bool {
        match self.markers.pop() {
            Some(marker) => {
                self.parent().push(marker);
                true
            }
            None => false,
        }
    }

    fn close_all(&mut self) {
        while self.close_marker() {}
    }
}

#[derive(Debug)]
struct OpenScope {
    next_event: u32,
    next_action: u32,
    events: Vec<ApiEvent>,
    tree: ActionTree,
    first_chunk_index: u64,
    first_chunk_offset: u64,
    last_chunk_index: u64,
    interleaved: bool,
}

/// The event/action tree of one loaded frame
#[derive(Debug)]
pub struct Timeline {
    next_event: u32,
    next_action: u32,
    root: ActionTree,
    events: BTreeMap<u32, ApiEvent>,
    locations: HashMap<u64, EventLocation>,
    open: IndexMap<ResourceId, OpenScope>,
    scopes: IndexMap<ResourceId, ScopeInfo>,
    last_owner: Option<Option<ResourceId>>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    /// Empty timeline; the first event will be 1
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_event: 1,
            next_action: 1,
            root: ActionTree::default(),
            events: BTreeMap::new(),
            locations: HashMap::new(),
            open: IndexMap::new(),
            scopes: IndexMap::new(),
            last_owner: None,
        }
    }

    /// Next root event ID
    #[must_use]
    pub fn root_event_id(&self) -> u32 {
        self.next_event
    }

    /// Next root action ID
    #[must_use]
    pub fn root_action_id(&self) -> u32 {
        self.next_action
    }

    /// Route the current chunk to `scope`'s local timeline, opening it on
    /// first use. Repeated calls for the same chunk are ignored.
    pub fn enter_scope(&mut self, scope: ResourceId, chunk_index: u64, file_offset: u64) {
        let previous = self.last_owner;
        match self.open.get_mut(&scope) {
            Some(open) => {
                if open.last_chunk_index == chunk_index {
                    return;
                }
                if previous != Some(Some(scope)) {
                    open.interleaved = true;
                }
                open.last_chunk_index = chunk_index;
            }
            None => {
                self.open.insert(
                    scope,
                    OpenScope {
                        next_event: 0,
                        next_action: 0,
                        events: Vec::new(),
                        tree: ActionTree::default(),
                        first_chunk_index: chunk_index,
                        first_chunk_offset: file_offset,
                        last_chunk_index: chunk_index,
                        interleaved: false,
                    },
                );
            }
        }
    }

    fn open_scope(&mut self, scope: ResourceId) -> CoreResult<&mut OpenScope> {
        self.open
            .get_mut(&scope)
            .ok_or_else(|| CoreError::InvalidState(format!("{scope} has no open timeline")))
    }

    /// Record the event of one chunk. Returns the local ID for scope
    /// chunks and the root ID otherwise.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if `owner` names a scope that was not entered
    pub fn add_event(
        &mut self,
        owner: Option<ResourceId>,
        chunk_index: u64,
        file_offset: u64,
    ) -> CoreResult<u32> {
        match owner {
            Some(scope) => {
                let open = self.open_scope(scope)?;
                let event = ApiEvent {
                    event_id: open.next_event,
                    chunk_index,
                    file_offset,
                };
                open.next_event += 1;
                open.events.push(event);
                open.tree.pending.push(event);
                Ok(event.event_id)
            }
            None => {
                let event = ApiEvent {
                    event_id: self.next_event,
                    chunk_index,
                    file_offset,
                };
                self.next_event += 1;
                self.insert_event(event, None);
                self.root.pending.push(event);
                Ok(event.event_id)
            }
        }
    }

    fn insert_event(&mut self, event: ApiEvent, scope: Option<ResourceId>) {
        self.events.insert(event.event_id, event);
        self.locations.insert(
            event.file_offset,
            EventLocation {
                event_id: event.event_id,
                scope,
                chunk_index: event.chunk_index,
                file_offset: event.file_offset,
            },
        );
    }

    fn tree_and_counter(&mut self, owner: Option<ResourceId>) -> CoreResult<(&mut ActionTree, &mut u32)> {
        match owner {
            Some(scope) => {
                let open = self.open_scope(scope)?;
                Ok((&mut open.tree, &mut open.next_action))
            }
            None => Ok((&mut self.root, &mut self.next_action)),
        }
    }

    /// Close the pending events into an action produced by `event_id`
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if `owner` names a scope that was not entered
    pub fn add_action(
        &mut self,
        owner: Option<ResourceId>,
        event_id: u32,
        mut action: ActionDescription,
    ) -> CoreResult<()> {
        let (tree, counter) = self.tree_and_counter(owner)?;
        action.event_id = event_id;
        if action.flags.is_marker() {
            action.action_id = 0;
        } else {
            action.action_id = *counter;
            *counter += 1;
        }
        if action.flags.contains(ActionFlags::PUSH_MARKER) {
            tree.open_marker(action);
        } else {
            tree.push(action);
        }
        Ok(())
    }

    /// Close the innermost marker region. Returns false if none was open.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if `owner` names a scope that was not entered
    pub fn pop_marker(&mut self, owner: Option<ResourceId>) -> CoreResult<bool> {
        let (tree, _) = self.tree_and_counter(owner)?;
        Ok(tree.close_marker())
    }

    /// Fold a scope into the root timeline at the commit chunk.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the scope was never entered
    pub fn commit_scope(
        &mut self,
        scope: ResourceId,
        chunk_index: u64,
        file_offset: u64,
    ) -> CoreResult<ScopeInfo> {
        let mut open = self
            .open
            .shift_remove(&scope)
            .ok_or_else(|| CoreError::InvalidState(format!("{scope} committed without being entered")))?;
        open.tree.close_all();

        let start_event = ApiEvent {
            event_id: self.next_event,
            chunk_index: open.first_chunk_index,
            file_offset: open.first_chunk_offset,
        };
        self.events.insert(start_event.event_id, start_event);
        self.root.pending.push(start_event);
        let start = ActionDescription {
            event_id: start_event.event_id,
            action_id: self.next_action,
            ..ActionDescription::new(format!("{scope} start"), ActionFlags::SCOPE_BOUNDARY)
        };
        self.root.push(start);
        self.next_event += 1;
        self.next_action += 1;

        let event_base = self.next_event;
        let action_base = self.next_action;
        for event in &open.events {
            self.insert_event(event.rebased(event_base), Some(scope));
        }
        for mut action in open.tree.top {
            action.rebase(event_base, action_base);
            self.root.parent().push(action);
        }
        let trailing: Vec<ApiEvent> = open
            .tree
            .pending
            .iter()
            .map(|event| event.rebased(event_base))
            .collect();
        self.next_event += open.next_event;
        self.next_action += open.next_action;

        let end_event = ApiEvent {
            event_id: self.next_event,
            chunk_index,
            file_offset,
        };
        self.insert_event(end_event, Some(scope));
        self.root.pending.extend(trailing);
        self.root.pending.push(end_event);
        let end = ActionDescription {
            event_id: end_event.event_id,
            action_id: self.next_action,
            ..ActionDescription::new(format!("{scope} end"), ActionFlags::SCOPE_BOUNDARY)
        };
        self.root.push(end);
        self.next_event += 1;
        self.next_action += 1;

        let info = ScopeInfo {
            scope,
            start_event_id: start_event.event_id,
            base_event_id: event_base,
            base_action_id: action_base,
            event_count: open.next_event,
            action_count: open.next_action,
            end_event_id: end_event.event_id,
            first_chunk_index: open.first_chunk_index,
            first_chunk_offset: open.first_chunk_offset,
            interleaved: open.interleaved,
        };
        tracing::trace!(
            %scope,
            base = event_base,
            events = open.next_event,
            "scope committed to timeline"
        );
        self.scopes.insert(scope, info);
        Ok(info)
    }

    /// Note which timeline the chunk just processed belonged to
    pub fn finish_chunk(&mut self, owner: Option<ResourceId>) {
        self.last_owner = Some(owner);
    }

    /// Close root marker regions left open at the end of the frame.
    /// Returns the scopes that were never committed.
    pub fn finish(&mut self) -> Vec<ResourceId> {
        self.root.close_all();
        let abandoned: Vec<ResourceId> = self.open.keys().copied().collect();
        if !abandoned.is_empty() {
            tracing::warn!(scopes = abandoned.len(), "scopes never committed in frame");
        }
        self.open.clear();
        abandoned
    }

    /// Where the chunk at `file_offset` landed
    #[must_use]
    pub fn location(&self, file_offset: u64) -> Option<&EventLocation> {
        self.locations.get(&file_offset)
    }

    /// Event by ID
    #[must_use]
    pub fn event(&self, event_id: u32) -> Option<&ApiEvent> {
        self.events.get(&event_id)
    }

    /// Every event in ID order
    pub fn events(&self) -> impl Iterator<Item = &ApiEvent> {
        self.events.values()
    }

    /// Highest event ID, 0 when empty
    #[must_use]
    pub fn last_event(&self) -> u32 {
        self.events.keys().next_back().copied().unwrap_or(0)
    }

    /// Top-level actions
    #[must_use]
    pub fn actions(&self) -> &[ActionDescription] {
        &self.root.top
    }

    /// Action produced by `event_id`
    #[must_use]
    pub fn action(&self, event_id: u32) -> Option<&ActionDescription> {
        self.root.top.iter().find_map(|action| action.find(event_id))
    }

    /// Committed scope by original ID
    #[must_use]
    pub fn scope_info(&self, scope: ResourceId) -> Option<&ScopeInfo> {
        self.scopes.get(&scope)
    }

    /// Committed scopes in commit order
    pub fn scopes(&self) -> impl Iterator<Item = &ScopeInfo> {
        self.scopes.values()
    }

    /// Committed scope whose boundaries contain `event_id`
    #[must_use]
    pub fn scope_containing(&self, event_id: u32) -> Option<&ScopeInfo> {
        self.scopes.values().find(|info| info.contains(event_id))
    }
}
