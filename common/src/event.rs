//! The typed event model that flows Node -> Registry -> Volume manager.
//!
//! Every create/modify/delete of a Pool, Replica or Nexus (and every
//! up/down transition of a Node) is represented as one `Event` so that
//! consumers can match on the tag instead of subscribing to bespoke
//! callback chains.

use crate::types::{Nexus, Node, Pool, Replica};

/// What happened to the object carried by an `Event`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EventOp {
    New,
    Mod,
    Del,
}

/// A single state change, tagged by the kind of object it carries.
#[derive(Clone, Debug)]
pub enum Event {
    Node { op: EventOp, object: Node },
    Pool { op: EventOp, object: Pool },
    Replica { op: EventOp, object: Replica },
    Nexus { op: EventOp, object: Nexus },
}

impl Event {
    pub fn op(&self) -> &EventOp {
        match self {
            Event::Node { op, .. } => op,
            Event::Pool { op, .. } => op,
            Event::Replica { op, .. } => op,
            Event::Nexus { op, .. } => op,
        }
    }
}
