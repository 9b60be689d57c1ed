//! Typed publish/subscribe bus connecting the components around the engine.
//!
//! Each [`Signal`] carries a kind, a payload, its sender and a routing policy.
//! Subscribers register under a name, receive an id, and read their signals
//! from a channel. Routing decides per subscriber id whether a signal is
//! delivered.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};

use log::debug;

use crate::geometry::BeamCenter;
use crate::roi::{RoiKey, RoiParameters};

/// Identity of a bus subscriber.
pub type NodeId = u32;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    ImageChanged,
    GeometryChanged,
    GeometryChangedFinish,
    TransformationAdded,
    StatusChanged,
    NameChanged,
    ScaleChanged,
    TypeChanged,
    SegmentCreated,
    SegmentDeleted,
    SegmentMoved,
    SegmentFixed,
    SegmentUnfixed,
    IntensityLimitsChanged,
}

impl SignalKind {
    /// Routing applied when the sender does not choose one.
    ///
    /// Edits that originate from one view are echoed to every other view but
    /// not back to the sender.
    #[must_use]
    pub fn default_routing(self, sender: Option<NodeId>) -> Routing {
        match (self, sender) {
            (
                Self::NameChanged | Self::SegmentMoved | Self::GeometryChanged | Self::TypeChanged,
                Some(id),
            ) => Routing::ExceptFor(vec![id]),
            _ => Routing::Broadcast,
        }
    }
}

/// Delivery policy of a signal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Routing {
    /// Every subscriber.
    #[default]
    Broadcast,
    /// Only the listed subscribers.
    OnlyFor(Vec<NodeId>),
    /// Everyone except the listed subscribers.
    ExceptFor(Vec<NodeId>),
}

impl Routing {
    /// Returns true if `id` receives signals routed this way.
    #[must_use]
    pub fn accepts(&self, id: NodeId) -> bool {
        match self {
            Self::Broadcast => true,
            Self::OnlyFor(ids) => ids.contains(&id),
            Self::ExceptFor(ids) => !ids.contains(&id),
        }
    }
}

/// Data attached to a signal.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalPayload {
    None,
    Roi(RoiParameters),
    Key(RoiKey),
    BeamCenter(BeamCenter),
    Scale(f64),
    Text(String),
}

/// One message on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub payload: SignalPayload,
    pub sender: Option<NodeId>,
    pub routing: Routing,
}

impl Signal {
    /// Creates a signal with the kind's default routing.
    #[must_use]
    pub fn new(kind: SignalKind, payload: SignalPayload, sender: Option<NodeId>) -> Self {
        Self {
            kind,
            payload,
            sender,
            routing: kind.default_routing(sender),
        }
    }

    /// Overrides the routing policy.
    #[must_use]
    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    /// ROI carried by the signal, if any.
    #[must_use]
    pub fn roi(&self) -> Option<&RoiParameters> {
        match &self.payload {
            SignalPayload::Roi(roi) => Some(roi),
            _ => None,
        }
    }
}

struct Subscriber {
    name: String,
    sender: Sender<Signal>,
}

/// Registry of subscribers keyed by id.
#[derive(Default)]
pub struct SignalBus {
    subscribers: BTreeMap<NodeId, Subscriber>,
    next_id: NodeId,
}

impl SignalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and returns its id and inbox.
    pub fn subscribe(&mut self, name: impl Into<String>) -> (NodeId, Receiver<Signal>) {
        let (sender, receiver) = mpsc::channel();
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(
            id,
            Subscriber {
                name: name.into(),
                sender,
            },
        );
        (id, receiver)
    }

    /// Removes a subscriber. Returns false if the id was not registered.
    pub fn unsubscribe(&mut self, id: NodeId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Id of the first subscriber registered under `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.subscribers
            .iter()
            .find(|(_, sub)| sub.name == name)
            .map(|(&id, _)| id)
    }

    /// Delivers a signal according to its routing and returns the number of
    /// recipients. Subscribers whose receiver was dropped are removed.
    pub fn emit(&mut self, signal: &Signal) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (&id, sub) in &self.subscribers {
            if !signal.routing.accepts(id) {
                continue;
            }
            if sub.sender.send(signal.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(id);
            }
        }
        for id in closed {
            debug!("dropping closed subscriber {id}");
            self.subscribers.remove(&id);
        }
        delivered
    }

    /// Emits several signals in order, returning total deliveries.
    pub fn emit_all<'a, I>(&mut self, signals: I) -> usize
    where
        I: IntoIterator<Item = &'a Signal>,
    {
        signals.into_iter().map(|s| self.emit(s)).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_everyone() {
        let mut bus = SignalBus::new();
        let (_, a) = bus.subscribe("radial");
        let (_, b) = bus.subscribe("angular");
        let signal = Signal::new(SignalKind::ImageChanged, SignalPayload::None, None);
        assert_eq!(bus.emit(&signal), 2);
        assert_eq!(a.try_recv().unwrap().kind, SignalKind::ImageChanged);
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn test_segment_moved_skips_sender() {
        let mut bus = SignalBus::new();
        let (radial, radial_rx) = bus.subscribe("radial");
        let (_, image_rx) = bus.subscribe("image");
        let roi = RoiParameters::new(10.0, 1.0).with_key(3);
        let signal = Signal::new(
            SignalKind::SegmentMoved,
            SignalPayload::Roi(roi.clone()),
            Some(radial),
        );
        assert_eq!(bus.emit(&signal), 1);
        assert!(radial_rx.try_recv().is_err());
        assert_eq!(image_rx.try_recv().unwrap().roi(), Some(&roi));
    }

    #[test]
    fn test_only_for_names() {
        let mut bus = SignalBus::new();
        let (_, radial_rx) = bus.subscribe("radial");
        let (_, angular_rx) = bus.subscribe("angular");
        let target = bus.find("angular").unwrap();
        let signal = Signal::new(SignalKind::SegmentFixed, SignalPayload::Key(1), None)
            .with_routing(Routing::OnlyFor(vec![target]));
        assert_eq!(bus.emit(&signal), 1);
        assert!(radial_rx.try_recv().is_err());
        assert!(angular_rx.try_recv().is_ok());
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let mut bus = SignalBus::new();
        let (_, rx) = bus.subscribe("gone");
        let (_, _keep) = bus.subscribe("kept");
        drop(rx);
        let signal = Signal::new(SignalKind::ScaleChanged, SignalPayload::Scale(2.0), None);
        assert_eq!(bus.emit(&signal), 1);
        assert_eq!(bus.len(), 1);
        assert!(bus.find("gone").is_none());
    }
}
