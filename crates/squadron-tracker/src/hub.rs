//! Subscription hub
//!
//! Consumers register a [`Selector`] and a callback. After every state
//! change the hub recomputes each subscriber's slice and invokes the
//! callback only when that slice differs from the one last delivered.

use crate::error::{HubError, HubResult};
use crate::state::{AggregateState, FleetSummary};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use squadron_core::{Detection, SignalReading, Unit, UnitId};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Callback invoked with the changed slice
pub type SliceCallback = Box<dyn Fn(&Slice) + Send + Sync>;

/// Portion of the aggregate state a consumer cares about
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Every unit
    AllUnits,
    /// One unit by id
    Unit(UnitId),
    /// RWR history of one unit
    SignalHistory(UnitId),
    /// Active detections
    Detections,
    /// Unattributed intelligence feed
    Intel,
    /// Fleet readiness rollup
    FleetSummary,
}

impl Selector {
    /// Reject selectors that can never match anything
    pub fn validate(&self) -> HubResult<()> {
        match self {
            Selector::Unit(id) | Selector::SignalHistory(id) if id.as_str().trim().is_empty() => {
                Err(HubError::invalid_selector(self.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Extract this selector's slice from a state
    pub fn select(&self, state: &AggregateState) -> Slice {
        match self {
            Selector::AllUnits => Slice::Units(state.units.values().cloned().collect()),
            Selector::Unit(id) => Slice::Unit(state.unit(id).cloned()),
            Selector::SignalHistory(id) => Slice::Signals(
                state
                    .unit(id)
                    .map(|u| u.signal_history.to_vec())
                    .unwrap_or_default(),
            ),
            Selector::Detections => Slice::Detections(state.detections.values().cloned().collect()),
            Selector::Intel => Slice::Intel(state.intel.to_vec()),
            Selector::FleetSummary => Slice::Summary(state.summary()),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::AllUnits => write!(f, "units"),
            Selector::Unit(id) => write!(f, "unit:{}", id),
            Selector::SignalHistory(id) => write!(f, "signals:{}", id),
            Selector::Detections => write!(f, "detections"),
            Selector::Intel => write!(f, "intel"),
            Selector::FleetSummary => write!(f, "summary"),
        }
    }
}

impl FromStr for Selector {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let selector = match raw.split_once(':') {
            Some(("unit", id)) => Selector::Unit(UnitId::new(id.trim())),
            Some(("signals", id)) => Selector::SignalHistory(UnitId::new(id.trim())),
            Some(_) => return Err(HubError::invalid_selector(raw)),
            None => match raw {
                "units" => Selector::AllUnits,
                "detections" => Selector::Detections,
                "intel" => Selector::Intel,
                "summary" => Selector::FleetSummary,
                _ => return Err(HubError::invalid_selector(raw)),
            },
        };
        selector.validate()?;
        Ok(selector)
    }
}

/// Value a selector yields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "slice", content = "data", rename_all = "snake_case")]
pub enum Slice {
    Units(Vec<Unit>),
    Unit(Option<Unit>),
    Signals(Vec<SignalReading>),
    Detections(Vec<Detection>),
    Intel(Vec<SignalReading>),
    Summary(FleetSummary),
}

struct Subscriber {
    id: u64,
    selector: Selector,
    callback: SliceCallback,
    /// Slice most recently delivered (or the baseline)
    last: Mutex<Slice>,
    active: Arc<AtomicBool>,
}

/// Fan-out hub for state slices
pub struct SubscriptionHub {
    /// Subscribers in registration order
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
    notification_count: AtomicU64,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            notification_count: AtomicU64::new(0),
        }
    }

    /// Register a callback; `baseline` provides the slice it is compared against
    pub fn subscribe<F>(
        self: &Arc<Self>,
        selector: Selector,
        baseline: &AggregateState,
        callback: F,
    ) -> HubResult<Subscription>
    where
        F: Fn(&Slice) + Send + Sync + 'static,
    {
        selector.validate()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let subscriber = Arc::new(Subscriber {
            id,
            last: Mutex::new(selector.select(baseline)),
            selector: selector.clone(),
            callback: Box::new(callback),
            active: Arc::clone(&active),
        });

        let mut subscribers = self.subscribers.write();
        subscribers.push(subscriber);
        debug!("Subscription {} registered for {} ({} total)", id, selector, subscribers.len());

        Ok(Subscription {
            id,
            selector,
            active,
            hub: Arc::downgrade(self),
        })
    }

    /// Deliver changed slices; returns the number of callbacks invoked
    pub fn notify(&self, state: &AggregateState) -> usize {
        // callbacks may subscribe or unsubscribe, so run them on a copy
        let subscribers: Vec<Arc<Subscriber>> = self.subscribers.read().clone();
        let mut fired = 0;

        for subscriber in subscribers {
            if !subscriber.active.load(Ordering::Acquire) {
                continue;
            }
            let slice = subscriber.selector.select(state);
            {
                let mut last = subscriber.last.lock();
                if *last == slice {
                    continue;
                }
                *last = slice.clone();
            }
            (subscriber.callback)(&slice);
            fired += 1;
        }

        self.notification_count.fetch_add(fired as u64, Ordering::Relaxed);
        fired
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Total callbacks invoked
    pub fn notification_count(&self) -> u64 {
        self.notification_count.load(Ordering::Relaxed)
    }

    fn remove(&self, id: u64) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|s| s.id != id);
        debug!("Subscription {} removed ({} remaining)", id, subscribers.len());
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered subscription; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    selector: Selector,
    active: Arc<AtomicBool>,
    hub: Weak<SubscriptionHub>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop deliveries. Returns `false` if already unsubscribed.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
        true
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use squadron_core::{EmitterId, UnitStatus};

    fn state_with_fuel(fuel: f64) -> AggregateState {
        let mut state = AggregateState::empty(5);
        let mut unit = Unit::new("1", 10, 10);
        unit.fuel = fuel;
        state.units.insert(unit.id.clone(), unit);
        state
    }

    fn counter() -> (Arc<AtomicU64>, impl Fn(&Slice) + Send + Sync + 'static) {
        let count = Arc::new(AtomicU64::new(0));
        let inner = Arc::clone(&count);
        (count, move |_: &Slice| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!("units".parse::<Selector>().unwrap(), Selector::AllUnits);
        assert_eq!("unit:3".parse::<Selector>().unwrap(), Selector::Unit(UnitId::new("3")));
        assert_eq!(
            "signals:3".parse::<Selector>().unwrap(),
            Selector::SignalHistory(UnitId::new("3"))
        );
        assert_eq!("summary".parse::<Selector>().unwrap(), Selector::FleetSummary);

        assert!(matches!("unit:".parse::<Selector>(), Err(HubError::InvalidSelector(_))));
        assert!(matches!("weather".parse::<Selector>(), Err(HubError::InvalidSelector(_))));
        assert!(matches!("radar:1".parse::<Selector>(), Err(HubError::InvalidSelector(_))));
    }

    #[test]
    fn test_selector_display_round_trips() {
        let selector = Selector::SignalHistory(UnitId::new("4"));
        assert_eq!(selector.to_string().parse::<Selector>().unwrap(), selector);
    }

    #[test]
    fn test_empty_id_rejected_at_subscribe() {
        let hub = Arc::new(SubscriptionHub::new());
        let result = hub.subscribe(Selector::Unit(UnitId::new("")), &AggregateState::default(), |_| {});
        assert!(matches!(result, Err(HubError::InvalidSelector(_))));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_notified_only_when_slice_changes() {
        let hub = Arc::new(SubscriptionHub::new());
        let baseline = state_with_fuel(80.0);
        let (count, callback) = counter();
        let _sub = hub.subscribe(Selector::Unit(UnitId::new("1")), &baseline, callback).unwrap();

        // identical content
        assert_eq!(hub.notify(&state_with_fuel(80.0)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert_eq!(hub.notify(&state_with_fuel(60.0)), 1);
        assert_eq!(hub.notify(&state_with_fuel(60.0)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unrelated_change_does_not_notify() {
        let hub = Arc::new(SubscriptionHub::new());
        let baseline = state_with_fuel(80.0);
        let (count, callback) = counter();
        let _sub = hub.subscribe(Selector::Detections, &baseline, callback).unwrap();

        hub.notify(&state_with_fuel(10.0));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let mut with_contact = state_with_fuel(10.0);
        with_contact
            .detections
            .insert(EmitterId::new("E1"), Detection::new("E1"));
        hub.notify(&with_contact);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callbacks_fire_in_subscription_order() {
        let hub = Arc::new(SubscriptionHub::new());
        let baseline = AggregateState::empty(5);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut subs = Vec::new();
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            subs.push(
                hub.subscribe(Selector::AllUnits, &baseline, move |_| order.lock().push(label))
                    .unwrap(),
            );
        }

        hub.notify(&state_with_fuel(50.0));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let hub = Arc::new(SubscriptionHub::new());
        let (count, callback) = counter();
        let sub = hub
            .subscribe(Selector::AllUnits, &AggregateState::empty(5), callback)
            .unwrap();

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
        assert_eq!(hub.subscriber_count(), 0);

        hub.notify(&state_with_fuel(50.0));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_after_hub_dropped() {
        let hub = Arc::new(SubscriptionHub::new());
        let sub = hub
            .subscribe(Selector::Intel, &AggregateState::empty(5), |_| {})
            .unwrap();
        drop(hub);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn test_dropping_handle_removes_subscriber() {
        let hub = Arc::new(SubscriptionHub::new());
        let (count, callback) = counter();
        let sub = hub
            .subscribe(Selector::AllUnits, &AggregateState::empty(5), callback)
            .unwrap();
        let _kept = hub
            .subscribe(Selector::Intel, &AggregateState::empty(5), |_| {})
            .unwrap();
        assert_eq!(hub.subscriber_count(), 2);

        drop(sub);
        assert_eq!(hub.subscriber_count(), 1);

        hub.notify(&state_with_fuel(50.0));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_after_unsubscribe() {
        let hub = Arc::new(SubscriptionHub::new());
        let sub = hub
            .subscribe(Selector::AllUnits, &AggregateState::empty(5), |_| {})
            .unwrap();
        assert!(sub.unsubscribe());
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_summary_slice_tracks_status() {
        let hub = Arc::new(SubscriptionHub::new());
        let baseline = state_with_fuel(80.0);
        let received = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&received);
        let _sub = hub
            .subscribe(Selector::FleetSummary, &baseline, move |slice| {
                *sink.lock() = Some(slice.clone());
            })
            .unwrap();

        let mut next = state_with_fuel(80.0);
        if let Some(unit) = next.units.get_mut(&UnitId::new("1")) {
            unit.status = UnitStatus::Damaged;
        }
        hub.notify(&next);

        match received.lock().as_ref() {
            Some(Slice::Summary(summary)) => {
                assert_eq!(summary.status_counts.get("DAMAGED"), Some(&1));
            }
            other => panic!("unexpected slice: {:?}", other),
        }
    }

    #[test]
    fn test_slice_wire_shape() {
        let slice = Selector::Intel.select(&AggregateState::empty(5));
        let json = serde_json::to_value(&slice).unwrap();
        assert_eq!(json["slice"], "intel");
        assert!(json["data"].as_array().unwrap().is_empty());
    }
}
