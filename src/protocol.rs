//! Record classification and list-burst aggregation.
//!
//! The wire interleaves unsolicited events with a command's own multi-part
//! reply. The only signal separating "events that belong to this response"
//! from ordinary asynchronous events is the `EventList: start` /
//! `EventList: Complete` marker pair, so aggregation happens here, before
//! anything reaches the ledger or the event bus.

use serde::Serialize;

use crate::record::Record;

const EVENT_LIST_START: &str = "start";
const EVENT_LIST_COMPLETE: &str = "Complete";

/// Classification of a parsed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Carries a `Response` field.
    Response,
    /// Carries an `Event` field. Takes precedence over `Response` when both
    /// are present (burst-continuation records carry both).
    Event,
    /// Neither marker field; malformed or unexpected.
    Unclassifiable,
}

pub(crate) fn classify(record: &Record) -> RecordKind {
    if record.get("Event").is_some() {
        RecordKind::Event
    } else if record.get("Response").is_some() {
        RecordKind::Response
    } else {
        RecordKind::Unclassifiable
    }
}

/// One logical reply: the response head record plus any records accumulated
/// from its `EventList` burst, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalResponse {
    records: Vec<Record>,
}

impl LogicalResponse {
    // Constructors keep the non-empty / head-first invariant.
    pub(crate) fn single(head: Record) -> Self {
        Self {
            records: vec![head],
        }
    }

    pub(crate) fn from_burst(records: Vec<Record>) -> Self {
        debug_assert!(!records.is_empty());
        Self { records }
    }

    /// The response record itself.
    pub fn head(&self) -> &Record {
        &self.records[0]
    }

    /// Head plus burst members, in arrival order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Whether the head carries `Response: Success` (ASCII case ignored).
    pub fn is_success(&self) -> bool {
        self.head()
            .get("Response")
            .is_some_and(|r| r.eq_ignore_ascii_case("Success"))
    }

    /// The head's `Message` field, when present.
    pub fn message(&self) -> Option<&str> {
        self.head().get("Message")
    }
}

/// Routing decision for one completed record.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Routed {
    /// Deliver to the pending-request ledger.
    Response(LogicalResponse),
    /// Publish to the event bus.
    Event(Record),
}

/// State machine folding `EventList` bursts into one [`LogicalResponse`].
///
/// At most one burst is active at a time. While collecting, every record is
/// appended to the burst; an Event record carrying `EventList: Complete`
/// flushes it. Outside a burst, responses emit immediately and events pass
/// through to the bus.
pub(crate) struct ListAggregator {
    burst: Option<Vec<Record>>,
}

impl ListAggregator {
    pub(crate) fn new() -> Self {
        Self { burst: None }
    }

    /// Feed one record; `None` means it was absorbed (burst member) or
    /// dropped (unclassifiable).
    pub(crate) fn offer(&mut self, record: Record) -> Option<Routed> {
        match classify(&record) {
            RecordKind::Unclassifiable => {
                log::warn!("dropping record with neither Response nor Event field: {record:?}");
                None
            }
            RecordKind::Event => match &mut self.burst {
                Some(accumulated) => {
                    let complete = record.get("EventList") == Some(EVENT_LIST_COMPLETE);
                    accumulated.push(record);
                    if complete {
                        let records = self.burst.take().unwrap_or_default();
                        Some(Routed::Response(LogicalResponse::from_burst(records)))
                    } else {
                        None
                    }
                }
                None => Some(Routed::Event(record)),
            },
            RecordKind::Response => {
                if record.get("EventList") == Some(EVENT_LIST_START) {
                    if let Some(stale) = self.burst.replace(vec![record]) {
                        log::warn!(
                            "new event list started while one was active; discarding {} accumulated record(s)",
                            stale.len()
                        );
                    }
                    None
                } else if let Some(accumulated) = &mut self.burst {
                    // Response-shaped record inside an open burst still
                    // belongs to the burst, not to a fresh ticket.
                    accumulated.push(record);
                    None
                } else {
                    Some(Routed::Response(LogicalResponse::single(record)))
                }
            }
        }
    }
}
