//! Pending-request ledger.
//!
//! The wire format carries no correlation identifier, so responses are
//! matched to in-flight requests purely by FIFO position: the protocol is
//! strictly request/response in send order on one connection. The caller
//! holding a ticket must therefore have enqueued it in the same order the
//! request bytes were written (the manager serializes both under one lock).

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::error::AmiError;
use crate::protocol::LogicalResponse;

/// Read-once handle for one in-flight request.
pub(crate) type Ticket = oneshot::Receiver<Result<LogicalResponse, AmiError>>;

pub(crate) struct ResponseLedger {
    queue: VecDeque<oneshot::Sender<Result<LogicalResponse, AmiError>>>,
}

impl ResponseLedger {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Append a ticket for the request currently being written.
    pub(crate) fn submit(&mut self) -> Ticket {
        let (tx, rx) = oneshot::channel();
        self.queue.push_back(tx);
        rx
    }

    /// Complete the oldest ticket with `response`.
    ///
    /// A response with no pending ticket is an ordering violation: it cannot
    /// be attributed, so it is logged and discarded. A ticket whose caller
    /// gave up (dropped receiver) still consumed its FIFO slot; its response
    /// is discarded the same way.
    pub(crate) fn deliver(&mut self, response: LogicalResponse) {
        match self.queue.pop_front() {
            Some(ticket) => {
                if ticket.send(Ok(response)).is_err() {
                    log::debug!("discarding response for an abandoned request");
                }
            }
            None => {
                log::error!(
                    "received a response with no pending request; discarding: {:?}",
                    response.head()
                );
            }
        }
    }

    /// Fail every outstanding ticket with a terminal connection error.
    pub(crate) fn fail_all(&mut self, reason: &str) {
        if self.queue.is_empty() {
            return;
        }
        log::debug!("failing {} pending request(s): {reason}", self.queue.len());
        for ticket in self.queue.drain(..) {
            let _ = ticket.send(Err(AmiError::ConnectionClosed(reason.to_string())));
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    fn response(tag: &str) -> LogicalResponse {
        let record: Record = [("Response", "Success"), ("Tag", tag)].into_iter().collect();
        LogicalResponse::single(record)
    }

    #[tokio::test]
    async fn test_fifo_delivery_order() {
        let mut ledger = ResponseLedger::new();
        let first = ledger.submit();
        let second = ledger.submit();
        let third = ledger.submit();

        ledger.deliver(response("1"));
        ledger.deliver(response("2"));
        ledger.deliver(response("3"));

        assert_eq!(first.await.unwrap().unwrap().head().get("Tag"), Some("1"));
        assert_eq!(second.await.unwrap().unwrap().head().get("Tag"), Some("2"));
        assert_eq!(third.await.unwrap().unwrap().head().get("Tag"), Some("3"));
    }

    #[tokio::test]
    async fn test_deliver_without_pending_ticket_is_dropped() {
        let mut ledger = ResponseLedger::new();
        // Must not panic; the response is unattributable.
        ledger.deliver(response("orphan"));
        assert_eq!(ledger.len(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_ticket_keeps_its_fifo_slot() {
        let mut ledger = ResponseLedger::new();
        let abandoned = ledger.submit();
        let kept = ledger.submit();
        drop(abandoned);

        // The first response still consumes the abandoned slot, so the
        // second one lands on the right ticket.
        ledger.deliver(response("for-abandoned"));
        ledger.deliver(response("for-kept"));

        assert_eq!(
            kept.await.unwrap().unwrap().head().get("Tag"),
            Some("for-kept")
        );
    }

    #[tokio::test]
    async fn test_fail_all_resolves_every_ticket() {
        let mut ledger = ResponseLedger::new();
        let tickets = [ledger.submit(), ledger.submit(), ledger.submit()];

        ledger.fail_all("engine closed");
        assert_eq!(ledger.len(), 0);

        for ticket in tickets {
            match ticket.await.unwrap() {
                Err(AmiError::ConnectionClosed(reason)) => assert_eq!(reason, "engine closed"),
                other => panic!("expected ConnectionClosed, got {other:?}"),
            }
        }
    }
}
