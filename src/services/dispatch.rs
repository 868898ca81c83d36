use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::Bill;
use crate::services::invoice::{DocumentRenderer, DocumentStore};
use crate::services::notifications::{
    compose_message, describe, recipients, BillEvent, NotificationQueue, NotificationRequest,
};

/// Outcome of one dispatch, for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub rendered: bool,
    pub stored: bool,
    pub queued: u32,
    pub cancelled: u64,
    pub failures: Vec<String>,
}

/// Renders invoices and queues notifications after a bill's financial state
/// has been committed. Nothing here can fail the billing operation that
/// triggered it: every step is attempted independently and failures are
/// logged.
#[derive(Clone)]
pub struct BillDispatcher {
    renderer: Arc<dyn DocumentRenderer>,
    documents: Arc<dyn DocumentStore>,
    queue: Arc<dyn NotificationQueue>,
    currency_symbol: String,
    app_public_url: String,
}

impl BillDispatcher {
    pub fn new(
        renderer: Arc<dyn DocumentRenderer>,
        documents: Arc<dyn DocumentStore>,
        queue: Arc<dyn NotificationQueue>,
        currency_symbol: &str,
        app_public_url: &str,
    ) -> Self {
        Self {
            renderer,
            documents,
            queue,
            currency_symbol: currency_symbol.to_string(),
            app_public_url: app_public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fire-and-forget variant used by the lifecycle operations.
    pub fn spawn(&self, bill: Bill, event: BillEvent) -> JoinHandle<DispatchReport> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.dispatch(&bill, event).await })
    }

    pub async fn dispatch(&self, bill: &Bill, event: BillEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        // A receipt supersedes anything still waiting to go out for this bill.
        if event == BillEvent::Paid {
            match self.queue.cancel_pending_for_bill(bill.id).await {
                Ok(cancelled) => report.cancelled = cancelled,
                Err(error) => {
                    warn!(bill_id = %bill.id, error = %error, "Could not cancel pending notifications");
                    report.failures.push(error.to_string());
                }
            }
        }

        let document = match self.renderer.render(bill).await {
            Ok(document) => {
                report.rendered = true;
                Some(document)
            }
            Err(error) => {
                warn!(bill_id = %bill.id, error = %error, "Invoice rendering failed");
                report.failures.push(error.to_string());
                None
            }
        };

        if let Some(document) = &document {
            match self.documents.save(bill.id, document).await {
                Ok(()) => report.stored = true,
                Err(error) => {
                    warn!(bill_id = %bill.id, error = %error, "Could not store rendered invoice");
                    report.failures.push(error.to_string());
                }
            }
        }

        // A revision only refreshes the stored invoice; nobody is notified.
        if event == BillEvent::Revised {
            info!(bill_id = %bill.id, stored = report.stored, "Revised invoice rendered");
            return report;
        }

        let targets = recipients(bill);
        if targets.is_empty() {
            debug!(bill_id = %bill.id, "No contact details on bill, skipping notifications");
        }

        let (subject, body) =
            compose_message(bill, event, &self.currency_symbol, &self.app_public_url);
        for (channel, recipient) in targets {
            let request = NotificationRequest {
                bill_id: bill.id,
                channel,
                recipient,
                notification_type: event,
                subject: subject.clone(),
                body: body.clone(),
                attachment: document.clone(),
            };
            let summary = describe(&request);
            match self.queue.enqueue(request).await {
                Ok(()) => {
                    debug!(notification = %summary, "Notification queued");
                    report.queued += 1;
                }
                Err(error) => {
                    warn!(notification = %summary, error = %error, "Could not queue notification");
                    report.failures.push(error.to_string());
                }
            }
        }

        info!(
            bill_id = %bill.id,
            event = event.as_str(),
            rendered = report.rendered,
            stored = report.stored,
            queued = report.queued,
            cancelled = report.cancelled,
            failures = report.failures.len(),
            "Bill dispatch finished"
        );
        report
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::BillDispatcher;
    use crate::error::DispatchError;
    use crate::models::Bill;
    use crate::services::invoice::{
        DocumentRenderer, DocumentStore, MemoryDocumentStore, RenderedDocument, TextInvoiceRenderer,
    };
    use crate::services::notifications::{NotificationQueue, NotificationRequest};

    pub struct FlakyRenderer {
        pub fail: AtomicBool,
        inner: TextInvoiceRenderer,
    }

    impl FlakyRenderer {
        pub fn new(fail: bool) -> Self {
            Self {
                fail: AtomicBool::new(fail),
                inner: TextInvoiceRenderer::new("Roomledger", "₹"),
            }
        }
    }

    #[async_trait]
    impl DocumentRenderer for FlakyRenderer {
        async fn render(&self, bill: &Bill) -> Result<RenderedDocument, DispatchError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DispatchError::Render("renderer offline".to_string()));
            }
            self.inner.render(bill).await
        }
    }

    #[derive(Default)]
    pub struct RecordingQueue {
        pub fail: AtomicBool,
        pub queued: Mutex<Vec<NotificationRequest>>,
        pub cancelled_bills: Mutex<Vec<Uuid>>,
    }

    impl RecordingQueue {
        pub fn failing() -> Self {
            Self {
                fail: AtomicBool::new(true),
                ..Self::default()
            }
        }

        pub fn queued(&self) -> Vec<NotificationRequest> {
            self.queued.lock().expect("queue lock").clone()
        }
    }

    #[async_trait]
    impl NotificationQueue for RecordingQueue {
        async fn enqueue(&self, request: NotificationRequest) -> Result<(), DispatchError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DispatchError::Queue("smtp down".to_string()));
            }
            self.queued.lock().expect("queue lock").push(request);
            Ok(())
        }

        async fn cancel_pending_for_bill(&self, bill_id: Uuid) -> Result<u64, DispatchError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DispatchError::Queue("smtp down".to_string()));
            }
            let mut queued = self.queued.lock().expect("queue lock");
            let before = queued.len();
            queued.retain(|request| request.bill_id != bill_id);
            self.cancelled_bills.lock().expect("queue lock").push(bill_id);
            Ok((before - queued.len()) as u64)
        }
    }

    /// Document store that refuses every write.
    pub struct BrokenDocumentStore;

    #[async_trait]
    impl DocumentStore for BrokenDocumentStore {
        async fn save(&self, _bill_id: Uuid, _document: &RenderedDocument) -> Result<(), DispatchError> {
            Err(DispatchError::Storage("disk full".to_string()))
        }

        async fn latest(&self, _bill_id: Uuid) -> Result<Option<RenderedDocument>, DispatchError> {
            Ok(None)
        }
    }

    pub fn dispatcher(
        renderer: Arc<FlakyRenderer>,
        documents: Arc<dyn DocumentStore>,
        queue: Arc<RecordingQueue>,
    ) -> BillDispatcher {
        BillDispatcher::new(renderer, documents, queue, "₹", "https://app.example.com/")
    }

    pub fn memory_documents() -> Arc<MemoryDocumentStore> {
        Arc::new(MemoryDocumentStore::new())
    }
}
