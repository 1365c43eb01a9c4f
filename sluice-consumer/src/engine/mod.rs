//! The consumer-facing delivery engine.
//!
//! A [`DeliveryEngine`] sits between one queue and one client consumer. The
//! queue offers references through [`Consumer::handle`]; the engine admits,
//! defers or rejects each one, hands admitted messages to the transport and
//! records them in its ledger until the client acknowledges them.
//!
//! ## Locking
//!
//! A single per-consumer mutex guards the started and transferring flags,
//! the chunked-transfer slot and the admission decision. It is never held
//! across a transport write: large message frames are written with the
//! transfer checked out of its slot, and ordinary messages are written after
//! the admission decision has been recorded.
//!
//! ## Scheduling
//!
//! Follow-up work (chunk continuations, browse passes, re-attempts after a
//! credit or lifecycle change) always runs on the bound queue's serial
//! executor. Only [`force_delivery`](DeliveryEngine::force_delivery) and
//! [`set_transferring`](DeliveryEngine::set_transferring) wait on that
//! executor, and only for a bounded time.

mod acknowledge;
mod admission;
mod lifecycle;

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sluice_common::internal;
use tokio::sync::watch;

use crate::{
    browser::BrowseCursor,
    chunked::ChunkedTransfer,
    config::ConsumerConfig,
    credit::CreditController,
    error::{ConsumerError, Result},
    executor::Executor,
    ledger::DeliveryLedger,
    reference::MessageReference,
    traits::{
        Consumer, Filter, HandleStatus, ManagementService, Queue, Session, SessionCallback,
        StorageManager,
    },
};

/// Identity flags fixed when a consumer is created.
#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    /// Deliver copies without consuming; no acknowledgements, no ledger.
    pub browse_only: bool,
    /// Acknowledge on the server before the message is sent.
    pub pre_acknowledge: bool,
    /// Persist the delivery count before the message is sent.
    pub strict_update_delivery_count: bool,
    /// Whether the consumer starts out accepting messages.
    pub started: bool,
    pub filter: Option<Arc<dyn Filter>>,
}

/// How the bound queue is attached to its address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    pub address: String,
    pub cluster_name: String,
    pub routing_name: String,
    pub distance: u32,
}

/// Collaborators a consumer is wired to.
#[derive(Debug, Clone)]
pub struct ConsumerContext {
    pub queue: Arc<dyn Queue>,
    pub session: Arc<dyn Session>,
    pub callback: Arc<dyn SessionCallback>,
    pub storage: Arc<dyn StorageManager>,
    pub management: Arc<dyn ManagementService>,
    pub binding: Binding,
}

/// Where the current chunked transfer lives.
enum LargeSlot {
    Idle,
    /// Waiting for its next step.
    Parked(Box<ChunkedTransfer>),
    /// Checked out by a thread writing a frame. `abort` asks that thread to
    /// abandon the transfer instead of parking it again.
    Writing { abort: bool },
}

impl LargeSlot {
    const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

struct EngineState {
    started: bool,
    transferring: bool,
    large: LargeSlot,
}

/// Flow-controlled delivery for one consumer of one queue.
pub struct DeliveryEngine {
    id: u64,
    options: ConsumerOptions,
    context: ConsumerContext,
    config: ConsumerConfig,
    executor: Arc<dyn Executor>,
    created_at: DateTime<Utc>,
    credits: CreditController,
    ledger: DeliveryLedger,
    state: Mutex<EngineState>,
    /// `true` whenever no chunked transfer is active.
    transfer_idle: watch::Sender<bool>,
    write_ready: AtomicBool,
    closed: AtomicBool,
    /// Set once the queue and session have forgotten this consumer.
    detached: AtomicBool,
    browser: Option<BrowseCursor>,
    /// Serialises forced deliveries.
    force_lock: tokio::sync::Mutex<()>,
    this: Weak<Self>,
}

impl DeliveryEngine {
    /// Create a consumer and attach it to its queue.
    ///
    /// Browse-only consumers are not registered with the queue; they walk a
    /// queue iterator instead.
    ///
    /// # Errors
    ///
    /// Fails if the queue refuses the consumer.
    pub fn create(
        id: u64,
        context: ConsumerContext,
        options: ConsumerOptions,
        config: ConsumerConfig,
    ) -> Result<Arc<Self>> {
        let executor = context.queue.executor();
        let browser = options
            .browse_only
            .then(|| BrowseCursor::new(context.queue.iterator()));
        let started = options.browse_only || options.started;
        let (transfer_idle, _) = watch::channel(true);

        let engine = Arc::new_cyclic(|this| Self {
            id,
            options,
            context,
            config,
            executor,
            created_at: Utc::now(),
            credits: CreditController::new(),
            ledger: DeliveryLedger::new(),
            state: Mutex::new(EngineState {
                started,
                transferring: false,
                large: LargeSlot::Idle,
            }),
            transfer_idle,
            write_ready: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            browser,
            force_lock: tokio::sync::Mutex::new(()),
            this: this.clone(),
        });

        if !engine.options.browse_only {
            let consumer: Arc<dyn Consumer> = engine.clone();
            engine.context.queue.add_consumer(consumer)?;
        }

        internal!(
            level = DEBUG,
            "Created consumer {} on queue {} (browse_only={}, pre_acknowledge={})",
            id,
            engine.context.queue.name(),
            engine.options.browse_only,
            engine.options.pre_acknowledge
        );

        Ok(engine)
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn is_browse_only(&self) -> bool {
        self.options.browse_only
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn session_name(&self) -> &str {
        self.context.session.name()
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        self.context.session.connection_id()
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.context.queue
    }

    #[must_use]
    pub fn filter(&self) -> Option<&Arc<dyn Filter>> {
        self.options.filter.as_ref()
    }

    /// Remaining credit in bytes, `None` when flow control is off.
    #[must_use]
    pub fn available_credits(&self) -> Option<i64> {
        self.credits.available()
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether a large message is being streamed right now.
    #[must_use]
    pub fn is_transfer_active(&self) -> bool {
        !self.state.lock().large.is_idle()
    }

    /// Number of delivered, unacknowledged references.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.ledger.len()
    }

    /// Delivered, unacknowledged references in delivery order.
    #[must_use]
    pub fn in_flight(&self) -> Vec<MessageReference> {
        self.ledger.snapshot()
    }

    /// Re-attempt delivery after something that blocked it has cleared.
    ///
    /// Credits only unblock; they never push data. Delivery resumes either by
    /// continuing the active chunked transfer or by asking the queue (or the
    /// browse cursor) for another pass.
    fn prompt_delivery(&self) {
        let transfer_active = !self.state.lock().large.is_idle();

        if transfer_active {
            self.schedule_resume();
        } else {
            self.prompt_next();
        }
    }

    /// Let the next reference be offered.
    fn prompt_next(&self) {
        if self.options.browse_only {
            self.schedule_browse();
        } else {
            self.context.queue.deliver_async();
        }
    }

    fn schedule_resume(&self) {
        let this = self.this.clone();
        self.executor.execute(Box::new(move || {
            if let Some(engine) = this.upgrade() {
                engine.resume_large_message();
            }
        }));
    }

    fn schedule_browse(&self) {
        let this = self.this.clone();
        self.executor.execute(Box::new(move || {
            if let Some(engine) = this.upgrade()
                && let Some(browser) = &engine.browser
            {
                browser.run(engine.as_ref());
            }
        }));
    }

    fn not_found(&self, message_id: u64) -> ConsumerError {
        ConsumerError::ReferenceNotFound {
            consumer_id: self.id,
            message_id,
            queue: self.context.queue.name().to_string(),
            closed: self.is_closed(),
        }
    }
}

impl Consumer for DeliveryEngine {
    fn id(&self) -> u64 {
        self.id
    }

    fn handle(&self, reference: &MessageReference) -> Result<HandleStatus> {
        self.handle_reference(reference)
    }
}

impl fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("id", &self.id)
            .field("queue", &self.context.queue.name())
            .field("browse_only", &self.options.browse_only)
            .field("available_credits", &self.credits.available())
            .field("in_flight", &self.ledger.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
