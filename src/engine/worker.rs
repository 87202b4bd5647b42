use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Sender};
use tracing::{info, warn};

use crate::engine::EngineSettings;
use crate::orderbook::book::OrderBook;
use crate::orderbook::error::{OrderBookError, OrderBookResult};
use crate::orderbook::handler::{MarketHandler, MatchContext};
use crate::orderbook::types::SymbolId;

/// Operation queued onto a book's mailbox
pub(crate) type Job = Box<dyn FnOnce(&mut OrderBook, &MatchContext<'_>) + Send>;

/// Handle to the thread that exclusively owns one order book
pub(crate) struct BookWorker {
    symbol_id: SymbolId,
    sender: Option<Sender<Job>>,
    abort: Arc<AtomicBool>,
    handle: Option<JoinHandle<OrderBook>>,
}

impl BookWorker {
    /// Move `book` onto a new named worker thread
    pub fn spawn(
        book: OrderBook,
        handler: Arc<dyn MarketHandler>,
        settings: Arc<EngineSettings>,
        capacity: usize,
    ) -> OrderBookResult<Self> {
        let symbol_id = book.symbol().id;
        let (sender, receiver) = bounded::<Job>(capacity.max(1));
        let abort = Arc::new(AtomicBool::new(false));
        let worker_abort = Arc::clone(&abort);

        let handle = thread::Builder::new()
            .name(format!("orderbook-{}", symbol_id))
            .spawn(move || {
                let mut book = book;
                info!(symbol_id, "Book worker started");

                for job in receiver.iter() {
                    if worker_abort.load(Ordering::Acquire) {
                        break;
                    }
                    let ctx = settings.context(handler.as_ref());
                    job(&mut book, &ctx);
                }

                info!(symbol_id, "Book worker stopped");
                book
            })
            .map_err(|e| OrderBookError::SystemError(format!("failed to spawn book worker: {}", e)))?;

        Ok(Self {
            symbol_id,
            sender: Some(sender),
            abort,
            handle: Some(handle),
        })
    }

    /// Enqueue a job, blocking while the mailbox is full
    pub fn send(&self, job: Job) -> OrderBookResult<()> {
        match &self.sender {
            Some(sender) => sender.send(job).map_err(|_| OrderBookError::EngineShutdown),
            None => Err(OrderBookError::EngineShutdown),
        }
    }

    /// Close the mailbox and wait for the worker to hand the book back.
    ///
    /// A graceful stop drains every queued job first; a forced stop abandons them.
    pub fn stop(&mut self, graceful: bool) -> OrderBookResult<OrderBook> {
        if !graceful {
            self.abort.store(true, Ordering::Release);
        }
        self.sender = None;

        let handle = self.handle.take().ok_or(OrderBookError::EngineShutdown)?;
        handle.join().map_err(|_| {
            warn!(symbol_id = self.symbol_id, "Book worker panicked");
            OrderBookError::SystemError(format!("worker of symbol {} panicked", self.symbol_id))
        })
    }
}

impl Drop for BookWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.stop(false);
        }
    }
}
