//! # Action result streams
//!
//! An action answers a request with an [`ActionStream`]: a cold, push-based
//! producer that starts when subscribed and talks to a [`StreamSink`]. The
//! sink enforces the call grammar: any number of values, then at most one
//! error or completion. Everything pushed after that, or after the
//! subscriber cancelled, is dropped.
//!
//! A sink must be driven from one thread at a time.

use crate::sync::lock;
use ipc::{Payload, RemoteError};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cleanup run once when a stream is cancelled or torn down
pub type Teardown = Box<dyn FnOnce() + Send>;

/// Receiver of a stream's events
pub trait StreamObserver: Send + Sync {
    fn next(&self, value: Payload);
    fn error(&self, error: RemoteError);
    fn complete(&self);
}

struct SinkInner {
    closed: AtomicBool,
    observer: Arc<dyn StreamObserver>,
}

/// Producer side of a stream
#[derive(Clone)]
pub struct StreamSink {
    inner: Arc<SinkInner>,
}

impl StreamSink {
    fn new(observer: Arc<dyn StreamObserver>) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                closed: AtomicBool::new(false),
                observer,
            }),
        }
    }

    /// Pushes a value; ignored once the stream is closed
    pub fn next(&self, value: impl Into<Payload>) {
        if !self.is_closed() {
            self.inner.observer.next(value.into());
        }
    }

    /// Ends the stream with an error
    pub fn error(&self, error: RemoteError) {
        if self.close() {
            self.inner.observer.error(error);
        }
    }

    /// Ends the stream successfully
    pub fn complete(&self) {
        if self.close() {
            self.inner.observer.complete();
        }
    }

    /// Checks if a terminal was pushed or the subscriber cancelled
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Returns true only for the call that actually closed the sink
    fn close(&self) -> bool {
        !self.inner.closed.swap(true, Ordering::SeqCst)
    }
}

impl fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSink")
            .field("closed", &self.is_closed())
            .finish()
    }
}

type Producer = Box<dyn FnOnce(StreamSink) -> Teardown + Send>;

/// Cold stream of action results
pub struct ActionStream {
    producer: Producer,
}

impl ActionStream {
    /// Creates a stream from a producer
    ///
    /// The producer runs on subscription. It may push synchronously, keep
    /// the sink to push later, or both; the returned teardown runs once the
    /// subscription ends.
    pub fn new<F>(producer: F) -> Self
    where
        F: FnOnce(StreamSink) -> Teardown + Send + 'static,
    {
        Self {
            producer: Box::new(producer),
        }
    }

    /// Emits every value, then completes
    pub fn of<I>(values: I) -> Self
    where
        I: IntoIterator + Send + 'static,
        I::Item: Into<Payload>,
    {
        Self::new(move |sink| {
            for value in values {
                if sink.is_closed() {
                    break;
                }
                sink.next(value);
            }
            sink.complete();
            no_teardown()
        })
    }

    pub fn once(value: impl Into<Payload>) -> Self {
        let value = value.into();
        Self::of(std::iter::once(value))
    }

    /// Completes without values
    pub fn empty() -> Self {
        Self::new(|sink| {
            sink.complete();
            no_teardown()
        })
    }

    pub fn fail(error: RemoteError) -> Self {
        Self::new(move |sink| {
            sink.error(error);
            no_teardown()
        })
    }

    /// One value then completion, or the error
    pub fn from_result(result: Result<Payload, RemoteError>) -> Self {
        match result {
            Ok(value) => Self::once(value),
            Err(error) => Self::fail(error),
        }
    }

    /// Never emits and never ends
    pub fn never() -> Self {
        Self::new(|_sink| no_teardown())
    }

    /// Starts the producer
    pub fn subscribe(self, observer: Arc<dyn StreamObserver>) -> Arc<StreamSubscription> {
        let subscription = StreamSubscription::new(observer);
        self.attach(&subscription);
        subscription
    }

    /// Runs the producer against an existing subscription
    ///
    /// Lets a subscriber make the subscription reachable before the first
    /// synchronous push. If the subscription was cancelled while the
    /// producer ran, the teardown runs right away.
    pub fn attach(self, subscription: &StreamSubscription) {
        if subscription.sink.is_closed() && lock(&subscription.slot).cancelled {
            return;
        }
        let teardown = (self.producer)(subscription.sink.clone());

        let mut slot = lock(&subscription.slot);
        if slot.cancelled {
            drop(slot);
            teardown();
        } else {
            slot.teardown = Some(teardown);
        }
    }
}

impl fmt::Debug for ActionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ActionStream(..)")
    }
}

/// Teardown that does nothing
pub fn no_teardown() -> Teardown {
    Box::new(|| {})
}

#[derive(Default)]
struct TeardownSlot {
    cancelled: bool,
    teardown: Option<Teardown>,
}

/// Subscriber side of a running stream
pub struct StreamSubscription {
    sink: StreamSink,
    slot: Mutex<TeardownSlot>,
}

impl StreamSubscription {
    /// Creates a subscription whose producer has not started yet
    pub fn new(observer: Arc<dyn StreamObserver>) -> Arc<Self> {
        Arc::new(Self {
            sink: StreamSink::new(observer),
            slot: Mutex::new(TeardownSlot::default()),
        })
    }

    /// Closes the sink and runs the teardown; later calls do nothing
    pub fn cancel(&self) {
        self.sink.close();
        let teardown = {
            let mut slot = lock(&self.slot);
            if slot.cancelled {
                return;
            }
            slot.cancelled = true;
            slot.teardown.take()
        };
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.slot).cancelled
    }
}

impl fmt::Debug for StreamSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSubscription")
            .field("closed", &self.is_closed())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
