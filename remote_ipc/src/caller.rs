//! # Caller
//!
//! Turns a remote action into a cold stream. Nothing is sent until a
//! [`CallStream`] is subscribed; each subscription is a new call with its
//! own `uid`, timeout and correlation entry.

use crate::correlation::{CallSpec, PendingCall};
use crate::error::CallError;
use crate::observer::{CallEvent, CallObserver, ChannelObserver};
use crate::options::CallOptions;
use crate::service::Runtime;
use core_types::CallId;
use ipc::{EmittersSource, Frame, Payload, RequestFrame, ValueCodec};
use services_logger::{LogEntry, LogLevel};
use std::fmt;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Weak};

struct CallTarget {
    name: String,
    options: CallOptions,
    emitters: EmittersSource,
    runtime: Arc<Runtime>,
}

/// A remote action bound to its options and emitters
#[derive(Clone)]
pub struct RemoteAction {
    target: Arc<CallTarget>,
}

impl RemoteAction {
    pub(crate) fn new(
        runtime: Arc<Runtime>,
        name: String,
        options: CallOptions,
        emitters: EmittersSource,
    ) -> Self {
        Self {
            target: Arc::new(CallTarget {
                name,
                options,
                emitters,
                runtime,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.target.name
    }

    pub fn options(&self) -> &CallOptions {
        &self.target.options
    }

    /// Prepares a call without input; the request has no `data` key
    pub fn invoke(&self) -> CallStream {
        CallStream {
            target: self.target.clone(),
            input: None,
        }
    }

    /// Prepares a call with input
    pub fn invoke_with(&self, input: impl Into<Payload>) -> CallStream {
        CallStream {
            target: self.target.clone(),
            input: Some(input.into()),
        }
    }
}

impl fmt::Debug for RemoteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAction")
            .field("name", &self.target.name)
            .field("options", &self.target.options)
            .finish_non_exhaustive()
    }
}

/// Cold stream of one remote call
#[derive(Clone)]
pub struct CallStream {
    target: Arc<CallTarget>,
    input: Option<Payload>,
}

impl CallStream {
    /// Starts the call
    pub fn subscribe<O>(self, observer: O) -> CallSubscription
    where
        O: CallObserver + 'static,
    {
        self.subscribe_shared(Arc::new(observer))
    }

    /// Starts the call with an observer the caller keeps a handle to
    ///
    /// Setup failures are delivered to the observer as errors, never
    /// returned.
    pub fn subscribe_shared(self, observer: Arc<dyn CallObserver>) -> CallSubscription {
        let target = &self.target;
        let options = &target.options;
        let runtime = &target.runtime;
        let channel = runtime.config.channel.clone();
        let listen = options
            .listen_channel
            .clone()
            .unwrap_or_else(|| channel.clone());

        let fail = |error: CallError| {
            let observer = observer.clone();
            options
                .notification_wrapper
                .run(Box::new(move || observer.error(error)));
            CallSubscription::detached()
        };

        let resolved = target.emitters.resolve().and_then(|emitters| {
            let calls = runtime.tables.ensure(&emitters.listener, &listen)?;
            Ok((emitters, calls))
        });
        let (emitters, calls) = match resolved {
            Ok(resolved) => resolved,
            Err(error) => {
                runtime.logger.log(
                    LogEntry::new(LogLevel::Error, "caller.resolve_failed")
                        .with_field("channel", &listen)
                        .with_field("name", &target.name)
                        .with_field("error", &error),
                );
                return fail(CallError::Resolution {
                    channel: listen,
                    reason: error.to_string(),
                });
            }
        };

        let codec = ValueCodec::for_mode(options.serialization);
        let data = match self.input.as_ref().map(|input| codec.encode(input)).transpose() {
            Ok(data) => data,
            Err(error) => return fail(CallError::Codec(error.to_string())),
        };

        let pending = calls.register(CallSpec {
            name: target.name.clone(),
            channel: channel.clone(),
            timeout: options.timeout,
            codec,
            observer: observer.clone(),
            wrapper: options.notification_wrapper.clone(),
            emitter: emitters.emitter,
            scheduler: runtime.scheduler.clone(),
            logger: runtime.logger.clone(),
        });

        let mut request = RequestFrame::new(pending.uid().clone(), target.name.clone())
            .with_serialization(options.serialization);
        if let Some(data) = data {
            request = request.with_data(data);
        }

        pending.arm_timeout();
        if let Some(finish) = &options.finish {
            pending.watch_finish(finish);
        }

        runtime.logger.log(
            LogEntry::new(LogLevel::Info, "caller.request")
                .with_field("channel", &channel)
                .with_field("name", &target.name)
                .with_field("uid", pending.uid()),
        );
        match Frame::Request(request).to_value() {
            Ok(frame) => pending.send(frame),
            Err(error) => {
                pending.fail(CallError::Codec(error.to_string()));
            }
        }

        CallSubscription::attached(&pending)
    }

    /// Starts the call and returns its events as a channel
    ///
    /// The channel disconnects once the call is settled and dropped.
    pub fn into_channel(self) -> (Receiver<CallEvent>, CallSubscription) {
        let (sender, receiver) = mpsc::channel();
        let subscription = self.subscribe(ChannelObserver::new(sender));
        (receiver, subscription)
    }
}

impl fmt::Debug for CallStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallStream")
            .field("name", &self.target.name)
            .field("input", &self.input.is_some())
            .finish()
    }
}

/// Handle of a started call
#[derive(Clone, Default)]
pub struct CallSubscription {
    call: Weak<PendingCall>,
    uid: Option<CallId>,
}

impl CallSubscription {
    fn attached(call: &Arc<PendingCall>) -> Self {
        Self {
            call: Arc::downgrade(call),
            uid: Some(call.uid().clone()),
        }
    }

    fn detached() -> Self {
        Self::default()
    }

    /// Stops a pending call
    ///
    /// The responder is sent an unsubscribe frame and the observer hears
    /// nothing more. Returns false if the call had already ended.
    pub fn unsubscribe(&self) -> bool {
        self.call
            .upgrade()
            .map_or(false, |call| call.dispose())
    }

    pub fn is_closed(&self) -> bool {
        self.call
            .upgrade()
            .map_or(true, |call| call.is_settled())
    }

    /// Uid of the call; `None` if it failed before a request was built
    pub fn uid(&self) -> Option<&CallId> {
        self.uid.as_ref()
    }
}

impl fmt::Debug for CallSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSubscription")
            .field("uid", &self.uid)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Binds emitters and default options once for many actions
#[derive(Clone)]
pub struct Caller {
    runtime: Arc<Runtime>,
    emitters: EmittersSource,
    defaults: CallOptions,
}

impl Caller {
    pub(crate) fn new(runtime: Arc<Runtime>, emitters: EmittersSource, defaults: CallOptions) -> Self {
        Self {
            runtime,
            emitters,
            defaults,
        }
    }

    /// Binds an action; `options` are laid over the defaults
    pub fn action(&self, name: impl Into<String>, options: Option<CallOptions>) -> RemoteAction {
        let options = match options {
            Some(options) => options.merged_over(&self.defaults),
            None => self.defaults.clone(),
        };
        RemoteAction::new(
            self.runtime.clone(),
            name.into(),
            options,
            self.emitters.clone(),
        )
    }

    pub fn defaults(&self) -> &CallOptions {
        &self.defaults
    }
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("emitters", &self.emitters)
            .field("defaults", &self.defaults)
            .finish()
    }
}
