//! Per-call options

use crate::finish::FinishSignal;
use ipc::Serialization;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A pending observer notification
pub type Notification = Box<dyn FnOnce() + Send>;

type Wrap = Arc<dyn Fn(Notification) + Send + Sync>;

/// Strategy every observer notification of a call runs through
///
/// Hosts use it to hop onto their own execution context (a UI loop, a
/// task queue). The default runs the notification right away.
#[derive(Clone, Default)]
pub struct NotificationWrapper {
    wrap: Option<Wrap>,
}

impl NotificationWrapper {
    /// Runs notifications inline
    pub fn direct() -> Self {
        Self { wrap: None }
    }

    pub fn new<F>(wrap: F) -> Self
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        Self {
            wrap: Some(Arc::new(wrap)),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.wrap.is_none()
    }

    pub fn run(&self, notification: Notification) {
        match &self.wrap {
            Some(wrap) => wrap(notification),
            None => notification(),
        }
    }
}

impl fmt::Debug for NotificationWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_direct() {
            f.write_str("NotificationWrapper::Direct")
        } else {
            f.write_str("NotificationWrapper::Custom")
        }
    }
}

/// Options of a call
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Time allowed until the first response; any response clears it
    pub timeout: Duration,
    /// Ends the call from the outside
    pub finish: Option<FinishSignal>,
    /// Topic responses are expected on; defaults to the service channel
    pub listen_channel: Option<String>,
    pub notification_wrapper: NotificationWrapper,
    /// Value codec for both legs; transparent when unset
    pub serialization: Option<Serialization>,
}

impl CallOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            finish: None,
            listen_channel: None,
            notification_wrapper: NotificationWrapper::direct(),
            serialization: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_finish(mut self, finish: FinishSignal) -> Self {
        self.finish = Some(finish);
        self
    }

    pub fn with_listen_channel(mut self, channel: impl Into<String>) -> Self {
        self.listen_channel = Some(channel.into());
        self
    }

    pub fn with_notification_wrapper(mut self, wrapper: NotificationWrapper) -> Self {
        self.notification_wrapper = wrapper;
        self
    }

    pub fn with_serialization(mut self, serialization: Serialization) -> Self {
        self.serialization = Some(serialization);
        self
    }

    /// Lays these options over `defaults`
    ///
    /// The timeout always comes from `self`. Unset optional fields and a
    /// direct notification wrapper fall back to the defaults.
    pub fn merged_over(self, defaults: &CallOptions) -> CallOptions {
        CallOptions {
            timeout: self.timeout,
            finish: self.finish.or_else(|| defaults.finish.clone()),
            listen_channel: self
                .listen_channel
                .or_else(|| defaults.listen_channel.clone()),
            notification_wrapper: if self.notification_wrapper.is_direct() {
                defaults.notification_wrapper.clone()
            } else {
                self.notification_wrapper
            },
            serialization: self.serialization.or(defaults.serialization),
        }
    }
}
