//! Service entry point

use crate::caller::{Caller, RemoteAction};
use crate::config::ServiceConfig;
use crate::correlation::CallTables;
use crate::options::CallOptions;
use crate::responder::{ActionTable, RegisterOptions, Registration};
use crate::scheduler::{Scheduler, ThreadScheduler};
use core_types::ListenerId;
use ipc::{Emitters, EmittersSource, Listener, Transport, TransportError};
use services_logger::{LogEntry, LogLevel, SharedLogger, SilentLogger};
use std::fmt;
use std::sync::Arc;

/// State shared by every registration and call of a service
pub(crate) struct Runtime {
    pub config: ServiceConfig,
    pub logger: SharedLogger,
    pub scheduler: Arc<dyn Scheduler>,
    pub tables: CallTables,
}

/// Builds a [`Service`]
pub struct ServiceBuilder {
    config: ServiceConfig,
    logger: Option<SharedLogger>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl ServiceBuilder {
    pub fn logger(mut self, logger: SharedLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Logs nothing and uses a [`ThreadScheduler`] unless told otherwise
    pub fn build(self) -> Service {
        let logger = self.logger.unwrap_or_else(|| Arc::new(SilentLogger));
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(ThreadScheduler::new()));
        Service {
            runtime: Arc::new(Runtime {
                config: self.config,
                logger,
                scheduler,
                tables: CallTables::default(),
            }),
        }
    }
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Remote action service bound to one channel
///
/// The same service can serve actions and call them; clones share the
/// correlation tables.
#[derive(Clone)]
pub struct Service {
    runtime: Arc<Runtime>,
}

impl Service {
    pub fn new(config: ServiceConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ServiceConfig) -> ServiceBuilder {
        ServiceBuilder {
            config,
            logger: None,
            scheduler: None,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.runtime.config
    }

    /// Serves `actions` on the configured channel of `transport`
    pub fn register<T>(
        &self,
        actions: ActionTable,
        transport: Arc<T>,
        options: RegisterOptions,
    ) -> Result<Registration, TransportError>
    where
        T: Transport + 'static,
    {
        self.register_with(actions, Emitters::from_transport(transport), options)
    }

    /// Serves `actions`, listening and answering through separate halves
    pub fn register_with(
        &self,
        actions: ActionTable,
        emitters: Emitters,
        options: RegisterOptions,
    ) -> Result<Registration, TransportError> {
        let logger = options
            .logger
            .unwrap_or_else(|| self.runtime.logger.clone());
        Registration::open(
            &self.runtime.config.channel,
            actions,
            emitters,
            options.request_resolver,
            logger,
            self.runtime.scheduler.clone(),
        )
    }

    /// Options a caller gets when it does not bring its own
    pub fn default_call_options(&self) -> CallOptions {
        CallOptions::new(self.runtime.config.call_timeout)
    }

    /// Binds a single remote action
    pub fn call(
        &self,
        name: impl Into<String>,
        options: CallOptions,
        emitters: impl Into<EmittersSource>,
    ) -> RemoteAction {
        RemoteAction::new(
            self.runtime.clone(),
            name.into(),
            options,
            emitters.into(),
        )
    }

    /// Binds emitters and default options for many actions
    pub fn caller(
        &self,
        emitters: impl Into<EmittersSource>,
        defaults: Option<CallOptions>,
    ) -> Caller {
        let defaults = defaults.unwrap_or_else(|| self.default_call_options());
        Caller::new(self.runtime.clone(), emitters.into(), defaults)
    }

    /// Number of calls waiting on a (listener, topic) pair
    pub fn pending_calls(&self, listener: ListenerId, topic: &str) -> usize {
        self.runtime.tables.pending(listener, topic)
    }

    /// Forgets a listener: its shared handlers are detached and its pending
    /// calls fail with [`CallError::Released`](crate::CallError::Released)
    ///
    /// Returns how many calls were failed.
    pub fn release_listener(&self, listener: &dyn Listener) -> usize {
        let released = self.runtime.tables.release(listener);
        self.runtime.logger.log(
            LogEntry::new(LogLevel::Info, "caller.release")
                .with_field("listener", listener.id())
                .with_field("released", released),
        );
        released
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("config", &self.runtime.config)
            .finish_non_exhaustive()
    }
}
