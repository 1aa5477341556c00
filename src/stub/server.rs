use super::base::{StubBase, StubListener};
use crate::core::{DispatcherHandle, EventConsumer, EventSink, Registration, ServiceDirectory};
use crate::error::BusResult;
use crate::event::{EventKind, EventTarget, RequestEvent, ServiceEvent};
use crate::service::{MessageCategory, MessageId, PayloadReader, ServiceDescriptor, StubAddress};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Interface-specific part of a stub.
pub trait ServiceHandler: Send + 'static {
    /// Executes one admitted request.
    ///
    /// The handler answers through `stub` (now or later via the stub handle).
    /// Returning an error reports `REQUEST_ERROR` to the caller.
    fn process_request(
        &mut self,
        stub: &mut StubBase,
        request: MessageId,
        params: &mut PayloadReader<'_>,
    ) -> BusResult<()>;

    /// Called once before the stub becomes reachable; sets initial attributes.
    fn startup(&mut self, _stub: &mut StubBase) -> BusResult<()> {
        Ok(())
    }
}

pub struct Stub<H> {
    base: StubBase,
    handler: H,
}

impl<H: ServiceHandler> Stub<H> {
    pub fn new(
        descriptor: Arc<ServiceDescriptor>,
        address: StubAddress,
        sink: Arc<dyn EventSink>,
        handler: H,
    ) -> Self {
        Self {
            base: StubBase::new(descriptor, address, sink),
            handler,
        }
    }

    /// Hosts a stub for `role` on `dispatcher` and publishes it in `directory`.
    pub fn startup(
        descriptor: Arc<ServiceDescriptor>,
        role: &str,
        handler: H,
        dispatcher: &DispatcherHandle,
        directory: &Arc<ServiceDirectory>,
    ) -> BusResult<StubHandle<H>> {
        let address = StubAddress::new(descriptor.name(), role);
        let kind = descriptor.kind();
        let sink: Arc<dyn EventSink> = directory.clone();
        let mut stub = Stub::new(descriptor, address.clone(), sink, handler);
        stub.handler.startup(&mut stub.base)?;

        let stub = Arc::new(Mutex::new(stub));
        directory.attach_dispatcher(dispatcher);
        let registration = dispatcher.register(
            &[EventKind::Request, EventKind::NotifyRequest],
            EventTarget::Stub(address.clone()),
            stub.clone(),
        )?;
        directory.register_stub(&address, dispatcher.name(), kind)?;
        log::info!("Stub {} started on {}", address, dispatcher.name());

        Ok(StubHandle {
            stub,
            address,
            dispatcher: dispatcher.clone(),
            directory: directory.clone(),
            registration: Some(registration),
        })
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Runs one request event; the current-request marker is cleared once
    /// afterwards whether or not the handler ran.
    pub fn process_request(&mut self, event: RequestEvent) {
        self.run_request(event);
        self.base.clear_current_request();
    }

    fn run_request(&mut self, event: RequestEvent) {
        if !self.base.is_active() {
            log::debug!("{}: inactive, request {} ignored", self.base.address(), event.msg_id);
            return;
        }
        if &event.target != self.base.address() {
            log::error!("{}: request addressed to {}", self.base.address(), event.target);
            return;
        }
        let descriptor = self.base.descriptor().clone();
        if !descriptor.is_category(event.msg_id, MessageCategory::Request) {
            log::error!(
                "{}: {} from {} is not a request",
                self.base.address(),
                event.msg_id,
                event.source
            );
            return;
        }

        let request = event.msg_id;
        let response_id = descriptor.response_of(request);
        let caller = StubListener::new(request, event.seq, event.source);
        if !self.base.can_execute_request(&caller, response_id, event.seq) {
            return;
        }

        self.base.set_current_request(caller);
        let mut params = event.payload.reader();
        if let Err(e) = self.handler.process_request(&mut self.base, request, &mut params) {
            log::error!(
                "{}: request {} failed: {}",
                self.base.address(),
                descriptor.name_of(request).unwrap_or("?"),
                e
            );
            self.base.error_request(request, false);
        }
    }
}

impl<H> Deref for Stub<H> {
    type Target = StubBase;

    fn deref(&self) -> &StubBase {
        &self.base
    }
}

impl<H> DerefMut for Stub<H> {
    fn deref_mut(&mut self) -> &mut StubBase {
        &mut self.base
    }
}

impl<H: ServiceHandler> EventConsumer for Stub<H> {
    fn process_event(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::Request(event) => self.process_request(event),
            ServiceEvent::NotifyRequest(event) => self.base.process_notify_request(event),
            other => log::error!(
                "{}: unexpected {:?} event",
                self.base.address(),
                other.kind()
            ),
        }
    }
}

/// Owner of a started stub. Dropping it shuts the stub down.
pub struct StubHandle<H: ServiceHandler> {
    stub: Arc<Mutex<Stub<H>>>,
    address: StubAddress,
    dispatcher: DispatcherHandle,
    directory: Arc<ServiceDirectory>,
    registration: Option<Registration>,
}

impl<H: ServiceHandler> StubHandle<H> {
    pub fn address(&self) -> &StubAddress {
        &self.address
    }

    /// Read-only view from any thread; blocks while the dispatcher is using
    /// the stub. Changes go through [`execute`](Self::execute).
    pub fn inspect(&self) -> StubView<'_, H> {
        StubView(self.stub.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Runs `task` against the stub on its dispatcher thread.
    pub fn execute<F>(&self, task: F) -> BusResult<()>
    where
        F: FnOnce(&mut Stub<H>) + Send + 'static,
    {
        let stub = self.stub.clone();
        self.dispatcher.execute(move || {
            let mut stub = stub.lock().unwrap_or_else(PoisonError::into_inner);
            task(&mut stub);
        })
    }

    /// Unpublishes the stub and cancels every outstanding call.
    pub fn shutdown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        self.directory.unregister_stub(&self.address);
        drop(registration);
        self.stub
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .base
            .shutdown();
        log::info!("Stub {} stopped", self.address);
    }
}

/// Shared borrow of a stub held by [`StubHandle::inspect`].
pub struct StubView<'a, H>(MutexGuard<'a, Stub<H>>);

impl<H> Deref for StubView<'_, H> {
    type Target = Stub<H>;

    fn deref(&self) -> &Stub<H> {
        &self.0
    }
}

impl<H: ServiceHandler> Drop for StubHandle<H> {
    fn drop(&mut self) {
        self.release();
    }
}
