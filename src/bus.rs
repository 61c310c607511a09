//! In-process message bus: command routing with validation, event delivery
//! with interceptors, and the bridge that feeds committed events back onto
//! the bus.
//!
//! Commands have exactly one handler each, keyed by the command's `TypeId`;
//! registering a second handler for the same command type is a configuration
//! error. Events have any number of handlers. When interceptors are
//! registered, delivery runs solely through them: each interceptor receives
//! a [`Chain`] and decides whether to call [`Chain::proceed`].

use std::{
    any::{Any, TypeId, type_name},
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    codec::Codec,
    publisher::{EventPublisher, PublishError},
    store::EventWithContext,
};

/// Marker trait for commands dispatched through the bus.
pub trait Command: Any + Send + Sync {}

/// Marker trait for events delivered through the bus.
pub trait Event: Any + Send + Sync {}

/// Error type produced by command and event handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of a handled command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResponse {
    pub status: StatusCode,
    pub payload: Option<serde_json::Value>,
}

impl CommandResponse {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            payload: None,
        }
    }

    pub fn with_payload<T: Serialize>(
        status: StatusCode,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            status,
            payload: Some(serde_json::to_value(payload)?),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Created,
    Accepted,
    Rejected,
    NotFound,
}

/// Error wiring handlers onto the bus.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("a handler is already registered for command `{command}`")]
    DuplicateCommandHandler { command: &'static str },
}

/// Error dispatching a command.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no handler registered for command `{command}`")]
    NoHandler { command: &'static str },
    #[error("command validation failed: {0:?}")]
    Validation(BTreeMap<String, Vec<String>>),
    #[error("command handler failed: {0}")]
    Handler(#[source] HandlerError),
}

/// Field-by-field validation rules for one command type.
///
/// Predicates return `true` when the field is valid; every failing rule
/// contributes its message to the per-field error map and the handler is
/// never invoked.
///
/// # Example
///
/// ```
/// use eventum::bus::Validation;
///
/// struct Register { email: String }
///
/// let validation = Validation::rules()
///     .rule("email", |c: &Register| c.email.contains('@'), "must be an email address")
///     .rule("email", |c: &Register| !c.email.is_empty(), "must not be empty");
///
/// let errors = validation.validate(&Register { email: String::new() });
/// assert_eq!(errors["email"].len(), 2);
/// ```
pub struct Validation<C> {
    rules: Vec<Rule<C>>,
}

struct Rule<C> {
    field: String,
    message: String,
    check: Box<dyn Fn(&C) -> bool + Send + Sync>,
}

impl<C> Validation<C> {
    /// An empty rule set: everything passes.
    #[must_use]
    pub fn rules() -> Self {
        Self { rules: Vec::new() }
    }

    #[must_use]
    pub fn rule(
        mut self,
        field: impl Into<String>,
        check: impl Fn(&C) -> bool + Send + Sync + 'static,
        message: impl Into<String>,
    ) -> Self {
        self.rules.push(Rule {
            field: field.into(),
            message: message.into(),
            check: Box::new(check),
        });
        self
    }

    /// Runs every rule, collecting failure messages per field. An empty map
    /// means the command is valid.
    pub fn validate(&self, command: &C) -> BTreeMap<String, Vec<String>> {
        let mut failures: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for rule in &self.rules {
            if !(rule.check)(command) {
                failures
                    .entry(rule.field.clone())
                    .or_default()
                    .push(rule.message.clone());
            }
        }
        failures
    }
}

impl<C> Default for Validation<C> {
    fn default() -> Self {
        Self::rules()
    }
}

/// A type-erased event travelling through the bus, together with the stored
/// payload bytes it was decoded from (empty for events published directly).
pub struct PublishedEvent {
    event: Box<dyn Any + Send + Sync>,
    type_id: TypeId,
    payload: Vec<u8>,
}

impl PublishedEvent {
    #[must_use]
    pub fn new<E: Event>(event: E) -> Self {
        Self::with_payload(event, Vec::new())
    }

    #[must_use]
    pub fn with_payload<E: Event>(event: E, payload: Vec<u8>) -> Self {
        Self {
            event: Box::new(event),
            type_id: TypeId::of::<E>(),
            payload,
        }
    }

    #[must_use]
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.event.downcast_ref()
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl std::fmt::Debug for PublishedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedEvent")
            .field("type_id", &self.type_id)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Inspects and forwards one event delivery.
pub trait Interceptor: Send + Sync {
    /// Called once per published event. Deliver to the handlers by calling
    /// [`Chain::proceed`]; not calling it suppresses delivery.
    fn intercept(&self, chain: &Chain<'_>) -> Result<(), HandlerError>;
}

/// One event delivery, paused in front of the handlers.
pub struct Chain<'a> {
    event: &'a PublishedEvent,
    handlers: &'a [BoxedEventHandler],
}

impl Chain<'_> {
    #[must_use]
    pub fn event(&self) -> &PublishedEvent {
        self.event
    }

    /// Delivers the event to its handlers.
    pub fn proceed(&self) -> Result<(), HandlerError> {
        for handler in self.handlers {
            handler(self.event.event.as_ref())?;
        }
        Ok(())
    }
}

type BoxedEventHandler = Box<dyn Fn(&(dyn Any + Send + Sync)) -> Result<(), HandlerError> + Send + Sync>;

struct RegisteredCommandHandler {
    validate: Box<dyn Fn(&(dyn Any + Send + Sync)) -> BTreeMap<String, Vec<String>> + Send + Sync>,
    invoke: Box<
        dyn Fn(&(dyn Any + Send + Sync)) -> Result<CommandResponse, HandlerError> + Send + Sync,
    >,
}

/// Synchronous, in-process message bus.
#[derive(Default)]
pub struct SimpleMessageBus {
    command_handlers: HashMap<TypeId, RegisteredCommandHandler>,
    event_handlers: HashMap<TypeId, Vec<BoxedEventHandler>>,
    interceptors: Vec<Box<dyn Interceptor>>,
}

impl std::fmt::Debug for SimpleMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleMessageBus")
            .field("command_handlers", &self.command_handlers.len())
            .field("event_handlers", &self.event_handlers.len())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

impl SimpleMessageBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for a command type, with no validation.
    pub fn register_command_handler<C, H>(&mut self, handler: H) -> Result<(), RegistrationError>
    where
        C: Command,
        H: Fn(&C) -> Result<CommandResponse, HandlerError> + Send + Sync + 'static,
    {
        self.register_validated_command_handler(handler, Validation::rules())
    }

    /// Registers the handler for a command type. Commands failing validation
    /// never reach the handler.
    pub fn register_validated_command_handler<C, H>(
        &mut self,
        handler: H,
        validation: Validation<C>,
    ) -> Result<(), RegistrationError>
    where
        C: Command,
        H: Fn(&C) -> Result<CommandResponse, HandlerError> + Send + Sync + 'static,
    {
        let key = TypeId::of::<C>();
        if self.command_handlers.contains_key(&key) {
            return Err(RegistrationError::DuplicateCommandHandler {
                command: type_name::<C>(),
            });
        }
        self.command_handlers.insert(
            key,
            RegisteredCommandHandler {
                validate: Box::new(move |any| match any.downcast_ref::<C>() {
                    Some(command) => validation.validate(command),
                    None => unreachable!("command registered under a different TypeId"),
                }),
                invoke: Box::new(move |any| match any.downcast_ref::<C>() {
                    Some(command) => handler(command),
                    None => unreachable!("command registered under a different TypeId"),
                }),
            },
        );
        tracing::debug!(command = type_name::<C>(), "command handler registered");
        Ok(())
    }

    /// Registers an event handler. Events may have any number of handlers;
    /// they run in registration order.
    pub fn register_event_handler<E, H>(&mut self, handler: H)
    where
        E: Event,
        H: Fn(&E) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.event_handlers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Box::new(move |any| match any.downcast_ref::<E>() {
                Some(event) => handler(event),
                None => unreachable!("event handler registered under a different TypeId"),
            }));
        tracing::debug!(event = type_name::<E>(), "event handler registered");
    }

    /// Registers an interceptor. Once any interceptor is registered, event
    /// delivery runs only through the interceptors.
    pub fn register_interceptor(&mut self, interceptor: Box<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Registers everything a workflow brings: its command and event
    /// handlers, explicitly wired by the workflow itself.
    pub fn register_workflow<W: Workflow + ?Sized>(
        &mut self,
        workflow: &W,
    ) -> Result<(), RegistrationError> {
        workflow.register(self)
    }

    /// Routes a command to its handler.
    pub fn send<C: Command>(&self, command: &C) -> Result<CommandResponse, SendError> {
        let handler =
            self.command_handlers
                .get(&TypeId::of::<C>())
                .ok_or(SendError::NoHandler {
                    command: type_name::<C>(),
                })?;
        let failures = (handler.validate)(command);
        if !failures.is_empty() {
            tracing::debug!(command = type_name::<C>(), ?failures, "command rejected by validation");
            return Err(SendError::Validation(failures));
        }
        (handler.invoke)(command).map_err(SendError::Handler)
    }

    /// Delivers an event to its handlers, through the interceptors if any
    /// are registered. Events with no handlers and no interceptors are
    /// dropped silently.
    pub fn publish(&self, event: &PublishedEvent) -> Result<(), PublishError> {
        let handlers = self
            .event_handlers
            .get(&event.type_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if self.interceptors.is_empty() {
            let chain = Chain {
                event,
                handlers,
            };
            return chain.proceed().map_err(PublishError::new);
        }
        for interceptor in &self.interceptors {
            let chain = Chain {
                event,
                handlers,
            };
            interceptor.intercept(&chain).map_err(PublishError::new)?;
        }
        Ok(())
    }
}

/// A bundle of related handlers registered as one unit.
///
/// Replaces configuration-by-scanning: a workflow states exactly what it
/// wires onto the bus.
pub trait Workflow {
    fn register(&self, bus: &mut SimpleMessageBus) -> Result<(), RegistrationError>;
}

/// Publishes committed events onto a [`SimpleMessageBus`], synchronously,
/// by decoding each stored payload back into its domain event.
///
/// Kinds without a registered decoder are skipped: streams may carry events
/// the bus has no interest in.
pub struct SyncEventPublisher<C> {
    bus: Arc<SimpleMessageBus>,
    codec: C,
    decoders: HashMap<String, BoxedEventDecoder<C>>,
}

type BoxedEventDecoder<C> =
    Box<dyn Fn(&C, &EventWithContext) -> Result<PublishedEvent, HandlerError> + Send + Sync>;

impl<C: Codec> SyncEventPublisher<C> {
    #[must_use]
    pub fn new(bus: Arc<SimpleMessageBus>, codec: C) -> Self {
        Self {
            bus,
            codec,
            decoders: HashMap::new(),
        }
    }

    /// Maps a stored event kind to the bus event it decodes into.
    pub fn register_kind<E>(&mut self, kind: impl Into<String>)
    where
        E: Event + DeserializeOwned,
    {
        let kind = kind.into();
        let parse_kind = kind.clone();
        self.decoders.insert(
            kind,
            Box::new(move |codec, stored| {
                let event: E = codec.parse(&stored.data, &parse_kind)?;
                Ok(PublishedEvent::with_payload(event, stored.data.clone()))
            }),
        );
    }
}

impl<C: Codec> std::fmt::Debug for SyncEventPublisher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEventPublisher")
            .field("decoders", &self.decoders.len())
            .finish()
    }
}

impl<C: Codec> EventPublisher for SyncEventPublisher<C> {
    fn publish(&self, events: &[EventWithContext]) -> Result<(), PublishError> {
        for stored in events {
            let Some(decoder) = self.decoders.get(&stored.kind) else {
                tracing::trace!(kind = %stored.kind, "no bus decoder for kind, skipping");
                continue;
            };
            let event = decoder(&self.codec, stored).map_err(PublishError::new)?;
            self.bus.publish(&event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greet {
        name: String,
    }
    impl Command for Greet {}

    #[test]
    fn duplicate_command_handler_is_rejected() {
        let mut bus = SimpleMessageBus::new();
        bus.register_command_handler(|_: &Greet| Ok(CommandResponse::new(StatusCode::Ok)))
            .unwrap();
        let result =
            bus.register_command_handler(|_: &Greet| Ok(CommandResponse::new(StatusCode::Ok)));
        assert!(matches!(
            result,
            Err(RegistrationError::DuplicateCommandHandler { .. })
        ));
    }

    #[test]
    fn unrouted_command_reports_no_handler() {
        let bus = SimpleMessageBus::new();
        let result = bus.send(&Greet {
            name: "a".to_string(),
        });
        assert!(matches!(result, Err(SendError::NoHandler { .. })));
    }

    #[test]
    fn failing_validation_never_reaches_the_handler() {
        let mut bus = SimpleMessageBus::new();
        bus.register_validated_command_handler(
            |_: &Greet| panic!("handler must not run"),
            Validation::rules().rule("name", |c: &Greet| !c.name.is_empty(), "must not be empty"),
        )
        .unwrap();

        let result = bus.send(&Greet {
            name: String::new(),
        });
        let Err(SendError::Validation(failures)) = result else {
            panic!("expected validation failure");
        };
        assert_eq!(failures["name"], vec!["must not be empty".to_string()]);
    }
}
