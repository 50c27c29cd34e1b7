//! Interceptors wrap a unary invocation with cross-cutting policy.
//!
//! An interceptor sees the input message before the service implementation
//! does and the output (or error) before the caller does, and may mutate or
//! substitute either. Chains compose: the first interceptor wraps a
//! continuation that runs the second, and so on down to the service
//! invocation itself.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::code::Code;
use crate::codec::Message;
use crate::context::Context;
use crate::error::{BoxError, BoxFuture};
use crate::status::{Status, REDACTED_MESSAGE};

/// A message whose concrete type has been erased for the interceptor seam.
///
/// Every [`Message`] is an `AnyMessage`; interceptors that care about the
/// concrete type downcast through [`AnyMessage::as_any`], while type-agnostic
/// interceptors (validation, audit logging, …) work on the erased form
/// directly.
pub trait AnyMessage: Send {
    /// Borrows the message for downcasting.
    fn as_any(&self) -> &dyn Any;
    /// Mutably borrows the message for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Consumes the box for downcasting by value.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    /// Runs the message's self-validation hook.
    fn validate(&self) -> Result<(), BoxError>;
}

impl<T: Message> AnyMessage for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn validate(&self) -> Result<(), BoxError> {
        Message::validate(self)
    }
}

/// An erased message travelling through an interceptor chain.
pub type BoxMessage = Box<dyn AnyMessage>;

/// Identifies the invocation an interceptor is wrapping.
#[derive(Clone, Debug)]
pub struct MethodInfo {
    /// The `package/service` path of the service.
    pub service: String,
    /// The method name within the service.
    pub method: String,
}

pub(crate) type Terminal =
    Box<dyn FnOnce(BoxMessage) -> BoxFuture<'static, Result<BoxMessage, Status>> + Send>;

/// A composable wrapper around a unary invocation.
///
/// Implementations may inspect or mutate the input before running `next`,
/// inspect the output or error afterwards, and substitute either before
/// returning. Skipping `next.run(...)` entirely short-circuits the call.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Wraps one invocation.
    async fn call(
        &self,
        ctx: &Context,
        info: &MethodInfo,
        input: BoxMessage,
        next: Next<'_>,
    ) -> Result<BoxMessage, Status>;
}

/// The rest of an interceptor chain, ending at the service invocation.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Interceptor>],
    terminal: Terminal,
}

impl Next<'_> {
    /// Runs the remaining interceptors and the wrapped invocation.
    pub async fn run(
        self,
        ctx: &Context,
        info: &MethodInfo,
        input: BoxMessage,
    ) -> Result<BoxMessage, Status> {
        match self.rest.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    rest,
                    terminal: self.terminal,
                };
                head.call(ctx, info, input, next).await
            }
            None => (self.terminal)(input).await,
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.rest.len())
            .finish()
    }
}

/// An ordered interceptor chain. Cloning is cheap; the chain is assembled at
/// server construction time and shared by every call.
#[derive(Clone)]
pub struct Chain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl Chain {
    /// Builds a chain running `interceptors` in order, outermost first.
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Chain {
        Chain {
            interceptors: interceptors.into(),
        }
    }

    /// Whether the chain has no interceptors. An empty chain is equivalent
    /// to invoking the service directly.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub(crate) async fn invoke(
        &self,
        ctx: &Context,
        info: &MethodInfo,
        input: BoxMessage,
        terminal: Terminal,
    ) -> Result<BoxMessage, Status> {
        let next = Next {
            rest: &self.interceptors,
            terminal,
        };
        next.run(ctx, info, input).await
    }
}

impl Default for Chain {
    fn default() -> Chain {
        Chain::new(Vec::new())
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

/// Enforces message self-validation around an invocation.
///
/// An input that fails its own validation is rejected as
/// [`Code::INVALID_INPUT`] before the service implementation ever sees it —
/// the client's fault, reported openly. An output that fails validation
/// means the server produced garbage: the client sees a generic
/// [`Code::UNKNOWN`] status, and the validation failure stays local as the
/// status cause.
#[derive(Clone, Copy, Debug, Default)]
pub struct Validator;

#[async_trait]
impl Interceptor for Validator {
    async fn call(
        &self,
        ctx: &Context,
        info: &MethodInfo,
        input: BoxMessage,
        next: Next<'_>,
    ) -> Result<BoxMessage, Status> {
        if let Err(err) = input.validate() {
            return Err(Status::new(
                Code::INVALID_INPUT,
                format!("invalid {} input: {err}", info.method),
            ));
        }
        let output = next.run(ctx, info, input).await?;
        if let Err(err) = output.validate() {
            return Err(Status::new(Code::UNKNOWN, REDACTED_MESSAGE).with_cause(err));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    struct Ping {
        #[prost(int32, tag = "1")]
        value: i32,
    }

    impl Message for Ping {
        fn validate(&self) -> Result<(), BoxError> {
            if self.value < 0 {
                return Err(format!("value must be non-negative, got {}", self.value).into());
            }
            Ok(())
        }
    }

    fn info() -> MethodInfo {
        MethodInfo {
            service: "test/Sprocket".into(),
            method: "Ping".into(),
        }
    }

    fn terminal(
        f: impl FnOnce(BoxMessage) -> Result<BoxMessage, Status> + Send + 'static,
    ) -> Terminal {
        Box::new(move |input: BoxMessage| -> BoxFuture<'static, Result<BoxMessage, Status>> {
            Box::pin(async move { f(input) })
        })
    }

    fn echo_terminal() -> Terminal {
        terminal(Ok)
    }

    fn downcast(message: BoxMessage) -> Ping {
        *message.into_any().downcast::<Ping>().unwrap()
    }

    #[tokio::test]
    async fn empty_chain_is_the_terminal() {
        let chain = Chain::default();
        assert!(chain.is_empty());
        let out = chain
            .invoke(
                &Context::new(),
                &info(),
                Box::new(Ping { value: 7 }),
                echo_terminal(),
            )
            .await
            .unwrap();
        assert_eq!(downcast(out).value, 7);
    }

    struct AddOne;

    #[async_trait]
    impl Interceptor for AddOne {
        async fn call(
            &self,
            ctx: &Context,
            info: &MethodInfo,
            mut input: BoxMessage,
            next: Next<'_>,
        ) -> Result<BoxMessage, Status> {
            input.as_any_mut().downcast_mut::<Ping>().unwrap().value += 1;
            next.run(ctx, info, input).await
        }
    }

    struct Double;

    #[async_trait]
    impl Interceptor for Double {
        async fn call(
            &self,
            ctx: &Context,
            info: &MethodInfo,
            mut input: BoxMessage,
            next: Next<'_>,
        ) -> Result<BoxMessage, Status> {
            input.as_any_mut().downcast_mut::<Ping>().unwrap().value *= 2;
            next.run(ctx, info, input).await
        }
    }

    #[tokio::test]
    async fn interceptors_run_in_order() {
        // (3 + 1) * 2, not 3 * 2 + 1.
        let chain = Chain::new(vec![Arc::new(AddOne), Arc::new(Double)]);
        let out = chain
            .invoke(
                &Context::new(),
                &info(),
                Box::new(Ping { value: 3 }),
                echo_terminal(),
            )
            .await
            .unwrap();
        assert_eq!(downcast(out).value, 8);
    }

    struct ShortCircuit;

    #[async_trait]
    impl Interceptor for ShortCircuit {
        async fn call(
            &self,
            _ctx: &Context,
            _info: &MethodInfo,
            _input: BoxMessage,
            _next: Next<'_>,
        ) -> Result<BoxMessage, Status> {
            Err(Status::permission_denied("not today"))
        }
    }

    #[tokio::test]
    async fn interceptors_can_substitute_the_outcome() {
        let chain = Chain::new(vec![Arc::new(ShortCircuit), Arc::new(AddOne)]);
        let err = chain
            .invoke(
                &Context::new(),
                &info(),
                Box::new(Ping { value: 3 }),
                terminal(|_| panic!("terminal must not run after a short circuit")),
            )
            .await
            .err().unwrap();
        assert_eq!(err.code(), Code::PERMISSION_DENIED);
    }

    #[tokio::test]
    async fn validator_rejects_invalid_input_before_the_terminal() {
        let chain = Chain::new(vec![Arc::new(Validator)]);
        let err = chain
            .invoke(
                &Context::new(),
                &info(),
                Box::new(Ping { value: -1 }),
                terminal(|_| panic!("service must not see invalid input")),
            )
            .await
            .err().unwrap();
        assert_eq!(err.code(), Code::INVALID_INPUT);
        assert!(err.message().contains("value must be non-negative"));
    }

    #[tokio::test]
    async fn validator_redacts_invalid_output() {
        let chain = Chain::new(vec![Arc::new(Validator)]);
        let err = chain
            .invoke(
                &Context::new(),
                &info(),
                Box::new(Ping { value: 1 }),
                terminal(|_| Ok(Box::new(Ping { value: -5 }) as BoxMessage)),
            )
            .await
            .err().unwrap();
        assert_eq!(err.code(), Code::UNKNOWN);
        assert_eq!(err.message(), REDACTED_MESSAGE);
        // The validation failure is diagnostic only.
        assert!(err.cause().unwrap().to_string().contains("non-negative"));
    }
}
