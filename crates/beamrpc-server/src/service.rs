//! Method registration and dispatch.
//!
//! Exported methods take one deserializable argument and return one
//! serializable reply or a [`MethodError`]; the bounds on
//! [`ServiceBuilder::method`] are the whole signature predicate, checked at
//! compile time. Registration erases each method into a trampoline that
//! decodes the argument with the connection's wire format, invokes the
//! user function on the shared receiver, and encodes the reply.

use std::any::type_name;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};

use beamrpc_common::{Result, RpcError, WireFormat};

/// Error returned by an exported method; its message is carried verbatim in
/// the response header.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MethodError(String);

impl MethodError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for MethodError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for MethodError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

type MethodFuture = BoxFuture<'static, Result<Vec<u8>>>;
type MethodFn = Box<dyn Fn(WireFormat, Vec<u8>) -> MethodFuture + Send + Sync>;

/// One registered method: the erased trampoline plus its call counter.
pub struct MethodHandler {
    invoke: MethodFn,
    calls: AtomicU64,
}

impl MethodHandler {
    /// How many times this method has been invoked.
    pub fn num_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

/// A named set of invocable methods bound to one receiver.
///
/// The service name is the receiver's unqualified type name and must start
/// with an uppercase letter. Built services are immutable; the server
/// stores them in an insert-once map.
pub struct Service {
    name: String,
    methods: HashMap<String, MethodHandler>,
}

impl Service {
    /// Starts building a service around `receiver`. The receiver is shared
    /// between concurrent invocations.
    pub fn builder<T: Send + Sync + 'static>(receiver: T) -> ServiceBuilder<T> {
        ServiceBuilder {
            receiver: Arc::new(receiver),
            name: short_type_name::<T>().to_string(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<&MethodHandler> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Bumps the method's call counter and produces the invocation future:
    /// decode argument, invoke, encode reply. A [`MethodError`] from the
    /// method comes back as [`RpcError::Method`] with the original message.
    pub fn call(&self, method: &str, format: WireFormat, body: Vec<u8>) -> Result<MethodFuture> {
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| RpcError::UnknownMethod(method.to_string()))?;
        handler.calls.fetch_add(1, Ordering::Relaxed);
        Ok((handler.invoke)(format, body))
    }
}

pub struct ServiceBuilder<T> {
    receiver: Arc<T>,
    name: String,
    methods: HashMap<String, MethodHandler>,
}

impl<T: Send + Sync + 'static> ServiceBuilder<T> {
    /// Registers an exported method under `name`.
    ///
    /// `f` is typically a plain async method on the receiver type taking
    /// `self: Arc<Self>`:
    ///
    /// ```ignore
    /// Service::builder(Arith).method("Sum", Arith::sum).build()?
    /// ```
    pub fn method<A, R, F, Fut>(mut self, name: &str, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, MethodError>> + Send + 'static,
    {
        let receiver = Arc::clone(&self.receiver);
        let f = Arc::new(f);
        let invoke: MethodFn = Box::new(move |format, body| {
            let receiver = Arc::clone(&receiver);
            let f = Arc::clone(&f);
            Box::pin(async move {
                let args: A = format.decode(&body)?;
                match f(receiver, args).await {
                    Ok(reply) => format.encode(&reply),
                    Err(e) => Err(RpcError::Method(e.to_string())),
                }
            })
        });
        self.methods.insert(
            name.to_string(),
            MethodHandler {
                invoke,
                calls: AtomicU64::new(0),
            },
        );
        self
    }

    /// Finishes the service, validating that the receiver's type name is an
    /// exported identifier.
    pub fn build(self) -> Result<Service> {
        if !is_exported(&self.name) {
            return Err(RpcError::InvalidServiceName(self.name));
        }
        Ok(Service {
            name: self.name,
            methods: self.methods,
        })
    }
}

/// Unqualified type name: `my_app::arith::Arith` becomes `Arith`.
fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    struct Foo;

    #[derive(Serialize, Deserialize)]
    struct Args {
        num1: i64,
        num2: i64,
    }

    impl Foo {
        async fn sum(self: Arc<Self>, args: Args) -> std::result::Result<i64, MethodError> {
            Ok(args.num1 + args.num2)
        }

        async fn fail(self: Arc<Self>, _args: Args) -> std::result::Result<i64, MethodError> {
            Err(MethodError::new("no thanks"))
        }
    }

    fn foo_service() -> Service {
        Service::builder(Foo)
            .method("Sum", Foo::sum)
            .method("Fail", Foo::fail)
            .build()
            .unwrap()
    }

    #[test]
    fn name_comes_from_receiver_type() {
        let service = foo_service();
        assert_eq!(service.name(), "Foo");
        assert!(service.method("Sum").is_some());
        assert!(service.method("Missing").is_none());
    }

    #[test]
    fn unexported_receiver_name_is_rejected() {
        #[allow(non_camel_case_types)]
        struct foo;

        let err = Service::builder(foo).build().unwrap_err();
        assert!(matches!(err, RpcError::InvalidServiceName(name) if name == "foo"));
    }

    #[tokio::test]
    async fn call_decodes_invokes_and_counts() {
        let service = foo_service();
        let args = WireFormat::Binary
            .encode(&Args { num1: 1, num2: 1 })
            .unwrap();

        let reply = service
            .call("Sum", WireFormat::Binary, args)
            .unwrap()
            .await
            .unwrap();
        let sum: i64 = WireFormat::Binary.decode(&reply).unwrap();

        assert_eq!(sum, 2);
        assert_eq!(service.method("Sum").unwrap().num_calls(), 1);
        assert_eq!(service.method("Fail").unwrap().num_calls(), 0);
    }

    #[tokio::test]
    async fn method_error_is_surfaced_verbatim() {
        let service = foo_service();
        let args = WireFormat::Json
            .encode(&Args { num1: 0, num2: 0 })
            .unwrap();

        let err = service
            .call("Fail", WireFormat::Json, args)
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no thanks");
    }

    #[tokio::test]
    async fn undecodable_argument_is_a_per_call_error() {
        let service = foo_service();
        let err = service
            .call("Sum", WireFormat::Json, b"not json".to_vec())
            .unwrap()
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Json(_)));
    }

    #[test]
    fn unknown_method_is_distinct() {
        let service = foo_service();
        let err = service
            .call("Missing", WireFormat::Json, Vec::new())
            .unwrap_err();
        assert!(err.to_string().contains("can't find method: Missing"));
    }
}
