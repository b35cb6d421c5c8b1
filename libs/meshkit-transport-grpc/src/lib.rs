#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! gRPC transport for meshkit: a lifecycle-managed tonic server and a client
//! connector that resolves service names through a registry.
//!
//! ```ignore
//! let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
//!
//! let server = RpcServer::new(ServerOptions::rpc_defaults().with_name("greeter"), registry.clone());
//! server.add_service(GreeterServer::new(MyGreeter));
//! server.start().await?;
//!
//! let client = RpcClient::connect("greeter", &ClientOptions::new().with_registry(registry))?;
//! let mut greeter = GreeterClient::new(client.intercepted());
//! ```

pub mod client;
pub mod interceptor;
pub mod resolver;
pub mod server;
pub mod target;

pub use client::{ClientOptions, ConnectError, RpcClient, SchemeCatalog};
pub use interceptor::{CallInterceptor, InterceptorChain};
pub use resolver::{AddressSink, BalanceSink, EndpointSettings, NameResolver, SinkClosed};
pub use server::RpcServer;
pub use target::{Target, TargetError};
