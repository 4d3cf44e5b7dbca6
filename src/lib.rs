//! # GraphFlow
//!
//! A workflow runtime that executes user-defined DAGs of heterogeneous
//! computation units: input sources, agent invocations, tool calls, data
//! transforms, conditionals, delays, and custom logic.
//!
//! ## Overview
//!
//! Three tightly coupled pieces form the core:
//!
//! - **Graph builder & validator** ([`graph`]): fluent assembly of an
//!   immutable [`graph::GraphDefinition`], structural/semantic validation,
//!   and compilation into an [`graph::ExecutableGraph`] with a topological
//!   order and dependency map.
//! - **State manager** ([`state`]): sole owner of per-execution mutable
//!   state, serialized under a per-execution lock, with checkpoints and a
//!   local event bus.
//! - **Executor** ([`engine`]): schedules ready nodes, dispatches them to
//!   typed handlers through a bounded resource pool, enforces timeouts and
//!   cooperative cancellation, and streams [`stream::ExecutionStep`] events.
//!
//! The [`runtime::WorkflowRuntime`] facade wires them together for
//! embedders.
//!
//! ## Example
//!
//! ```no_run
//! use graphflow::graph::{Edge, GraphBuilder, Transform};
//! use graphflow::runtime::{WorkflowRequest, WorkflowRuntime};
//!
//! # async fn run() -> graphflow::Result<()> {
//! let graph = GraphBuilder::new("shout")
//!     .add_input_node("in")?
//!     .add_transform_node("upper", Transform::named("uppercase"))?
//!     .add_output_node("out")?
//!     .add_edge(Edge::new("in", "upper"))?
//!     .add_edge(Edge::new("upper", "out"))?
//!     .build_executable(None)?;
//!
//! let runtime = WorkflowRuntime::new();
//! runtime.initialize().await?;
//! let response = runtime
//!     .execute_graph(&graph, WorkflowRequest::new("session-1", "hello".into()))
//!     .await?;
//! assert!(response.success);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, error::EngineError>;

/// Error taxonomy and recovery suggestions.
pub mod error;

/// Graph model, builder, validation, and plan compilation.
pub mod graph;

/// Execution state, checkpoints, events, and the state manager.
pub mod state;

/// Pluggable persistence backends.
pub mod checkpoint;

/// Executor, node handlers, resource pool, and metrics.
pub mod engine;

/// Streaming execution events.
pub mod stream;

/// Embedder-facing runtime facade.
pub mod runtime;

pub use error::{EngineError, ErrorKind, Severity};
