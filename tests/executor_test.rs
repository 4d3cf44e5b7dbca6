//! End-to-end execution scenarios against the full runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use graphflow::engine::{
    ErrorHandling, ExecutionContext, ExecutionInput, Executor, ExecutorConfig, ExecutionStrategy,
    FnAgent, HandlerRegistry, InMemoryAgentRegistry, InMemoryToolRegistry,
};
use graphflow::error::ErrorKind;
use graphflow::graph::{
    BackoffStrategy, Edge, ExecutableGraph, GraphBuilder, Node, NodeKind, RetryPolicy, Transform,
};
use graphflow::state::{ExecutionStatus, StateManager, StateManagerConfig};

fn executor() -> Executor {
    graphflow::runtime::init_tracing();
    Executor::new(
        StateManager::new(StateManagerConfig::default()),
        Arc::new(HandlerRegistry::with_defaults()),
    )
}

fn config(strategy: ExecutionStrategy) -> ExecutorConfig {
    ExecutorConfig {
        strategy,
        max_concurrency: 4,
        ..ExecutorConfig::default()
    }
}

fn input(data: Value) -> ExecutionInput {
    ExecutionInput {
        global_input: Some(data),
        node_inputs: HashMap::new(),
    }
}

/// `in -> upper -> out` with an uppercase transform.
fn linear_pipeline(cfg: ExecutorConfig) -> ExecutableGraph {
    GraphBuilder::new("linear")
        .add_input_node("in")
        .unwrap()
        .add_transform_node(
            "p",
            Transform::function(|input, _| {
                let text = input
                    .get("in")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_uppercase();
                Ok(json!(text))
            }),
        )
        .unwrap()
        .add_output_node("out")
        .unwrap()
        .add_edge(Edge::new("in", "p"))
        .unwrap()
        .add_edge(Edge::new("p", "out"))
        .unwrap()
        .build_executable(Some(cfg))
        .unwrap()
}

#[tokio::test]
async fn test_linear_pipeline_happy_path() {
    let graph = linear_pipeline(config(ExecutionStrategy::Parallel));
    let report = executor()
        .execute(&graph, input(json!("hello")), ExecutionContext::new("s"))
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    assert_eq!(report.execution.completed_nodes, 3);
    assert_eq!(report.execution.failed_nodes, 0);
    assert_eq!(report.result.len(), 3);
    assert_eq!(report.result["p"], json!("HELLO"));
    assert_eq!(report.execution_path, vec!["in", "p", "out"]);
}

#[tokio::test]
async fn test_diamond_fan_out_overlaps_and_joins() {
    let overlap = Arc::new(AtomicUsize::new(0));
    let max_overlap = Arc::new(AtomicUsize::new(0));

    let agents = Arc::new(InMemoryAgentRegistry::new());
    for name in ["worker-b", "worker-c"] {
        let overlap = Arc::clone(&overlap);
        let max_overlap = Arc::clone(&max_overlap);
        agents.register(Arc::new(FnAgent::new(name, move |_input, _| {
            let overlap = Arc::clone(&overlap);
            let max_overlap = Arc::clone(&max_overlap);
            async move {
                let now = overlap.fetch_add(1, Ordering::SeqCst) + 1;
                max_overlap.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                overlap.fetch_sub(1, Ordering::SeqCst);
                Ok(json!("done"))
            }
        })));
    }

    let graph = GraphBuilder::new("diamond")
        .add_input_node("a")
        .unwrap()
        .add_agent_node("b", "worker-b")
        .unwrap()
        .add_agent_node("c", "worker-c")
        .unwrap()
        .add_output_node("d")
        .unwrap()
        .add_edge(Edge::new("a", "b"))
        .unwrap()
        .add_edge(Edge::new("a", "c"))
        .unwrap()
        .add_edge(Edge::new("b", "d"))
        .unwrap()
        .add_edge(Edge::new("c", "d"))
        .unwrap()
        .build_executable(Some(ExecutorConfig {
            strategy: ExecutionStrategy::Parallel,
            max_concurrency: 2,
            ..ExecutorConfig::default()
        }))
        .unwrap();

    let ctx = ExecutionContext::new("s").with_agents(agents);
    let report = executor()
        .execute(&graph, input(json!({})), ctx)
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(max_overlap.load(Ordering::SeqCst), 2);

    // d starts only after both b and c completed.
    let d_pos = report.execution_path.iter().position(|n| n == "d").unwrap();
    let b_pos = report.execution_path.iter().position(|n| n == "b").unwrap();
    let c_pos = report.execution_path.iter().position(|n| n == "c").unwrap();
    assert!(d_pos > b_pos && d_pos > c_pos);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_pool() {
    let overlap = Arc::new(AtomicUsize::new(0));
    let max_overlap = Arc::new(AtomicUsize::new(0));

    let agents = Arc::new(InMemoryAgentRegistry::new());
    let mut builder = GraphBuilder::new("wide").add_input_node("src").unwrap();
    for i in 0..8 {
        let name = format!("agent-{}", i);
        let overlap = Arc::clone(&overlap);
        let max_overlap = Arc::clone(&max_overlap);
        agents.register(Arc::new(FnAgent::new(name.clone(), move |_input, _| {
            let overlap = Arc::clone(&overlap);
            let max_overlap = Arc::clone(&max_overlap);
            async move {
                let now = overlap.fetch_add(1, Ordering::SeqCst) + 1;
                max_overlap.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                overlap.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(1))
            }
        })));
        builder = builder
            .add_agent_node(format!("n{}", i), name)
            .unwrap()
            .add_edge(Edge::new("src", format!("n{}", i)))
            .unwrap();
    }

    let graph = builder
        .build_executable(Some(ExecutorConfig {
            strategy: ExecutionStrategy::Parallel,
            max_concurrency: 3,
            ..ExecutorConfig::default()
        }))
        .unwrap();

    let ctx = ExecutionContext::new("s").with_agents(agents);
    let report = executor()
        .execute(&graph, input(json!({})), ctx)
        .await
        .unwrap();

    assert!(report.success);
    assert!(max_overlap.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_fail_fast_aborts_downstream() {
    let graph = GraphBuilder::new("failing")
        .add_input_node("in")
        .unwrap()
        .add_transform_node(
            "x",
            Transform::function(|_, _| {
                Err(graphflow::EngineError::node_execution_failed("x", "boom"))
            }),
        )
        .unwrap()
        .add_output_node("out")
        .unwrap()
        .add_edge(Edge::new("in", "x"))
        .unwrap()
        .add_edge(Edge::new("x", "out"))
        .unwrap()
        .build_executable(Some(config(ExecutionStrategy::Parallel)))
        .unwrap();

    let report = executor()
        .execute(&graph, input(json!("data")), ExecutionContext::new("s"))
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.execution.status, ExecutionStatus::Failed);
    assert_eq!(report.execution.completed_nodes, 1);
    assert_eq!(report.execution.failed_nodes, 1);

    let error = report.error.unwrap();
    assert_eq!(error.kind, ErrorKind::NodeExecutionFailed);
    assert_eq!(error.context.node_id.as_deref(), Some("x"));

    // out never ran.
    assert!(!report.execution_path.contains(&"out".to_string()));
    assert!(report.node_results.get("out").is_none());
}

#[tokio::test]
async fn test_retry_then_succeed() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = Arc::clone(&attempts);

    let graph = GraphBuilder::new("flaky")
        .add_input_node("in")
        .unwrap()
        .add_transform_node(
            "x",
            Transform::function(move |_, _| {
                let n = attempts_clone.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(graphflow::EngineError::node_execution_failed(
                        "x",
                        "transient",
                    ))
                } else {
                    Ok(json!({"v": 1}))
                }
            }),
        )
        .unwrap()
        .add_edge(Edge::new("in", "x"))
        .unwrap()
        .build_executable(Some(ExecutorConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                backoff_strategy: BackoffStrategy::Fixed,
                initial_delay_ms: 1,
                max_delay_ms: 10,
                retryable_errors: Vec::new(),
                jitter: false,
            },
            ..config(ExecutionStrategy::Parallel)
        }))
        .unwrap();

    let report = executor()
        .execute(&graph, input(json!("data")), ExecutionContext::new("s"))
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(report.result["x"], json!({"v": 1}));
    assert_eq!(report.node_results["x"].metadata.retry_count, 2);
}

#[tokio::test]
async fn test_continue_mode_bundles_failures_and_skips_descendants() {
    let graph = GraphBuilder::new("partial")
        .add_input_node("in")
        .unwrap()
        .add_transform_node(
            "bad1",
            Transform::function(|_, _| {
                Err(graphflow::EngineError::node_execution_failed("bad1", "a"))
            }),
        )
        .unwrap()
        .add_transform_node(
            "bad2",
            Transform::function(|_, _| {
                Err(graphflow::EngineError::node_execution_failed("bad2", "b"))
            }),
        )
        .unwrap()
        .add_node(Node::new("after_bad", NodeKind::Custom))
        .unwrap()
        .add_transform_node("good", Transform::named("identity"))
        .unwrap()
        .add_edge(Edge::new("in", "bad1"))
        .unwrap()
        .add_edge(Edge::new("in", "bad2"))
        .unwrap()
        .add_edge(Edge::new("bad1", "after_bad"))
        .unwrap()
        .add_edge(Edge::new("in", "good"))
        .unwrap()
        .build_executable(Some(ExecutorConfig {
            error_handling: ErrorHandling::Continue,
            ..config(ExecutionStrategy::Parallel)
        }))
        .unwrap();

    let report = executor()
        .execute(&graph, input(json!("data")), ExecutionContext::new("s"))
        .await
        .unwrap();

    assert!(!report.success);
    // The healthy sibling subgraph still ran.
    assert!(report.execution_path.contains(&"good".to_string()));
    // The descendant of the failed node never did.
    assert!(!report.execution_path.contains(&"after_bad".to_string()));
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("after_bad")));

    let error = report.error.unwrap();
    assert_eq!(error.kind, ErrorKind::MultipleNodeFailures);
    assert_eq!(error.related.len(), 2);
}

#[tokio::test]
async fn test_error_edge_consumes_failure() {
    let graph = GraphBuilder::new("rescued")
        .add_input_node("in")
        .unwrap()
        .add_transform_node(
            "risky",
            Transform::function(|_, _| {
                Err(graphflow::EngineError::node_execution_failed(
                    "risky", "exploded",
                ))
            }),
        )
        .unwrap()
        .add_node(Node::new("rescue", NodeKind::Custom))
        .unwrap()
        .add_edge(Edge::new("in", "risky"))
        .unwrap()
        .add_edge(Edge::error("risky", "rescue"))
        .unwrap()
        .build_executable(Some(config(ExecutionStrategy::Parallel)))
        .unwrap();

    let report = executor()
        .execute(&graph, input(json!("data")), ExecutionContext::new("s"))
        .await
        .unwrap();

    // The failure was consumed: the run completes.
    assert!(report.success, "error = {:?}", report.error);
    assert!(report.execution_path.contains(&"rescue".to_string()));
    let rescue_output = &report.result["rescue"];
    assert_eq!(rescue_output["risky"]["errorType"], json!("NODE_EXECUTION_FAILED"));
    assert!(report.warnings.iter().any(|w| w.contains("risky")));
}

#[tokio::test]
async fn test_conditional_edges_route_by_output() {
    let build = |score: i64| {
        GraphBuilder::new("routed")
            .add_input_node("in")
            .unwrap()
            .add_transform_node(
                "score",
                Transform::function(move |_, _| Ok(json!({"score": score}))),
            )
            .unwrap()
            .add_node(Node::new("high", NodeKind::Custom))
            .unwrap()
            .add_node(Node::new("low", NodeKind::Custom))
            .unwrap()
            .add_edge(Edge::new("in", "score"))
            .unwrap()
            .add_edge(Edge::conditional("score", "high", "gt:score>50"))
            .unwrap()
            .add_edge(Edge::conditional("score", "low", "lt:score<50"))
            .unwrap()
            .build_executable(Some(ExecutorConfig {
                error_handling: ErrorHandling::Continue,
                ..config(ExecutionStrategy::Parallel)
            }))
            .unwrap()
    };

    let report = executor()
        .execute(&build(80), input(json!({})), ExecutionContext::new("s"))
        .await
        .unwrap();
    assert!(report.execution_path.contains(&"high".to_string()));
    assert!(!report.execution_path.contains(&"low".to_string()));

    let report = executor()
        .execute(&build(10), input(json!({})), ExecutionContext::new("s"))
        .await
        .unwrap();
    assert!(report.execution_path.contains(&"low".to_string()));
    assert!(!report.execution_path.contains(&"high".to_string()));
}

#[tokio::test]
async fn test_sequential_strategy_follows_topological_order() {
    let graph = GraphBuilder::new("seq")
        .add_input_node("in")
        .unwrap()
        .add_node(Node::new("a", NodeKind::Custom))
        .unwrap()
        .add_node(Node::new("b", NodeKind::Custom))
        .unwrap()
        .add_output_node("out")
        .unwrap()
        .add_edge(Edge::new("in", "a"))
        .unwrap()
        .add_edge(Edge::new("in", "b"))
        .unwrap()
        .add_edge(Edge::new("a", "out"))
        .unwrap()
        .add_edge(Edge::new("b", "out"))
        .unwrap()
        .build_executable(Some(config(ExecutionStrategy::Sequential)))
        .unwrap();

    let report = executor()
        .execute(&graph, input(json!({})), ExecutionContext::new("s"))
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.execution_path.len(), 4);
    // Completion order matches the compiled topological order exactly.
    assert_eq!(report.execution_path, graph.sorted_nodes);
}

#[tokio::test]
async fn test_tool_nodes_call_the_registry() {
    let tools = Arc::new(InMemoryToolRegistry::new());
    tools.register("lookup", |params: Value| async move {
        Ok(json!({"answer": params["q"], "mode": params["mode"]}))
    });

    let mut node = Node::new("t", NodeKind::Tool).with_parameter("mode", json!("exact"));
    node.config.tool_name = Some("lookup".to_string());

    let graph = GraphBuilder::new("tools")
        .add_input_node("in")
        .unwrap()
        .add_node(node)
        .unwrap()
        .add_edge(Edge::new("in", "t"))
        .unwrap()
        .build_executable(Some(config(ExecutionStrategy::Parallel)))
        .unwrap();

    let ctx = ExecutionContext::new("s").with_tools(tools);
    let report = executor()
        .execute(&graph, input(json!({"q": "meaning"})), ctx)
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.result["t"]["mode"], json!("exact"));
}

#[tokio::test]
async fn test_overall_timeout_cancels_execution() {
    let graph = GraphBuilder::new("slow")
        .add_input_node("in")
        .unwrap()
        .add_delay_node("sleepy", 400)
        .unwrap()
        .add_output_node("out")
        .unwrap()
        .add_edge(Edge::new("in", "sleepy"))
        .unwrap()
        .add_edge(Edge::new("sleepy", "out"))
        .unwrap()
        .build_executable(Some(ExecutorConfig {
            timeout_ms: 100,
            ..config(ExecutionStrategy::Parallel)
        }))
        .unwrap();

    let started = std::time::Instant::now();
    let report = executor()
        .execute(&graph, input(json!({})), ExecutionContext::new("s"))
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.execution.status, ExecutionStatus::Cancelled);
    assert_eq!(report.error.unwrap().kind, ErrorKind::Timeout);
    // The in-flight delay node finished cooperatively; "out" never started.
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(!report.execution_path.contains(&"out".to_string()));
}

#[tokio::test]
async fn test_per_node_timeout_fails_the_node() {
    let graph = GraphBuilder::new("node-timeout")
        .add_input_node("in")
        .unwrap()
        .add_node(
            Node::new("sleepy", NodeKind::Delay)
                .with_parameter("delay", json!(5_000))
                .with_timeout_ms(50),
        )
        .unwrap()
        .add_edge(Edge::new("in", "sleepy"))
        .unwrap()
        .build_executable(Some(config(ExecutionStrategy::Parallel)))
        .unwrap();

    let report = executor()
        .execute(&graph, input(json!({})), ExecutionContext::new("s"))
        .await
        .unwrap();

    assert!(!report.success);
    let error = report.error.unwrap();
    assert_eq!(error.kind, ErrorKind::NodeExecutionFailed);
    assert!(error.message.contains("timeout"));
}

#[tokio::test]
async fn test_double_execution_id_rejected() {
    let graph = linear_pipeline(config(ExecutionStrategy::Parallel));
    let exec = executor();

    let mut ctx = ExecutionContext::new("s");
    ctx.execution_id = "exec-fixed".to_string();
    exec.execute(&graph, input(json!("x")), ctx.clone())
        .await
        .unwrap();

    let err = exec
        .execute(&graph, input(json!("x")), ctx)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::StateInconsistent);
}

#[tokio::test]
async fn test_history_records_each_run() {
    let graph = linear_pipeline(config(ExecutionStrategy::Parallel));
    let exec = executor();

    for _ in 0..2 {
        exec.execute(&graph, input(json!("x")), ExecutionContext::new("s"))
            .await
            .unwrap();
    }

    let history = exec.history();
    assert_eq!(history.len(), 2);
    assert!(history
        .iter()
        .all(|h| h.status == ExecutionStatus::Completed && h.node_count == 3));
}
