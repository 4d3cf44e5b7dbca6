use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;

use graphflow::engine::{
    ExecutionContext, ExecutionInput, Executor, ExecutorConfig, HandlerRegistry,
};
use graphflow::graph::{Edge, ExecutableGraph, GraphBuilder, GraphValidator, Node, NodeKind};
use graphflow::state::{StateManager, StateManagerConfig};

fn build_layered_builder(layers: usize, width: usize) -> GraphBuilder {
    let mut builder = GraphBuilder::new("bench").add_input_node("in").unwrap();
    let mut previous: Vec<String> = vec!["in".to_string()];

    for layer in 0..layers {
        let mut current = Vec::with_capacity(width);
        for i in 0..width {
            let id = format!("l{}n{}", layer, i);
            builder = builder
                .add_node(Node::new(id.clone(), NodeKind::Custom))
                .unwrap();
            for prev in &previous {
                builder = builder.add_edge(Edge::new(prev.clone(), id.clone())).unwrap();
            }
            current.push(id);
        }
        previous = current;
    }

    builder = builder.add_output_node("out").unwrap();
    for prev in &previous {
        builder = builder.add_edge(Edge::new(prev.clone(), "out")).unwrap();
    }
    builder
}

fn layered_graph(layers: usize, width: usize) -> ExecutableGraph {
    build_layered_builder(layers, width)
        .build_executable(Some(ExecutorConfig {
            max_concurrency: 8,
            ..ExecutorConfig::default()
        }))
        .unwrap()
}

fn bench_validation(c: &mut Criterion) {
    let definition = build_layered_builder(6, 6).definition();
    c.bench_function("validate_layered_graph", |b| {
        b.iter(|| GraphValidator::validate(black_box(&definition)))
    });
}

fn bench_plan_compilation(c: &mut Criterion) {
    let builder = build_layered_builder(6, 6);
    c.bench_function("compile_execution_plan", |b| {
        b.iter(|| {
            black_box(builder.clone())
                .build_executable(None)
                .unwrap()
        })
    });
}

fn bench_parallel_execution(c: &mut Criterion) {
    graphflow::runtime::init_tracing();
    let rt = Runtime::new().unwrap();
    let graph = layered_graph(4, 4);

    c.bench_function("execute_layered_graph", |b| {
        b.iter(|| {
            rt.block_on(async {
                let executor = Executor::new(
                    StateManager::new(StateManagerConfig::default()),
                    Arc::new(HandlerRegistry::with_defaults()),
                );
                let input = ExecutionInput {
                    global_input: Some(json!({"seed": 1})),
                    node_inputs: Default::default(),
                };
                executor
                    .execute(&graph, input, ExecutionContext::new("bench"))
                    .await
                    .unwrap()
            })
        })
    });
}

fn bench_json_round_trip(c: &mut Criterion) {
    let definition = build_layered_builder(6, 6).definition();
    c.bench_function("definition_json_round_trip", |b| {
        b.iter(|| {
            let text = black_box(&definition).to_json(false).unwrap();
            graphflow::graph::GraphDefinition::from_json(&text).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_validation,
    bench_plan_compilation,
    bench_parallel_execution,
    bench_json_round_trip
);
criterion_main!(benches);
