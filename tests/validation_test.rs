//! Graph validation scenarios, including cycle rejection.

use graphflow::error::ErrorKind;
use graphflow::graph::{
    Edge, EdgeTransform, GraphBuilder, GraphValidator, Node, NodeKind, Transform,
};
use graphflow::runtime::WorkflowRuntime;

#[test]
fn test_cycle_rejected_with_path_of_length_three() {
    let definition = GraphBuilder::new("cycle")
        .add_node(Node::new("a", NodeKind::Custom))
        .unwrap()
        .add_node(Node::new("b", NodeKind::Custom))
        .unwrap()
        .add_node(Node::new("c", NodeKind::Custom))
        .unwrap()
        .add_edge(Edge::new("a", "b"))
        .unwrap()
        .add_edge(Edge::new("b", "c"))
        .unwrap()
        .add_edge(Edge::new("c", "a"))
        .unwrap()
        .definition();

    let runtime = WorkflowRuntime::new();
    let report = runtime.validate_graph(&definition);

    assert!(!report.valid);
    assert!(report
        .metadata
        .cyclic_paths
        .iter()
        .any(|path| path.len() == 3));

    // Building the same graph fails with VALIDATION_FAILED.
    let err = GraphBuilder::from_definition(definition).build().unwrap_err();
    assert_eq!(err.kind, ErrorKind::ValidationFailed);
}

#[test]
fn test_two_cycles_both_reported() {
    let definition = GraphBuilder::new("cycles")
        .add_node(Node::new("a", NodeKind::Custom))
        .unwrap()
        .add_node(Node::new("b", NodeKind::Custom))
        .unwrap()
        .add_node(Node::new("x", NodeKind::Custom))
        .unwrap()
        .add_node(Node::new("y", NodeKind::Custom))
        .unwrap()
        .add_edge(Edge::new("a", "b"))
        .unwrap()
        .add_edge(Edge::new("b", "a"))
        .unwrap()
        .add_edge(Edge::new("x", "y"))
        .unwrap()
        .add_edge(Edge::new("y", "x"))
        .unwrap()
        .definition();

    let report = GraphValidator::validate(&definition);
    assert_eq!(report.metadata.cyclic_paths.len(), 2);
}

#[test]
fn test_required_config_per_kind() {
    // Agent without agent_id.
    let report = GraphValidator::validate(
        &GraphBuilder::new("g")
            .add_node(Node::new("a", NodeKind::Agent))
            .unwrap()
            .definition(),
    );
    assert!(report.errors.iter().any(|e| e.code == "MISSING_AGENT_ID"));

    // Tool without tool_name.
    let report = GraphValidator::validate(
        &GraphBuilder::new("g")
            .add_node(Node::new("t", NodeKind::Tool))
            .unwrap()
            .definition(),
    );
    assert!(report.errors.iter().any(|e| e.code == "MISSING_TOOL_NAME"));

    // Transform without behavior.
    let report = GraphValidator::validate(
        &GraphBuilder::new("g")
            .add_node(Node::new("x", NodeKind::Transform))
            .unwrap()
            .definition(),
    );
    assert!(report.errors.iter().any(|e| e.code == "MISSING_TRANSFORM"));

    // A transform with a named function passes.
    let report = GraphValidator::validate(
        &GraphBuilder::new("g")
            .add_transform_node("x", Transform::named("uppercase"))
            .unwrap()
            .definition(),
    );
    assert!(report.errors.is_empty());
}

#[test]
fn test_edge_transform_with_type_requires_behavior() {
    let mut definition = GraphBuilder::new("g")
        .add_input_node("a")
        .unwrap()
        .add_output_node("b")
        .unwrap()
        .add_edge(Edge::new("a", "b"))
        .unwrap()
        .definition();

    definition.edges[0].transform = Some(EdgeTransform {
        transform_type: "function".to_string(),
        expression: None,
        function: None,
    });

    let report = GraphValidator::validate(&definition);
    assert!(report.errors.iter().any(|e| e.code == "EMPTY_TRANSFORM"));

    definition.edges[0].transform = Some(EdgeTransform::expression("uppercase"));
    let report = GraphValidator::validate(&definition);
    assert!(report.valid);
}

#[test]
fn test_warnings_do_not_fail_the_build() {
    // Dead end, no output node, disconnected island: all warnings.
    let builder = GraphBuilder::new("warned")
        .add_input_node("in")
        .unwrap()
        .add_node(Node::new("stub", NodeKind::Custom))
        .unwrap()
        .add_edge(Edge::new("in", "stub"))
        .unwrap();

    let report = GraphValidator::validate(&builder.definition());
    assert!(report.valid);
    assert!(!report.warnings.is_empty());
    assert!(builder.build().is_ok());
}

#[test]
fn test_complexity_warning_over_threshold() {
    let mut builder = GraphBuilder::new("big").add_input_node("n0").unwrap();
    for i in 1..30 {
        builder = builder
            .add_node(Node::new(format!("n{}", i), NodeKind::Custom))
            .unwrap()
            .add_edge(Edge::new(format!("n{}", i - 1), format!("n{}", i)))
            .unwrap();
    }

    let report = GraphValidator::validate(&builder.definition());
    assert!(report
        .warnings
        .iter()
        .any(|w| w.code == "HIGH_COMPLEXITY"));
    assert_eq!(report.metadata.node_count, 30);
    assert_eq!(report.metadata.max_depth, 29);
}
