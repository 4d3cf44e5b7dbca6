//! JSON round-trip and topological-order properties.

use proptest::prelude::*;

use graphflow::graph::{Edge, GraphBuilder, GraphDefinition, Node, NodeKind};

/// Build a random DAG: `node_count` nodes, edges only from lower to higher
/// index so the graph is acyclic by construction.
fn arb_dag() -> impl Strategy<Value = GraphDefinition> {
    (2usize..10, proptest::collection::vec(any::<(u8, u8)>(), 0..20)).prop_map(
        |(node_count, raw_edges)| {
            let mut builder = GraphBuilder::new("prop");
            for i in 0..node_count {
                let kind = if i == 0 {
                    NodeKind::Input
                } else if i == node_count - 1 {
                    NodeKind::Output
                } else {
                    NodeKind::Custom
                };
                builder = builder.add_node(Node::new(format!("n{}", i), kind)).unwrap();
            }
            for (a, b) in raw_edges {
                let from = a as usize % node_count;
                let to = b as usize % node_count;
                if from < to {
                    // Duplicate from->to pairs are rejected by the builder.
                    builder = match builder
                        .clone()
                        .add_edge(Edge::new(format!("n{}", from), format!("n{}", to)))
                    {
                        Ok(next) => next,
                        Err(_) => builder,
                    };
                }
            }
            builder.definition()
        },
    )
}

proptest! {
    #[test]
    fn prop_json_round_trip_preserves_structure(definition in arb_dag()) {
        let text = definition.to_json(false).unwrap();
        let back = GraphDefinition::from_json(&text).unwrap();

        let node_ids: Vec<&str> = definition.node_ids().collect();
        let back_ids: Vec<&str> = back.node_ids().collect();
        prop_assert_eq!(node_ids, back_ids);

        let edges: Vec<(&str, &str)> = definition
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        let back_edges: Vec<(&str, &str)> = back
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        prop_assert_eq!(edges, back_edges);

        prop_assert_eq!(&back.global_config, &definition.global_config);
        prop_assert_eq!(&back.metadata.extra, &definition.metadata.extra);
    }

    #[test]
    fn prop_topological_order_respects_every_edge(definition in arb_dag()) {
        let graph = GraphBuilder::from_definition(definition)
            .build_executable(None)
            .unwrap();

        let position: std::collections::HashMap<&str, usize> = graph
            .sorted_nodes
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        for edge in &graph.definition.edges {
            prop_assert!(position[edge.from.as_str()] < position[edge.to.as_str()]);
        }
        prop_assert_eq!(graph.sorted_nodes.len(), graph.definition.node_count());
    }

    #[test]
    fn prop_phases_partition_the_node_set(definition in arb_dag()) {
        let graph = GraphBuilder::from_definition(definition)
            .build_executable(None)
            .unwrap();

        let mut seen = std::collections::HashSet::new();
        for phase in &graph.plan.phases {
            for id in &phase.nodes {
                prop_assert!(seen.insert(id.clone()));
            }
        }
        prop_assert_eq!(seen.len(), graph.definition.node_count());
    }
}

#[test]
fn test_round_trip_preserves_rich_config() {
    let mut node = Node::new("agentic", NodeKind::Agent)
        .with_parameter("temperature", serde_json::json!(0.2))
        .with_priority(7)
        .with_timeout_ms(2_000);
    node.config.agent_id = Some("planner".to_string());

    let definition = GraphBuilder::new("rich")
        .add_node(node)
        .unwrap()
        .add_output_node("out")
        .unwrap()
        .add_edge(Edge::conditional("agentic", "out", "eq:status=ok"))
        .unwrap()
        .with_description("roundtrip fixture")
        .with_tags(["fixtures".to_string()])
        .build()
        .unwrap();

    let text = definition.to_json(true).unwrap();
    let back = GraphDefinition::from_json(&text).unwrap();
    assert_eq!(back, definition);
}
