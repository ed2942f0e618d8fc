//! End-to-end workflow execution scenarios: linear chains, conditional
//! routing, bounded loops, fork-join, determinism, and cancellation.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use agentflow::config::parse_config;
use agentflow::core::cancellation;
use agentflow::runtime::WorkflowRuntime;
use agentflow::storage::{ExecutionRepository, ExecutionStatus, SqliteStore};

use common::{IncrementExecutor, UppercaseEcho};

fn inputs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_linear_two_node_workflow() {
    let yaml = r#"
schema_version: "1.0"
flow: {name: two_step}
state:
  fields:
    topic: {type: str, required: true}
    summary: {type: str, default: ""}
nodes:
  - {id: a, prompt: "Summarize {topic}", output_schema: {type: str}, outputs: [summary]}
  - {id: b, prompt: "Capitalize {summary}", output_schema: {type: str}, outputs: [summary]}
edges:
  - {from: START, to: a}
  - {from: a, to: b}
  - {from: b, to: END}
"#;
    let runtime = WorkflowRuntime::new(Arc::new(UppercaseEcho::new()));
    let config = parse_config(yaml, Some("yaml")).unwrap();

    let result = runtime
        .run_config(config, inputs(&[("topic", json!("ai"))]), None)
        .await
        .unwrap();

    assert_eq!(
        result.outputs.get("summary"),
        Some(&json!("CAPITALIZE SUMMARIZE AI"))
    );
}

#[tokio::test]
async fn test_conditional_routing_picks_branch() {
    let yaml = r#"
schema_version: "1.0"
flow: {name: gated}
state:
  fields:
    score: {type: float, required: true}
    label: {type: str, default: ""}
nodes:
  - {id: gate, prompt: "score is {score}", output_schema: {type: str}, outputs: [label]}
  - {id: high, prompt: "high", output_schema: {type: str}, outputs: [label]}
  - {id: low, prompt: "low", output_schema: {type: str}, outputs: [label]}
edges:
  - {from: START, to: gate}
  - from: gate
    routes:
      - {condition: {logic: "state.score > 0.8"}, to: high}
      - {condition: {logic: "default"}, to: low}
  - {from: high, to: END}
  - {from: low, to: END}
"#;
    let runtime = WorkflowRuntime::new(Arc::new(UppercaseEcho::new()));

    let config = parse_config(yaml, Some("yaml")).unwrap();
    let result = runtime
        .run_config(config.clone(), inputs(&[("score", json!(0.9))]), None)
        .await
        .unwrap();
    assert_eq!(result.outputs.get("label"), Some(&json!("HIGH")));

    let result = runtime
        .run_config(config, inputs(&[("score", json!(0.2))]), None)
        .await
        .unwrap();
    assert_eq!(result.outputs.get("label"), Some(&json!("LOW")));
}

#[tokio::test]
async fn test_bounded_loop_exits_at_cap() {
    let yaml = r#"
schema_version: "1.0"
flow: {name: loopy}
state:
  fields:
    done: {type: bool, default: false}
    count: {type: int, default: 0}
nodes:
  - id: step
    prompt: "increment"
    inputs: {current: "{count}"}
    code: "current + 1"
    output_schema: {type: int}
    outputs: [count]
edges:
  - {from: START, to: step}
  - from: step
    loop: {condition_field: done, exit_to: END, max_iterations: 3}
"#;
    let runtime = WorkflowRuntime::new(Arc::new(UppercaseEcho::new()))
        .with_code_executor(Arc::new(IncrementExecutor));

    let config = parse_config(yaml, Some("yaml")).unwrap();
    let result = runtime.run_config(config, inputs(&[]), None).await.unwrap();

    // The cap is strict: three visits, condition still false
    assert_eq!(result.outputs.get("count"), Some(&json!(3)));
    assert_eq!(result.final_state.get("done"), Some(&json!(false)));
    assert_eq!(result.final_state.get("_loop_iteration_step"), Some(&json!(3)));
}

#[tokio::test]
async fn test_fork_join_runs_both_branches() {
    let yaml = r#"
schema_version: "1.0"
flow: {name: forky}
state:
  fields:
    topic: {type: str, required: true}
    a_out: {type: str, default: ""}
    b_out: {type: str, default: ""}
    c_out: {type: str, default: ""}
nodes:
  - {id: a, prompt: "Research {topic}", output_schema: {type: str}, outputs: [a_out]}
  - {id: b, prompt: "Branch b sees {a_out}", output_schema: {type: str}, outputs: [b_out]}
  - {id: c, prompt: "Branch c sees {a_out}", output_schema: {type: str}, outputs: [c_out]}
edges:
  - {from: START, to: a}
  - {from: a, to: [b, c]}
  - {from: b, to: END}
  - {from: c, to: END}
"#;
    let runtime = WorkflowRuntime::new(Arc::new(UppercaseEcho::new()));
    let config = parse_config(yaml, Some("yaml")).unwrap();

    let result = runtime
        .run_config(config, inputs(&[("topic", json!("ai"))]), None)
        .await
        .unwrap();

    // A's patch is visible to both fork branches
    assert_eq!(
        result.outputs.get("b_out"),
        Some(&json!("BRANCH B SEES RESEARCH AI"))
    );
    assert_eq!(
        result.outputs.get("c_out"),
        Some(&json!("BRANCH C SEES RESEARCH AI"))
    );
}

#[tokio::test]
async fn test_fork_join_barrier_waits_for_all_siblings() {
    let yaml = r#"
schema_version: "1.0"
flow: {name: diamond}
state:
  fields:
    topic: {type: str, required: true}
    b_out: {type: str, default: ""}
    c_out: {type: str, default: ""}
    merged: {type: str, default: ""}
nodes:
  - {id: a, prompt: "Start {topic}", output_schema: {type: str}, outputs: [b_out]}
  - {id: b, prompt: "b from {b_out}", output_schema: {type: str}, outputs: [b_out]}
  - {id: c, prompt: "c from {topic}", output_schema: {type: str}, outputs: [c_out]}
  - {id: d, prompt: "join {b_out} + {c_out}", output_schema: {type: str}, outputs: [merged]}
edges:
  - {from: START, to: a}
  - {from: a, to: [b, c]}
  - {from: b, to: d}
  - {from: c, to: d}
  - {from: d, to: END}
"#;
    let runtime = WorkflowRuntime::new(Arc::new(UppercaseEcho::new()));
    let config = parse_config(yaml, Some("yaml")).unwrap();

    let result = runtime
        .run_config(config, inputs(&[("topic", json!("x"))]), None)
        .await
        .unwrap();

    // The join node observed both siblings' patches
    let merged = result.outputs.get("merged").unwrap().as_str().unwrap();
    assert!(merged.starts_with("JOIN B FROM START X"));
    assert!(merged.contains("C FROM X"));
}

#[tokio::test]
async fn test_fork_merge_order_is_deterministic() {
    // Both fork branches write the same field; the merge is ordered by
    // node id, so "c" (later id) always wins, independent of timing.
    let yaml = r#"
schema_version: "1.0"
flow: {name: overlap}
state:
  fields:
    out: {type: str, default: ""}
nodes:
  - {id: a, prompt: "seed", output_schema: {type: str}, outputs: [out]}
  - {id: b, prompt: "from b", output_schema: {type: str}, outputs: [out]}
  - {id: c, prompt: "from c", output_schema: {type: str}, outputs: [out]}
edges:
  - {from: START, to: a}
  - {from: a, to: [b, c]}
  - {from: b, to: END}
  - {from: c, to: END}
"#;
    let config = parse_config(yaml, Some("yaml")).unwrap();

    for _ in 0..5 {
        let runtime = WorkflowRuntime::new(Arc::new(UppercaseEcho::new()));
        let result = runtime
            .run_config(config.clone(), inputs(&[]), None)
            .await
            .unwrap();
        assert_eq!(result.outputs.get("out"), Some(&json!("FROM C")));
    }
}

#[tokio::test]
async fn test_outputs_cover_every_declaring_node() {
    let yaml = r#"
schema_version: "1.0"
flow: {name: multi_out}
state:
  fields:
    topic: {type: str, required: true}
    draft: {type: str, default: ""}
    review: {type: str, default: ""}
nodes:
  - {id: write, prompt: "Write {topic}", output_schema: {type: str}, outputs: [draft]}
  - {id: check, prompt: "Check {draft}", output_schema: {type: str}, outputs: [review]}
edges:
  - {from: START, to: write}
  - {from: write, to: check}
  - {from: check, to: END}
"#;
    let runtime = WorkflowRuntime::new(Arc::new(UppercaseEcho::new()));
    let config = parse_config(yaml, Some("yaml")).unwrap();

    let result = runtime
        .run_config(config, inputs(&[("topic", json!("t"))]), None)
        .await
        .unwrap();

    // Final state keys are a superset of every node's declared outputs
    for field in ["draft", "review"] {
        assert!(result.outputs.contains_key(field), "missing {}", field);
        assert!(result.final_state.contains_key(field));
    }
}

#[tokio::test]
async fn test_mid_flight_cancellation_stops_scheduling() {
    let yaml = r#"
schema_version: "1.0"
flow: {name: cancellable}
state:
  fields:
    topic: {type: str, required: true}
    out: {type: str, default: ""}
nodes:
  - {id: slow, prompt: "work on {topic}", output_schema: {type: str}, outputs: [out]}
  - {id: next, prompt: "never runs {out}", output_schema: {type: str}, outputs: [out]}
edges:
  - {from: START, to: slow}
  - {from: slow, to: next}
  - {from: next, to: END}
"#;
    let provider = Arc::new(UppercaseEcho::with_delay(Duration::from_millis(200)));
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let runtime = WorkflowRuntime::new(provider.clone() as Arc<dyn agentflow::LlmProvider>)
        .with_execution_repository(store.clone());

    let config = parse_config(yaml, Some("yaml")).unwrap();
    let (handle, signal) = cancellation();

    let run = tokio::spawn({
        let runtime_inputs = inputs(&[("topic", json!("ai"))]);
        async move { runtime.run_config(config, runtime_inputs, Some(signal)).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    let err = run.await.unwrap().unwrap_err();
    assert_eq!(err.terminal_status(), "cancelled");

    // The in-flight node finished its call; the successor never started
    assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let records = ExecutionRepository::list_all(&*store, 10).await.unwrap();
    assert_eq!(records[0].status, ExecutionStatus::Cancelled);
}
