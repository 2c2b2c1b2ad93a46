//! Builders shared by unit tests

use crate::schema::{Check, Phase, Profile, Task, WorkGraph};

/// Unsafe task with a single passing command check
pub fn task(id: &str) -> Task {
    Task {
        id: id.to_string(),
        title: format!("Task {id}"),
        intent: String::new(),
        definition_of_done: vec![Check::command("true")],
        verification: vec![],
        inputs: vec![],
        outputs: vec![],
        risk: Default::default(),
        effort: None,
        impact: None,
        risk_score: None,
        purpose: None,
        tags: vec![],
        safe_to_execute: false,
    }
}

/// Task with explicit investor dimensions and data edges
pub fn scored_task(id: &str, impact: u8, inputs: &[&str], outputs: &[&str]) -> Task {
    let mut t = task(id);
    t.impact = Some(impact);
    t.effort = Some(crate::schema::Effort::Bucket(1));
    t.risk_score = Some(1);
    t.purpose = Some(1);
    t.inputs = inputs.iter().map(|s| s.to_string()).collect();
    t.outputs = outputs.iter().map(|s| s.to_string()).collect();
    t
}

/// Single-phase WorkGraph holding `tasks`
pub fn graph_with(tasks: Vec<Task>) -> WorkGraph {
    graph_with_phases(vec![("P1", tasks)])
}

pub fn graph_with_phases(phases: Vec<(&str, Vec<Task>)>) -> WorkGraph {
    WorkGraph {
        schema_version: "v1".to_string(),
        id: "wg-20250314-0badc0de".to_string(),
        domain: "software".to_string(),
        profile: Profile::Default,
        goal: "Exercise the lifecycle".to_string(),
        repo_discovery: Default::default(),
        track: Default::default(),
        phases: phases
            .into_iter()
            .map(|(id, tasks)| Phase {
                id: id.to_string(),
                name: format!("Phase {id}"),
                tasks,
            })
            .collect(),
        stop_conditions: vec![],
    }
}
