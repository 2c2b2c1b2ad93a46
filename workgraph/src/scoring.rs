//! Deterministic task scoring
//!
//! Every task is scored on four 0–5 dimensions (effort, impact, risk,
//! purpose) combined by a profile formula. Dimensions the task does not
//! declare are inferred from its checks, tags, outputs and text, and listed in
//! `inferred_fields`. No state is kept between calls.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::schema::{Profile, Task, WorkGraph, ISSUES_DOMAIN};

const EFFORT_UP_TAGS: &[&str] = &["build", "test", "integration"];
const EFFORT_DOWN_TAGS: &[&str] = &["docs", "cleanup", "trivial"];

const BLOCKER_KEYWORDS: &[&str] = &["blocker", "blocking", "critical", "urgent"];
const DEFECT_KEYWORDS: &[&str] = &["fix", "bug", "error", "failure"];
const IMPACT_HIGH_TAGS: &[&str] = &["build", "fix", "blocker", "gate", "ci", "test", "critical"];
const IMPACT_MEDIUM_TAGS: &[&str] = &["feature", "enhancement", "improvement"];
const IMPACT_LOW_TAGS: &[&str] = &["cleanup", "refactor", "docs", "trivial", "formatting"];

const RISK_HIGH_TAGS: &[&str] = &["unsafe", "experimental", "migration", "destructive"];
const RISK_LOW_TAGS: &[&str] = &["readonly", "docs", "analysis", "trivial"];

const PURPOSE_HIGH_TAGS: &[&str] = &[
    "docs",
    "user-facing",
    "accessibility",
    "ux",
    "onboarding",
    "tutorial",
    "examples",
];
const PURPOSE_MEDIUM_TAGS: &[&str] = &["feature", "enhancement", "api", "cli"];
const PURPOSE_LOW_TAGS: &[&str] = &["build", "internal", "cleanup", "refactor", "tooling"];
const PURPOSE_KEYWORDS: &[&str] = &["user", "customer", "documentation", "guide", "tutorial"];

const EFFORT_LABELS: [&str; 6] = ["none", "trivial", "quick", "medium", "long", "very long"];
const LEVEL_LABELS: [&str; 6] = ["none", "minimal", "low", "medium", "high", "critical"];

/// The four scoring dimensions, each on a 0–5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub effort: u8,
    pub impact: u8,
    pub risk: u8,
    pub purpose: u8,
}

impl Dimensions {
    pub fn score(&self, profile: Profile) -> f64 {
        let effort = f64::from(self.effort);
        let impact = f64::from(self.impact);
        let risk = f64::from(self.risk);
        let purpose = f64::from(self.purpose);
        match profile {
            Profile::Investor => impact * 3.0 + purpose - effort * 2.0 - risk * 2.0,
            Profile::Purpose => purpose * 3.0 + impact - effort - risk,
            Profile::Default => impact * 2.0 + purpose - effort - risk,
        }
    }
}

/// A task's score under one profile. Derived; never persisted as truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTask {
    pub task_id: String,
    pub profile: Profile,
    pub score: f64,
    pub rationale: String,
    pub inferred_fields: Vec<String>,
    pub dimensions: Dimensions,
}

/// Score one task. `domain` is the owning WorkGraph's domain.
pub fn score_task(task: &Task, domain: &str, profile: Profile) -> ScoredTask {
    let mut inferred = Vec::new();

    let effort = match task.effort {
        Some(effort) => effort.bucket(),
        None => {
            inferred.push("effort".to_string());
            infer_effort(task)
        }
    };
    let impact = match task.impact {
        Some(v) => v.min(5),
        None => {
            inferred.push("impact".to_string());
            infer_impact(task, domain)
        }
    };
    let risk = match task.risk_score {
        Some(v) => v.min(5),
        None => {
            inferred.push("risk".to_string());
            infer_risk(task)
        }
    };
    let purpose = match task.purpose {
        Some(v) => v.min(5),
        None => {
            inferred.push("purpose".to_string());
            infer_purpose(task)
        }
    };

    let dimensions = Dimensions {
        effort,
        impact,
        risk,
        purpose,
    };
    let score = dimensions.score(profile);
    let rationale = rationale(&dimensions, profile, score, &inferred);

    ScoredTask {
        task_id: task.id.clone(),
        profile,
        score,
        rationale,
        inferred_fields: inferred,
        dimensions,
    }
}

/// Score every task in declaration order
pub fn score_all(wg: &WorkGraph, profile: Profile) -> Vec<ScoredTask> {
    wg.tasks()
        .map(|(_, task)| score_task(task, &wg.domain, profile))
        .collect()
}

/// Score every task, best first. Ties break on task id ascending.
pub fn rank(wg: &WorkGraph, profile: Profile) -> Vec<ScoredTask> {
    let mut scored = score_all(wg, profile);
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.task_id.cmp(&b.task_id))
    });
    scored
}

fn rationale(d: &Dimensions, profile: Profile, score: f64, inferred: &[String]) -> String {
    let mut text = format!(
        "impact: {} ({}); effort: {} ({}); risk: {} ({}); purpose: {} ({}); {}_score: {}",
        LEVEL_LABELS[usize::from(d.impact.min(5))],
        d.impact,
        EFFORT_LABELS[usize::from(d.effort.min(5))],
        d.effort,
        LEVEL_LABELS[usize::from(d.risk.min(5))],
        d.risk,
        LEVEL_LABELS[usize::from(d.purpose.min(5))],
        d.purpose,
        profile,
        score
    );
    if !inferred.is_empty() {
        text.push_str(&format!(" (inferred: {})", inferred.join(", ")));
    }
    text
}

fn has_any(tags: &BTreeSet<String>, wanted: &[&str]) -> bool {
    wanted.iter().any(|w| tags.contains(*w))
}

fn text_of(task: &Task) -> String {
    format!("{} {}", task.title, task.intent).to_lowercase()
}

fn clamp(value: i32) -> u8 {
    value.clamp(0, 5) as u8
}

fn infer_effort(task: &Task) -> u8 {
    let commands = task.checks().filter(|c| c.is_command()).count();
    let mut effort: i32 = match commands {
        0 | 1 => 2,
        2 | 3 => 3,
        4..=6 => 4,
        _ => 5,
    };
    if !task.safe_to_execute {
        effort += 1;
    }
    let tags = task.tag_set();
    if has_any(&tags, EFFORT_UP_TAGS) {
        effort += 1;
    }
    if has_any(&tags, EFFORT_DOWN_TAGS) {
        effort -= 1;
    }
    effort.clamp(1, 5) as u8
}

fn infer_impact(task: &Task, domain: &str) -> u8 {
    let mut impact: i32 = 2;
    let text = text_of(task);

    if domain.eq_ignore_ascii_case(ISSUES_DOMAIN) {
        if BLOCKER_KEYWORDS.iter().any(|k| text.contains(k)) {
            impact = 5;
        } else if DEFECT_KEYWORDS.iter().any(|k| text.contains(k)) {
            impact = 4;
        }
    }

    let tags = task.tag_set();
    if has_any(&tags, IMPACT_HIGH_TAGS) {
        impact = impact.max(4);
    } else if has_any(&tags, IMPACT_MEDIUM_TAGS) {
        impact = impact.max(3);
    } else if has_any(&tags, IMPACT_LOW_TAGS) {
        impact = impact.min(2);
    }

    if !task.outputs.is_empty() {
        impact += 1;
    }
    clamp(impact)
}

fn infer_risk(task: &Task) -> u8 {
    let mut risk: i32 = if task.safe_to_execute { 2 } else { 4 };

    if task.outputs.len() > 5 {
        risk += 2;
    } else if task.outputs.len() > 2 {
        risk += 1;
    }
    risk = risk.min(5);

    let tags = task.tag_set();
    if has_any(&tags, RISK_HIGH_TAGS) {
        risk = 5;
    } else if has_any(&tags, RISK_LOW_TAGS) {
        risk = (risk - 2).max(0);
    }

    match task.risk.level.trim().to_lowercase().as_str() {
        "high" => risk = risk.max(4),
        "low" => risk = risk.min(1),
        _ => {}
    }
    clamp(risk)
}

fn infer_purpose(task: &Task) -> u8 {
    let tags = task.tag_set();
    let mut purpose: i32 = if has_any(&tags, PURPOSE_HIGH_TAGS) {
        5
    } else if has_any(&tags, PURPOSE_MEDIUM_TAGS) {
        3
    } else if has_any(&tags, PURPOSE_LOW_TAGS) {
        1
    } else {
        2
    };

    let text = text_of(task);
    if PURPOSE_KEYWORDS.iter().any(|k| text.contains(k)) {
        purpose = purpose.max(4);
    }
    clamp(purpose)
}

/// Aggregate view of a ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub profile: Profile,
    pub total_tasks: usize,
    /// High score for little effort
    pub quick_wins: Vec<String>,
    pub risky_bets: Vec<String>,
    pub purpose_wins: Vec<String>,
    pub top_score: Option<f64>,
    pub avg_score: Option<f64>,
}

/// Summarise a ranking produced by [`rank`]
pub fn summarize(profile: Profile, ranked: &[ScoredTask]) -> ScoreSummary {
    let ids = |pred: &dyn Fn(&ScoredTask) -> bool| -> Vec<String> {
        ranked
            .iter()
            .filter(|s| pred(s))
            .map(|s| s.task_id.clone())
            .collect()
    };

    let avg_score = if ranked.is_empty() {
        None
    } else {
        Some(ranked.iter().map(|s| s.score).sum::<f64>() / ranked.len() as f64)
    };

    ScoreSummary {
        profile,
        total_tasks: ranked.len(),
        quick_wins: ids(&|s| s.score >= 5.0 && s.dimensions.effort <= 2),
        risky_bets: ids(&|s| s.dimensions.risk >= 4),
        purpose_wins: ids(&|s| s.dimensions.purpose >= 4),
        top_score: ranked.iter().map(|s| s.score).reduce(f64::max),
        avg_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{graph_with, task};
    use crate::schema::{Check, Effort};

    fn explicit(id: &str, impact: u8, effort: u8, risk: u8, purpose: u8) -> Task {
        let mut t = task(id);
        t.impact = Some(impact);
        t.effort = Some(Effort::Bucket(effort));
        t.risk_score = Some(risk);
        t.purpose = Some(purpose);
        t
    }

    #[test]
    fn test_profile_formulas() {
        let d = Dimensions {
            effort: 2,
            impact: 5,
            risk: 1,
            purpose: 3,
        };
        assert_eq!(d.score(Profile::Investor), 12.0);
        assert_eq!(d.score(Profile::Purpose), 11.0);
        assert_eq!(d.score(Profile::Default), 10.0);
    }

    #[test]
    fn test_investor_tie_break_by_task_id() {
        let wg = graph_with(vec![
            explicit("C", 3, 1, 0, 5),
            explicit("B", 4, 3, 2, 4),
            explicit("A", 5, 2, 1, 3),
        ]);
        let ranked = rank(&wg, Profile::Investor);
        let order: Vec<(&str, f64)> = ranked
            .iter()
            .map(|s| (s.task_id.as_str(), s.score))
            .collect();
        assert_eq!(order, vec![("A", 12.0), ("C", 12.0), ("B", 6.0)]);
        assert!(ranked.iter().all(|s| s.inferred_fields.is_empty()));
    }

    #[test]
    fn test_rationale_is_stable() {
        let t = explicit("A", 5, 2, 1, 3);
        let a = score_task(&t, "software", Profile::Investor);
        let b = score_task(&t, "software", Profile::Investor);
        assert_eq!(a, b);
        assert_eq!(
            a.rationale,
            "impact: critical (5); effort: quick (2); risk: minimal (1); purpose: medium (3); investor_score: 12"
        );
    }

    #[test]
    fn test_inferred_fields_listed_in_rationale() {
        let mut t = task("T");
        t.impact = Some(3);
        let scored = score_task(&t, "software", Profile::Default);
        assert_eq!(scored.inferred_fields, vec!["effort", "risk", "purpose"]);
        assert!(scored
            .rationale
            .ends_with("(inferred: effort, risk, purpose)"));
    }

    #[test]
    fn test_effort_inference() {
        let mut t = task("T");
        t.safe_to_execute = true;
        assert_eq!(infer_effort(&t), 2);

        t.verification = vec![
            Check::command("a"),
            Check::command("b"),
            Check::file("README.md"),
        ];
        assert_eq!(infer_effort(&t), 3);

        t.safe_to_execute = false;
        t.tags = vec!["Build".to_string()];
        assert_eq!(infer_effort(&t), 5);

        t.tags = vec!["docs".to_string()];
        assert_eq!(infer_effort(&t), 3);
    }

    #[test]
    fn test_impact_inference_for_issue_domain() {
        let mut t = task("T");
        t.title = "Blocker: linker fails".to_string();
        assert_eq!(infer_impact(&t, "issues"), 5);
        assert_eq!(infer_impact(&t, "software"), 2);

        t.title = "Fix flaky test".to_string();
        assert_eq!(infer_impact(&t, "issues"), 4);

        t.title = "Tidy".to_string();
        t.tags = vec!["refactor".to_string()];
        t.outputs = vec!["src/lib.rs".to_string()];
        assert_eq!(infer_impact(&t, "software"), 3);

        t.tags = vec!["ci".to_string()];
        assert_eq!(infer_impact(&t, "software"), 5);
    }

    #[test]
    fn test_risk_inference() {
        let mut t = task("T");
        t.safe_to_execute = true;
        assert_eq!(infer_risk(&t), 2);

        t.safe_to_execute = false;
        assert_eq!(infer_risk(&t), 4);

        t.outputs = (0..6).map(|i| format!("out{i}")).collect();
        assert_eq!(infer_risk(&t), 5);

        t.outputs.clear();
        t.safe_to_execute = true;
        t.tags = vec!["readonly".to_string()];
        assert_eq!(infer_risk(&t), 0);

        t.tags = vec!["experimental".to_string()];
        assert_eq!(infer_risk(&t), 5);

        t.tags.clear();
        t.risk.level = "low".to_string();
        assert_eq!(infer_risk(&t), 1);
    }

    #[test]
    fn test_purpose_inference() {
        let mut t = task("T");
        assert_eq!(infer_purpose(&t), 2);
        t.tags = vec!["accessibility".to_string()];
        assert_eq!(infer_purpose(&t), 5);
        t.tags = vec!["internal".to_string()];
        assert_eq!(infer_purpose(&t), 1);
        t.intent = "Write a user guide".to_string();
        assert_eq!(infer_purpose(&t), 4);
    }

    #[test]
    fn test_summary_buckets() {
        let wg = graph_with(vec![
            explicit("A", 5, 2, 1, 3),
            explicit("B", 1, 5, 5, 4),
        ]);
        let ranked = rank(&wg, Profile::Investor);
        let summary = summarize(Profile::Investor, &ranked);
        assert_eq!(summary.total_tasks, 2);
        assert_eq!(summary.quick_wins, vec!["A"]);
        assert_eq!(summary.risky_bets, vec!["B"]);
        assert_eq!(summary.purpose_wins, vec!["B"]);
        assert_eq!(summary.top_score, Some(12.0));
        assert_eq!(summary.avg_score, Some((12.0 + -13.0) / 2.0));
    }
}
