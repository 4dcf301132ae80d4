//! Plan parser
//!
//! Lifts `[PLAN]…[/PLAN]` workflow blocks out of agent text. Parsing is two
//! passes: pass 1 assigns each step a fresh UUID keyed by its textual
//! number, pass 2 resolves `Step N` dependency references against that map,
//! which makes forward references work. Malformed bodies yield `None`,
//! never an error.

use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, info};
use uuid::Uuid;

use super::model::{Plan, PlanStep, DEFAULT_STEP_SECONDS};

/// Parses workflow plans from agent responses. Emits at most one plan per
/// call.
pub struct PlanParser {
    plan_block: Regex,
    workflow_header: Regex,
    step_header: Regex,
    step_ref: Regex,
    duration: Regex,
    kv_pair: Regex,
}

impl Default for PlanParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanParser {
    pub fn new() -> Self {
        Self {
            plan_block: Regex::new(r"(?s)\[PLAN\](.*?)\[/PLAN\]").expect("valid regex"),
            workflow_header: Regex::new(r"##\s*Workflow:\s*(.+)").expect("valid regex"),
            step_header: Regex::new(r"###\s*Step\s*(\d+)\s*:\s*(.+)").expect("valid regex"),
            step_ref: Regex::new(r"(?i)Step\s+(\d+)").expect("valid regex"),
            duration: Regex::new(r"(\d+)\s*(s|m|h)?").expect("valid regex"),
            kv_pair: Regex::new(r#""(\w+)"\s*:\s*"([^"]*)""#).expect("valid regex"),
        }
    }

    /// Whether the text carries a plan block at all.
    pub fn has_plan(&self, text: &str) -> bool {
        self.plan_block.is_match(text)
    }

    /// Parse a plan from agent text. Accepts either a full response
    /// containing `[PLAN]` tags or an already-extracted body.
    pub fn parse(&self, text: &str) -> Option<Plan> {
        let body = match self.plan_block.captures(text) {
            Some(captures) => captures.get(1).expect("group 1").as_str(),
            None => text,
        };
        self.parse_body(body.trim())
    }

    fn parse_body(&self, body: &str) -> Option<Plan> {
        let name = self
            .workflow_header
            .captures(body)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_else(|| "Unnamed Workflow".to_string());

        // Pass 1: carve the body into step blocks and build the number→id map.
        let headers: Vec<(usize, u32, String)> = self
            .step_header
            .captures_iter(body)
            .filter_map(|c| {
                let at = c.get(0)?.start();
                let number: u32 = c[1].parse().ok()?;
                Some((at, number, c[2].trim().to_string()))
            })
            .collect();

        if headers.is_empty() {
            debug!("no step headers in plan body");
            return None;
        }

        let description = self.leading_description(body, headers[0].0, &name);

        let mut steps = Vec::with_capacity(headers.len());
        let mut id_by_number: HashMap<u32, Uuid> = HashMap::new();
        let mut raw_deps: Vec<String> = Vec::with_capacity(headers.len());

        for (index, (start, number, step_description)) in headers.iter().enumerate() {
            let end = headers
                .get(index + 1)
                .map(|(next, _, _)| *next)
                .unwrap_or(body.len());
            let block = &body[*start..end];

            let (step, deps_text) = self.parse_step(*number, step_description, block);
            id_by_number.entry(*number).or_insert(step.id);
            raw_deps.push(deps_text);
            steps.push(step);
        }

        // Pass 2: resolve `Step N` references into pass-1 UUIDs. A number
        // with no matching step maps to a fresh id so validation reports a
        // missing dependency instead of the reference vanishing.
        for (step, deps_text) in steps.iter_mut().zip(&raw_deps) {
            if deps_text.is_empty() || deps_text.to_lowercase().contains("none") {
                continue;
            }
            for reference in self.step_ref.captures_iter(deps_text) {
                let Ok(number) = reference[1].parse::<u32>() else {
                    continue;
                };
                let id = id_by_number
                    .get(&number)
                    .copied()
                    .unwrap_or_else(Uuid::new_v4);
                step.dependencies.insert(id);
            }
        }

        let mut plan = Plan::new(name, description);
        plan.steps = steps;
        info!(
            plan = %plan.name,
            steps = plan.steps.len(),
            "parsed workflow plan"
        );
        Some(plan)
    }

    /// Description: text between the workflow header and the first step.
    fn leading_description(&self, body: &str, first_step_at: usize, fallback: &str) -> String {
        let head = &body[..first_step_at];
        let after_header = match self.workflow_header.find(head) {
            Some(m) => &head[m.end()..],
            None => head,
        };
        let description: Vec<&str> = after_header
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("##"))
            .collect();
        if description.is_empty() {
            fallback.to_string()
        } else {
            description.join(" ")
        }
    }

    /// Parse one step block; dependency text is returned raw for pass 2.
    fn parse_step(&self, number: u32, description: &str, block: &str) -> (PlanStep, String) {
        let mut step = PlanStep::new(number, description);
        let mut deps_text = String::new();

        for line in block.lines() {
            let line = line.trim().trim_start_matches("- ");
            if let Some(value) = line.strip_prefix("Agent:") {
                // Just the bare agent name, lowercased.
                step.agent_id = value
                    .trim()
                    .split(['/', ' ', '[', '('])
                    .next()
                    .unwrap_or("main")
                    .to_lowercase();
            } else if let Some(value) = line.strip_prefix("Tool:") {
                step.tool = value
                    .trim()
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_string();
            } else if let Some(value) = line.strip_prefix("Arguments:") {
                step.arguments = self.parse_arguments(value.trim());
            } else if let Some(value) = line.strip_prefix("Dependencies:") {
                deps_text = value.trim().to_string();
            } else if let Some(value) = line.strip_prefix("Estimated Time:") {
                step.estimated_seconds = self.parse_duration(value.trim());
            }
        }

        (step, deps_text)
    }

    fn parse_arguments(&self, text: &str) -> serde_json::Value {
        if text.starts_with('{') {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
                return value;
            }
        }
        // Fall back to scraping "key": "value" pairs out of loose prose.
        let mut map = serde_json::Map::new();
        for capture in self.kv_pair.captures_iter(text) {
            map.insert(
                capture[1].to_string(),
                serde_json::Value::String(capture[2].to_string()),
            );
        }
        serde_json::Value::Object(map)
    }

    /// Normalise `30s` / `5m` / `1h` (bare numbers are seconds).
    fn parse_duration(&self, text: &str) -> u64 {
        let Some(captures) = self.duration.captures(text) else {
            return DEFAULT_STEP_SECONDS;
        };
        let value: u64 = captures[1].parse().unwrap_or(DEFAULT_STEP_SECONDS);
        match captures.get(2).map(|m| m.as_str()) {
            Some("m") => value * 60,
            Some("h") => value * 3600,
            _ => value,
        }
    }
}
