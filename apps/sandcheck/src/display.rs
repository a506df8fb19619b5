//! Output rendering and formatting

use std::io;

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use sandcheck_ops::{AssessmentReport, OperationResult, WorkflowInfo};
use sandcheck_workflow::StepRecord;

/// Output renderer for CLI results
#[derive(Clone, Copy)]
pub struct OutputRenderer {
    json_output: bool,
}

impl OutputRenderer {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    /// Render operation result
    pub fn render_result(self, result: &OperationResult) -> io::Result<()> {
        if self.json_output {
            let json = result.to_json().map_err(io::Error::other)?;
            println!("{json}");
            return Ok(());
        }
        match result {
            OperationResult::Assessment(assessment) => Self::render_assessment(assessment),
            OperationResult::Workflows(workflows) => Self::render_workflows(workflows),
            OperationResult::Workflow(info) => Self::render_workflow(info),
            OperationResult::Environment(environment) => {
                println!("{} {}", environment.id, environment.status);
            }
            OperationResult::EnvironmentList(environments) => {
                for environment in environments {
                    println!("{} {}", environment.id, environment.status);
                }
            }
            OperationResult::Success(message) => println!("{message}"),
        }
        Ok(())
    }

    fn render_assessment(assessment: &AssessmentReport) {
        let report = &assessment.report;
        println!(
            "{} v{} on {}: {} in {} ms",
            report.workflow,
            report.version,
            report.environment_id,
            report.status.as_str(),
            report.duration_ms
        );
        println!("{}", step_table(report.steps.iter().chain(&report.cleanup)));

        let results = &report.results;
        println!("security findings:   {}", results.security_findings.len());
        println!("code quality issues: {}", results.code_quality_issues.len());
        println!("test results:        {}", results.test_results.len());
        println!("performance metrics: {}", results.performance_metrics.len());
        println!("recommendations:     {}", results.recommendations.len());

        if let Some(plan) = &report.degradation {
            println!("degraded: {}", plan.rationale);
        }
        for error in &report.errors {
            println!("error in {}: {} ({})", error.step, error.message, error.code);
        }
        if !assessment.destroyed {
            println!("environment {} kept", assessment.environment.id);
        }
    }

    fn render_workflows(workflows: &[WorkflowInfo]) {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Workflow", "Version", "Codebases", "Steps"]);
        for info in workflows {
            table.add_row(vec![
                Cell::new(&info.name),
                Cell::new(&info.version),
                Cell::new(info.codebase_types.join(", ")),
                Cell::new(info.steps.join(", ")),
            ]);
        }
        println!("{table}");
    }

    fn render_workflow(info: &WorkflowInfo) {
        println!("{} v{} is valid", info.name, info.version);
        println!("  steps: {}", info.steps.join(", "));
        println!("  parallel groups: {}", info.parallel_groups);
        println!("  cleanup steps: {}", info.cleanup_steps);
    }
}

fn step_table<'a>(steps: impl Iterator<Item = &'a StepRecord>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Step", "Tool", "Status", "Attempts", "Duration", "Detail"]);
    for step in steps {
        let detail = step
            .error
            .as_deref()
            .or(step.reason.as_deref())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&step.name),
            Cell::new(&step.tool),
            Cell::new(step.status.as_str()),
            Cell::new(step.attempts),
            Cell::new(format!("{} ms", step.duration_ms)),
            Cell::new(detail),
        ]);
    }
    table
}
