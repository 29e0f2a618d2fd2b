//! Output formatting
//!
//! Command output goes to stdout; logs and errors go to stderr.

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use stackforge_orchestrator::{
    DeploymentOutcome, DeploymentPhase, LogEntry, LogKind, PlannedResource, RollbackReport, StackRecord,
};
use stackforge_registry::Resource;
use stackforge_spot::Placement;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::error::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Print `data` in a machine-readable format. Returns `false` for
    /// `Table`, which each command renders itself.
    fn structured<T: Serialize>(&self, data: &T) -> Result<bool, CliError> {
        let text = match self {
            OutputFormat::Json => {
                serde_json::to_string_pretty(data).map_err(|e| CliError::Output(e.to_string()))?
            }
            OutputFormat::Yaml => serde_yaml::to_string(data).map_err(|e| CliError::Output(e.to_string()))?,
            OutputFormat::Table => return Ok(false),
        };
        println!("{}", text);
        Ok(true)
    }
}

#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "TYPE")]
    resource_type: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "REGION")]
    region: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

impl From<&Resource> for ResourceRow {
    fn from(r: &Resource) -> Self {
        Self {
            resource_type: r.resource_type.to_string(),
            id: r.id.clone(),
            name: r.metadata.get("name").cloned().unwrap_or_default(),
            region: r.region.clone(),
            status: r.status.to_string(),
        }
    }
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "KEY")]
    key: String,
    #[tabled(rename = "TYPE")]
    resource_type: String,
    #[tabled(rename = "PHASE")]
    phase: String,
    #[tabled(rename = "DEPENDS ON")]
    depends_on: String,
    #[tabled(rename = "OPTIONAL")]
    optional: String,
}

impl From<&PlannedResource> for PlanRow {
    fn from(p: &PlannedResource) -> Self {
        Self {
            key: p.key.clone(),
            resource_type: p.resource_type.to_string(),
            phase: p.phase.to_string(),
            depends_on: p.depends_on.join(", "),
            optional: if p.optional { "yes".into() } else { String::new() },
        }
    }
}

#[derive(Tabled)]
struct PlacementRow {
    #[tabled(rename = "CLASS")]
    instance_class: String,
    #[tabled(rename = "REGION")]
    region: String,
    #[tabled(rename = "ZONE")]
    zone: String,
    #[tabled(rename = "PRICING")]
    pricing: String,
    #[tabled(rename = "$/HR")]
    price: String,
    #[tabled(rename = "SAVINGS/MONTH")]
    savings: String,
}

impl From<&Placement> for PlacementRow {
    fn from(p: &Placement) -> Self {
        Self {
            instance_class: p.instance_class.clone(),
            region: p.region.clone(),
            zone: p.zone.clone().unwrap_or_else(|| "-".into()),
            pricing: p.pricing.to_string(),
            price: p.hourly_price.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "-".into()),
            savings: p
                .savings
                .as_ref()
                .map(|s| format!("${:.2} ({:.0}%)", s.monthly_savings, s.savings_percent))
                .unwrap_or_else(|| "-".into()),
        }
    }
}

#[derive(Tabled)]
struct LogRow {
    #[tabled(rename = "TIME")]
    at: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "EVENT")]
    message: String,
}

fn table<R: Tabled>(rows: Vec<R>) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

fn phase_label(phase: DeploymentPhase) -> colored::ColoredString {
    match phase {
        DeploymentPhase::Completed | DeploymentPhase::Destroyed => phase.as_str().green().bold(),
        DeploymentPhase::RolledBack => phase.as_str().yellow().bold(),
        DeploymentPhase::Failed => phase.as_str().red().bold(),
        _ => phase.as_str().cyan().bold(),
    }
}

#[derive(Serialize)]
struct DeploymentSummary<'a> {
    stack_name: &'a str,
    phase: DeploymentPhase,
    dry_run: bool,
    endpoint: Option<&'a str>,
    skipped: &'a [String],
    plan: &'a [PlannedResource],
    resources: &'a [Resource],
    placements: &'a [Placement],
}

/// Resource plan, for `--validate`
pub fn print_plan(stack_name: &str, plan: &[PlannedResource], format: OutputFormat) -> Result<(), CliError> {
    if format.structured(&plan)? {
        return Ok(());
    }
    println!("{} {} is valid", "✓".green(), stack_name.bold());
    println!("{}", table(plan.iter().map(PlanRow::from).collect()));
    Ok(())
}

pub fn print_deployment(outcome: &DeploymentOutcome, format: OutputFormat) -> Result<(), CliError> {
    let summary = DeploymentSummary {
        stack_name: &outcome.stack_name,
        phase: outcome.phase,
        dry_run: outcome.dry_run,
        endpoint: outcome.endpoint.as_deref(),
        skipped: &outcome.skipped,
        plan: &outcome.plan.resources,
        resources: &outcome.resources,
        placements: &outcome.placements,
    };
    if format.structured(&summary)? {
        return Ok(());
    }

    if outcome.dry_run {
        println!("{} dry run for {}: nothing was created", "•".cyan(), outcome.stack_name.bold());
        println!("{}", table(outcome.plan.resources.iter().map(PlanRow::from).collect()));
        return Ok(());
    }

    println!("{} {} {}", "✓".green(), outcome.stack_name.bold(), phase_label(outcome.phase));
    println!("{}", table(outcome.resources.iter().map(ResourceRow::from).collect()));
    if !outcome.placements.is_empty() {
        println!("{}", table(outcome.placements.iter().map(PlacementRow::from).collect()));
    }
    if let Some(endpoint) = &outcome.endpoint {
        println!("endpoint: {}", endpoint.bold());
    }
    for key in &outcome.skipped {
        println!("{} optional resource {} was skipped", "!".yellow(), key);
    }
    Ok(())
}

pub fn print_status(record: &StackRecord, format: OutputFormat) -> Result<(), CliError> {
    if format.structured(record)? {
        return Ok(());
    }

    println!(
        "{} ({}, {}): {}",
        record.stack_name.bold(),
        record.deployment_type,
        record.environment,
        phase_label(record.state.phase)
    );
    println!("run:     {}", record.state.run_id);
    println!("started: {}", record.state.started_at.to_rfc3339());
    println!("updated: {}", record.updated_at.to_rfc3339());
    if !record.resources.is_empty() {
        println!("{}", table(record.resources.iter().map(ResourceRow::from).collect()));
    }
    if !record.placements.is_empty() {
        println!("{}", table(record.placements.iter().map(PlacementRow::from).collect()));
    }
    if let Some(error) = record.state.errors.last() {
        println!("last error: [{}] {} during {}", error.code.red(), error.message, error.phase);
    }
    Ok(())
}

pub fn print_logs(entries: &[LogEntry], format: OutputFormat) -> Result<(), CliError> {
    if format.structured(&entries)? {
        return Ok(());
    }

    let rows = entries
        .iter()
        .map(|e| LogRow {
            at: e.at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            kind: match e.kind {
                LogKind::Phase => "phase".to_string(),
                LogKind::Checkpoint => "checkpoint".to_string(),
                LogKind::Error => "error".red().to_string(),
            },
            message: e.message.clone(),
        })
        .collect();
    println!("{}", table::<LogRow>(rows));
    Ok(())
}

/// Result of `--rollback` or `--destroy`
pub fn print_report(stack_name: &str, action: &str, report: &RollbackReport, format: OutputFormat) -> Result<(), CliError> {
    if format.structured(report)? {
        return Ok(());
    }
    println!(
        "{} {} {}: {} resource(s) deleted",
        "✓".green(),
        stack_name.bold(),
        action,
        report.destroyed.len()
    );
    Ok(())
}

/// Failure details on stderr: stack, phase, code, hint and anything left behind
pub fn print_error(error: &CliError, stack_name: &str) {
    eprintln!("{} {}", "error:".red().bold(), error);
    for line in error_details(error, stack_name) {
        eprintln!("{}", line);
    }

    let leftover: &[String] = match error {
        CliError::Orchestrator(e) => e.manual_cleanup(),
        _ => &[],
    };
    if !leftover.is_empty() {
        eprintln!("{}", "resources needing manual cleanup:".yellow().bold());
        for id in leftover {
            eprintln!("  - {}", id);
        }
    }
}

fn error_details(error: &CliError, stack_name: &str) -> Vec<String> {
    let mut lines = vec![format!("  stack: {}", stack_name)];
    let orchestrator = match error {
        CliError::Orchestrator(e) => Some(e),
        _ => None,
    };

    match orchestrator.and_then(|e| e.phase()) {
        Some(phase) => lines.push(format!("  phase: {}", phase)),
        // refused or invalid before any phase ran
        None if orchestrator.is_some() => lines.push("  phase: none (nothing was deployed)".to_string()),
        None => {}
    }
    lines.push(format!("  code:  {}", error.category().code()));
    if let Some(hint) = orchestrator.and_then(|e| e.remediation_hint()) {
        lines.push(format!("  hint:  {}", hint));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackforge_orchestrator::OrchestratorError;

    #[test]
    fn test_error_details_before_first_phase() {
        let error = CliError::Orchestrator(OrchestratorError::StackAlreadyExists("ml-prod".into()));
        let lines = error_details(&error, "ml-prod");

        assert_eq!(lines[0], "  stack: ml-prod");
        assert_eq!(lines[1], "  phase: none (nothing was deployed)");
        assert_eq!(lines[2], "  code:  VALIDATION_ERROR");
        assert!(lines[3].contains("stackforge ml-prod --destroy"));
    }

    #[test]
    fn test_error_details_with_phase() {
        let error = CliError::Orchestrator(OrchestratorError::DeploymentFailed {
            stack: "ml-dev".into(),
            phase: DeploymentPhase::ValidatingHealth,
            source: Box::new(OrchestratorError::HealthCheckFailed("down".into())),
            rollback: None,
        });
        let lines = error_details(&error, "ml-dev");

        assert_eq!(lines[0], "  stack: ml-dev");
        assert_eq!(lines[1], format!("  phase: {}", DeploymentPhase::ValidatingHealth));
        assert!(lines.iter().any(|l| l.starts_with("  hint:")));
    }

    #[test]
    fn test_error_details_for_config_errors() {
        let lines = error_details(&CliError::UnknownProfile("aws".into()), "ml-dev");
        assert_eq!(lines, vec!["  stack: ml-dev".to_string(), "  code:  CONFIGURATION_ERROR".to_string()]);
    }
}
