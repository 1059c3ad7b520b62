//! Console rendering of summaries and the probe plan

use colored::Colorize;
use tabled::{Table, Tabled};

use gpuval_core::domain::{
    OverallVerdict, ProbePlan, Provisioning, RunContext, Summary, TemplateVars, Verdict,
};

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "Check")]
    check: String,
    #[tabled(rename = "Verdict")]
    verdict: &'static str,
    #[tabled(rename = "Note")]
    note: String,
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    step: usize,
    #[tabled(rename = "Probe")]
    probe: String,
    #[tabled(rename = "Command")]
    command: String,
    #[tabled(rename = "Log")]
    log: String,
    #[tabled(rename = "Expected")]
    expected: String,
    #[tabled(rename = "Cancel")]
    cancel: String,
    #[tabled(rename = "Provisioning")]
    provisioning: String,
}

pub fn print_summary(summary: &Summary) {
    println!();
    println!("{}", format!("Run {}", summary.header.run_id).cyan().bold());
    println!("  {} {}", "Artifacts:".bold(), summary.header.run_dir.display());
    println!();

    let rows: Vec<CheckRow> = summary
        .checks
        .iter()
        .map(|c| CheckRow {
            check: c.name.clone(),
            verdict: c.verdict.as_str(),
            note: c.note.clone().unwrap_or_default(),
        })
        .collect();
    println!("{}", Table::new(rows));

    for check in summary.checks.iter().filter(|c| c.is_fail()) {
        println!();
        println!("{}", format!("✗ {} evidence:", check.name).red().bold());
        for line in &check.evidence {
            println!("    {}", line);
        }
    }

    let attention = summary.count(Verdict::Warn) + summary.count(Verdict::Review);
    if attention > 0 {
        println!();
        println!(
            "{}",
            format!("! {} check(s) need manual inspection (WARN/REVIEW)", attention).yellow()
        );
    }

    println!();
    match summary.overall {
        OverallVerdict::Pass => println!("{}", "✓ OVERALL: PASS".green().bold()),
        OverallVerdict::Fail => println!(
            "{}",
            format!("✗ OVERALL: FAIL ({} failing check(s))", summary.fail_count)
                .red()
                .bold()
        ),
    }
}

pub fn print_plan(ctx: &RunContext, plan: &ProbePlan) {
    let vars = TemplateVars::from_context(ctx);

    println!("{}", "Probe plan".cyan().bold());
    println!("  {} {}", "Install root:".bold(), ctx.install_root().display());
    println!("  {} {}", "Run directory:".bold(), ctx.run_dir().display());
    println!("  {} {}", "Device:".bold(), ctx.device_index());
    println!();

    let rows: Vec<PlanRow> = plan
        .probes()
        .iter()
        .enumerate()
        .map(|(i, probe)| PlanRow {
            step: i + 1,
            probe: probe.name.clone(),
            command: probe.invocation(ctx, &vars).command_line(),
            log: probe.log_file.clone(),
            expected: probe.expected_label(),
            cancel: probe.cancel.to_string(),
            provisioning: match &probe.provisioning {
                Provisioning::Required => "required".to_string(),
                Provisioning::Buildable(recipe) => format!("build: {}", recipe.command.join(" ")),
            },
        })
        .collect();
    println!("{}", Table::new(rows));
}
