use anyhow::Context;
use tracing::{info, Instrument};

use rc_agents::pipeline::{InvestigationPipeline, PipelineReport};
use rc_agents::wiring::pipeline_from_config;
use rc_core::config::Config;
use rc_core::types::IncidentDescriptor;
use rc_telemetry::tracing_setup::create_operation_span;

/// Run the `run` subcommand: wire the pipeline from config, investigate in
/// this process and print the report.
pub async fn run(config: &Config, incident: IncidentDescriptor) -> anyhow::Result<()> {
    incident.validate()?;
    let pipeline = pipeline_from_config(config).context("failed to build investigation pipeline")?;

    println!("Starting investigation for:\n{}\n", incident.describe());
    let report = investigate(&pipeline, &incident).await?;
    print!("{}", render(&report));
    Ok(())
}

async fn investigate(
    pipeline: &InvestigationPipeline,
    incident: &IncidentDescriptor,
) -> anyhow::Result<PipelineReport> {
    let (span, trace_id) = create_operation_span("investigation");
    async move {
        info!(%trace_id, log_group = %incident.log_group_name, "running investigation in-process");
        pipeline.run(incident).await.context("investigation failed")
    }
    .instrument(span)
    .await
}

fn render(report: &PipelineReport) -> String {
    let banner = "#".repeat(28);
    let mut out = String::new();
    for stage in &report.stages {
        out.push_str(&format!(
            "[{}] {} finished in {} ms\n",
            stage.role, stage.stage, stage.duration_ms
        ));
    }
    out.push_str(&format!("\n{banner}\n## RCA Report Generation ##\n{banner}\n\n"));
    out.push_str(&report.result);
    out.push('\n');
    out
}
