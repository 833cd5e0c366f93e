//! ABOUTME: Renders run status, instance listings, and retry metrics for text/JSON output modes

use crate::cli::OutputFormat;
use workflow_engine::engine::RunStatus;
use workflow_engine::metrics::StepRetryMetrics;
use workflow_state::instance::WorkflowInstance;

pub fn format_run_status(run_id: &str, status: &RunStatus, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&serde_json::json!({
            "run_id": run_id,
            "status": status,
        }))?),
        OutputFormat::Text => {
            let mut out = format!("run:    {run_id}\n");
            match status {
                RunStatus::Continue { step_id, value } => {
                    out.push_str("status: running\n");
                    if let Some(step) = step_id {
                        out.push_str(&format!("step:   {step}\n"));
                    }
                    if let Some(value) = value {
                        out.push_str(&format!("value:  {value}\n"));
                    }
                }
                RunStatus::Finish { value } => {
                    out.push_str(&format!("status: completed\nvalue:  {value}\n"));
                }
                RunStatus::AsyncProgress {
                    task_id,
                    percent_complete,
                    properties,
                    completed,
                } => {
                    out.push_str(&format!(
                        "status: async\ntask:   {task_id}\npercent: {percent_complete}\ncompleted: {completed}\n"
                    ));
                    for (key, value) in properties {
                        out.push_str(&format!("  {key}: {value}\n"));
                    }
                }
                RunStatus::Suspended { prompt, metadata } => {
                    out.push_str(&format!("status: suspended\nprompt: {prompt}\n"));
                    for (key, value) in metadata {
                        out.push_str(&format!("  {key}: {value}\n"));
                    }
                }
                RunStatus::Terminated { status, error_info } => {
                    out.push_str(&format!("status: {status:?}\n"));
                    if let Some(err) = error_info {
                        out.push_str(&format!("error:  {err}\n"));
                    }
                }
            }
            Ok(out)
        }
    }
}

pub fn format_instance_list(instances: &[WorkflowInstance], format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(instances)?),
        OutputFormat::Text => {
            if instances.is_empty() {
                return Ok("(no instances)\n".to_string());
            }
            let mut out = String::new();
            for instance in instances {
                out.push_str(&format!(
                    "{}  {:<12}  {:<10?}  {}\n",
                    instance.header.run_id,
                    instance.header.workflow_id,
                    instance.header.status,
                    instance.header.updated_at.to_rfc3339(),
                ));
            }
            Ok(out)
        }
    }
}

pub fn format_metrics(step_id: Option<&str>, metrics: &StepRetryMetrics, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(metrics)?),
        OutputFormat::Text => {
            let label = step_id.unwrap_or("(global)");
            let mut out = format!(
                "step:        {label}\nattempts:    {}\nsuccesses:   {}\nexhaustions: {}\n",
                metrics.attempts, metrics.successes, metrics.exhaustions
            );
            if let Some(rate) = metrics.success_rate() {
                out.push_str(&format!("success rate: {:.2}\n", rate));
            }
            for (kind, count) in &metrics.failures_by_kind {
                out.push_str(&format!("  {kind}: {count}\n"));
            }
            Ok(out)
        }
    }
}
