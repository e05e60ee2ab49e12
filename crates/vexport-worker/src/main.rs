//! Export worker binary.
//!
//! Usage: `vexport-worker <job.json>`

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use vexport_worker::{init_tracing, ExportConfig, ExportJob, ExportRunner};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    let job_path = std::env::args()
        .nth(1)
        .context("usage: vexport-worker <job.json>")?;

    let config = ExportConfig::from_env();
    info!("Export config: {:?}", config);

    let job = ExportJob::load(&job_path).with_context(|| format!("failed to load job {job_path}"))?;
    let runner = Arc::new(ExportRunner::new(config).context("failed to set up encoder")?);
    let resources = runner.resources().clone();

    let export = tokio::spawn(Arc::clone(&runner).run_blocking(job));

    tokio::select! {
        result = export => match result.context("export task panicked")? {
            Ok(output) => {
                info!(output = %output.display(), "Export finished");
                println!("{}", output.display());
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                error!("Export failed: {}", e);
                if let Some(stderr) = e.encoder_stderr() {
                    eprint!("{stderr}");
                }
                Ok(ExitCode::FAILURE)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Received interrupt; cleaning up, checkpoint kept for resume");
            let report = resources.emergency_clean();
            info!(released = report.cleaned_count, failed = report.errors.len(), "Emergency cleanup finished");
            // The blocking export cannot be joined; exit without waiting for it.
            std::process::exit(130)
        }
    }
}
