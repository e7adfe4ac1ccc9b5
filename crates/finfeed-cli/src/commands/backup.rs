use finfeed_core::Pipeline;
use serde_json::json;

use crate::cli::BackupArgs;
use crate::commands::CommandResult;
use crate::error::CliError;

pub async fn run(args: &BackupArgs, pipeline: &Pipeline) -> Result<CommandResult, CliError> {
    let written = pipeline.backup(args.force).await?;

    let data = match &written {
        Some(path) => json!({ "written": true, "path": path.display().to_string() }),
        None => json!({
            "written": false,
            "reason": format!(
                "last backup is newer than {} hour(s)",
                pipeline.config().backup.frequency_hours
            ),
        }),
    };

    Ok(CommandResult::ok(data))
}
