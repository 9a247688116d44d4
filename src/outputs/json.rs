//! JSON output of a run's results.
//!
//! Writes the whole [`ResultTable`] next to the workbook, with the same file
//! stem and a `.json` extension:
//! ```text
//! output_dir/
//! ├── Sentimentos_das_Noticias.xml
//! └── Sentimentos_das_Noticias.json
//! ```

use crate::aggregate::ResultTable;
use crate::error::ExportError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// JSON path matching a workbook path.
pub fn json_path_for(workbook: &Path) -> PathBuf {
    workbook.with_extension("json")
}

/// Write `table` as pretty-printed JSON to `path`, creating parent
/// directories as needed.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_table(table: &ResultTable, path: &Path) -> Result<(), ExportError> {
    let json = serde_json::to_string_pretty(table)?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create JSON dir");
            return Err(e.into());
        }
    }

    fs::write(path, json).await?;
    info!(queries = table.tables.len(), rows = table.total_rows(), "Wrote JSON results");
    Ok(())
}
