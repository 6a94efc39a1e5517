// Master artifact: one CSV row per identity group

use std::io::Write;
use std::path::Path;

use masterdata_engine::MasterSet;

/// Write `set` to `path` as CSV with a header row, creating parent directories.
/// Null values are written as empty fields.
pub fn export(set: &MasterSet, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| format!("{}: {e}", parent.display()))?;
    }
    let file = std::fs::File::create(path).map_err(|e| format!("{}: {e}", path.display()))?;
    export_to(set, file)
}

/// Write `set` as CSV to any writer.
pub fn export_to<W: Write>(set: &MasterSet, out: W) -> Result<(), String> {
    let mut writer = csv::WriterBuilder::new().from_writer(out);

    writer.write_record(&set.columns).map_err(|e| e.to_string())?;
    for record in &set.records {
        writer
            .write_record(record.values.iter().map(|v| v.as_deref().unwrap_or("")))
            .map_err(|e| e.to_string())?;
    }

    writer.flush().map_err(|e| e.to_string())?;
    Ok(())
}
