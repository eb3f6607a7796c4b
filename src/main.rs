use anyhow::{Context, Result};
use hashsplit::{init_tracing_once, ExportOptions, LocalDirStore, SqliteSource, TenantExport};
use std::fs;
use std::path::PathBuf;

const CONFIG_FILE: &str = "./hashsplit.json";
const SOURCE_DB: &str = "./data/source.db";
const OUT_ROOT: &str = "./export_out";

fn main() -> Result<()> {
    init_tracing_once();

    let config_path = PathBuf::from(CONFIG_FILE);
    let base = if config_path.exists() {
        ExportOptions::from_json_file(&config_path)?
    } else {
        ExportOptions::default()
    };
    let opts = base.apply_env().with_progress(true);

    let out_root = PathBuf::from(OUT_ROOT);
    fs::create_dir_all(&out_root)?;

    let source = SqliteSource::new(&PathBuf::from(SOURCE_DB), opts.columns.clone());
    let store = LocalDirStore::new(&out_root)?;

    let report = TenantExport::from_options(opts.clone())
        .run(&source, &store)
        .context("export job")?;

    println!("\n=== Export Summary ===");
    println!("Tenant ID: {}", opts.tenant_id);
    println!("Table: {}", opts.table);
    println!("Segments attempted: {}", report.attempted);
    println!("Segments succeeded: {} ({} empty)", report.succeeded(), report.empty_segments.len());
    println!("Segments failed: {}", report.failed());
    println!("Total rows exported: {}", report.total_rows);
    for (i, obj) in report.objects.iter().enumerate() {
        println!("  {}. {} ({} rows)", i + 1, store.object_path(&obj.remote_key).display(), obj.row_count);
    }
    for f in &report.failures {
        println!("  FAILED segment {} [{}, {}): {}", f.segment.index, f.segment.start_key, f.segment.end_key, f.error);
    }

    let report_path = out_root.join("report.json");
    fs::write(&report_path, serde_json::to_vec_pretty(&report)?)
        .with_context(|| format!("write {}", report_path.display()))?;
    println!("Report: {}", report_path.display());

    Ok(())
}
