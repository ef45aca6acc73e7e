use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::Record;
use crate::enrichment::{EnrichmentReport, EnrichmentResult};
use crate::error::NmdcError;
use crate::flatten::FlatTable;
use crate::fs_util::write_atomic;

/// Records printed when no output file is given.
pub const PREVIEW_RECORDS: usize = 3;
/// Enrichment rows printed when no output file is given.
pub const PREVIEW_RESULTS: usize = 20;

const ENRICHMENT_COLUMNS: [&str; 12] = [
    "feature_id",
    "feature_name",
    "group1_name",
    "group1_count",
    "group1_total",
    "group2_name",
    "group2_count",
    "group2_total",
    "p_value",
    "fdr",
    "effect_size",
    "enriched_in",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Tsv,
}

impl ExportFormat {
    /// Format implied by the file extension; unknown extensions mean CSV.
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("tsv" | "tab") => ExportFormat::Tsv,
            Some("json") => ExportFormat::Json,
            _ => ExportFormat::Csv,
        }
    }

    pub fn delimiter(self) -> Option<u8> {
        match self {
            ExportFormat::Csv => Some(b','),
            ExportFormat::Tsv => Some(b'\t'),
            ExportFormat::Json => None,
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::Tsv => write!(f, "tsv"),
        }
    }
}

/// Write `records` to `path`, flattened for CSV/TSV and as-is for JSON.
/// Returns the format used.
pub fn export_records(
    records: &[Record],
    path: &Path,
    format: Option<ExportFormat>,
) -> Result<ExportFormat, NmdcError> {
    let format = format.unwrap_or_else(|| ExportFormat::from_path(path));
    write_atomic(path, |writer| write_records(records, format, writer))?;
    tracing::info!(path = %path.display(), records = records.len(), %format, "exported records");
    Ok(format)
}

pub fn write_records(
    records: &[Record],
    format: ExportFormat,
    writer: &mut dyn Write,
) -> Result<(), NmdcError> {
    match format.delimiter() {
        None => {
            serde_json::to_writer_pretty(&mut *writer, records)
                .map_err(|err| NmdcError::Export(err.to_string()))?;
            writer
                .write_all(b"\n")
                .map_err(|err| NmdcError::Export(err.to_string()))
        }
        Some(_) if records.is_empty() => Ok(()),
        Some(delimiter) => write_flat_table(&FlatTable::from_records(records), delimiter, writer),
    }
}

pub fn write_flat_table(
    table: &FlatTable,
    delimiter: u8,
    writer: &mut dyn Write,
) -> Result<(), NmdcError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(writer);
    csv_writer
        .write_record(&table.columns)
        .map_err(|err| NmdcError::Export(err.to_string()))?;
    for row in &table.rows {
        csv_writer
            .write_record(row)
            .map_err(|err| NmdcError::Export(err.to_string()))?;
    }
    csv_writer
        .flush()
        .map_err(|err| NmdcError::Export(err.to_string()))
}

/// Write enrichment rows to `path`.
pub fn export_enrichment(
    results: &[EnrichmentResult],
    path: &Path,
    format: ExportFormat,
) -> Result<(), NmdcError> {
    write_atomic(path, |writer| write_enrichment(results, format, writer))?;
    tracing::info!(path = %path.display(), results = results.len(), %format, "exported enrichment results");
    Ok(())
}

pub fn write_enrichment(
    results: &[EnrichmentResult],
    format: ExportFormat,
    writer: &mut dyn Write,
) -> Result<(), NmdcError> {
    let Some(delimiter) = format.delimiter() else {
        serde_json::to_writer_pretty(&mut *writer, results)
            .map_err(|err| NmdcError::Export(err.to_string()))?;
        return writer
            .write_all(b"\n")
            .map_err(|err| NmdcError::Export(err.to_string()));
    };

    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(writer);
    csv_writer
        .write_record(ENRICHMENT_COLUMNS)
        .map_err(|err| NmdcError::Export(err.to_string()))?;
    for result in results {
        csv_writer
            .write_record([
                result.feature_id.clone(),
                result.feature_name.clone(),
                result.group1_name.clone(),
                result.group1_count.to_string(),
                result.group1_total.to_string(),
                result.group2_name.clone(),
                result.group2_count.to_string(),
                result.group2_total.to_string(),
                format!("{:.6e}", result.p_value),
                format!("{:.6e}", result.fdr),
                format!("{:.3}", result.effect_size),
                result.enriched_in.clone(),
            ])
            .map_err(|err| NmdcError::Export(err.to_string()))?;
    }
    csv_writer
        .flush()
        .map_err(|err| NmdcError::Export(err.to_string()))
}

pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }

    /// Record count followed by the first few records.
    pub fn print_record_preview(records: &[Record]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "Found {} record(s)", records.len())?;
        if records.len() > PREVIEW_RECORDS {
            writeln!(
                stdout,
                "Showing the first {PREVIEW_RECORDS}; use --output to save all"
            )?;
        }
        drop(stdout);
        let shown = &records[..records.len().min(PREVIEW_RECORDS)];
        Self::print_json(shown)
    }

    pub fn print_missing_ids(missing: &[String]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        if missing.is_empty() {
            writeln!(stdout, "All ids exist")?;
            return Ok(());
        }
        writeln!(stdout, "{} id(s) not found:", missing.len())?;
        for id in missing {
            writeln!(stdout, "  {id}")?;
        }
        Ok(())
    }

    pub fn print_enrichment_summary(report: &EnrichmentReport) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        render_enrichment_summary(report, &mut stdout)
    }
}

/// Plain-text table of the top significant results.
pub fn render_enrichment_summary(report: &EnrichmentReport, out: &mut dyn Write) -> io::Result<()> {
    writeln!(
        out,
        "Grouped by {}: {} ({} biosamples) vs {} ({} biosamples), {} excluded",
        report.group_by,
        report.group1.name,
        report.group1.size,
        report.group2.name,
        report.group2.size,
        report.excluded
    )?;
    let significant = report.significant();
    writeln!(
        out,
        "{} significant of {} tested (FDR <= {}); {} below min count",
        significant.len(),
        report.results.len(),
        report.alpha,
        report.untested.len()
    )?;
    if significant.is_empty() {
        writeln!(out, "No significant enrichment found")?;
        return Ok(());
    }

    writeln!(
        out,
        "{:<30} {:>12} {:>12} {:>10} {:>10} {:>8}  enriched_in",
        "feature", "group1", "group2", "p_value", "fdr", "effect"
    )?;
    for result in significant.iter().take(PREVIEW_RESULTS) {
        let feature: String = result.feature_id.chars().take(30).collect();
        writeln!(
            out,
            "{:<30} {:>12} {:>12} {:>10.2e} {:>10.2e} {:>7.2}x  {}",
            feature,
            format!("{}/{}", result.group1_count, result.group1_total),
            format!("{}/{}", result.group2_count, result.group2_total),
            result.p_value,
            result.fdr,
            result.effect_size,
            result.enriched_in
        )?;
    }
    if significant.len() > PREVIEW_RESULTS {
        writeln!(
            out,
            "... showing top {PREVIEW_RESULTS} of {}; use --output to save all",
            significant.len()
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(ExportFormat::from_path(&PathBuf::from("a.csv")), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path(&PathBuf::from("a.TSV")), ExportFormat::Tsv);
        assert_eq!(ExportFormat::from_path(&PathBuf::from("a.tab")), ExportFormat::Tsv);
        assert_eq!(ExportFormat::from_path(&PathBuf::from("a.json")), ExportFormat::Json);
        assert_eq!(ExportFormat::from_path(&PathBuf::from("a.txt")), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path(&PathBuf::from("noext")), ExportFormat::Csv);
    }

    #[test]
    fn empty_tabular_export_writes_nothing() {
        let mut buffer = Vec::new();
        write_records(&[], ExportFormat::Tsv, &mut buffer).unwrap();
        assert!(buffer.is_empty());

        write_records(&[], ExportFormat::Json, &mut buffer).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "[]\n");
    }
}
