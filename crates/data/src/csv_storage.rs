use backfill_core::{ErrorKind, Report, Result, Series, SeriesMeta, TimePoint};
use chrono::{DateTime, SecondsFormat, Utc};
use csv::{ReaderBuilder, Writer};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub struct CsvStorage;

impl CsvStorage {
    /// Conventional location of a series: `<root>/<source_id>/<instrument_id>.csv`.
    #[must_use]
    pub fn series_path(root: &Path, meta: &SeriesMeta) -> PathBuf {
        root.join(&meta.source_id)
            .join(format!("{}.csv", sanitize(&meta.instrument_id)))
    }

    /// Location of a derived join output: `<root>/derived/<name>.csv`.
    #[must_use]
    pub fn derived_path(root: &Path, name: &str) -> PathBuf {
        root.join("derived").join(format!("{}.csv", sanitize(name)))
    }

    /// Writes a series as CSV, replacing `path` atomically.
    ///
    /// Format: `timestamp,<columns...>` with RFC 3339 timestamps and empty
    /// cells for absent fields.
    ///
    /// # Errors
    /// Returns `Storage` if the file cannot be written or moved into place.
    pub fn write_series(path: &Path, series: &Series) -> Result<()> {
        let columns = series.columns();
        let mut buf = Vec::new();
        {
            let mut writer = Writer::from_writer(&mut buf);

            let mut header = Vec::with_capacity(columns.len() + 1);
            header.push("timestamp".to_string());
            header.extend(columns.iter().cloned());
            writer.write_record(&header).map_err(csv_error)?;

            for point in series.points() {
                let mut row = Vec::with_capacity(columns.len() + 1);
                row.push(point.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true));
                for column in &columns {
                    row.push(point.get(column).map(|v| v.to_string()).unwrap_or_default());
                }
                writer.write_record(&row).map_err(csv_error)?;
            }

            writer.flush()?;
        }

        write_atomic(path, &buf)
    }

    /// Reads a series previously written by [`write_series`](Self::write_series).
    ///
    /// # Errors
    /// Returns `Storage` if the file cannot be read, or `MalformedRecord` if
    /// a row cannot be decoded.
    pub fn read_series(path: &Path, meta: SeriesMeta) -> Result<Series> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| ErrorKind::storage(format!("failed to open {}: {e}", path.display())))?;

        let headers = reader.headers().map_err(csv_error)?.clone();
        if headers.get(0) != Some("timestamp") {
            return Err(ErrorKind::malformed(format!(
                "{}: first column must be timestamp",
                path.display()
            )));
        }

        let mut points = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(csv_error)?;
            let raw_ts = record.get(0).unwrap_or_default();
            let timestamp = DateTime::parse_from_rfc3339(raw_ts)
                .map_err(|e| {
                    ErrorKind::malformed(format!("row {}: bad timestamp {raw_ts}: {e}", line + 1))
                })?
                .with_timezone(&Utc);

            let mut point = TimePoint::new(timestamp);
            for (name, cell) in headers.iter().zip(record.iter()).skip(1) {
                if cell.is_empty() {
                    continue;
                }
                let value = cell.parse::<f64>().map_err(|e| {
                    ErrorKind::malformed(format!("row {}: bad {name} value {cell}: {e}", line + 1))
                })?;
                point.set(name, value);
            }
            points.push(point);
        }

        Ok(Series::from_points(meta, points))
    }

    /// Writes the run report as pretty JSON, replacing `path` atomically.
    ///
    /// # Errors
    /// Returns `Storage` if serialization or the write fails.
    pub fn write_report(path: &Path, report: &Report) -> Result<()> {
        let json = serde_json::to_vec_pretty(report)
            .map_err(|e| ErrorKind::storage(format!("failed to serialize report: {e}")))?;
        write_atomic(path, &json)
    }

    /// # Errors
    /// Returns `Storage` if the file cannot be read or parsed.
    pub fn read_report(path: &Path) -> Result<Report> {
        let bytes = fs::read(path)
            .map_err(|e| ErrorKind::storage(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ErrorKind::storage(format!("failed to parse {}: {e}", path.display())))
    }
}

/// Writes `bytes` to a temp file beside `path`, then renames it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| {
        ErrorKind::storage(format!("failed to create {}: {e}", parent.display()))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| ErrorKind::storage(format!("failed to persist {}: {e}", path.display())))?;
    Ok(())
}

fn csv_error(e: csv::Error) -> ErrorKind {
    ErrorKind::storage(format!("csv: {e}"))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}
