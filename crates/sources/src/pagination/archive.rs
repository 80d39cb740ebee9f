//! Daily archive file planning and extraction.

use backfill_core::{Cursor, ErrorKind, FetchWindow, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use std::io::{Cursor as IoCursor, Read};
use zip::ZipArchive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    pub date: NaiveDate,
    pub url: String,
}

/// One archive file per calendar day of the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePlan {
    files: Vec<ArchiveFile>,
}

impl ArchivePlan {
    /// Lists the daily files covering `window`, with `url_for` naming each.
    pub fn daily(window: &FetchWindow, url_for: impl Fn(NaiveDate) -> String) -> Self {
        let files = window
            .start
            .date_naive()
            .iter_days()
            .take_while(|d| *d <= window.end.date_naive())
            .map(|date| ArchiveFile {
                url: url_for(date),
                date,
            })
            .collect();
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[ArchiveFile] {
        &self.files
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ArchiveFile> {
        self.files.get(index)
    }

    /// Index of the file the cursor points at.
    #[must_use]
    pub fn position(cursor: Cursor) -> usize {
        match cursor {
            Cursor::Archive(i) => i,
            _ => 0,
        }
    }

    /// Cursor following file `index`.
    #[must_use]
    pub fn next(&self, index: usize) -> Cursor {
        if index + 1 < self.files.len() {
            Cursor::Archive(index + 1)
        } else {
            Cursor::Done
        }
    }
}

/// Returns true if the first row looks like a header rather than data.
#[must_use]
pub fn detect_header(first_line: &str) -> bool {
    first_line
        .split(',')
        .next()
        .map(|field| field.trim().parse::<i64>().is_err())
        .unwrap_or(false)
}

/// Extracts the CSV rows of the first `.csv` entry in a zip archive,
/// skipping a header row if there is one.
///
/// # Errors
/// Returns `MalformedRecord` if the archive or its CSV cannot be read.
pub fn extract_csv_rows(bytes: &[u8]) -> Result<Vec<StringRecord>> {
    let mut archive = ZipArchive::new(IoCursor::new(bytes))
        .map_err(|e| ErrorKind::malformed(format!("invalid zip archive: {e}")))?;

    let mut contents: Option<String> = None;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ErrorKind::malformed(format!("unreadable zip entry: {e}")))?;
        if !entry.name().ends_with(".csv") {
            continue;
        }
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|e| ErrorKind::malformed(format!("unreadable csv in archive: {e}")))?;
        contents = Some(text);
        break;
    }
    let contents = contents.ok_or_else(|| ErrorKind::malformed("zip archive has no csv entry"))?;

    let has_header = contents.lines().next().is_some_and(detect_header);
    let mut reader = ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .from_reader(contents.as_bytes());

    reader
        .records()
        .map(|r| r.map_err(|e| ErrorKind::malformed(format!("invalid csv row: {e}"))))
        .collect()
}

#[cfg(test)]
pub(crate) fn build_zip(name: &str, contents: &str) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut buf = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(IoCursor::new(&mut buf));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file(name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
        writer.finish().unwrap();
    }
    buf
}
