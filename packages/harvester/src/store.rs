//! Durable delimited artifacts.
//!
//! Every flush goes to a sibling `.tmp` file that is synced and then renamed
//! over the destination, so a reader sees either the previous artifact or
//! the complete new one.
//!
//! Collected artifacts have a fixed column set. Anything read back for
//! enrichment is kept as a [`Table`] of raw fields, so columns added by
//! other tools (sentiment scores, labels) survive the round trip.

use csv::StringRecord;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::record::{parse_key, RecordRow};
use crate::window::Window;

/// Columns of a collected window artifact.
pub const COLLECTED_COLUMNS: [&str; 9] = [
    "id",
    "author_id",
    "like_count",
    "quote_count",
    "reply_count",
    "retweet_count",
    "text",
    "referenced_id",
    "referenced_type",
];

pub const ID_COLUMN: &str = "id";

/// Column set by enrichment.
pub const RESOLVED_DATE_COLUMN: &str = "resolved_date";

/// Suffix added to the stem of an enriched copy.
pub const ENRICHED_SUFFIX: &str = "_date";

pub const DEFAULT_DELIMITER: u8 = b',';

/// A loaded artifact: header and rows exactly as read.
#[derive(Debug, Clone)]
pub struct Table {
    headers: StringRecord,
    rows: Vec<StringRecord>,
    delimiter: u8,
}

impl Table {
    pub fn new(headers: StringRecord, rows: Vec<StringRecord>, delimiter: u8) -> Self {
        Self {
            headers,
            rows,
            delimiter,
        }
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Delimiter the table was read with, and will be written with.
    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column(column)?;
        self.rows.get(row)?.get(index)
    }

    /// Normalized `id` of every row, `None` where it is unusable.
    pub fn keys(&self) -> Vec<Option<u64>> {
        let Some(index) = self.column(ID_COLUMN) else {
            return vec![None; self.rows.len()];
        };
        self.rows
            .iter()
            .map(|row| row.get(index).and_then(parse_key))
            .collect()
    }

    /// Overwrite column `name` with `values`, one per row, appending the
    /// column if the table does not have it yet. Short rows are padded.
    pub fn set_column(&mut self, name: &str, values: impl IntoIterator<Item = String>) {
        let index = match self.column(name) {
            Some(index) => index,
            None => {
                self.headers.push_field(name);
                self.headers.len() - 1
            }
        };

        for (row, value) in self.rows.iter_mut().zip(values) {
            let mut fields: Vec<String> = row.iter().map(str::to_string).collect();
            if fields.len() <= index {
                fields.resize(index + 1, String::new());
            }
            fields[index] = value;
            *row = StringRecord::from(fields);
        }
    }
}

/// Reads and writes artifacts under one root directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
    /// `None` sniffs the delimiter of inputs and writes commas.
    delimiter: Option<u8>,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            delimiter: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: Option<u8>) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Destination of a window's collected records.
    pub fn window_path(&self, window: &Window, keyword: &str) -> PathBuf {
        self.root.join(window.file_name(keyword))
    }

    /// `<stem>_date.<ext>`, placed under the store root.
    pub fn enriched_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "records".to_string());
        let extension = source
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "csv".to_string());
        self.root
            .join(format!("{}{}.{}", stem, ENRICHED_SUFFIX, extension))
    }

    /// Write collected `rows` to `dest` atomically.
    ///
    /// Identical input produces a byte-identical file.
    pub fn flush(&self, rows: &[RecordRow], dest: &Path) -> StoreResult<()> {
        let delimiter = self.delimiter.unwrap_or(DEFAULT_DELIMITER);
        write_atomic(dest, delimiter, |writer| {
            writer.write_record(COLLECTED_COLUMNS)?;
            for row in rows {
                writer.serialize(row)?;
            }
            Ok(())
        })?;
        debug!(path = %dest.display(), rows = rows.len(), "Flushed artifact");
        Ok(())
    }

    /// Write `table` to `dest` atomically, keeping its delimiter.
    pub fn write_table(&self, table: &Table, dest: &Path) -> StoreResult<()> {
        write_atomic(dest, table.delimiter, |writer| {
            writer.write_record(&table.headers)?;
            for row in &table.rows {
                writer.write_record(row)?;
            }
            Ok(())
        })?;
        debug!(path = %dest.display(), rows = table.len(), "Wrote table");
        Ok(())
    }

    /// Read an artifact with at least an `id` column. Every other column
    /// is kept as is.
    pub fn load(&self, path: &Path) -> StoreResult<Table> {
        let delimiter = match self.delimiter {
            Some(delimiter) => delimiter,
            None => sniff_delimiter(path)?,
        };
        let csv_err = |source| StoreError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_path(path)
            .map_err(csv_err)?;

        let headers = reader.headers().map_err(csv_err)?.clone();
        if !headers.iter().any(|h| h.trim() == ID_COLUMN) {
            return Err(StoreError::MissingIdColumn {
                path: path.to_path_buf(),
            });
        }

        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(csv_err)?;

        Ok(Table::new(headers, rows, delimiter))
    }
}

/// Tab when the header line has more tabs than commas, comma otherwise.
fn sniff_delimiter(path: &Path) -> StoreResult<u8> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let mut header = String::new();
    BufReader::new(file).read_line(&mut header).map_err(io_err)?;

    let tabs = header.matches('\t').count();
    let commas = header.matches(',').count();
    Ok(if tabs > commas { b'\t' } else { DEFAULT_DELIMITER })
}

fn write_atomic<F>(dest: &Path, delimiter: u8, write: F) -> StoreResult<()>
where
    F: FnOnce(&mut csv::Writer<File>) -> csv::Result<()>,
{
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let tmp = dest.with_extension("tmp");
    let file = File::create(&tmp).map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_writer(file);
    write(&mut writer).map_err(|source| StoreError::Csv {
        path: tmp.clone(),
        source,
    })?;

    let file = writer.into_inner().map_err(|e| StoreError::Io {
        path: tmp.clone(),
        source: io::Error::new(e.error().kind(), e.error().to_string()),
    })?;
    file.sync_all().map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    drop(file);

    fs::rename(&tmp, dest).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        StoreError::Io {
            path: dest.to_path_buf(),
            source,
        }
    })
}
