// CSV sources: discovery and chunked, lazily opened readers

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::debug;
use masterdata_engine::{RowGroup, Source, SourceError, Value};

/// Rows per row-group unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

/// Bytes read from the head of a file when sniffing its delimiter.
const SNIFF_BYTES: u64 = 16 * 1024;

/// Missing-value markers pandas recognizes by default. Opt-in; the plain
/// default treats only the empty field as null.
pub const STANDARD_NULL_VALUES: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub chunk_size: usize,
    /// Field delimiter; `None` sniffs it from the first lines of each file.
    pub delimiter: Option<u8>,
    /// Field values read as null (exact match).
    pub null_values: Vec<String>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            delimiter: Some(b','),
            null_values: vec![String::new()],
        }
    }
}

impl CsvOptions {
    /// Also read every [`STANDARD_NULL_VALUES`] marker as null.
    pub fn with_standard_nulls(mut self) -> Self {
        for marker in STANDARD_NULL_VALUES {
            if !self.null_values.iter().any(|n| n == marker) {
                self.null_values.push(marker.to_string());
            }
        }
        self
    }
}

/// List files in `dir` whose extension matches `extension` (case-insensitive),
/// sorted by file name so runs are reproducible.
pub fn discover_sources(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, String> {
    let entries = std::fs::read_dir(dir).map_err(|e| format!("{}: {e}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| format!("{}: {e}", dir.display()))?;
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if matches {
            paths.push(path);
        }
    }

    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

/// A CSV file read in row-groups of `chunk_size` rows.
///
/// The file is opened on the first call to `next_group`, so an unreadable
/// file surfaces as a source failure rather than a setup error. Records with
/// more fields than the header are dropped; short records are padded with
/// nulls.
pub struct CsvSource {
    id: String,
    path: PathBuf,
    options: CsvOptions,
    reader: Option<csv::Reader<File>>,
    header: Vec<String>,
    finished: bool,
    emitted: bool,
    rows_dropped: usize,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, options: CsvOptions) -> Self {
        let path = path.into();
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            id,
            path,
            options,
            reader: None,
            header: Vec::new(),
            finished: false,
            emitted: false,
            rows_dropped: 0,
        }
    }

    fn open(&mut self) -> Result<(), SourceError> {
        let unreadable = |e: std::io::Error| SourceError::Unreadable(format!("{}: {e}", self.path.display()));

        let delimiter = match self.options.delimiter {
            Some(d) => d,
            None => {
                let mut head = Vec::new();
                File::open(&self.path)
                    .map_err(unreadable)?
                    .take(SNIFF_BYTES)
                    .read_to_end(&mut head)
                    .map_err(unreadable)?;
                sniff_delimiter(&decode_field(&head))
            }
        };

        let file = File::open(&self.path).map_err(unreadable)?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let raw = reader
            .byte_headers()
            .map_err(|e| SourceError::Corrupt(e.to_string()))?
            .clone();
        if raw.is_empty() || (raw.len() == 1 && raw.get(0).map_or(true, |h| h.is_empty())) {
            return Err(SourceError::Corrupt("no columns to parse from file".into()));
        }

        self.header = raw
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let name = decode_field(field);
                let name = if i == 0 { name.trim_start_matches('\u{feff}').to_string() } else { name };
                if name.trim().is_empty() {
                    format!("unnamed: {i}")
                } else {
                    name
                }
            })
            .collect();
        debug!("{}: header {:?}, delimiter {:?}", self.id, self.header, delimiter as char);

        self.reader = Some(reader);
        Ok(())
    }

    fn is_null(&self, value: &str) -> bool {
        self.options.null_values.iter().any(|n| n == value)
    }

    fn read_group(&mut self) -> Result<RowGroup, SourceError> {
        let mut group = RowGroup::new(self.header.clone());
        let width = self.header.len();
        let mut record = csv::ByteRecord::new();

        while group.len() < self.options.chunk_size.max(1) {
            let Some(reader) = self.reader.as_mut() else {
                break;
            };
            match reader.read_byte_record(&mut record) {
                Ok(true) => {
                    if record.len() > width {
                        self.rows_dropped += 1;
                        continue;
                    }
                    let row: Vec<Value> = record
                        .iter()
                        .map(|field| {
                            let value = decode_field(field);
                            if self.is_null(&value) {
                                None
                            } else {
                                Some(value)
                            }
                        })
                        .collect();
                    group.push_row(row);
                }
                Ok(false) => {
                    self.finished = true;
                    break;
                }
                Err(e) if e.is_io_error() => {
                    self.finished = true;
                    return Err(SourceError::Unreadable(format!("{}: {e}", self.path.display())));
                }
                Err(e) => {
                    debug!("{}: dropping malformed record: {e}", self.id);
                    self.rows_dropped += 1;
                }
            }
        }

        Ok(group)
    }
}

impl Source for CsvSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn next_group(&mut self) -> Option<Result<RowGroup, SourceError>> {
        if self.finished {
            return None;
        }
        if self.reader.is_none() {
            if let Err(e) = self.open() {
                self.finished = true;
                return Some(Err(e));
            }
        }

        match self.read_group() {
            Ok(group) => {
                // A header-only file still yields one empty group so its
                // columns reach the relation.
                if group.is_empty() && self.emitted {
                    self.reader = None;
                    return None;
                }
                self.emitted = true;
                if self.finished {
                    self.reader = None;
                }
                Some(Ok(group))
            }
            Err(e) => {
                self.reader = None;
                Some(Err(e))
            }
        }
    }

    fn rows_dropped(&self) -> usize {
        self.rows_dropped
    }
}

/// Decode a field as UTF-8, falling back to Windows-1252 (common for
/// Excel-exported CSVs).
pub fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Candidate delimiters; on equal scores the earlier one wins.
const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Records of the sample that take part in sniffing.
const SNIFF_RECORDS: usize = 10;

/// Pick the delimiter under which the sampled records agree with the
/// header's width. The header must split into at least two fields.
/// Agreement is scored first, then width. Falls back to comma.
fn sniff_delimiter(sample: &str) -> u8 {
    let mut best = ((0, 0), b',');

    for delimiter in DELIMITERS {
        let widths: Vec<usize> = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(sample.as_bytes())
            .records()
            .take(SNIFF_RECORDS)
            .map_while(Result::ok)
            .map(|record| record.len())
            .collect();

        let Some(&header) = widths.first() else {
            continue;
        };
        if header < 2 {
            continue;
        }

        let agreeing = widths.iter().filter(|&&w| w == header).count();
        if (agreeing, header) > best.0 {
            best = ((agreeing, header), delimiter);
        }
    }

    best.1
}
