use crate::config::PROGRESS_INTERVAL;
use crate::error::PipelineError;
use crate::models::{EntityKind, FieldSource};
use bzip2::read::MultiBzDecoder;
use indicatif::ProgressBar;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The attributes of one `<row .../>` element, unescaped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    attributes: FxHashMap<String, String>,
}

impl RawRecord {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn from_element(element: &BytesStart<'_>) -> Result<Self, String> {
        let mut attributes = FxHashMap::default();
        for attr in element.attributes() {
            let attr = attr.map_err(|e| e.to_string())?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| format!("attribute name is not UTF-8: {e}"))?
                .to_string();
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            attributes.insert(key, value.into_owned());
        }
        Ok(Self { attributes })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            attributes: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl FieldSource for RawRecord {
    fn field(&self, name: &str) -> Option<&str> {
        self.get(name)
    }
}

/// One entity type's dump file, plain XML or bzip2-compressed.
#[derive(Debug, Clone)]
pub struct Source {
    kind: EntityKind,
    path: PathBuf,
}

impl Source {
    pub fn new(kind: EntityKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Finds `<Stem>.xml` or `<Stem>.xml.bz2` in a dump directory.
    pub fn locate(dir: &Path, kind: EntityKind) -> Result<Self, PipelineError> {
        let plain = dir.join(format!("{}.xml", kind.source_stem()));
        let compressed = dir.join(format!("{}.xml.bz2", kind.source_stem()));

        if plain.is_file() {
            Ok(Self::new(kind, plain))
        } else if compressed.is_file() {
            Ok(Self::new(kind, compressed))
        } else {
            Err(PipelineError::MissingSource {
                entity: kind,
                path: plain,
                source: io::Error::new(io::ErrorKind::NotFound, "no .xml or .xml.bz2 file"),
            })
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the file and returns a fresh row iterator. Each call starts over
    /// from the beginning of the file.
    pub fn rows(&self) -> Result<RowReader, PipelineError> {
        let file = File::open(&self.path).map_err(|source| PipelineError::MissingSource {
            entity: self.kind,
            path: self.path.clone(),
            source,
        })?;

        let is_bz2 = self
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("bz2"));
        let inner: Box<dyn BufRead> = if is_bz2 {
            Box::new(BufReader::new(MultiBzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        let mut reader = Reader::from_reader(inner);
        reader.trim_text(true);

        info!(entity = %self.kind, path = %self.path.display(), "Reading source");

        Ok(RowReader {
            kind: self.kind,
            reader,
            buf: Vec::new(),
            progress: ProgressBar::new_spinner(),
            seen: 0,
            skipped: 0,
            read_error: None,
            done: false,
        })
    }
}

/// Lazy sequence of `RawRecord`s, one per top-level `row` element.
/// Rows whose attributes cannot be decoded are skipped and counted.
pub struct RowReader {
    kind: EntityKind,
    reader: Reader<Box<dyn BufRead>>,
    buf: Vec<u8>,
    progress: ProgressBar,
    seen: u64,
    skipped: u64,
    read_error: Option<io::Error>,
    done: bool,
}

impl RowReader {
    /// Rows skipped so far; final once the iterator is exhausted.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// The I/O error that ended the stream, if any. A read failure means
    /// the file could not be read at all past that point (for example a
    /// corrupt bzip2 stream), which is not a malformed row.
    pub fn take_read_error(&mut self) -> Option<io::Error> {
        self.read_error.take()
    }

    fn finish(&mut self) {
        self.done = true;
        self.progress.finish_and_clear();
        if self.skipped > 0 {
            warn!(
                entity = %self.kind,
                skipped = self.skipped,
                rows = self.seen,
                "Skipped malformed rows"
            );
        } else {
            debug!(entity = %self.kind, rows = self.seen, "Source exhausted");
        }
    }
}

impl Iterator for RowReader {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        if self.done {
            return None;
        }

        loop {
            self.buf.clear();
            let step = match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"row" => {
                    Step::Row(RawRecord::from_element(&e))
                }
                Ok(Event::Eof) => Step::Eof,
                Ok(_) => Step::Other,
                Err(e) => Step::Broken(e),
            };

            match step {
                Step::Row(Ok(record)) => {
                    self.seen += 1;
                    if self.seen % PROGRESS_INTERVAL == 0 {
                        self.progress.tick();
                    }
                    return Some(record);
                }
                Step::Row(Err(reason)) => {
                    self.seen += 1;
                    self.skipped += 1;
                    let err = PipelineError::MalformedRecord {
                        entity: self.kind,
                        index: self.seen,
                        reason,
                    };
                    debug!(error = %err, "Skipping row");
                }
                Step::Other => {}
                Step::Eof => {
                    self.finish();
                    return None;
                }
                Step::Broken(quick_xml::Error::Io(e)) => {
                    warn!(
                        entity = %self.kind,
                        rows = self.seen,
                        error = %e,
                        "Read error, stopping"
                    );
                    self.read_error = Some(io::Error::new(e.kind(), e.to_string()));
                    self.finish();
                    return None;
                }
                Step::Broken(e) => {
                    // The reader cannot resync after a syntax error.
                    self.skipped += 1;
                    warn!(
                        entity = %self.kind,
                        position = self.reader.buffer_position(),
                        error = %e,
                        "XML syntax error, stopping"
                    );
                    self.finish();
                    return None;
                }
            }
        }
    }
}

enum Step {
    Row(Result<RawRecord, String>),
    Other,
    Eof,
    Broken(quick_xml::Error),
}
