use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result, bail};

pub const LABELS_FILE_NAME: &str = "labels.txt";

/// Class index to label text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelTable {
    labels: Vec<Option<String>>,
}

impl LabelTable {
    /// Loads a `<index>,<label>` per line file.
    pub fn load(path: impl AsRef<Path>) -> Result<LabelTable> {
        let path = path.as_ref();
        let file = fs_err::File::open(path).with_context(|| {
            format!(
                "failed to load the {} file.  Make sure it exists in the same folder as the app",
                path.file_name().and_then(|n| n.to_str()).unwrap_or(LABELS_FILE_NAME)
            )
        })?;
        let table = Self::parse(file).with_context(|| format!("Parsing {}", path.display()))?;
        debug!("Loaded {} labels from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn parse(reader: impl Read) -> Result<LabelTable> {
        let mut labels: Vec<Option<String>> = vec![];
        for (ix, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if line.trim().is_empty() {
                continue;
            }
            let Some((index, text)) = line.split_once(',') else {
                bail!("Line {}: expected <index>,<label>, got {:?}", ix + 1, line)
            };
            let index: usize = index
                .trim()
                .parse()
                .with_context(|| format!("Line {}: invalid class index {:?}", ix + 1, index))?;
            if index >= labels.len() {
                labels.resize(index + 1, None);
            }
            labels[index] = Some(text.to_string());
        }
        Ok(LabelTable { labels })
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).and_then(|l| l.as_deref())
    }

    /// One past the highest index seen.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(usize, S)> for LabelTable {
    fn from_iter<I: IntoIterator<Item = (usize, S)>>(iter: I) -> LabelTable {
        let mut labels: Vec<Option<String>> = vec![];
        for (index, text) in iter {
            if index >= labels.len() {
                labels.resize(index + 1, None);
            }
            labels[index] = Some(text.into());
        }
        LabelTable { labels }
    }
}
