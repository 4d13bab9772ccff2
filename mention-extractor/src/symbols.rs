//! Curated symbol set, synonym table and stoplist.

use stance_core::{ConfigError, CoreError, ExtractionConfig};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    tickers: HashSet<String>,
}

impl SymbolTable {
    pub fn new<I, S>(tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tickers: tickers
                .into_iter()
                .map(|t| t.as_ref().trim().to_ascii_uppercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Reads the `ticker` column of a headed CSV document.
    pub fn from_csv_reader<R: Read>(source: R) -> Result<Self, CoreError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(source);

        let column = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .position(|name| name.eq_ignore_ascii_case("ticker"))
            .ok_or_else(|| CoreError::InvalidInput {
                message: "ticker CSV has no 'ticker' column".to_string(),
            })?;

        let mut tickers = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            if let Some(ticker) = record.get(column) {
                tickers.push(ticker.to_string());
            }
        }
        Ok(Self::new(tickers))
    }

    pub fn from_csv_str(raw: &str) -> Result<Self, CoreError> {
        Self::from_csv_reader(raw.as_bytes())
    }

    pub fn from_csv_file(path: &Path) -> Result<Self, CoreError> {
        let file = File::open(path).map_err(|_| file_not_found(path))?;
        Self::from_csv_reader(file)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.tickers.contains(ticker)
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}

/// Lower-cased phrase → upper-cased ticker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynonymTable {
    phrases: BTreeMap<String, String>,
}

impl SynonymTable {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self {
            phrases: pairs
                .into_iter()
                .map(|(phrase, ticker)| {
                    (
                        phrase.as_ref().trim().to_lowercase(),
                        ticker.as_ref().trim().to_ascii_uppercase(),
                    )
                })
                .filter(|(phrase, ticker)| !phrase.is_empty() && !ticker.is_empty())
                .collect(),
        }
    }

    /// A JSON object of `"phrase": "TICKER"` entries.
    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        let pairs: HashMap<String, String> = serde_json::from_str(raw)?;
        Ok(Self::new(pairs))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, CoreError> {
        Self::from_json_str(&read(path)?)
    }

    /// Entries ordered longest phrase first.
    pub fn longest_first(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .phrases
            .iter()
            .map(|(phrase, ticker)| (phrase.as_str(), ticker.as_str()))
            .collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
        entries
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stoplist {
    words: HashSet<String>,
}

impl Stoplist {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words
                .into_iter()
                .map(|w| w.as_ref().trim().to_ascii_uppercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    /// A JSON array of words.
    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        let words: Vec<String> = serde_json::from_str(raw)?;
        Ok(Self::new(words))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, CoreError> {
        Self::from_json_str(&read(path)?)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.words.contains(ticker)
    }
}

/// The three lookup tables an extractor works from.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    pub symbols: SymbolTable,
    pub synonyms: SynonymTable,
    pub stoplist: Stoplist,
}

impl Vocabulary {
    /// Load whichever files the configuration names.
    ///
    /// Unset paths and files that do not exist give empty tables; a file that
    /// exists but cannot be parsed is an error.
    pub fn load(config: &ExtractionConfig) -> Result<Self, CoreError> {
        let symbols = match existing(&config.ticker_master_path, "ticker master") {
            Some(path) => SymbolTable::from_csv_file(path)?,
            None => {
                warn!("No ticker master file, no symbols will match");
                SymbolTable::default()
            }
        };
        let synonyms = match existing(&config.synonyms_path, "synonyms") {
            Some(path) => SynonymTable::from_json_file(path)?,
            None => SynonymTable::default(),
        };
        let stoplist = match existing(&config.stoplist_path, "stoplist") {
            Some(path) => Stoplist::from_json_file(path)?,
            None => Stoplist::default(),
        };

        info!(
            "Loaded {} symbols and {} synonyms",
            symbols.len(),
            synonyms.len()
        );
        Ok(Self {
            symbols,
            synonyms,
            stoplist,
        })
    }
}

fn existing<'a>(path: &'a Option<PathBuf>, what: &str) -> Option<&'a Path> {
    let path = path.as_deref()?;
    if path.exists() {
        Some(path)
    } else {
        warn!("{} file {} does not exist, using an empty table", what, path.display());
        None
    }
}

fn read(path: &Path) -> Result<String, CoreError> {
    std::fs::read_to_string(path).map_err(|_| file_not_found(path))
}

fn file_not_found(path: &Path) -> CoreError {
    CoreError::Config(ConfigError::FileNotFound {
        path: path.display().to_string(),
    })
}

fn csv_error(e: csv::Error) -> CoreError {
    CoreError::InvalidInput {
        message: format!("ticker CSV: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_ticker_column_anywhere() {
        let table = SymbolTable::from_csv_str("name,ticker,exchange\nApple,aapl,NASDAQ\n\"Tesla\",\"TSLA\",NASDAQ\n").unwrap();
        assert!(table.contains("AAPL"));
        assert!(table.contains("TSLA"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_csv_quoted_fields_keep_columns() {
        let table = SymbolTable::from_csv_str(
            "name,ticker,source\n\"Apple, Inc.\",AAPL,nasdaq\nTesla,TSLA,nasdaq\n",
        )
        .unwrap();
        assert!(table.contains("AAPL"));
        assert!(table.contains("TSLA"));
        assert!(!table.contains("INC."));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_csv_without_ticker_column_is_rejected() {
        assert!(SymbolTable::from_csv_str("symbol\nAAPL\n").is_err());
        assert!(SymbolTable::from_csv_str("").is_err());
    }

    #[test]
    fn test_missing_vocabulary_files_give_empty_tables() {
        let config = ExtractionConfig {
            ticker_master_path: Some(PathBuf::from("/nonexistent/tickers.csv")),
            synonyms_path: Some(PathBuf::from("/nonexistent/synonyms.json")),
            stoplist_path: Some(PathBuf::from("/nonexistent/stoplist.json")),
            ..ExtractionConfig::default()
        };
        let vocabulary = Vocabulary::load(&config).unwrap();
        assert!(vocabulary.symbols.is_empty());
        assert!(vocabulary.synonyms.is_empty());
        assert!(!vocabulary.stoplist.contains("DD"));
    }

    #[test]
    fn test_synonyms_longest_first() {
        let synonyms = SynonymTable::from_json_str(r#"{"apple": "aapl", "apple inc": "AAPL", "tesla": "TSLA"}"#).unwrap();
        let phrases: Vec<&str> = synonyms.longest_first().iter().map(|(p, _)| *p).collect();
        assert_eq!(phrases, vec!["apple inc", "apple", "tesla"]);
        assert_eq!(synonyms.longest_first()[1].1, "AAPL");
    }

    #[test]
    fn test_stoplist_uppercases() {
        let stoplist = Stoplist::from_json_str(r#"["ceo", "YOLO"]"#).unwrap();
        assert!(stoplist.contains("CEO"));
        assert!(stoplist.contains("YOLO"));
    }
}
