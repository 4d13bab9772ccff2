use mention_extractor::{merge_per_ticker, MentionExtractor};
use stance_core::{CoreError, ExtractionConfig, MatchKind, StoplistMode, TargetType};
use std::path::PathBuf;

struct Scratch {
    dir: PathBuf,
}

impl Scratch {
    fn new() -> anyhow::Result<Self> {
        let dir = std::env::temp_dir().join(format!("mention-extractor-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn write(&self, name: &str, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.dir.join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn config(scratch: &Scratch) -> anyhow::Result<ExtractionConfig> {
    Ok(ExtractionConfig {
        ticker_master_path: Some(scratch.write(
            "tickers.csv",
            "ticker,name\nAAPL,Apple Inc.\nTSLA,Tesla\nNVDA,Nvidia\nDD,DuPont\n",
        )?),
        synonyms_path: Some(scratch.write(
            "synonyms.json",
            r#"{"apple": "AAPL", "nvidia": "NVDA"}"#,
        )?),
        stoplist_path: Some(scratch.write("stoplist.json", r#"["DD"]"#)?),
        ..ExtractionConfig::default()
    })
}

#[test]
fn test_extractor_from_configured_files() -> anyhow::Result<()> {
    let scratch = Scratch::new()?;
    let extractor = MentionExtractor::from_config(&config(&scratch)?)?;

    let mentions = extractor.extract("Did my DD: nvidia and $TSLA, apple stock later");
    let merged = merge_per_ticker(&mentions);
    let tickers: Vec<&str> = merged.iter().map(|m| m.ticker.as_str()).collect();
    assert_eq!(tickers, vec!["AAPL", "NVDA", "TSLA"]);
    assert!(merged.iter().all(|m| m.span.is_some()));
    assert_eq!(merged[2].match_kind, MatchKind::Cashtag);
    Ok(())
}

#[test]
fn test_context_mode_and_title_inheritance_from_config() -> anyhow::Result<()> {
    let scratch = Scratch::new()?;
    let mut config = config(&scratch)?;
    config.stoplist_mode = StoplistMode::Context;
    config.inherit_title_tickers = true;
    let extractor = MentionExtractor::from_config(&config)?;

    assert_eq!(extractor.extract("DD shares are cheap")[0].ticker, "DD");

    let inherited = extractor.extract_for(TargetType::Comment, "lol same", "AAPL or TSLA?", "");
    assert_eq!(inherited.len(), 2);
    assert!(inherited.iter().all(|m| m.is_inherited()));
    Ok(())
}

#[test]
fn test_missing_vocabulary_file_matches_nothing() -> anyhow::Result<()> {
    let config = ExtractionConfig {
        ticker_master_path: Some(PathBuf::from("/nonexistent/tickers.csv")),
        ..ExtractionConfig::default()
    };
    let extractor = MentionExtractor::from_config(&config)?;
    assert!(extractor.extract("$AAPL and TSLA").is_empty());
    Ok(())
}

#[test]
fn test_unparseable_vocabulary_file_is_an_error() -> anyhow::Result<()> {
    let scratch = Scratch::new()?;
    let config = ExtractionConfig {
        ticker_master_path: Some(scratch.write("tickers.csv", "symbol,name\nAAPL,Apple\n")?),
        ..ExtractionConfig::default()
    };
    let err = MentionExtractor::from_config(&config).unwrap_err();
    assert!(matches!(err, CoreError::InvalidInput { .. }));
    Ok(())
}

#[test]
fn test_no_vocabulary_matches_nothing() -> anyhow::Result<()> {
    let extractor = MentionExtractor::from_config(&ExtractionConfig::default())?;
    assert!(extractor.extract("$AAPL to the moon").is_empty());
    Ok(())
}
