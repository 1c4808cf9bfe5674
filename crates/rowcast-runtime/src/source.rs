use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_compression::tokio::bufread::GzipDecoder;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use rowcast_core::tsv;
use rowcast_core::types::NameRecord;

/// Record producer for one pipeline run.
///
/// Delivers records into `tx` in order and signals end-of-stream by
/// returning, which closes the channel. Returning `Err` is a source failure
/// and aborts the pipeline. A cancelled token or a closed channel means the
/// consumer is gone; producers stop quietly, that is not their error to
/// report.
#[async_trait]
pub trait RecordSource: Send + Sized + 'static {
    async fn produce(
        self,
        tx: mpsc::Sender<NameRecord>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Seedable synthetic generator; same seed, same records.
pub struct FakeSource {
    amount: u64,
    seed: u64,
}

const FIRST_NAMES: &[&str] = &[
    "Fred", "Lauren", "Brigitte", "John", "Ingmar", "Ingrid", "Humphrey", "James", "Richard",
    "Bette", "Marlon", "Audrey", "Henry", "Greta", "Cary",
];

const LAST_NAMES: &[&str] = &[
    "Astaire", "Bacall", "Bardot", "Belushi", "Bergman", "Bogart", "Cagney", "Burton", "Davis",
    "Brando", "Hepburn", "Fonda", "Garbo", "Grant", "Olivier",
];

const PROFESSIONS: &[&str] = &[
    "actor",
    "actress",
    "producer",
    "director",
    "writer",
    "composer",
    "soundtrack",
    "editor",
    "miscellaneous",
];

impl FakeSource {
    pub fn new(amount: u64, seed: u64) -> Self {
        Self { amount, seed }
    }

    fn generate(rng: &mut StdRng, index: u64) -> NameRecord {
        let first = FIRST_NAMES.choose(rng).copied().unwrap_or("Fred");
        let last = LAST_NAMES.choose(rng).copied().unwrap_or("Astaire");

        let birth = rng.random_range(1880..=1990);
        let birth_year = if rng.random_range(0..100) < 85 {
            birth.to_string()
        } else {
            "\\N".to_string()
        };
        let death_year = if rng.random_range(0..100) < 30 {
            (birth + rng.random_range(20..=90)).to_string()
        } else {
            "\\N".to_string()
        };

        let professions = (0..rng.random_range(1..=3))
            .map(|_| PROFESSIONS.choose(rng).copied().unwrap_or("actor").to_string())
            .collect();
        let titles = (0..rng.random_range(1..=4))
            .map(|_| format!("tt{:07}", rng.random_range(0..2_000_000)))
            .collect();

        NameRecord {
            nconst: format!("nm{index:07}"),
            primary_name: format!("{first} {last}"),
            birth_year,
            death_year,
            primary_professions: professions,
            known_for_titles: titles,
        }
    }
}

#[async_trait]
impl RecordSource for FakeSource {
    async fn produce(self, tx: mpsc::Sender<NameRecord>, cancel: CancellationToken) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        for index in 0..self.amount {
            let record = Self::generate(&mut rng, index);
            tokio::select! {
                res = tx.send(record) => {
                    if res.is_err() {
                        return Ok(());
                    }
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
        Ok(())
    }
}

/// Local `name.basics.tsv` reader; the header line is skipped and every data
/// line must parse, a malformed line is a source failure.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl RecordSource for FileSource {
    async fn produce(self, tx: mpsc::Sender<NameRecord>, cancel: CancellationToken) -> Result<()> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        let mut lines = BufReader::new(file).lines();

        let mut line_no: u64 = 0;
        while let Some(line) = lines.next_line().await.context("reading tsv line")? {
            line_no += 1;
            if line_no == 1 || line.is_empty() {
                continue;
            }
            let record =
                tsv::parse_line(&line).map_err(|e| anyhow::anyhow!("line {line_no}: {e}"))?;
            tokio::select! {
                res = tx.send(record) => {
                    if res.is_err() {
                        return Ok(());
                    }
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
        Ok(())
    }
}

/// Streaming HTTP feed of a gzip-compressed TSV, decoded on the fly so the
/// whole dump never lands on disk or in memory.
pub struct HttpSource {
    url: String,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl RecordSource for HttpSource {
    async fn produce(self, tx: mpsc::Sender<NameRecord>, cancel: CancellationToken) -> Result<()> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building http client")?;
        let resp = client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("requesting {}", self.url))?;
        anyhow::ensure!(
            resp.status().is_success(),
            "feed request failed: status={} url={}",
            resp.status(),
            self.url
        );

        let body = StreamReader::new(resp.bytes_stream().map_err(std::io::Error::other));
        let mut lines = BufReader::new(GzipDecoder::new(body)).lines();

        let mut line_no: u64 = 0;
        loop {
            let maybe = tokio::select! {
                maybe = lines.next_line() => maybe.context("reading feed")?,
                _ = cancel.cancelled() => return Ok(()),
            };
            let Some(line) = maybe else {
                return Ok(());
            };
            line_no += 1;
            if line_no == 1 || line.is_empty() {
                continue;
            }
            let record =
                tsv::parse_line(&line).map_err(|e| anyhow::anyhow!("line {line_no}: {e}"))?;
            tokio::select! {
                res = tx.send(record) => {
                    if res.is_err() {
                        return Ok(());
                    }
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }
}
