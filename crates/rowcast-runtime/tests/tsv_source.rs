use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rowcast_core::types::NameRecord;
use rowcast_runtime::cursor::RowCursor;
use rowcast_runtime::error::LoadError;
use rowcast_runtime::pipeline::Pipeline;
use rowcast_runtime::sink::BulkSink;
use rowcast_runtime::source::FileSource;

const HEADER: &str =
    "nconst\tprimaryName\tbirthYear\tdeathYear\tprimaryProfession\tknownForTitles\n";

fn temp_dir(test_name: &str) -> Result<PathBuf> {
    let mut root = std::env::temp_dir();
    root.push(format!(
        "rowcast-runtime-{test_name}-{}-{}",
        std::process::id(),
        rowcast_observe::time::unix_time_ms()
    ));
    std::fs::create_dir_all(&root)?;
    Ok(root)
}

#[derive(Default)]
struct RecordingSink {
    windows: Mutex<Vec<Vec<NameRecord>>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<Vec<NameRecord>> {
        self.windows
            .lock()
            .map(|mut v| std::mem::take(&mut *v))
            .unwrap_or_default()
    }
}

#[async_trait]
impl BulkSink for RecordingSink {
    async fn copy_rows(
        &self,
        mut cursor: RowCursor,
        _relation: &str,
        _columns: &[&str],
        _cancel: CancellationToken,
    ) -> Result<u64> {
        let mut rows = Vec::new();
        while cursor.advance().await {
            if let Some(record) = cursor.current() {
                rows.push(record.clone());
            }
        }
        if let Some(err) = cursor.last_error() {
            return Err(anyhow::Error::new(err.clone()));
        }
        let count = rows.len() as u64;
        self.windows
            .lock()
            .map_err(|_| anyhow::anyhow!("recording sink mutex poisoned"))?
            .push(rows);
        Ok(count)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_source_parses_and_windows() -> Result<()> {
    let root = temp_dir("file-source")?;
    let path = root.join("name.basics.tsv");

    let mut tsv = String::from(HEADER);
    tsv.push_str("nm0000001\tFred Astaire\t1899\t1987\tactor,soundtrack\ttt0072308,tt0050419\n");
    tsv.push_str("nm0000002\tLauren Bacall\t1924\t2014\tactress\ttt0037382\n");
    tsv.push_str("nm0000003\tBrigitte Bardot\t1934\t\\N\tactress,producer\ttt0057345\n");
    std::fs::write(&path, tsv)?;

    let sink = Arc::new(RecordingSink::default());
    Pipeline::new(NonZeroUsize::new(2).unwrap())
        .run(FileSource::new(&path), sink.clone())
        .await
        .map_err(anyhow::Error::new)?;

    let got = sink.take();
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].len(), 2);
    assert_eq!(got[1].len(), 1);
    assert_eq!(got[0][0].nconst, "nm0000001");
    assert_eq!(
        got[0][0].primary_professions,
        vec!["actor".to_string(), "soundtrack".to_string()]
    );
    assert_eq!(got[1][0].death_year, "\\N");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_source_reports_malformed_lines_as_source_errors() -> Result<()> {
    let root = temp_dir("file-source-bad")?;
    let path = root.join("name.basics.tsv");

    let mut tsv = String::from(HEADER);
    tsv.push_str("nm0000001\tFred Astaire\t1899\t1987\tactor\ttt0072308\n");
    tsv.push_str("nm0000002\tLauren Bacall\t1924\n");
    std::fs::write(&path, tsv)?;

    let sink = Arc::new(RecordingSink::default());
    let err = Pipeline::new(NonZeroUsize::new(10).unwrap())
        .run(FileSource::new(&path), sink)
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Source(_)), "got {err}");
    assert!(err.to_string().contains("line 3"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_source_reports_a_missing_file() {
    let sink = Arc::new(RecordingSink::default());
    let err = Pipeline::new(NonZeroUsize::new(10).unwrap())
        .run(FileSource::new("/nonexistent/name.basics.tsv"), sink)
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Source(_)), "got {err}");
}
