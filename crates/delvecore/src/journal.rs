//! JSONL append/replay journal backing the persistent sparse stores.
//!
//! One envelope per line: `{index, ms, entry}`. `open` replays every line to
//! rebuild in-memory state; `append` writes and flushes a single line, which
//! is the per-row atomicity the stores rely on. A missing file is an empty
//! journal; a corrupt line is a positioned error.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Envelope<E> {
    pub index: u64,
    pub ms: u64,
    pub entry: E,
}

#[derive(Debug)]
pub struct Journal<E> {
    path: PathBuf,
    next_index: u64,
    _phantom: std::marker::PhantomData<E>,
}

impl<E> Journal<E>
where
    E: serde::Serialize + for<'de> serde::Deserialize<'de>,
{
    pub fn open(path: PathBuf) -> anyhow::Result<(Self, Vec<Envelope<E>>)> {
        let mut out = Self {
            path,
            next_index: 1,
            _phantom: std::marker::PhantomData,
        };
        let replay = out.load_replay()?;
        Ok((out, replay))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, ms: u64, entry: E) -> anyhow::Result<()> {
        let env = Envelope {
            index: self.next_index,
            ms,
            entry,
        };
        self.next_index = self.next_index.saturating_add(1);

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let line = serde_json::to_string(&env)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        f.write_all(line.as_bytes())?;
        f.write_all(b"\n")?;
        f.flush()?;
        Ok(())
    }

    fn load_replay(&mut self) -> anyhow::Result<Vec<Envelope<E>>> {
        let f = match std::fs::File::open(&self.path) {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let rd = BufReader::new(f);

        let mut out = Vec::new();
        let mut max_index = 0u64;
        for (lineno, line) in rd.lines().enumerate() {
            let line = line?;
            let raw = line.trim();
            if raw.is_empty() {
                continue;
            }
            let env: Envelope<E> = serde_json::from_str(raw).map_err(|e| {
                anyhow::anyhow!(
                    "journal parse error at {}:{}: {}",
                    self.path.display(),
                    lineno + 1,
                    e
                )
            })?;
            max_index = max_index.max(env.index);
            out.push(env);
        }
        self.next_index = max_index.saturating_add(1).max(1);
        Ok(out)
    }
}
