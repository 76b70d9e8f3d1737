//! Deterministic capabilities for unit tests

use super::{Capabilities, StageContext};
use crate::clone::Cloner;
use crate::config::Config;
use crate::embed::{Embedder, HashingEmbedder};
use crate::error::{Error, Result};
use crate::llm::LanguageModel;
use crate::meta::MetaDb;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Writes a fixed file set and reports a settable commit hash
pub struct FixtureCloner {
    files: Mutex<Vec<(String, String)>>,
    commit: Mutex<String>,
    pub calls: AtomicUsize,
}

impl FixtureCloner {
    pub fn new(files: &[(&str, &str)], commit: &str) -> Self {
        Self {
            files: Mutex::new(
                files
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.to_string()))
                    .collect(),
            ),
            commit: Mutex::new(commit.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_commit(&self, commit: &str) {
        *self.commit.lock().unwrap() = commit.to_string();
    }

    pub fn set_file(&self, path: &str, content: &str) {
        let mut files = self.files.lock().unwrap();
        files.retain(|(p, _)| p != path);
        files.push((path.to_string(), content.to_string()));
    }
}

#[async_trait]
impl Cloner for FixtureCloner {
    async fn clone_repo(&self, url: &str, _git_ref: Option<&str>, dest: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if url.contains("missing") {
            return Err(Error::RemoteNotFound(url.to_string()));
        }
        let files = self.files.lock().unwrap().clone();
        for (rel, content) in files {
            let path = dest.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        Ok(self.commit.lock().unwrap().clone())
    }
}

/// Embedder that fails its first `failures` calls with a rate limit
pub struct FlakyEmbedder {
    inner: HashingEmbedder,
    failures: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: HashingEmbedder::new("test-hashing".to_string(), 64),
            failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `failures` calls
    pub fn fail_next(&self, failures: usize) {
        self.failures.store(failures, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::RateLimited("slow down".to_string()));
        }
        self.inner.embed(texts).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

type Script = Box<dyn Fn(&str, &str) -> Result<String> + Send + Sync>;

/// Language model answering from a closure over `(context, instructions)`
pub struct ScriptedLlm {
    script: Script,
    pub calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(script: impl Fn(&str, &str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always replies with `reply`
    pub fn fixed(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_, _| Ok(reply.clone()))
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, context: &str, instructions: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(context, instructions)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub const WIDGET_FILES: &[(&str, &str)] = &[
    (
        "config/parser.py",
        "import json\n\n\ndef parse_config(path):\n    \"\"\"Parse the config file at path.\"\"\"\n    with open(path) as fh:\n        return json.load(fh)\n",
    ),
    (
        "src/main.rs",
        "fn main() {\n    let config = widget::load_settings();\n    println!(\"starting widget with {:?}\", config);\n}\n",
    ),
    (
        "web/app.ts",
        "export function render(target: string): void {\n  document.title = target;\n}\n",
    ),
    ("README.md", "# widget\n\nA small widget service used in tests.\n"),
];

/// Config rooted in a temp dir with fast retries
pub fn test_config(base: &Path) -> Config {
    let mut config = Config::default();
    config.init_paths(Some(base.to_path_buf()));
    config.embedding.backend = "hashing".to_string();
    config.embedding.model = "test-hashing".to_string();
    config.embedding.dimension = 64;
    config.embedding.batch_size = 2;
    config.embedding.requests_per_second = 1000;
    config.jobs.poll_interval_ms = 10;
    config.jobs.backoff_base_ms = 5;
    config.jobs.backoff_max_ms = 20;
    config.jobs.auto_advance = false;
    config.search.min_score = 0.0;
    config.tutor.min_score = 0.05;
    config
}

pub struct TestEnv {
    pub ctx: StageContext,
    pub cloner: Arc<FixtureCloner>,
    pub _tmp: TempDir,
}

/// Fresh database and context with the widget fixture and a fixed LLM reply
pub async fn test_env(llm: ScriptedLlm) -> TestEnv {
    test_env_with(llm, Arc::new(FlakyEmbedder::new(0)), |_| {}).await
}

pub async fn test_env_with(
    llm: ScriptedLlm,
    embedder: Arc<dyn Embedder>,
    tweak: impl FnOnce(&mut Config),
) -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    tweak(&mut config);
    let db = MetaDb::new(&config.paths.db_file).await.unwrap();
    let cloner = Arc::new(FixtureCloner::new(WIDGET_FILES, "c0ffee01"));
    let caps = Capabilities {
        cloner: cloner.clone(),
        embedder,
        llm: Arc::new(llm),
    };
    TestEnv {
        ctx: StageContext::new(config, db, caps),
        cloner,
        _tmp: tmp,
    }
}
