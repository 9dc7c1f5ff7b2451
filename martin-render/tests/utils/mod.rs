#![cfg(test)]
#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use martin_render::{
    BackendError, BuildOptions, MapBuilder, Parameters, RenderConfig, RenderContext,
    RenderOptions, Renderer, SourceIdentity, SourceRegistry, TileData, TileSource,
};
use tempfile::TempDir;
use tokio::time::sleep;

/// Payload returned by [`MockRenderer`].
pub const TILE: &[u8] = b"\x89PNG";

/// Parses `key=value` lines. Any other non-empty line is a parse error.
#[derive(Debug, Clone, Default)]
pub struct MockBuilder {
    pub builds: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl MockBuilder {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MockContext {
    pub serial: usize,
    pub parameters: Parameters,
    pub options: BuildOptions,
    pub extent: Option<[f64; 4]>,
}

impl RenderContext for MockContext {
    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn set_extent(&mut self, extent: [f64; 4]) {
        self.extent = Some(extent);
    }
}

#[async_trait]
impl MapBuilder for MockBuilder {
    type Context = MockContext;

    async fn build(
        &self,
        definition: &str,
        options: &BuildOptions,
    ) -> Result<MockContext, BackendError> {
        let serial = self.builds.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        let mut parameters = Parameters::new();
        for line in definition.lines().map(str::trim).filter(|v| !v.is_empty()) {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| format!("unexpected line {line:?}"))?;
            parameters.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(MockContext {
            serial,
            parameters,
            options: options.clone(),
            extent: None,
        })
    }
}

/// Records what it renders and returns [`TILE`], or fails while `fail` is set.
#[derive(Debug, Clone, Default)]
pub struct MockRenderer {
    pub renders: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
    pub calls: Arc<Mutex<Vec<(usize, [f64; 4], RenderOptions)>>>,
    pub delay: Duration,
}

impl MockRenderer {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(usize, [f64; 4], RenderOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer<MockContext> for MockRenderer {
    async fn render(
        &self,
        context: &mut MockContext,
        options: &RenderOptions,
    ) -> Result<TileData, BackendError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let extent = context.extent.ok_or("extent was not set")?;
        self.calls
            .lock()
            .unwrap()
            .push((context.serial, extent, *options));
        if self.fail.load(Ordering::SeqCst) {
            return Err("renderer failure".into());
        }
        Ok(TILE.to_vec())
    }
}

pub type MockSource = TileSource<MockBuilder, MockRenderer>;
pub type MockRegistry = SourceRegistry<MockBuilder, MockRenderer>;

/// Writes a map definition into `dir` and returns its path.
pub fn definition(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

pub fn config(pool_size: usize) -> RenderConfig {
    RenderConfig {
        pool_size: Some(pool_size),
        ..RenderConfig::default()
    }
}

pub fn registry(builder: &MockBuilder, renderer: &MockRenderer, pool_size: usize) -> MockRegistry {
    SourceRegistry::new(builder.clone(), renderer.clone(), config(pool_size))
}

/// Initializes a source without a registry.
pub async fn open_source(
    identity: SourceIdentity,
    builder: &MockBuilder,
    renderer: &MockRenderer,
    config: &RenderConfig,
) -> MockSource {
    TileSource::initialize(
        identity,
        Arc::new(builder.clone()),
        Arc::new(renderer.clone()),
        config,
    )
    .await
    .unwrap()
}
