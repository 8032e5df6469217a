//! Portfolio persistence.
//!
//! The engine never touches this module; callers load a `Portfolio` here and
//! hand a snapshot of it to `engine::run_backtest`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{NewPortfolio, Portfolio, PortfolioPatch};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("portfolio not found: {0}")]
    NotFound(String),
    #[error("storage io error: {0}")]
    Io(#[from] io::Error),
    #[error("storage encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

pub trait PortfolioStore {
    fn list(&self) -> StorageResult<Vec<Portfolio>>;
    fn get(&self, id: &str) -> StorageResult<Option<Portfolio>>;
    fn create(&self, data: NewPortfolio) -> StorageResult<Portfolio>;
    fn update(&self, id: &str, patch: PortfolioPatch) -> StorageResult<Portfolio>;
    fn delete(&self, id: &str) -> StorageResult<()>;
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn new_record(data: NewPortfolio) -> Portfolio {
    let now = now();
    Portfolio {
        id: Uuid::new_v4().to_string(),
        name: data.name,
        description: data.description,
        assets: data.assets,
        rebalancing: data.rebalancing,
        backtest_period: data.backtest_period,
        created_at: now.clone(),
        updated_at: now,
    }
}

fn apply_update(portfolios: &mut [Portfolio], id: &str, patch: PortfolioPatch) -> StorageResult<Portfolio> {
    let existing = portfolios
        .iter_mut()
        .find(|p| p.id == id)
        .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
    patch.apply(existing);
    existing.updated_at = now();
    Ok(existing.clone())
}

fn remove(portfolios: &mut Vec<Portfolio>, id: &str) -> StorageResult<()> {
    let index = portfolios
        .iter()
        .position(|p| p.id == id)
        .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
    portfolios.remove(index);
    Ok(())
}

/// Keeps every portfolio as one JSON array in a single file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> StorageResult<Vec<Portfolio>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str(&raw) {
            Ok(portfolios) => Ok(portfolios),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "unreadable portfolio file, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    fn write_all(&self, portfolios: &[Portfolio]) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(portfolios)?)?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), count = portfolios.len(), "portfolios written");
        Ok(())
    }
}

impl PortfolioStore for JsonFileStore {
    fn list(&self) -> StorageResult<Vec<Portfolio>> {
        self.read_all()
    }

    fn get(&self, id: &str) -> StorageResult<Option<Portfolio>> {
        Ok(self.read_all()?.into_iter().find(|p| p.id == id))
    }

    fn create(&self, data: NewPortfolio) -> StorageResult<Portfolio> {
        let mut portfolios = self.read_all()?;
        let portfolio = new_record(data);
        portfolios.push(portfolio.clone());
        self.write_all(&portfolios)?;
        tracing::info!(id = %portfolio.id, name = %portfolio.name, "portfolio created");
        Ok(portfolio)
    }

    fn update(&self, id: &str, patch: PortfolioPatch) -> StorageResult<Portfolio> {
        let mut portfolios = self.read_all()?;
        let updated = apply_update(&mut portfolios, id, patch)?;
        self.write_all(&portfolios)?;
        tracing::info!(id, "portfolio updated");
        Ok(updated)
    }

    fn delete(&self, id: &str) -> StorageResult<()> {
        let mut portfolios = self.read_all()?;
        remove(&mut portfolios, id)?;
        self.write_all(&portfolios)?;
        tracing::info!(id, "portfolio deleted");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    portfolios: Mutex<Vec<Portfolio>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Portfolio>> {
        // every mutation leaves the vec consistent, so poisoning is ignored
        self.portfolios.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PortfolioStore for MemoryStore {
    fn list(&self) -> StorageResult<Vec<Portfolio>> {
        Ok(self.lock().clone())
    }

    fn get(&self, id: &str) -> StorageResult<Option<Portfolio>> {
        Ok(self.lock().iter().find(|p| p.id == id).cloned())
    }

    fn create(&self, data: NewPortfolio) -> StorageResult<Portfolio> {
        let portfolio = new_record(data);
        self.lock().push(portfolio.clone());
        Ok(portfolio)
    }

    fn update(&self, id: &str, patch: PortfolioPatch) -> StorageResult<Portfolio> {
        apply_update(&mut self.lock(), id, patch)
    }

    fn delete(&self, id: &str) -> StorageResult<()> {
        remove(&mut self.lock(), id)
    }
}
