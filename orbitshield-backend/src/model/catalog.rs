use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use orbitshield_common::ObjectClass;

use super::types::TrackedObject;
use crate::module::propagator::parse_elements;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("an object named '{0}' already exists")]
    DuplicateName(String),

    #[error("invalid element set: {0}")]
    InvalidElements(String),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Read side of the tracked-object catalog, consulted once per tick
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn tracked_objects(&self) -> Result<Vec<TrackedObject>, CatalogError>;
}

/// 新增对象请求
#[derive(Debug, Clone, Deserialize)]
pub struct NewObject {
    pub name: String,
    #[serde(rename = "type")]
    pub class: ObjectClass,
    #[serde(default)]
    pub tle_line1: Option<String>,
    #[serde(default)]
    pub tle_line2: Option<String>,
    #[serde(default)]
    pub size: Option<f64>,
}

fn check_new_object(existing: &[TrackedObject], obj: &NewObject) -> Result<(), CatalogError> {
    if existing.iter().any(|o| o.name == obj.name) {
        return Err(CatalogError::DuplicateName(obj.name.clone()));
    }
    match (&obj.tle_line1, &obj.tle_line2) {
        (Some(l1), Some(l2)) => {
            parse_elements(&obj.name, l1, l2)
                .map_err(|e| CatalogError::InvalidElements(e.to_string()))?;
        }
        (None, None) => {}
        _ => {
            return Err(CatalogError::InvalidElements(
                "both element lines are required".to_string(),
            ));
        }
    }
    Ok(())
}

fn next_id(existing: &[TrackedObject]) -> i64 {
    existing.iter().map(|o| o.id).max().unwrap_or(0) + 1
}

/// JSON 文件目录存储
///
/// 内存中保存全部对象，每次写入同步落盘。
pub struct JsonCatalog {
    path: PathBuf,
    objects: RwLock<Vec<TrackedObject>>,
}

impl JsonCatalog {
    /// 打开目录文件，不存在时返回空目录
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();

        let objects = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            let objects: Vec<TrackedObject> = serde_json::from_str(&content)?;
            info!("Loaded {} tracked objects from {:?}", objects.len(), path);
            objects
        } else {
            debug!("Catalog file does not exist: {:?}", path);
            Vec::new()
        };

        Ok(Self {
            path,
            objects: RwLock::new(objects),
        })
    }

    pub async fn list(&self) -> Vec<TrackedObject> {
        self.objects.read().await.clone()
    }

    /// 添加对象并写回文件
    pub async fn add_object(&self, obj: NewObject) -> Result<TrackedObject, CatalogError> {
        let mut objects = self.objects.write().await;
        check_new_object(&objects, &obj)?;

        let record = TrackedObject {
            id: next_id(&objects),
            name: obj.name,
            class: obj.class,
            tle_line1: obj.tle_line1,
            tle_line2: obj.tle_line2,
            size: obj.size,
        };
        objects.push(record.clone());

        if let Err(e) = self.save(&objects).await {
            objects.pop();
            return Err(e);
        }

        info!(id = record.id, name = %record.name, class = %record.class, "Added tracked object");
        Ok(record)
    }

    async fn save(&self, objects: &[TrackedObject]) -> Result<(), CatalogError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(objects)?;
        fs::write(&self.path, content).await?;
        debug!("Saved {} tracked objects to {:?}", objects.len(), self.path);
        Ok(())
    }
}

#[async_trait]
impl CatalogSource for JsonCatalog {
    async fn tracked_objects(&self) -> Result<Vec<TrackedObject>, CatalogError> {
        Ok(self.list().await)
    }
}

/// In-memory catalog without persistence
#[derive(Default)]
pub struct MemoryCatalog {
    objects: Vec<TrackedObject>,
}

impl MemoryCatalog {
    pub fn new(objects: Vec<TrackedObject>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl CatalogSource for MemoryCatalog {
    async fn tracked_objects(&self) -> Result<Vec<TrackedObject>, CatalogError> {
        Ok(self.objects.clone())
    }
}
