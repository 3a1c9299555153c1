//! Preferences — 嵌入式键值存储
//!
//! 每个命名 store 对应磁盘上的一个 JSON 文件（`<dir>/<name>.json`），
//! 值为字符串。每次写入都整体重写文件：先写临时文件再 rename。

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use super::store::StoreError;

pub struct Preferences {
    path: PathBuf,
    /// 串行化同一进程内的读-改-写
    lock: Mutex<()>,
}

impl Preferences {
    /// 打开（必要时创建目录）名为 `name` 的 store
    pub fn open(dir: &Path, name: &str) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(format!("{}.json", name)),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(self.read_all()?.remove(key))
    }

    pub fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut all = self.read_all()?;
        all.insert(key.to_string(), value.to_string());
        self.write_all(&all)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut all = self.read_all()?;
        if all.remove(key).is_some() {
            self.write_all(&all)?;
        }
        Ok(())
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_all(&self, all: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(all)?;

        // 先写临时文件再 rename，避免写一半的文件
        let temp_path = self.path.with_extension("json.tmp");
        {
            let mut temp_file = fs::File::create(&temp_path)?;
            temp_file.write_all(content.as_bytes())?;
            temp_file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        debug!(path = ?self.path, keys = all.len(), "Preferences written");
        Ok(())
    }
}
