//! 세션 상태 - 마지막으로 수집한 네임스페이스
//!
//! 호출자가 명시적으로 load / save 합니다. 파일이 없으면 빈 상태로 시작합니다.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// 질의 기본 대상 네임스페이스
    pub current_namespace: Option<String>,
    /// 마지막 수집 시각 (RFC 3339)
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl SessionState {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file: {:?}", path))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse session file: {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write session file: {:?}", path))
    }

    /// 새로 수집한 네임스페이스를 현재 대상으로
    pub fn set_current(&mut self, namespace: &str) {
        self.current_namespace = Some(namespace.to_string());
        self.updated_at = Some(chrono::Local::now().to_rfc3339());
    }

    /// 삭제된 네임스페이스가 현재 대상이면 비움
    pub fn forget(&mut self, namespace: &str) -> bool {
        if self.current_namespace.as_deref() == Some(namespace) {
            self.current_namespace = None;
            self.updated_at = Some(chrono::Local::now().to_rfc3339());
            true
        } else {
            false
        }
    }
}
