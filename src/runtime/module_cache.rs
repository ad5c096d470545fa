//! 模块缓存
//!
//! Two maps keyed by [`ResourceKey`]:
//!
//! | 映射 | 含义 | 生命周期 |
//! |------|------|---------|
//! | `modules` | 每个资源最近一次加载得到的模块环境 | worker 生命周期 |
//! | `checked` | 本次顶层调用中已经检查过的模块 | 一次顶层 `invoke` |
//!
//! In [`CacheMode::Release`] the checked view *is* `modules`: a module is
//! loaded once per worker and never rechecked. In [`CacheMode::Development`]
//! the checked view is a separate map that the worker clears at the start of
//! every top-level call, so staleness is rechecked once per external call.
//!
//! The cache has its own short-lived lock for memory safety only. Check-then-act
//! sequences must run under the worker's execution serializer.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::engine::ModuleEnv;
use crate::repository::ResourceKey;

/// 缓存模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// 开发模式：每次顶层调用重新检查模块是否过期
    Development,
    /// 发布模式：模块只加载一次
    Release,
}

impl CacheMode {
    pub fn from_reloading(reloading: bool) -> Self {
        if reloading {
            CacheMode::Development
        } else {
            CacheMode::Release
        }
    }
}

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by the checked view.
    pub hits: usize,
    /// Lookups that had to go through the resolver's load.
    pub misses: usize,
    /// Environments stored into `modules`.
    pub loads: usize,
    /// Current number of entries in `modules`.
    pub entries: usize,
}

impl CacheStats {
    /// 命中率（百分比）
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    modules: HashMap<ResourceKey, ModuleEnv>,
    /// Only used in development mode.
    checked: HashMap<ResourceKey, ModuleEnv>,
    stats: CacheStats,
}

impl Inner {
    fn checked_map(
        &mut self,
        mode: CacheMode,
    ) -> &mut HashMap<ResourceKey, ModuleEnv> {
        match mode {
            CacheMode::Development => &mut self.checked,
            CacheMode::Release => &mut self.modules,
        }
    }
}

/// Per-worker module cache.
#[derive(Debug)]
pub struct ModuleCache {
    inner: Mutex<Inner>,
    mode: CacheMode,
}

impl ModuleCache {
    pub fn new(mode: CacheMode) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            mode,
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Whether the checked view and `modules` are the same map.
    pub fn checked_is_modules(&self) -> bool {
        self.mode == CacheMode::Release
    }

    /// Look a key up in the checked view, counting a hit or a miss.
    pub fn checked(
        &self,
        key: &ResourceKey,
    ) -> Option<ModuleEnv> {
        let mut inner = self.inner.lock();
        let found = inner.checked_map(self.mode).get(key).cloned();
        if found.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        found
    }

    /// Look a key up in the checked view without touching statistics.
    pub fn peek_checked(
        &self,
        key: &ResourceKey,
    ) -> Option<ModuleEnv> {
        self.inner.lock().checked_map(self.mode).get(key).cloned()
    }

    /// Record an environment in the checked view.
    pub fn mark_checked(
        &self,
        key: ResourceKey,
        env: ModuleEnv,
    ) {
        let mut inner = self.inner.lock();
        inner.checked_map(self.mode).insert(key, env);
        inner.stats.entries = inner.modules.len();
    }

    /// Drop a key from the checked view after its load failed, so the
    /// partially initialised environment is not handed out again.
    pub fn uncheck(
        &self,
        key: &ResourceKey,
    ) {
        let mut inner = self.inner.lock();
        inner.checked_map(self.mode).remove(key);
        inner.stats.entries = inner.modules.len();
    }

    /// Forget which modules were checked. No-op in release mode, where the
    /// checked view is `modules` itself.
    pub fn clear_checked(&self) {
        if self.mode == CacheMode::Development {
            self.inner.lock().checked.clear();
        }
    }

    /// Previously loaded environment, used as a refresh hint.
    pub fn get(
        &self,
        key: &ResourceKey,
    ) -> Option<ModuleEnv> {
        self.inner.lock().modules.get(key).cloned()
    }

    /// Store a loaded environment, replacing any previous one for the key.
    pub fn put(
        &self,
        key: ResourceKey,
        env: ModuleEnv,
    ) {
        let mut inner = self.inner.lock();
        inner.modules.insert(key, env);
        inner.stats.loads += 1;
        inner.stats.entries = inner.modules.len();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats.clone()
    }

    /// Keys of all loaded modules, sorted.
    pub fn cached_modules(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self.inner.lock().modules.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.lock().modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
