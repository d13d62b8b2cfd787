use std::path::{Path, PathBuf};

use crate::bufmgr::backend::BufferBackend;
use crate::result::{Error, Result};
use crate::DeviceId;

/// Where buffer backends are looked for and how their files are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    pub module_dir: PathBuf,
    pub prefix: String,
    pub suffix: String,
    /// Module tried after the override and before scanning the directory.
    pub default_module: String,
    /// Environment variable naming a module to try first.
    pub override_var: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            module_dir: PathBuf::from("/usr/lib/bufmgr"),
            prefix: "libdrm_slp_".to_owned(),
            suffix: ".so".to_owned(),
            default_module: "default".to_owned(),
            override_var: "SLP_BUFMGR_MODULE".to_owned(),
        }
    }
}

impl LoaderConfig {
    /// The module name requested through the environment, if any.
    pub fn override_name(&self) -> Option<String> {
        std::env::var(&self.override_var)
            .ok()
            .filter(|s| !s.is_empty())
    }

    pub fn file_name(&self, module: &str) -> String {
        format!("{}{}{}", self.prefix, module, self.suffix)
    }

    fn is_module_file(&self, file: &str) -> bool {
        file.contains(&self.prefix) && file.ends_with(&self.suffix)
    }

    /// File names to try, in order: the override, the default module, then
    /// every matching entry of `scanned` in reverse sorted order.
    pub fn candidates(&self, override_name: Option<&str>, scanned: &[String]) -> Vec<String> {
        let mut ret = Vec::new();
        if let Some(name) = override_name {
            ret.push(self.file_name(name));
        }
        ret.push(self.file_name(&self.default_module));
        let mut scanned: Vec<&String> = scanned
            .iter()
            .filter(|f| self.is_module_file(f))
            .collect();
        scanned.sort();
        ret.extend(scanned.into_iter().rev().cloned());
        ret
    }
}

/// Turns a module file into an initialized backend.
///
/// This is where shared-object loading would live; the manager itself only
/// sees the finished backend.
pub trait BackendProvider {
    fn load(&self, path: &Path, device: DeviceId) -> Result<Box<dyn BufferBackend>>;

    /// File names present in `dir`.
    fn scan(&self, dir: &Path) -> Result<Vec<String>> {
        let mut ret = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            if let Some(name) = entry?.file_name().to_str() {
                ret.push(name.to_owned());
            }
        }
        Ok(ret)
    }
}

/// Loads the first backend that initializes successfully. Later candidates
/// are not tried once one succeeds.
pub fn load_backend(
    config: &LoaderConfig,
    provider: &dyn BackendProvider,
    device: DeviceId,
) -> Result<Box<dyn BufferBackend>> {
    let override_name = config.override_name();
    let scanned = match provider.scan(&config.module_dir) {
        Ok(files) => files,
        Err(e) => {
            log::debug!("no backends in {}: {e}", config.module_dir.display());
            Vec::new()
        }
    };
    for file in config.candidates(override_name.as_deref(), &scanned) {
        let path = config.module_dir.join(&file);
        match provider.load(&path, device) {
            Ok(backend) => {
                log::info!("loaded buffer backend {file} for device {}", device.0);
                return Ok(backend);
            }
            Err(e) => log::debug!("could not load buffer backend {file}: {e}"),
        }
    }
    log::error!("no usable buffer backend for device {}", device.0);
    Err(Error::NonExist)
}
