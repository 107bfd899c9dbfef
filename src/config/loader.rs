//! 配置加载器实现
//!
//! 读取根配置文件以及 hosts.d / probes.d 目录下的声明文件，
//! 提供环境变量替换、名称唯一性校验和错误处理功能

use crate::config::types::{
    validate_global_config, validate_host_config, validate_probe_config, GlobalConfig,
    HostConfig, ProbeConfig, HOSTS_DIR, PROBES_DIR, ROOT_CONFIG_FILE, SCRIPTS_DIR,
};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// 加载完成的探针声明，包含脚本内容
#[derive(Debug, Clone)]
pub struct LoadedProbe {
    /// 探针声明
    pub config: ProbeConfig,
    /// 脚本内容
    pub script_body: String,
}

/// 完整的配置树
#[derive(Debug, Clone)]
pub struct ConfigTree {
    /// 配置根目录
    pub root: PathBuf,
    /// 根配置
    pub global: GlobalConfig,
    /// 启用的主机声明
    pub hosts: Vec<HostConfig>,
    /// 启用的探针声明
    pub probes: Vec<LoadedProbe>,
}

/// 配置加载器trait，定义配置加载接口
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    /// 从配置根目录加载完整配置树
    ///
    /// # 参数
    /// * `root` - 配置根目录
    ///
    /// # 返回
    /// * `Result<ConfigTree>` - 加载的配置或错误
    async fn load_tree<P: AsRef<Path> + Send>(&self, root: P) -> Result<ConfigTree>;

    /// 解析根配置内容
    fn parse_global(&self, content: &str) -> Result<GlobalConfig>;

    /// 解析主机声明内容
    fn parse_host(&self, content: &str) -> Result<HostConfig>;

    /// 解析探针声明内容
    fn parse_probe(&self, content: &str) -> Result<ProbeConfig>;
}

/// TOML配置加载器实现
#[derive(Debug, Clone)]
pub struct TomlConfigLoader {
    /// 是否启用环境变量替换
    enable_env_substitution: bool,
}

impl TomlConfigLoader {
    /// 创建新的TOML配置加载器
    ///
    /// # 参数
    /// * `enable_env_substitution` - 是否启用环境变量替换
    pub fn new(enable_env_substitution: bool) -> Self {
        Self {
            enable_env_substitution,
        }
    }

    /// 替换字符串中的环境变量
    ///
    /// # 参数
    /// * `content` - 要处理的字符串
    ///
    /// # 返回
    /// * `Result<String>` - 替换后的字符串或错误
    fn substitute_env_vars(&self, content: &str) -> Result<String> {
        if !self.enable_env_substitution {
            return Ok(content.to_string());
        }

        // 匹配 ${VAR_NAME} 格式的环境变量
        let env_var_regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| ConfigError::ParseError(format!("正则表达式错误: {}", e)))?;

        let mut result = content.to_string();

        for captures in env_var_regex.captures_iter(content) {
            let full_match = &captures[0];
            let var_name = &captures[1];

            match std::env::var(var_name) {
                Ok(value) => {
                    result = result.replace(full_match, &value);
                }
                Err(_) => {
                    return Err(ConfigError::EnvVarError {
                        var: var_name.to_string(),
                    }
                    .into());
                }
            }
        }

        Ok(result)
    }

    /// 解析TOML内容
    fn parse_toml<T: DeserializeOwned>(&self, content: &str) -> Result<T> {
        let processed_content = self.substitute_env_vars(content)?;

        let value: T = toml::from_str(&processed_content)
            .map_err(|e| ConfigError::ParseError(format!("TOML解析失败: {}", e)))?;

        Ok(value)
    }

    /// 读取并解码单个声明文件
    async fn decode_file<T, F>(&self, path: &Path, parse: F) -> Result<T>
    where
        F: Fn(&Self, &str) -> Result<T>,
    {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::DecodeError {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        parse(self, &content).map_err(|e| {
            ConfigError::DecodeError {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// 加载 hosts.d 目录
    async fn load_hosts(&self, root: &Path) -> Result<Vec<HostConfig>> {
        let files = configuration_dir_list(root, HOSTS_DIR).await?;
        let mut hosts = Vec::new();
        let mut names: HashMap<String, PathBuf> = HashMap::new();

        for file in files {
            let host = self.decode_file(&file, |loader, content| loader.parse_host(content))
                .await?;

            if host.disabled {
                log::info!("跳过已禁用的主机: {} ({})", host.name, file.display());
                continue;
            }

            if let Some(first) = names.get(&host.name) {
                return Err(ConfigError::DuplicateName {
                    kind: "主机",
                    name: host.name.clone(),
                    first: first.display().to_string(),
                    second: file.display().to_string(),
                }
                .into());
            }

            names.insert(host.name.clone(), file);
            hosts.push(host);
        }

        Ok(hosts)
    }

    /// 加载 probes.d 目录以及探针脚本
    async fn load_probes(&self, root: &Path) -> Result<Vec<LoadedProbe>> {
        let files = configuration_dir_list(root, PROBES_DIR).await?;
        let scripts_dir = root.join(SCRIPTS_DIR);
        let mut probes = Vec::new();
        let mut names: HashMap<String, PathBuf> = HashMap::new();

        for file in files {
            let probe = self.decode_file(&file, |loader, content| loader.parse_probe(content))
                .await?;

            if probe.disabled {
                log::info!("跳过已禁用的探针: {} ({})", probe.name, file.display());
                continue;
            }

            if let Some(first) = names.get(&probe.name) {
                return Err(ConfigError::DuplicateName {
                    kind: "探针",
                    name: probe.name.clone(),
                    first: first.display().to_string(),
                    second: file.display().to_string(),
                }
                .into());
            }

            let script_path = scripts_dir.join(&probe.script);
            let script_body = tokio::fs::read_to_string(&script_path)
                .await
                .map_err(|e| ConfigError::DecodeError {
                    path: file.display().to_string(),
                    reason: format!("无法读取脚本 {}: {}", script_path.display(), e),
                })?;

            names.insert(probe.name.clone(), file);
            probes.push(LoadedProbe {
                config: probe,
                script_body,
            });
        }

        Ok(probes)
    }
}

#[async_trait]
impl ConfigLoader for TomlConfigLoader {
    async fn load_tree<P: AsRef<Path> + Send>(&self, root: P) -> Result<ConfigTree> {
        let root = root.as_ref().to_path_buf();
        let global_path = root.join(ROOT_CONFIG_FILE);

        if !global_path.exists() {
            return Err(ConfigError::FileNotFound {
                path: global_path.to_string_lossy().to_string(),
            }
            .into());
        }

        let content = tokio::fs::read_to_string(&global_path)
            .await
            .map_err(|e| ConfigError::ParseError(format!("读取文件失败: {}", e)))?;
        let global = self.parse_global(&content)?;

        let hosts = self.load_hosts(&root).await?;
        log::info!("主机数量: {}", hosts.len());

        let probes = self.load_probes(&root).await?;
        log::info!("探针数量: {}", probes.len());

        log::debug!("配置内容: {:?}", global);

        Ok(ConfigTree {
            root,
            global,
            hosts,
            probes,
        })
    }

    fn parse_global(&self, content: &str) -> Result<GlobalConfig> {
        let config: GlobalConfig = self.parse_toml(content)?;
        validate_global_config(&config).map_err(ConfigError::ValidationError)?;
        Ok(config)
    }

    fn parse_host(&self, content: &str) -> Result<HostConfig> {
        let host: HostConfig = self.parse_toml(content)?;
        validate_host_config(&host).map_err(ConfigError::ValidationError)?;
        Ok(host)
    }

    fn parse_probe(&self, content: &str) -> Result<ProbeConfig> {
        let probe: ProbeConfig = self.parse_toml(content)?;
        validate_probe_config(&probe).map_err(ConfigError::ValidationError)?;
        Ok(probe)
    }
}

/// 列出配置子目录中的 *.toml 文件（按文件名排序）
///
/// # 参数
/// * `root` - 配置根目录
/// * `dir` - 子目录名称
///
/// # 返回
/// * `Result<Vec<PathBuf>>` - 声明文件列表
pub async fn configuration_dir_list(root: &Path, dir: &str) -> Result<Vec<PathBuf>> {
    let config_path = root.join(dir);

    let metadata = tokio::fs::metadata(&config_path)
        .await
        .map_err(|e| ConfigError::InvalidDirectory {
            path: config_path.display().to_string(),
            reason: e.to_string(),
        })?;

    if !metadata.is_dir() {
        return Err(ConfigError::InvalidDirectory {
            path: config_path.display().to_string(),
            reason: "不是目录".to_string(),
        }
        .into());
    }

    let mut entries = tokio::fs::read_dir(&config_path)
        .await
        .map_err(|e| ConfigError::InvalidDirectory {
            path: config_path.display().to_string(),
            reason: e.to_string(),
        })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("toml") && path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

/// 获取默认配置根目录
pub fn get_default_config_path() -> PathBuf {
    PathBuf::from("/etc/host-vitals/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const TEST_HOST_TOML: &str = r#"
name = "web-01"
classes = ["web", "prod"]

[network]
host = "10.0.0.1"
user = "monitor"
"#;

    const TEST_PROBE_WITH_ENV_VARS: &str = r#"
name = "disk"
targets = ["*"]
script = "disk.sh"
arguments = "${DISK_MOUNT}"
"#;

    #[test]
    fn test_parse_host() {
        let loader = TomlConfigLoader::new(false);
        let host = loader.parse_host(TEST_HOST_TOML).unwrap();

        assert_eq!(host.name, "web-01");
        assert_eq!(host.classes, vec!["web", "prod"]);
        assert_eq!(host.network.port, 22);
    }

    #[test]
    #[serial]
    fn test_env_var_substitution() {
        env::set_var("DISK_MOUNT", "/var");

        let loader = TomlConfigLoader::new(true);
        let probe = loader.parse_probe(TEST_PROBE_WITH_ENV_VARS).unwrap();
        assert_eq!(probe.arguments, "/var");

        env::remove_var("DISK_MOUNT");
    }

    #[test]
    #[serial]
    fn test_env_var_substitution_missing_var() {
        env::remove_var("DISK_MOUNT");

        let loader = TomlConfigLoader::new(true);
        let result = loader.parse_probe(TEST_PROBE_WITH_ENV_VARS);

        assert!(result.is_err());
        if let Err(e) = result {
            assert!(e.to_string().contains("DISK_MOUNT"));
        }
    }

    #[test]
    fn test_substitute_env_vars_disabled() {
        let loader = TomlConfigLoader::new(false);
        let content = "test ${VAR} content";
        let result = loader.substitute_env_vars(content).unwrap();
        assert_eq!(result, content);
    }

    #[test]
    fn test_parse_host_validation_error() {
        let loader = TomlConfigLoader::new(false);
        let result = loader.parse_host(
            r#"
name = ""
[network]
host = "h"
user = "u"
"#,
        );
        assert!(result.unwrap_err().to_string().contains("主机名称不能为空"));
    }

    #[tokio::test]
    async fn test_configuration_dir_list_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = dir.path().join(HOSTS_DIR);
        std::fs::create_dir(&hosts).unwrap();
        std::fs::write(hosts.join("b.toml"), "").unwrap();
        std::fs::write(hosts.join("a.toml"), "").unwrap();
        std::fs::write(hosts.join("notes.txt"), "").unwrap();

        let files = configuration_dir_list(dir.path(), HOSTS_DIR).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.toml", "b.toml"]);
    }

    #[tokio::test]
    async fn test_configuration_dir_list_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = configuration_dir_list(dir.path(), PROBES_DIR).await;
        assert!(result.unwrap_err().to_string().contains("无效的目录"));
    }

    #[test]
    fn test_get_default_config_path() {
        let path = get_default_config_path();
        assert!(path.is_absolute());
        assert!(path.to_string_lossy().contains("host-vitals"));
    }
}
