use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// 连接器配置
///
/// 进程启动时加载一次，运行期间不可变。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// 暴露给前端的根目录，所有操作都被限制在该目录内
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// 监听地址，默认为 127.0.0.1
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// 监听端口，默认为 8765
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// 连接器的 HTTP 路径
    #[serde(default = "default_connector_path")]
    pub connector_path: String,

    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// 根目录在前端显示的名称
    #[serde(default = "default_root_alias")]
    pub root_alias: String,

    /// 单个上传文件的最大字节数
    #[serde(default = "default_upload_max_size")]
    pub upload_max_size: u64,

    /// 上传时请求未指定 overwrite 参数时是否覆盖同名文件
    #[serde(default = "default_true")]
    pub upload_overwrite: bool,

    /// 粘贴时请求未指定 overwrite 参数时是否覆盖同名文件
    #[serde(default = "default_true")]
    pub copy_overwrite: bool,

    /// 上传暂存目录，未设置时使用系统临时目录
    #[serde(default)]
    pub upload_tmp_dir: Option<PathBuf>,

    /// 是否启用 archive / extract 命令
    #[serde(default = "default_true")]
    pub archivers_enabled: bool,

    /// 是否显示以 . 开头的文件
    #[serde(default)]
    pub dot_files: bool,

    /// 目录大小是否递归统计
    #[serde(default)]
    pub dir_size: bool,

    /// 是否在条目中返回真实路径
    #[serde(default)]
    pub expose_real_path: bool,

    /// 禁用的命令
    #[serde(default)]
    pub disabled: Vec<String>,

    /// 默认权限
    #[serde(default)]
    pub defaults: AccessDefaults,

    /// 按路径匹配的权限规则，第一个匹配的规则生效
    #[serde(default)]
    pub perms: Vec<PermRule>,

    /// 允许上传的 MIME 前缀，"all" 匹配所有类型
    #[serde(default)]
    pub upload_allow: Vec<String>,

    /// 禁止上传的 MIME 前缀，"all" 匹配所有类型
    #[serde(default)]
    pub upload_deny: Vec<String>,

    /// allow / deny 规则的判定顺序
    #[serde(default)]
    pub upload_order: UploadOrder,
}

/// 上传类型规则的判定顺序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadOrder {
    /// 命中 allow 即允许，否则命中 deny 拒绝，其余允许
    #[default]
    #[serde(rename = "deny,allow")]
    DenyAllow,
    /// 命中 deny 即拒绝，否则仅允许命中 allow 的类型
    #[serde(rename = "allow,deny")]
    AllowDeny,
}

impl UploadOrder {
    /// 规则名，前端 uploadMime.firstOrder 使用
    pub fn first(&self) -> &'static str {
        match self {
            UploadOrder::DenyAllow => "deny",
            UploadOrder::AllowDeny => "allow",
        }
    }
}

/// 默认访问权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDefaults {
    #[serde(default = "default_true")]
    pub read: bool,
    #[serde(default = "default_true")]
    pub write: bool,
    #[serde(default = "default_true")]
    pub rm: bool,
}

impl Default for AccessDefaults {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
            rm: true,
        }
    }
}

/// 权限规则：pattern 是针对根目录相对路径（以 / 开头）的正则表达式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermRule {
    pub pattern: String,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default)]
    pub write: Option<bool>,
    #[serde(default)]
    pub rm: Option<bool>,
}

// 默认配置值函数
fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    8765
}

fn default_connector_path() -> String {
    "/connector".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_root_alias() -> String {
    "Home".to_string()
}

fn default_upload_max_size() -> u64 {
    256 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            bind_host: default_bind_host(),
            bind_port: default_bind_port(),
            connector_path: default_connector_path(),
            log_level: default_log_level(),
            root_alias: default_root_alias(),
            upload_max_size: default_upload_max_size(),
            upload_overwrite: true,
            copy_overwrite: true,
            upload_tmp_dir: None,
            archivers_enabled: true,
            dot_files: false,
            dir_size: false,
            expose_real_path: false,
            disabled: Vec::new(),
            defaults: AccessDefaults::default(),
            perms: Vec::new(),
            upload_allow: Vec::new(),
            upload_deny: Vec::new(),
            upload_order: UploadOrder::default(),
        }
    }
}

impl ConnectorConfig {
    /// 以指定根目录创建默认配置
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;

        let config: ConnectorConfig = toml::from_str(&content)
            .with_context(|| format!("无法解析配置文件: {:?}", path.as_ref()))?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        // 确保目录存在
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("无法创建目录: {:?}", parent))?;
            }
        }

        // 序列化并保存
        let content = toml::to_string_pretty(self).with_context(|| "无法序列化配置")?;

        std::fs::write(&path, content)
            .with_context(|| format!("无法写入配置文件: {:?}", path.as_ref()))?;

        Ok(())
    }

    /// 按 upload_allow / upload_deny / upload_order 判断该 MIME 类型能否上传
    pub fn upload_allowed(&self, mime: &str) -> bool {
        let matches = |rules: &[String]| {
            rules
                .iter()
                .any(|rule| rule == "all" || mime.starts_with(rule.as_str()))
        };
        let allow = matches(&self.upload_allow);
        let deny = matches(&self.upload_deny);

        match self.upload_order {
            UploadOrder::AllowDeny => allow && !deny,
            UploadOrder::DenyAllow => allow || !deny,
        }
    }

    /// 获取绑定地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    /// 上传暂存目录
    pub fn staging_dir(&self) -> PathBuf {
        self.upload_tmp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// 检查配置是否可用于启动
    pub fn validate(&self) -> Result<()> {
        if !self.root.exists() {
            bail!("根目录不存在: {}", self.root.display());
        }
        if !self.root.is_dir() {
            bail!("根目录不是目录: {}", self.root.display());
        }
        if !self.connector_path.starts_with('/') {
            bail!("connector_path 必须以 / 开头: {}", self.connector_path);
        }
        if self.upload_max_size == 0 {
            bail!("upload_max_size 必须大于 0");
        }
        Ok(())
    }

    /// 尝试查找配置文件
    pub fn find_config_file() -> Option<PathBuf> {
        // 1. 当前目录下的elfport.toml
        let current_dir = Path::new("elfport.toml");
        if current_dir.exists() {
            info!("使用自动检测的配置文件: {}", current_dir.display());
            return Some(current_dir.to_path_buf());
        }

        // 2. 用户配置目录
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("elfport").join("config.toml");
            if user_config.exists() {
                info!("使用用户配置目录配置文件: {}", user_config.display());
                return Some(user_config);
            }
        }

        // 3. 系统配置目录
        #[cfg(not(windows))]
        {
            let system_config = Path::new("/etc/elfport/config.toml");
            if system_config.exists() {
                info!("使用系统配置目录配置文件: {}", system_config.display());
                return Some(system_config.to_path_buf());
            }
        }

        None
    }
}
