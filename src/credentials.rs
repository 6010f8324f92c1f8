//! 访问凭证解析
//!
//! 显式传入的 access/secret key 优先；两者任一为空时回退到环境变量。
//! 这里只做纯粹的解析，不访问网络，方便同步引擎在没有真实凭证时测试。

use crate::error::{Result, SyncError};
use std::fmt;

const ACCESS_KEY_VARS: [&str; 2] = ["AWS_ACCESS_KEY_ID", "AWS_ACCESS_KEY"];
const SECRET_KEY_VARS: [&str; 2] = ["AWS_SECRET_ACCESS_KEY", "AWS_SECRET_KEY"];

/// S3 访问凭证
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

// 不在日志中输出 secret
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

/// 从显式参数或进程环境变量解析凭证
pub fn resolve(access_key: Option<&str>, secret_key: Option<&str>) -> Result<Credentials> {
    resolve_with(access_key, secret_key, |name| std::env::var(name).ok())
}

/// 同 [`resolve`]，环境变量查找由调用方提供
pub fn resolve_with<F>(access_key: Option<&str>, secret_key: Option<&str>, env: F) -> Result<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(String::from);

    if let (Some(access_key), Some(secret_key)) = (non_empty(access_key), non_empty(secret_key)) {
        tracing::debug!("使用命令行传入的访问凭证");
        return Ok(Credentials {
            access_key,
            secret_key,
        });
    }

    tracing::debug!(
        "从环境变量 {} 和 {} 读取访问凭证",
        ACCESS_KEY_VARS.join("/"),
        SECRET_KEY_VARS.join("/")
    );

    let lookup = |names: &[&str]| {
        names
            .iter()
            .filter_map(|name| env(name))
            .find(|v| !v.trim().is_empty())
    };

    let access_key = lookup(&ACCESS_KEY_VARS).ok_or_else(|| {
        SyncError::Auth(format!("未找到 access key，请设置 {}", ACCESS_KEY_VARS[0]))
    })?;
    let secret_key = lookup(&SECRET_KEY_VARS).ok_or_else(|| {
        SyncError::Auth(format!("未找到 secret key，请设置 {}", SECRET_KEY_VARS[0]))
    })?;

    Ok(Credentials {
        access_key,
        secret_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_explicit_overrides_win() {
        let env = env_of(&[("AWS_ACCESS_KEY_ID", "env-ak"), ("AWS_SECRET_ACCESS_KEY", "env-sk")]);
        let creds = resolve_with(Some("ak"), Some("sk"), env).unwrap();
        assert_eq!(creds.access_key, "ak");
        assert_eq!(creds.secret_key, "sk");
    }

    #[test]
    fn test_empty_overrides_fall_back_to_env() {
        let env = env_of(&[("AWS_ACCESS_KEY_ID", "env-ak"), ("AWS_SECRET_ACCESS_KEY", "env-sk")]);
        let creds = resolve_with(Some(""), None, env).unwrap();
        assert_eq!(creds.access_key, "env-ak");
        assert_eq!(creds.secret_key, "env-sk");
    }

    #[test]
    fn test_legacy_env_names() {
        let env = env_of(&[("AWS_ACCESS_KEY", "old-ak"), ("AWS_SECRET_KEY", "old-sk")]);
        let creds = resolve_with(None, None, env).unwrap();
        assert_eq!(creds.access_key, "old-ak");
        assert_eq!(creds.secret_key, "old-sk");
    }

    #[test]
    fn test_missing_credentials() {
        let env = env_of(&[("AWS_ACCESS_KEY_ID", "env-ak")]);
        let err = resolve_with(None, None, env).unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
    }

    #[test]
    fn test_debug_hides_secret() {
        let creds = Credentials {
            access_key: "ak".to_string(),
            secret_key: "very-secret".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("very-secret"));
    }
}
