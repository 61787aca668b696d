use std::env;

/// 读取布尔型环境变量：支持 true/false/1/0（大小写不敏感）
pub fn env_is_true(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim();
            v.eq_ignore_ascii_case("true") || v == "1"
        }
        Err(_) => default,
    }
}

/// 读取字符串环境变量，若不存在则返回默认值
pub fn env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) => v,
        Err(_) => default.to_string(),
    }
}

/// 读取可选字符串环境变量，空字符串视为未配置
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 读取 i64 环境变量，不存在或解析失败返回默认值
pub fn env_i64(key: &str, default: i64) -> i64 {
    match env::var(key) {
        Ok(v) => v.trim().parse::<i64>().ok().unwrap_or(default),
        Err(_) => default,
    }
}

/// 读取 u64 环境变量，不存在或解析失败返回默认值
pub fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(default),
        Err(_) => default,
    }
}

/// 读取 f64 环境变量，不存在或解析失败返回默认值
pub fn env_f64(key: &str, default: f64) -> f64 {
    match env::var(key) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_defaults_when_missing() {
        let key = "RUST_QUANT_AGENT_TEST_MISSING_KEY";
        env::remove_var(key);
        assert!(env_is_true(key, true));
        assert_eq!(env_or_default(key, "x"), "x");
        assert_eq!(env_opt(key), None);
        assert_eq!(env_i64(key, -3), -3);
        assert_eq!(env_u64(key, 7), 7);
        assert_eq!(env_f64(key, 1.5), 1.5);
    }

    #[test]
    fn test_env_parse_values() {
        let key = "RUST_QUANT_AGENT_TEST_PARSE_KEY";
        env::set_var(key, " 42 ");
        assert_eq!(env_i64(key, 0), 42);
        assert_eq!(env_u64(key, 0), 42);
        assert_eq!(env_opt(key).as_deref(), Some("42"));
        env::set_var(key, "TRUE");
        assert!(env_is_true(key, false));
        env::set_var(key, "  ");
        assert_eq!(env_opt(key), None);
        env::remove_var(key);
    }
}
