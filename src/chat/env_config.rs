//! 环境变量解析：非法值记录 warn 日志并回退默认值

/// 读取并解析环境变量，未设置时静默返回默认值
pub fn env_parse_with_default<T: std::str::FromStr + std::fmt::Display>(
    var: &str,
    default: T,
) -> T {
    match std::env::var(var) {
        Ok(v) => match v.parse() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(
                    "[Config] 环境变量 {} 的值 {:?} 无法解析，使用默认值 {}",
                    var,
                    v,
                    default
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// 读取字符串环境变量，未设置或为空时返回默认值
pub fn env_string_with_default(var: &str, default: &str) -> String {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}
