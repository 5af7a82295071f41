/// 通用工具函数
pub mod common {
    /// 格式化字节数
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", bytes, UNITS[unit_index])
        } else {
            format!("{:.1} {}", size, UNITS[unit_index])
        }
    }

    /// 前端 uplMaxSize 使用的简写形式，如 "256M"
    pub fn size_shorthand(bytes: u64) -> String {
        const MB: u64 = 1024 * 1024;
        const KB: u64 = 1024;

        if bytes >= MB && bytes % MB == 0 {
            format!("{}M", bytes / MB)
        } else if bytes >= KB && bytes % KB == 0 {
            format!("{}K", bytes / KB)
        } else {
            bytes.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::common::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
    }

    #[test]
    fn test_size_shorthand() {
        assert_eq!(size_shorthand(256 * 1024 * 1024), "256M");
        assert_eq!(size_shorthand(2048), "2K");
        assert_eq!(size_shorthand(1000), "1000");
    }
}
