use indicatif::ProgressStyle;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .unwrap()
        .progress_chars("#>-")
}

/// 用于长度未知的进度，例如边扫描边处理
pub fn pb_style_speed() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {pos} ({per_sec}) {msg}")
        .unwrap()
}

/// 由名称派生记录 ID：blake3 摘要的前 16 字节，32 位十六进制
pub fn content_id(name: &str) -> String {
    let hash = blake3::hash(name.as_bytes());
    hash.to_hex()[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_is_stable() {
        let id = content_id("face_0001");
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, content_id("face_0001"));
        assert_ne!(id, content_id("face_0002"));
    }
}
