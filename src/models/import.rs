// 凭据列表批量导入解析
//
// 每行形如 `IP<分隔符>用户名<分隔符>密码`，分隔符为 ; , | 之一，
// 用户名/密码允许为空；没有 IP 的行静默跳过

use super::credential::CredentialKey;

/// 分隔符集合
const SEPARATORS: [char; 3] = [';', ',', '|'];

/// 解析自由文本凭据列表
/// 返回解析成功的 (ip, username, password) 记录，坏行直接丢弃
pub fn parse_credential_list(content: &str) -> Vec<CredentialKey> {
    let mut results = Vec::new();
    for line in content.lines() {
        if let Some(record) = parse_line(line) {
            results.push(record);
        }
    }
    results
}

/// 解析单行
fn parse_line(line: &str) -> Option<CredentialKey> {
    let fields: Vec<&str> = line.split(&SEPARATORS[..]).collect();
    // IP 字段后面必须还跟着用户名和密码两个字段
    for (i, field) in fields.iter().enumerate() {
        if let Some(ip) = extract_ipv4(field) {
            if fields.len() >= i + 3 {
                return Some(CredentialKey {
                    ip,
                    username: fields[i + 1].to_string(),
                    password: fields[i + 2].to_string(),
                });
            }
            return None;
        }
    }
    None
}

/// 在字段里找第一个点分四段的 IPv4 字面量
/// 每段 1-3 位数字，前后允许夹杂其他文本
fn extract_ipv4(field: &str) -> Option<String> {
    let bytes = field.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        if bytes[start].is_ascii_digit() {
            if let Some(ip) = match_ipv4_at(bytes, start) {
                return Some(ip);
            }
        }
        start += 1;
    }
    None
}

/// 尝试从 offset 处匹配 `d{1,3}.d{1,3}.d{1,3}.d{1,3}`
fn match_ipv4_at(bytes: &[u8], offset: usize) -> Option<String> {
    let mut pos = offset;
    let mut octets = 0;
    while octets < 4 {
        let digit_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() && pos - digit_start < 3 {
            pos += 1;
        }
        if pos == digit_start {
            return None;
        }
        octets += 1;
        if octets < 4 {
            if pos < bytes.len() && bytes[pos] == b'.' {
                pos += 1;
            } else {
                return None;
            }
        }
    }
    Some(String::from_utf8_lossy(&bytes[offset..pos]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_semicolon_line() {
        let records = parse_credential_list("10.0.0.5;user1;pass1");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ip, "10.0.0.5");
        assert_eq!(records[0].username, "user1");
        assert_eq!(records[0].password, "pass1");
    }

    #[test]
    fn test_parse_mixed_separators() {
        let records = parse_credential_list("192.168.1.1,root|secret");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ip, "192.168.1.1");
        assert_eq!(records[0].username, "root");
        assert_eq!(records[0].password, "secret");
    }

    #[test]
    fn test_parse_skips_lines_without_ip() {
        let records = parse_credential_list("hello;world;nope\nnot an ip at all");
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_allows_empty_fields() {
        let records = parse_credential_list("10.0.0.5;;");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].username, "");
        assert_eq!(records[0].password, "");
    }

    #[test]
    fn test_parse_requires_two_fields_after_ip() {
        // 只有 IP 和用户名，缺密码字段
        assert!(parse_credential_list("10.0.0.5;user1").is_empty());
    }

    #[test]
    fn test_parse_multiple_lines() {
        let content = "10.0.0.1;a;b\ngarbage\n10.0.0.2|c|d\n";
        let records = parse_credential_list(content);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ip, "10.0.0.1");
        assert_eq!(records[1].ip, "10.0.0.2");
    }

    #[test]
    fn test_extract_ipv4_inside_text() {
        assert_eq!(extract_ipv4("id1 10.0.0.5"), Some("10.0.0.5".to_string()));
        assert_eq!(extract_ipv4("1.2.3"), None);
        assert_eq!(extract_ipv4("abc"), None);
    }
}
